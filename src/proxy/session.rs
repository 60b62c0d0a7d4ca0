//! One forwarded client-to-backend pairing
//!
//! A session owns two detached forwarding tasks, one per direction. Both
//! consult the session's liveness flag; whichever direction stops first
//! is responsible for tearing the pairing down, unless a preemption
//! already replaced it on the controller's slot.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::ProxyState;

/// Bytes read per forwarding chunk.
pub const FORWARD_CHUNK: usize = 4096;

/// Why a forwarding direction terminated.
#[derive(Debug, thiserror::Error)]
pub enum PipeEnd {
    #[error("end of stream")]
    Eof,
    #[error("liveness flag cleared")]
    Deactivated,
    #[error("read error: {0}")]
    Read(#[source] std::io::Error),
    #[error("write error: {0}")]
    Write(#[source] std::io::Error),
}

/// A live client-to-backend pairing and its two forwarding tasks.
pub struct Session {
    /// Client endpoint. The host part is what cooldowns key on.
    pub peer: SocketAddr,
    /// When the pairing was established.
    pub started_at: DateTime<Utc>,
    /// Cleared exactly once; a session is never revived.
    active: AtomicBool,
    /// Forwarding task handles, aborted on teardown so blocked reads
    /// drop their socket halves promptly.
    pipes: Mutex<Vec<JoinHandle<()>>>,
    done_tx: watch::Sender<bool>,
}

impl Session {
    pub fn new(peer: SocketAddr) -> Arc<Self> {
        let (done_tx, _) = watch::channel(false);
        Arc::new(Self {
            peer,
            started_at: Utc::now(),
            active: AtomicBool::new(true),
            pipes: Mutex::new(Vec::new()),
            done_tx,
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Tear the pairing down: clear the liveness flag, abort both
    /// forwarding tasks (dropping their socket halves closes both
    /// connections), and signal completion.
    ///
    /// Idempotent: only the first call does anything. Returns whether
    /// this call performed the teardown.
    pub fn close(&self) -> bool {
        if !self.active.swap(false, Ordering::SeqCst) {
            return false;
        }
        for pipe in self.pipes.lock().unwrap().drain(..) {
            pipe.abort();
        }
        // send_replace stores the value even when no receiver exists
        // yet, so late closed() callers still see the teardown
        self.done_tx.send_replace(true);
        true
    }

    /// Resolves once the session has been torn down. Lets callers await
    /// teardown deterministically instead of polling the slot.
    pub async fn closed(&self) {
        let mut rx = self.done_tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Store the forwarding task handles. If a teardown already won the
    /// race, the fresh tasks are aborted on the spot.
    fn attach_pipes(&self, handles: Vec<JoinHandle<()>>) {
        let mut pipes = self.pipes.lock().unwrap();
        if self.is_active() {
            *pipes = handles;
        } else {
            for h in handles {
                h.abort();
            }
        }
    }
}

/// Wires up both forwarding directions for a freshly admitted pairing.
pub(crate) fn spawn_pipes(
    state: Arc<ProxyState>,
    session: Arc<Session>,
    client: TcpStream,
    backend: TcpStream,
) {
    let (client_read, client_write) = client.into_split();
    let (backend_read, backend_write) = backend.into_split();

    let c2b = tokio::spawn(pump(
        client_read,
        backend_write,
        Arc::clone(&session),
        Arc::clone(&state),
        "client->vnc",
    ));
    let b2c = tokio::spawn(pump(
        backend_read,
        client_write,
        Arc::clone(&session),
        state,
        "vnc->client",
    ));

    session.attach_pipes(vec![c2b, b2c]);
}

/// One forwarding direction. Runs until EOF, I/O error, or a cleared
/// liveness flag, then hands teardown to the controller.
async fn pump(
    mut src: OwnedReadHalf,
    mut dst: OwnedWriteHalf,
    session: Arc<Session>,
    state: Arc<ProxyState>,
    dir: &'static str,
) {
    let end = copy_chunks(&mut src, &mut dst, &session).await;
    tracing::info!("[pipe] [stopped] dir={} cause={}", dir, end);

    state.finish_session(&session).await;
}

async fn copy_chunks(
    src: &mut OwnedReadHalf,
    dst: &mut OwnedWriteHalf,
    session: &Session,
) -> PipeEnd {
    let mut buf = vec![0u8; FORWARD_CHUNK];
    loop {
        if !session.is_active() {
            return PipeEnd::Deactivated;
        }
        let n = match src.read(&mut buf).await {
            Ok(0) => return PipeEnd::Eof,
            Ok(n) => n,
            Err(e) => return PipeEnd::Read(e),
        };
        if let Err(e) = dst.write_all(&buf[..n]).await {
            return PipeEnd::Write(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn peer() -> SocketAddr {
        "198.51.100.4:40400".parse().unwrap()
    }

    #[test]
    fn test_new_session_is_active() {
        let session = Session::new(peer());
        assert!(session.is_active());
        assert_eq!(session.peer, peer());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let session = Session::new(peer());

        assert!(session.close(), "first close performs the teardown");
        assert!(!session.is_active());

        // both pipes hitting EOF near-simultaneously must not double-close
        assert!(!session.close());
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn test_closed_resolves_after_close() {
        let session = Session::new(peer());

        let waiter = {
            let s = Arc::clone(&session);
            tokio::spawn(async move { s.closed().await })
        };

        session.close();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("closed() must resolve once the session is torn down")
            .unwrap();
    }

    #[tokio::test]
    async fn test_closed_resolves_when_already_closed() {
        let session = Session::new(peer());
        session.close();

        // a late waiter must not hang
        tokio::time::timeout(Duration::from_secs(1), session.closed())
            .await
            .expect("closed() must resolve immediately for a dead session");
    }

    #[tokio::test]
    async fn test_attach_after_close_aborts_pipes() {
        let session = Session::new(peer());
        session.close();

        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        session.attach_pipes(vec![task]);

        // the handle was aborted rather than stored
        assert!(session.pipes.lock().unwrap().is_empty());
    }
}
