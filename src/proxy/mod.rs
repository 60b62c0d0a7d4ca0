//! Admission control
//!
//! One session slot, guarded by one lock. Every inbound connection is
//! arbitrated here: straight onto the slot when it is free, refused
//! while its host is cooling down, or put to the decision provider when
//! someone is already seated.

pub mod decision;
pub mod session;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::config::ProxyConfig;
use crate::core::SharedServerState;
use crate::network::cooldown::CooldownRegistry;
use crate::network::rfb;
use decision::{Decision, DecisionProvider};
use session::Session;

/// Reason sent to clients refused while the seat is taken.
pub const REASON_BUSY: &str =
    "The server is in use by another client. Please try again later.";

/// Reason sent when the backend display server cannot be reached.
pub const REASON_NO_BACKEND: &str =
    "Cannot reach the VNC server. Please try again later.";

/// Everything the single lock guards: the session slot and the cooldown
/// registry move together.
struct Gate {
    current: Option<Arc<Session>>,
    cooldowns: CooldownRegistry,
}

/// Admission controller: owns the session slot and arbitrates every
/// inbound connection.
pub struct ProxyState {
    pub config: ProxyConfig,
    decider: Box<dyn DecisionProvider>,
    gate: Mutex<Gate>,
    /// Serializes admission rounds so only one decision (and one slot
    /// handover) is ever in flight.
    admission: Mutex<()>,
}

impl ProxyState {
    pub fn new(config: ProxyConfig, decider: Box<dyn DecisionProvider>) -> Self {
        let cooldowns = CooldownRegistry::with_grace(config.grace_period());
        Self {
            config,
            decider,
            gate: Mutex::new(Gate {
                current: None,
                cooldowns,
            }),
            admission: Mutex::new(()),
        }
    }

    /// Accept loop. Binding failure is fatal; per-accept errors are
    /// logged and tolerated. Exits when the shared shutdown flag is set,
    /// closing any seated session on the way out.
    pub async fn run(
        state: Arc<Self>,
        bind_addr: &str,
        server: SharedServerState,
    ) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("cannot bind listener on {}", bind_addr))?;
        tracing::info!("[proxy] [ready] addr={}", bind_addr);

        loop {
            if server.lock().unwrap().should_shutdown() {
                tracing::info!("[proxy] [shutdown] stopping accept loop");
                break;
            }

            // Accept with a timeout so the shutdown flag is polled even
            // when no one is connecting.
            match tokio::time::timeout(Duration::from_millis(100), listener.accept()).await {
                Ok(Ok((stream, peer))) => {
                    tracing::info!("[proxy] [connect] peer={}", peer);
                    let s = Arc::clone(&state);
                    tokio::spawn(async move {
                        s.handle_new_connection(stream, peer).await;
                    });
                }
                Ok(Err(e)) => {
                    tracing::error!("[proxy] [accept_error] err={}", e);
                }
                Err(_) => {}
            }
        }

        let seated = { state.gate.lock().await.current.take() };
        if let Some(session) = seated {
            session.close();
            tracing::info!("[proxy] [shutdown] closed session peer={}", session.peer);
        }
        Ok(())
    }

    /// Arbitrate one accepted connection. Runs on its own task so a slow
    /// handshake or a long decision wait never blocks the accept loop.
    pub async fn handle_new_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let refusal = {
            let _round = self.admission.lock().await;
            self.arbitrate(stream, peer).await
        };
        // The refusal handshake happens outside the admission lock; its
        // linger must not stall other rounds.
        if let Some((stream, reason)) = refusal {
            rfb::refuse(stream, reason).await;
        }
    }

    /// The admission algorithm. Consumes `stream` on admission; hands it
    /// back with a reason when the client is to be refused.
    async fn arbitrate(
        self: &Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Option<(TcpStream, &'static str)> {
        let host = peer.ip().to_string();

        let seated = {
            let mut gate = self.gate.lock().await;
            // Cooldown only matters while someone is seated; an idle
            // server always gives a waiting client a fresh chance.
            if gate.current.is_some() && gate.cooldowns.is_active(&host) {
                tracing::info!("[proxy] [cooldown_reject] peer={}", peer);
                return Some((stream, REASON_BUSY));
            }
            gate.current.is_some()
        };

        if seated {
            tracing::info!("[proxy] [contention] peer={}", peer);
            match self.decide(peer).await {
                Decision::KeepCurrent => {
                    let mut gate = self.gate.lock().await;
                    gate.cooldowns.stamp(&host, Instant::now());
                    tracing::info!("[proxy] [keep_current] refused peer={}", peer);
                    return Some((stream, REASON_BUSY));
                }
                Decision::AllowNew => {
                    self.preempt_current().await;
                }
            }
        }

        self.admit(stream, peer).await
    }

    /// Bounded decision wait. Silence, however it happens, hands the
    /// seat to the newcomer.
    async fn decide(&self, contender: SocketAddr) -> Decision {
        let rx = self.decider.request(contender);
        match tokio::time::timeout(self.config.decision_window(), rx).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(_)) | Err(_) => Decision::AllowNew,
        }
    }

    /// Close the seated session, stamp its host into the cooldown
    /// registry, and free the slot.
    async fn preempt_current(&self) {
        let mut gate = self.gate.lock().await;
        if let Some(old) = gate.current.take() {
            gate.cooldowns.stamp(&old.peer.ip().to_string(), Instant::now());
            old.close();
            tracing::info!("[proxy] [preempt] closed session peer={}", old.peer);
        }
    }

    /// Connect the backend and put a new session on the slot. A backend
    /// connect failure turns into a refusal without a cooldown stamp.
    async fn admit(
        self: &Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Option<(TcpStream, &'static str)> {
        let backend_addr = (self.config.vnc_host.as_str(), self.config.vnc_port);
        let backend = match TcpStream::connect(backend_addr).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(
                    "[proxy] [backend_unreachable] addr={}:{} err={}",
                    self.config.vnc_host,
                    self.config.vnc_port,
                    e
                );
                return Some((stream, REASON_NO_BACKEND));
            }
        };

        let session = Session::new(peer);
        {
            let mut gate = self.gate.lock().await;
            gate.current = Some(Arc::clone(&session));
        }
        session::spawn_pipes(Arc::clone(self), Arc::clone(&session), stream, backend);
        tracing::info!(
            "[proxy] [session_start] peer={} at={}",
            peer,
            session.started_at.format("%H:%M:%S")
        );
        None
    }

    /// Tear `session` down if it is still the one on the slot. A pipe
    /// belonging to an already-preempted session must never clear a
    /// newer session's slot.
    pub(crate) async fn finish_session(&self, session: &Arc<Session>) {
        let mut gate = self.gate.lock().await;
        let is_current = gate
            .current
            .as_ref()
            .map_or(false, |cur| Arc::ptr_eq(cur, session));
        if is_current {
            gate.current = None;
            session.close();
            tracing::info!("[proxy] [session_end] peer={}", session.peer);
        }
    }

    /// Peer of the session currently holding the slot, if any.
    pub async fn current_peer(&self) -> Option<SocketAddr> {
        self.gate.lock().await.current.as_ref().map(|s| s.peer)
    }

    /// Handle to the seated session, for callers awaiting its teardown.
    pub async fn current_session(&self) -> Option<Arc<Session>> {
        self.gate.lock().await.current.clone()
    }

    /// Whether `host` has an unexpired refusal stamp. Reads the registry
    /// directly, regardless of whether a session is active.
    pub async fn in_cooldown(&self, host: &str) -> bool {
        self.gate.lock().await.cooldowns.is_active(host)
    }
}
