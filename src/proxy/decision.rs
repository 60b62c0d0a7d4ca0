//! Contention decisions
//!
//! When a client connects while a session is active, someone has to pick
//! a winner. Providers answer through a oneshot channel; the controller
//! bounds the wait and treats silence as [`Decision::AllowNew`].

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};

/// Outcome of one contention round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Keep the current session; refuse the contender.
    KeepCurrent,
    /// Preempt the current session in favor of the contender.
    AllowNew,
}

/// Source of contention verdicts.
///
/// `request` must not block: it hands back a receiver that resolves when
/// the answer exists. Dropping the sender without answering reads as a
/// timeout upstream.
pub trait DecisionProvider: Send + Sync {
    fn request(&self, contender: SocketAddr) -> oneshot::Receiver<Decision>;
}

/// Policy used when no decision surface is attached: the seated client
/// always wins.
pub struct HeadlessDecision;

impl DecisionProvider for HeadlessDecision {
    fn request(&self, _contender: SocketAddr) -> oneshot::Receiver<Decision> {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Decision::KeepCurrent);
        rx
    }
}

struct PromptRequest {
    contender: SocketAddr,
    reply: oneshot::Sender<Decision>,
}

/// Interactive stdin prompt with a countdown.
///
/// Prints the contender's address and waits for a `k`/`a` line on a
/// worker task; when the countdown expires the seat is handed over, same
/// as the caller's own timeout.
pub struct PromptDecision {
    tx: mpsc::Sender<PromptRequest>,
}

impl PromptDecision {
    /// Spawns the stdin worker and returns the provider.
    pub fn spawn(window: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<PromptRequest>(8);

        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();

            while let Some(req) = rx.recv().await {
                println!("New client {} is requesting the session.", req.contender);
                println!(
                    "  [k] keep current client   [a] allow new client (automatic in {}s)",
                    window.as_secs()
                );

                let verdict = tokio::select! {
                    line = lines.next_line() => match line {
                        Ok(Some(l)) if l.trim().eq_ignore_ascii_case("k") => Decision::KeepCurrent,
                        _ => Decision::AllowNew,
                    },
                    _ = tokio::time::sleep(window) => {
                        println!("No answer, handing the session to {}.", req.contender);
                        Decision::AllowNew
                    }
                };

                let _ = req.reply.send(verdict);
            }
        });

        Self { tx }
    }
}

impl DecisionProvider for PromptDecision {
    fn request(&self, contender: SocketAddr) -> oneshot::Receiver<Decision> {
        let (reply, rx) = oneshot::channel();
        // A full queue means a prompt is already on screen; the dropped
        // request reads as a timeout upstream.
        let _ = self.tx.try_send(PromptRequest { contender, reply });
        rx
    }
}
