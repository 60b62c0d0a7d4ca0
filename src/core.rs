//! Server lifecycle
//!
//! This module provides:
//! - The shutdown flag shared between the signal watcher and the accept loop
//! - POSIX signal mapping

use std::sync::{Arc, Mutex};

/// Global server state
pub struct ServerState {
    /// Flag indicating if shutdown has been requested
    shutdown_requested: bool,
}

impl ServerState {
    /// Create a new ServerState
    pub fn new() -> Self {
        ServerState {
            shutdown_requested: false,
        }
    }

    /// Request server shutdown
    pub fn request_shutdown(&mut self) {
        self.shutdown_requested = true;
    }

    /// Check if shutdown has been requested
    pub fn should_shutdown(&self) -> bool {
        self.shutdown_requested
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe shared server state
/// This allows the signal watcher and the accept loop to coordinate
pub type SharedServerState = Arc<Mutex<ServerState>>;

/// Create a new shared server state
pub fn create_server_state() -> SharedServerState {
    Arc::new(Mutex::new(ServerState::new()))
}

/// Signal types that can trigger server shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM (graceful shutdown)
    Terminate,
}

impl Signal {
    /// Raw signal number, for registration with the runtime's signal driver
    pub fn raw(&self) -> libc::c_int {
        match self {
            Signal::Interrupt => libc::SIGINT,
            Signal::Terminate => libc::SIGTERM,
        }
    }

    /// Check if this signal should trigger shutdown
    pub fn should_shutdown(&self) -> bool {
        matches!(self, Signal::Interrupt | Signal::Terminate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_state_creation() {
        let state = ServerState::new();
        assert!(!state.should_shutdown());
    }

    #[test]
    fn test_server_state_shutdown() {
        let mut state = ServerState::new();
        assert!(!state.should_shutdown());

        state.request_shutdown();
        assert!(state.should_shutdown());
    }

    #[test]
    fn test_signal_raw_numbers() {
        assert_eq!(Signal::Interrupt.raw(), libc::SIGINT);
        assert_eq!(Signal::Terminate.raw(), libc::SIGTERM);
    }

    #[test]
    fn test_signal_should_shutdown() {
        assert!(Signal::Interrupt.should_shutdown());
        assert!(Signal::Terminate.should_shutdown());
    }

    #[test]
    fn test_shared_server_state() {
        let state = create_server_state();

        {
            let mut s = state.lock().unwrap();
            assert!(!s.should_shutdown());
            s.request_shutdown();
        }

        {
            let s = state.lock().unwrap();
            assert!(s.should_shutdown());
        }
    }
}
