//! What the user sees: busy indicator, microphone state, renderer connection
//! and at most one error message.

use crate::error::AvatalkError;
use crate::pipeline::turn::{TurnId, TurnStatus};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    pub message: String,
    /// Blocking notices stay until restart and cannot be dismissed.
    pub blocking: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UiState {
    /// A turn is between Pending and Streaming.
    pub busy: bool,
    pub listening: bool,
    pub connection: ConnectionState,
    pub error: Option<ErrorNotice>,
    /// Latest status of the newest turn.
    pub turn: Option<(TurnId, TurnStatus)>,
}

/// Shared, observable UI snapshot.
#[derive(Debug, Clone)]
pub struct StatusBoard {
    tx: Arc<watch::Sender<UiState>>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(UiState::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> UiState {
        self.tx.borrow().clone()
    }

    /// Record a turn status. Updates from turns older than the newest are ignored.
    pub fn turn_status(&self, id: TurnId, status: TurnStatus) {
        self.tx.send_modify(|state| {
            if let Some((current, _)) = state.turn
                && id < current
            {
                return;
            }
            state.turn = Some((id, status));
            state.busy = !status.is_terminal();
        });
    }

    /// A stage finished successfully; any dismissable message goes away.
    pub fn stage_succeeded(&self) {
        self.tx.send_if_modified(|state| {
            if state.error.as_ref().is_some_and(|e| !e.blocking) {
                state.error = None;
                true
            } else {
                false
            }
        });
    }

    /// Show the user-facing message for `error`, if it has one.
    ///
    /// A blocking message is never replaced.
    pub fn report(&self, error: &AvatalkError) {
        let Some(message) = error.user_message() else {
            return;
        };
        let blocking = error.is_fatal();
        self.tx.send_if_modified(|state| {
            if state.error.as_ref().is_some_and(|e| e.blocking) {
                return false;
            }
            state.error = Some(ErrorNotice { message, blocking });
            true
        });
    }

    /// Dismiss the current message unless it is blocking.
    pub fn dismiss(&self) {
        self.stage_succeeded();
    }

    pub fn set_listening(&self, listening: bool) {
        self.tx.send_if_modified(|state| {
            let changed = state.listening != listening;
            state.listening = listening;
            changed
        });
    }

    pub fn set_connection(&self, connection: ConnectionState) {
        self.tx.send_modify(|state| state.connection = connection);
    }
}
