use tokio::sync::mpsc;

use crate::error::RelayError;

/**
    Host-visible notification raised by a player session.
*/
#[derive(Clone, Debug)]
pub enum PlayerEvent {
    /// The player moved to a new state (`ready`, `playing`, `paused`, ...)
    StateChanged(String),
    /// A failure the host should surface
    Error(RelayError),
    /// Diagnostic output from the page
    Debug(String),
}

/**
    Events are produced on relay tasks and consumed wherever the host
    drains the receiver, which is expected to be its UI thread.
*/
pub type EventSender = mpsc::UnboundedSender<PlayerEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<PlayerEvent>;

/**
    Create a new event channel pair.
*/
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
