use thiserror::Error;

/// Conditions reported back to the client that issued a command.
///
/// None of these stop the dispatcher; they are rendered as an `err: ...`
/// line on the originating client's outbound handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("you must join room first to communicate")]
    NotInRoom,
    /// The client's current room is no longer registered.
    #[error("room {0} is deleted")]
    RoomMissing(String),
    #[error("missing argument, usage: {0}")]
    MissingArgument(&'static str),
}

impl DispatchError {
    /// Text line sent to the client for this condition.
    pub fn to_line(&self) -> String {
        format!("err: {self}")
    }
}

/// Why a line could not be queued for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("outbound buffer is full")]
    Full,
    #[error("connection is closed")]
    Closed,
}

/// The dispatcher has stopped and no longer accepts commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("dispatcher is no longer running")]
pub struct QueueClosed;
