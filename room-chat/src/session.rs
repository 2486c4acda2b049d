//! Client identities, outbound delivery handles, and per-client state.
//!
//! The connection layer owns the socket and a [`SessionHandle`]; the
//! dispatcher owns the matching [`ClientSession`] (nickname and current
//! room), so every piece of mutable session state has a single writer.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use tokio::{
    select,
    sync::{Notify, mpsc},
};

use crate::error::DeliveryError;

pub const DEFAULT_NICKNAME: &str = "anonymous";

/// Identity of one live connection. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic allocator for [`SessionId`]s.
#[derive(Debug)]
pub struct SessionIds {
    next: AtomicU64,
}

impl SessionIds {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> SessionId {
        SessionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SessionIds {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct CloseSignal {
    notify: Notify,
    closed: AtomicBool,
    abort_notify: Notify,
    aborted: AtomicBool,
}

/// Fires when the session must hang up without flushing.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    close: Arc<CloseSignal>,
}

impl AbortSignal {
    pub async fn wait(&self) {
        while !self.close.aborted.load(Ordering::Acquire) {
            self.close.abort_notify.notified().await;
        }
    }
}

/// Write side of a client's bounded outbound line queue.
///
/// Sends never wait: a full queue is reported as [`DeliveryError::Full`]
/// so one slow socket cannot stall whoever is writing to it.
#[derive(Debug, Clone)]
pub struct Outbound {
    lines: mpsc::Sender<String>,
    close: Arc<CloseSignal>,
}

/// Read side drained by the connection's writer task.
#[derive(Debug)]
pub struct OutboundReceiver {
    lines: mpsc::Receiver<String>,
    close: Arc<CloseSignal>,
}

/// Creates an outbound queue holding at most `capacity` undelivered lines.
pub fn outbound(capacity: usize) -> (Outbound, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let close = Arc::new(CloseSignal::default());
    (
        Outbound {
            lines: tx,
            close: Arc::clone(&close),
        },
        OutboundReceiver { lines: rx, close },
    )
}

impl Outbound {
    pub fn send(&self, line: impl Into<String>) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        self.lines.try_send(line.into()).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Asks the writer to flush what is already queued and then hang up.
    pub fn close(&self) {
        if !self.close.closed.swap(true, Ordering::AcqRel) {
            self.close.notify.notify_one();
        }
    }

    /// Hangs up at once, discarding anything still queued. Used when the
    /// peer has stopped reading and a flush would never finish.
    pub fn abort(&self) {
        self.close();
        if !self.close.aborted.swap(true, Ordering::AcqRel) {
            self.close.abort_notify.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.close.closed.load(Ordering::Acquire)
    }

    pub fn is_aborted(&self) -> bool {
        self.close.aborted.load(Ordering::Acquire)
    }
}

impl OutboundReceiver {
    /// Next line to write, or `None` once the session is closed and the
    /// queue has been drained.
    pub async fn next(&mut self) -> Option<String> {
        loop {
            if self.close.aborted.load(Ordering::Acquire) {
                return None;
            }
            if let Ok(line) = self.lines.try_recv() {
                return Some(line);
            }
            if self.is_closed() {
                return None;
            }
            select! {
                biased;
                line = self.lines.recv() => return line,
                _ = self.close.notify.notified() => {}
            }
        }
    }

    /// Takes every line queued so far without waiting.
    pub fn drain(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = self.lines.try_recv() {
            lines.push(line);
        }
        lines
    }

    pub fn is_closed(&self) -> bool {
        self.close.closed.load(Ordering::Acquire)
    }

    pub fn abort_signal(&self) -> AbortSignal {
        AbortSignal {
            close: Arc::clone(&self.close),
        }
    }
}

/// What the connection layer hands to the core with every command.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub outbound: Outbound,
}

impl SessionHandle {
    pub fn new(id: SessionId, outbound: Outbound) -> Self {
        Self { id, outbound }
    }
}

/// Logical client state, derived from [`ClientSession`] fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Named,
    InRoom,
    Disconnected,
}

/// Dispatcher-side state for one client.
#[derive(Debug)]
pub struct ClientSession {
    pub id: SessionId,
    pub nickname: String,
    /// Name of the room this client is a member of, if any.
    pub current_room: Option<String>,
    pub(crate) outbound: Outbound,
    pub(crate) departed: bool,
}

impl ClientSession {
    pub fn new(handle: SessionHandle) -> Self {
        Self {
            id: handle.id,
            nickname: DEFAULT_NICKNAME.to_string(),
            current_room: None,
            outbound: handle.outbound,
            departed: false,
        }
    }

    pub fn send(&self, line: impl Into<String>) -> Result<(), DeliveryError> {
        self.outbound.send(line)
    }

    pub fn state(&self) -> SessionState {
        if self.departed {
            SessionState::Disconnected
        } else if self.current_room.is_some() {
            SessionState::InRoom
        } else if self.nickname != DEFAULT_NICKNAME {
            SessionState::Named
        } else {
            SessionState::Connected
        }
    }
}
