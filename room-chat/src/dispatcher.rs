//! The single serializing consumer of client commands.
//!
//! Every connection pushes [`Command`]s into one shared [`CommandQueue`].
//! A single task owns the [`Dispatcher`] and applies those commands one at a
//! time, in arrival order, including every broadcast they cause. Room and
//! session state is never shared, so it needs no locks.

use std::collections::HashMap;

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    command::{Command, CommandKind},
    error::{DeliveryError, DispatchError, QueueClosed},
    room::{FailedDeliveries, RoomRegistry},
    session::{ClientSession, SessionHandle, SessionId},
};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

const NICK_USAGE: &str = "/nick NAME";
const JOIN_USAGE: &str = "/join ROOM";
const MSG_USAGE: &str = "/msg ROOM TEXT";
const FAREWELL: &str = "sad to see you go :(";

fn left_notice(nickname: &str) -> String {
    format!("{nickname} has left the room!")
}

fn joined_notice(nickname: &str) -> String {
    format!("{nickname} has joined the room")
}

/// Producer side of the command queue. Cheap to clone; one per connection.
///
/// The queue is bounded. When it is full, [`CommandQueue::enqueue`] waits
/// for the dispatcher to catch up instead of dropping anything.
#[derive(Debug, Clone)]
pub struct CommandQueue {
    tx: mpsc::Sender<Command>,
}

impl CommandQueue {
    pub async fn enqueue(&self, command: Command) -> Result<(), QueueClosed> {
        self.tx.send(command).await.map_err(|_| QueueClosed)
    }
}

/// Creates a command queue and its receiving end.
pub fn command_queue(capacity: usize) -> (CommandQueue, mpsc::Receiver<Command>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (CommandQueue { tx }, rx)
}

/// Spawns a dispatcher task draining a fresh queue.
///
/// The task ends once every [`CommandQueue`] clone has been dropped and the
/// commands already queued have been applied.
pub fn spawn_dispatcher(capacity: usize) -> (CommandQueue, JoinHandle<Dispatcher>) {
    let (queue, commands) = command_queue(capacity);
    let task = tokio::spawn(Dispatcher::new().run(commands));
    (queue, task)
}

/// Exclusive owner of the room registry and of every client's session state.
#[derive(Debug, Default)]
pub struct Dispatcher {
    registry: RoomRegistry,
    sessions: HashMap<SessionId, ClientSession>,
    failed: FailedDeliveries,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn session(&self, id: SessionId) -> Option<&ClientSession> {
        self.sessions.get(&id)
    }

    /// Applies commands until every producer is gone, then hands the final
    /// state back.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Self {
        while let Some(command) = commands.recv().await {
            self.apply(command);
        }
        info!(rooms = self.registry.len(), "dispatcher stopped");
        self
    }

    /// Runs one command to completion.
    ///
    /// Clients whose outbound queue rejected a line during this command are
    /// disconnected before this returns.
    pub fn apply(&mut self, command: Command) {
        let Command { kind, client, args } = command;
        let id = client.id;
        debug!(session = %id, ?kind, ?args, "applying command");

        if kind == CommandKind::Disconnect {
            self.depart(id, false);
            self.sessions.remove(&id);
        } else {
            self.handle(kind, client, &args);
        }

        self.settle_failed_deliveries();
    }

    fn handle(&mut self, kind: CommandKind, client: SessionHandle, args: &[String]) {
        let id = client.id;
        let session = self
            .sessions
            .entry(id)
            .or_insert_with(|| ClientSession::new(client));
        if session.departed {
            debug!(session = %id, ?kind, "ignoring command from departed session");
            return;
        }

        let result = match kind {
            CommandKind::SetNick => self.set_nick(id, args),
            CommandKind::Join => self.join(id, args),
            CommandKind::Message => self.message(id, args),
            CommandKind::ListRooms => {
                self.list_rooms(id);
                Ok(())
            }
            CommandKind::Quit => {
                self.depart(id, true);
                Ok(())
            }
            CommandKind::Disconnect => Ok(()),
        };

        if let Err(err) = result {
            debug!(session = %id, error = %err, "command rejected");
            self.reply(id, err.to_line());
        }
    }

    fn set_nick(&mut self, id: SessionId, args: &[String]) -> Result<(), DispatchError> {
        let nickname = args
            .first()
            .ok_or(DispatchError::MissingArgument(NICK_USAGE))?;
        if let Some(session) = self.sessions.get_mut(&id) {
            session.nickname = nickname.clone();
        }
        self.reply(id, format!("all right, i will call you {nickname}"));
        Ok(())
    }

    fn join(&mut self, id: SessionId, args: &[String]) -> Result<(), DispatchError> {
        let room_name = args
            .first()
            .ok_or(DispatchError::MissingArgument(JOIN_USAGE))?;

        self.leave_current_room(id);

        let Some(session) = self.sessions.get_mut(&id) else {
            return Ok(());
        };
        session.current_room = Some(room_name.clone());
        let notice = joined_notice(&session.nickname);
        let outbound = session.outbound.clone();

        let (room, created) = self.registry.get_or_create(room_name);
        if created {
            info!(room = %room_name, "room created");
        }
        room.insert(id, outbound);
        let failed = room.broadcast(id, &notice);
        self.record_failures(failed);

        self.reply(id, format!("welcome to {room_name}"));
        Ok(())
    }

    fn message(&mut self, id: SessionId, args: &[String]) -> Result<(), DispatchError> {
        let Some(session) = self.sessions.get(&id) else {
            return Ok(());
        };
        let room_name = session
            .current_room
            .as_deref()
            .ok_or(DispatchError::NotInRoom)?;

        let (target, words) = args
            .split_first()
            .ok_or(DispatchError::MissingArgument(MSG_USAGE))?;
        if words.is_empty() {
            return Err(DispatchError::MissingArgument(MSG_USAGE));
        }
        if target != room_name {
            debug!(session = %id, requested = %target, room = %room_name, "message sent to current room");
        }

        let room = self
            .registry
            .get(room_name)
            .ok_or_else(|| DispatchError::RoomMissing(room_name.to_string()))?;
        let line = format!("{}: {}", session.nickname, words.join(" "));
        let failed = room.broadcast(id, &line);
        self.record_failures(failed);
        Ok(())
    }

    fn list_rooms(&mut self, id: SessionId) {
        let names = self.registry.names();
        self.reply(id, format!("available rooms are: {}", names.join(", ")));
    }

    /// Takes the client out of its room, if any, and tells the members left
    /// behind.
    fn leave_current_room(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        let Some(room_name) = session.current_room.take() else {
            return;
        };
        let notice = left_notice(&session.nickname);

        let failed = match self.registry.get_mut(&room_name) {
            Some(room) => {
                room.remove(id);
                room.broadcast(id, &notice)
            }
            None => return,
        };
        self.record_failures(failed);
    }

    /// Ends a session: leaves its room, optionally says goodbye, then asks
    /// the connection layer to hang up. Does nothing the second time.
    fn depart(&mut self, id: SessionId, farewell: bool) {
        match self.sessions.get_mut(&id) {
            Some(session) if !session.departed => session.departed = true,
            _ => return,
        }
        info!(session = %id, farewell, "client departing");

        self.leave_current_room(id);
        if farewell {
            self.reply(id, FAREWELL);
        }
        if let Some(session) = self.sessions.get(&id) {
            session.outbound.close();
        }
    }

    fn reply(&mut self, id: SessionId, line: impl Into<String>) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        if let Err(err) = session.send(line) {
            self.record_failures(vec![(id, err)]);
        }
    }

    fn record_failures(&mut self, failed: FailedDeliveries) {
        for (id, err) in failed {
            match err {
                DeliveryError::Full => warn!(session = %id, error = %err, "dropping slow client"),
                DeliveryError::Closed => debug!(session = %id, error = %err, "client already gone"),
            }
            self.failed.push((id, err));
        }
    }

    /// A client that cannot keep up would never drain a flush either, so
    /// it is hung up on without one.
    fn settle_failed_deliveries(&mut self) {
        while let Some((id, err)) = self.failed.pop() {
            self.depart(id, false);
            if err == DeliveryError::Full {
                if let Some(session) = self.sessions.get(&id) {
                    session.outbound.abort();
                }
            }
        }
    }
}
