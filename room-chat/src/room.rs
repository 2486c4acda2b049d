//! Rooms and the registry that owns them.
//!
//! Neither type does any locking. Both are only ever touched by the
//! dispatcher task, which applies one command at a time.

use std::collections::{BTreeMap, HashMap};

use crate::{
    error::DeliveryError,
    session::{Outbound, SessionId},
};

/// Members whose outbound queue rejected a broadcast line.
pub type FailedDeliveries = Vec<(SessionId, DeliveryError)>;

#[derive(Debug)]
pub struct Room {
    name: String,
    members: HashMap<SessionId, Outbound>,
}

impl Room {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn insert(&mut self, id: SessionId, outbound: Outbound) {
        self.members.insert(id, outbound);
    }

    pub fn remove(&mut self, id: SessionId) -> bool {
        self.members.remove(&id).is_some()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Queues `text` for every member except `excluded`.
    ///
    /// Delivery never waits. Members that could not take the line are
    /// returned so the caller can treat them as gone.
    pub fn broadcast(&self, excluded: SessionId, text: &str) -> FailedDeliveries {
        self.members
            .iter()
            .filter(|(id, _)| **id != excluded)
            .filter_map(|(id, outbound)| outbound.send(text).err().map(|err| (*id, err)))
            .collect()
    }
}

/// Every room in the system, keyed by name. Rooms are never removed.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: BTreeMap<String, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the named room, creating an empty one if needed. The flag is
    /// `true` when the room was just created.
    pub fn get_or_create(&mut self, name: &str) -> (&mut Room, bool) {
        let created = !self.rooms.contains_key(name);
        let room = self
            .rooms
            .entry(name.to_string())
            .or_insert_with(|| Room::new(name));
        (room, created)
    }

    pub fn get(&self, name: &str) -> Option<&Room> {
        self.rooms.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Room> {
        self.rooms.get_mut(name)
    }

    /// Room names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
