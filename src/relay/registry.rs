//! Room Registry: user identity -> set of live connections.
//!
//! One identity may have several simultaneous connections (multi-device);
//! delivery fans out to all of them. Connections register the sending half
//! of their outbound channel here and are removed again on disconnect.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use super::event::ServerEvent;

pub type ConnId = u64;
pub type Outbound = mpsc::UnboundedSender<ServerEvent>;

#[derive(Default)]
struct Rooms {
    by_identity: HashMap<String, HashMap<ConnId, Outbound>>,
    identity_of: HashMap<ConnId, String>,
}

#[derive(Clone, Default)]
pub struct RoomRegistry {
    rooms: Arc<Mutex<Rooms>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `conn_id` under `identity`. Idempotent for the same pair;
    /// joining under a different identity moves the connection.
    pub async fn join(&self, identity: &str, conn_id: ConnId, outbound: Outbound) {
        let mut rooms = self.rooms.lock().await;

        if let Some(previous) = rooms.identity_of.get(&conn_id).cloned()
            && previous != identity
        {
            remove_from_room(&mut rooms, &previous, conn_id);
        }

        rooms
            .by_identity
            .entry(identity.to_owned())
            .or_default()
            .insert(conn_id, outbound);
        rooms.identity_of.insert(conn_id, identity.to_owned());
    }

    /// Removes the connection from whatever room it is in. No-op if the
    /// connection never joined.
    pub async fn leave(&self, conn_id: ConnId) {
        let mut rooms = self.rooms.lock().await;
        if let Some(identity) = rooms.identity_of.remove(&conn_id) {
            remove_from_room(&mut rooms, &identity, conn_id);
        }
    }

    /// Snapshot of the live connections for `identity`. Empty for identities
    /// with nobody connected.
    pub async fn members(&self, identity: &str) -> Vec<(ConnId, Outbound)> {
        let rooms = self.rooms.lock().await;
        rooms
            .by_identity
            .get(identity)
            .map(|room| room.iter().map(|(id, tx)| (*id, tx.clone())).collect())
            .unwrap_or_default()
    }
}

fn remove_from_room(rooms: &mut Rooms, identity: &str, conn_id: ConnId) {
    if let Some(room) = rooms.by_identity.get_mut(identity) {
        room.remove(&conn_id);
        if room.is_empty() {
            rooms.by_identity.remove(identity);
        }
    }
}
