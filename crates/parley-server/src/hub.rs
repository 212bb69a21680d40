use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use parley_core::{ChatId, ConnectionId, UserId};

/// Outbound message shared by every recipient of one broadcast.
pub type HubMessage = Arc<str>;

/// A live viewer socket: its owner plus the queue its writer task drains.
#[derive(Clone, Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: UserId,
    tx: mpsc::Sender<HubMessage>,
}

impl Connection {
    /// Create a connection and the receiving end its writer task should drain.
    pub fn new(user_id: UserId, queue: usize) -> (Self, mpsc::Receiver<HubMessage>) {
        let (tx, rx) = mpsc::channel(queue.max(1));
        (
            Self {
                id: ConnectionId::new(),
                user_id,
                tx,
            },
            rx,
        )
    }

    /// Non-blocking enqueue. Fails when the queue is full or the writer is gone.
    pub fn try_send(&self, message: HubMessage) -> Result<(), mpsc::error::TrySendError<HubMessage>> {
        self.tx.try_send(message)
    }
}

/// Outcome of one broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Registry of live viewer connections, grouped by chat.
///
/// A room exists only while it holds at least one connection, and each user
/// holds at most one connection per room.
pub struct ConnectionHub {
    rooms: RwLock<HashMap<ChatId, HashMap<UserId, Connection>>>,
    max_send_queue: usize,
}

impl ConnectionHub {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            max_send_queue,
        }
    }

    /// Build a connection for `user_id` and register it in `chat_id`.
    pub fn join(&self, chat_id: ChatId, user_id: UserId) -> (Connection, mpsc::Receiver<HubMessage>) {
        let (conn, rx) = Connection::new(user_id.clone(), self.max_send_queue);
        self.add(chat_id, user_id, conn.clone());
        (conn, rx)
    }

    /// Insert or replace the user's connection. Returns the replaced one.
    pub fn add(&self, chat_id: ChatId, user_id: UserId, connection: Connection) -> Option<Connection> {
        let mut rooms = self.rooms.write();
        let replaced = rooms.entry(chat_id).or_default().insert(user_id.clone(), connection);
        if replaced.is_some() {
            debug!(chat_id = %chat_id, user_id = %user_id, "replaced existing connection");
        }
        replaced
    }

    /// Remove the user's connection; drops the room once it is empty.
    pub fn remove(&self, chat_id: ChatId, user_id: &UserId) -> Option<Connection> {
        let mut rooms = self.rooms.write();
        let room = rooms.get_mut(&chat_id)?;
        let removed = room.remove(user_id);
        if room.is_empty() {
            rooms.remove(&chat_id);
        }
        removed
    }

    /// Remove the user's connection only if it is still `connection_id`.
    pub fn release(&self, chat_id: ChatId, user_id: &UserId, connection_id: &ConnectionId) -> bool {
        let mut rooms = self.rooms.write();
        let Some(room) = rooms.get_mut(&chat_id) else {
            return false;
        };
        if room.get(user_id).map(|c| &c.id) != Some(connection_id) {
            return false;
        }
        room.remove(user_id);
        if room.is_empty() {
            rooms.remove(&chat_id);
        }
        true
    }

    /// Enqueue `message` for every connection in the room except the sender's.
    pub fn broadcast(&self, chat_id: ChatId, sender_id: &UserId, message: &str) -> BroadcastReport {
        let rooms = self.rooms.read();
        let mut report = BroadcastReport::default();
        let Some(room) = rooms.get(&chat_id) else {
            return report;
        };

        let payload: HubMessage = Arc::from(message);
        for (user_id, conn) in room.iter().filter(|(uid, _)| *uid != sender_id) {
            match conn.try_send(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    let reason = match e {
                        mpsc::error::TrySendError::Full(_) => "queue full",
                        mpsc::error::TrySendError::Closed(_) => "writer closed",
                    };
                    warn!(chat_id = %chat_id, user_id = %user_id, reason, "failed to deliver annotation");
                }
            }
        }
        report
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }

    pub fn connection_count(&self, chat_id: ChatId) -> usize {
        self.rooms.read().get(&chat_id).map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> ConnectionHub {
        ConnectionHub::new(8)
    }

    fn user(s: &str) -> UserId {
        UserId::from_raw(s)
    }

    const CHAT: ChatId = ChatId::new(1);

    #[test]
    fn broadcast_skips_sender() {
        let hub = hub();
        let (_a, mut rx_a) = hub.join(CHAT, user("a"));
        let (_b, mut rx_b) = hub.join(CHAT, user("b"));

        let report = hub.broadcast(CHAT, &user("a"), "hello");
        assert_eq!(report, BroadcastReport { delivered: 1, failed: 0 });
        assert_eq!(&*rx_b.try_recv().unwrap(), "hello");
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn broadcast_after_removing_everyone_is_noop() {
        let hub = hub();
        let (_a, _rx_a) = hub.join(CHAT, user("a"));
        let (_b, _rx_b) = hub.join(CHAT, user("b"));
        hub.remove(CHAT, &user("a"));
        hub.remove(CHAT, &user("b"));

        assert_eq!(hub.room_count(), 0);
        assert_eq!(hub.broadcast(CHAT, &user("a"), "x"), BroadcastReport::default());
    }

    #[test]
    fn rooms_are_isolated() {
        let hub = hub();
        let (_a, _rx_a) = hub.join(CHAT, user("a"));
        let (_c, mut rx_c) = hub.join(ChatId::new(2), user("c"));
        hub.broadcast(CHAT, &user("a"), "only chat 1");
        assert!(rx_c.try_recv().is_err());
        assert_eq!(hub.room_count(), 2);
    }

    #[test]
    fn re_adding_replaces_connection() {
        let hub = hub();
        let (first, mut rx_first) = hub.join(CHAT, user("a"));
        let (second, mut rx_second) = hub.join(CHAT, user("a"));
        assert_ne!(first.id, second.id);
        assert_eq!(hub.connection_count(CHAT), 1);

        hub.broadcast(CHAT, &user("service"), "m");
        assert!(rx_second.try_recv().is_ok());
        // The replaced connection's sender is gone once the hub's clone and ours drop.
        drop(first);
        assert!(matches!(
            rx_first.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn release_ignores_stale_connection() {
        let hub = hub();
        let (old, _rx_old) = hub.join(CHAT, user("a"));
        let (new, _rx_new) = hub.join(CHAT, user("a"));

        assert!(!hub.release(CHAT, &user("a"), &old.id));
        assert_eq!(hub.connection_count(CHAT), 1);

        assert!(hub.release(CHAT, &user("a"), &new.id));
        assert_eq!(hub.room_count(), 0);
    }

    #[test]
    fn failed_recipient_does_not_block_others() {
        let hub = ConnectionHub::new(1);
        let (_a, rx_a) = hub.join(CHAT, user("a"));
        let (_b, mut rx_b) = hub.join(CHAT, user("b"));
        let (_c, mut rx_c) = hub.join(CHAT, user("c"));
        drop(rx_a);

        let report = hub.broadcast(CHAT, &user("svc"), "1");
        assert_eq!(report, BroadcastReport { delivered: 2, failed: 1 });

        // b's queue is now full; c drains and still receives.
        assert_eq!(&*rx_c.try_recv().unwrap(), "1");
        let report = hub.broadcast(CHAT, &user("svc"), "2");
        assert_eq!(report.failed, 2);
        assert_eq!(&*rx_c.try_recv().unwrap(), "2");
        assert_eq!(&*rx_b.try_recv().unwrap(), "1");
    }

    #[test]
    fn remove_unknown_is_none() {
        let hub = hub();
        assert!(hub.remove(CHAT, &user("ghost")).is_none());
        assert_eq!(hub.connection_count(CHAT), 0);
    }
}
