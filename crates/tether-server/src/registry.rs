use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use tether_core::ids::{valid_hex24, UserId};
use tether_core::protocol::CLOSE_POLICY_VIOLATION;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Unique identifier for one live WebSocket connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnId(pub String);

impl Default for ConnId {
    fn default() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }
}

impl ConnId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Items queued for a connection's writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// A serialized server event, sent as a text frame.
    Event(String),
    Ping,
    Close { code: u16, reason: &'static str },
}

/// One live WebSocket connection and its bound identity.
///
/// All state is lock-free: identity binds at most once (`OnceLock`) and
/// liveness is an atomic flag, so registry bookkeeping never contends
/// with in-flight sends and can never skip a cleanup.
pub struct Connection {
    pub id: ConnId,
    user_id: OnceLock<UserId>,
    pub tx: mpsc::Sender<Outbound>,
    pub alive: AtomicBool,
}

impl Connection {
    fn new(id: ConnId, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            user_id: OnceLock::new(),
            tx,
            alive: AtomicBool::new(true),
        }
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.get()
    }
}

/// Why a `join` was refused. Either way the connection gets closed
/// with a policy-violation code.
#[derive(Debug, PartialEq, Eq)]
pub enum BindError {
    InvalidId,
    AlreadyBound,
}

impl BindError {
    pub fn close_code(&self) -> u16 {
        CLOSE_POLICY_VIOLATION
    }

    pub fn reason(&self) -> &'static str {
        match self {
            BindError::InvalidId => "invalid user id",
            BindError::AlreadyBound => "connection already bound",
        }
    }
}

/// Registry of live connections plus the per-user active-chat map.
///
/// Everything here is in-memory and process-local. "User not connected"
/// is not an error anywhere: lookups just return an empty set.
pub struct ConnectionRegistry {
    connections: DashMap<ConnId, Connection>,
    /// user -> the counterpart that user is currently viewing.
    active_chats: DashMap<UserId, UserId>,
    /// connection -> the user whose `active_chats` entry it wrote.
    /// Disconnects and `leaveChat` clear through this table.
    chat_owners: DashMap<ConnId, UserId>,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            active_chats: DashMap::new(),
            chat_owners: DashMap::new(),
            max_send_queue,
        }
    }

    /// Add an unbound connection and return its ID + outbound receiver.
    pub fn register(&self) -> (ConnId, mpsc::Receiver<Outbound>) {
        let id = ConnId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.connections.insert(id.clone(), Connection::new(id.clone(), tx));
        (id, rx)
    }

    /// Bind an identity to a connection. A connection binds at most once;
    /// a second `join` is rejected rather than silently re-bound.
    pub fn bind(&self, conn_id: &ConnId, raw_user_id: &str) -> Result<UserId, BindError> {
        if !valid_hex24(raw_user_id) {
            return Err(BindError::InvalidId);
        }
        let Some(conn) = self.connections.get(conn_id) else {
            return Err(BindError::InvalidId);
        };
        let user_id = UserId::from_raw(raw_user_id.to_string());
        conn.user_id
            .set(user_id.clone())
            .map_err(|_| BindError::AlreadyBound)?;
        Ok(user_id)
    }

    /// Record which counterpart the connection's user is viewing.
    /// No-op if the connection is unbound.
    pub fn enter_chat(&self, conn_id: &ConnId, counterpart: UserId) -> Option<UserId> {
        let user_id = self
            .connections
            .get(conn_id)
            .and_then(|conn| conn.user_id().cloned())?;
        self.chat_owners.insert(conn_id.clone(), user_id.clone());
        self.active_chats.insert(user_id.clone(), counterpart);
        Some(user_id)
    }

    pub fn leave_chat(&self, conn_id: &ConnId) {
        if let Some((_, user_id)) = self.chat_owners.remove(conn_id) {
            self.active_chats.remove(&user_id);
        }
    }

    /// Remove a connection and clear its active-chat entry. Infallible:
    /// no path through here can leave a stale `active_chats` entry behind.
    pub fn unregister(&self, conn_id: &ConnId) {
        if let Some((_, conn)) = self.connections.remove(conn_id) {
            conn.alive.store(false, Ordering::Relaxed);
        }
        self.leave_chat(conn_id);
    }

    /// The counterpart `user` is currently viewing, if any.
    pub fn active_chat_partner(&self, user: &UserId) -> Option<UserId> {
        self.active_chats.get(user).map(|e| e.value().clone())
    }

    /// IDs of all live connections bound to `user`. Supports several
    /// simultaneous sessions (tabs) per user.
    pub fn connections_for(&self, user: &UserId) -> Vec<ConnId> {
        self.connections
            .iter()
            .filter(|entry| entry.value().user_id() == Some(user))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Queue an event on every connection bound to `user`. Best-effort:
    /// a full or closed queue drops the event for that connection only.
    /// Returns how many connections accepted it.
    pub fn push_to_user(&self, user: &UserId, event: &str) -> usize {
        let mut pushed = 0;
        for entry in self.connections.iter() {
            let conn = entry.value();
            if conn.user_id() != Some(user) {
                continue;
            }
            match conn.tx.try_send(Outbound::Event(event.to_string())) {
                Ok(()) => pushed += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(conn_id = %conn.id, "send queue full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        pushed
    }

    /// Queue a close frame for the connection. The writer task shuts the
    /// socket down when it dequeues it.
    pub fn close(&self, conn_id: &ConnId, code: u16, reason: &'static str) {
        if let Some(conn) = self.connections.get(conn_id) {
            let _ = conn.tx.try_send(Outbound::Close { code, reason });
        }
    }

    pub fn record_pong(&self, conn_id: &ConnId) {
        if let Some(conn) = self.connections.get(conn_id) {
            conn.alive.store(true, Ordering::Relaxed);
        }
    }

    /// One heartbeat pass. Connections that never answered the previous
    /// ping are closed and removed; everyone else gets a fresh ping and
    /// their flag cleared. Two silent sweeps in a row evicts a connection.
    pub fn sweep(&self) -> usize {
        let mut dead = Vec::new();
        for entry in self.connections.iter() {
            let conn = entry.value();
            if conn.alive.swap(false, Ordering::Relaxed) {
                let _ = conn.tx.try_send(Outbound::Ping);
            } else {
                let _ = conn.tx.try_send(Outbound::Close {
                    code: CLOSE_POLICY_VIOLATION,
                    reason: "heartbeat timeout",
                });
                dead.push(conn.id.clone());
            }
        }
        let evicted = dead.len();
        for id in dead {
            self.unregister(&id);
            tracing::info!(conn_id = %id, "evicted dead connection");
        }
        evicted
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }
}

/// Background task that runs the heartbeat sweep on a fixed interval.
pub fn start_heartbeat_task(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // consume first immediate tick
        loop {
            ticker.tick().await;
            let evicted = registry.sweep();
            if evicted > 0 {
                tracing::info!(evicted, "heartbeat sweep");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(c: char) -> UserId {
        UserId::from_raw(c.to_string().repeat(24))
    }

    #[test]
    fn conn_id_unique() {
        let a = ConnId::new();
        let b = ConnId::new();
        assert_ne!(a, b);
        assert!(a.0.starts_with("conn_"));
    }

    #[test]
    fn register_and_unregister() {
        let registry = ConnectionRegistry::new(32);
        assert_eq!(registry.count(), 0);

        let (id1, _rx1) = registry.register();
        let (id2, _rx2) = registry.register();
        assert_eq!(registry.count(), 2);

        registry.unregister(&id1);
        registry.unregister(&id2);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn bind_rejects_bad_id() {
        let registry = ConnectionRegistry::new(32);
        let (id, _rx) = registry.register();

        let err = registry.bind(&id, "not-an-id").unwrap_err();
        assert_eq!(err, BindError::InvalidId);
    }

    #[test]
    fn bind_rejects_rebind() {
        let registry = ConnectionRegistry::new(32);
        let (id, _rx) = registry.register();

        registry.bind(&id, user('a').as_str()).unwrap();
        let err = registry.bind(&id, user('b').as_str()).unwrap_err();
        assert_eq!(err, BindError::AlreadyBound);

        // Identity is unchanged after the rejected rebind.
        let conns = registry.connections_for(&user('a'));
        assert_eq!(conns, vec![id]);
    }

    #[test]
    fn connections_for_finds_all_tabs() {
        let registry = ConnectionRegistry::new(32);
        let (id1, _rx1) = registry.register();
        let (id2, _rx2) = registry.register();
        let (_id3, _rx3) = registry.register(); // never bound

        registry.bind(&id1, user('a').as_str()).unwrap();
        registry.bind(&id2, user('a').as_str()).unwrap();

        let conns = registry.connections_for(&user('a'));
        assert_eq!(conns.len(), 2);
    }

    #[test]
    fn enter_and_leave_chat() {
        let registry = ConnectionRegistry::new(32);
        let (id, _rx) = registry.register();
        registry.bind(&id, user('a').as_str()).unwrap();

        assert_eq!(registry.active_chat_partner(&user('a')), None);

        registry.enter_chat(&id, user('b'));
        assert_eq!(registry.active_chat_partner(&user('a')), Some(user('b')));

        // Re-entering replaces the prior counterpart.
        registry.enter_chat(&id, user('c'));
        assert_eq!(registry.active_chat_partner(&user('a')), Some(user('c')));

        registry.leave_chat(&id);
        assert_eq!(registry.active_chat_partner(&user('a')), None);
    }

    #[test]
    fn enter_chat_requires_bound_connection() {
        let registry = ConnectionRegistry::new(32);
        let (id, _rx) = registry.register();

        assert_eq!(registry.enter_chat(&id, user('b')), None);
        assert_eq!(registry.active_chat_partner(&user('a')), None);
    }

    #[test]
    fn unregister_clears_active_chat() {
        let registry = ConnectionRegistry::new(32);
        let (id, _rx) = registry.register();
        registry.bind(&id, user('a').as_str()).unwrap();
        registry.enter_chat(&id, user('b'));

        registry.unregister(&id);
        assert_eq!(registry.active_chat_partner(&user('a')), None);
    }

    #[tokio::test]
    async fn unregister_clears_active_chat_under_concurrent_traffic() {
        let registry = Arc::new(ConnectionRegistry::new(32));

        // A reader task keeps the connection table busy while connections
        // come and go; cleanup must land every single time regardless.
        let reader = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                for _ in 0..1000 {
                    registry.connections_for(&user('a'));
                    registry.push_to_user(&user('a'), "ping");
                    tokio::task::yield_now().await;
                }
            })
        };

        for _ in 0..200 {
            let (id, _rx) = registry.register();
            registry.bind(&id, user('a').as_str()).unwrap();
            registry.enter_chat(&id, user('b'));
            registry.unregister(&id);
            assert_eq!(registry.active_chat_partner(&user('a')), None);
            assert!(registry.connections_for(&user('a')).is_empty());
            tokio::task::yield_now().await;
        }

        reader.await.unwrap();
    }

    #[test]
    fn push_to_user_reaches_every_tab() {
        let registry = ConnectionRegistry::new(32);
        let (id1, mut rx1) = registry.register();
        let (id2, mut rx2) = registry.register();
        let (_id3, mut rx3) = registry.register();

        registry.bind(&id1, user('a').as_str()).unwrap();
        registry.bind(&id2, user('a').as_str()).unwrap();

        let pushed = registry.push_to_user(&user('a'), "hello");
        assert_eq!(pushed, 2);
        assert_eq!(rx1.try_recv().unwrap(), Outbound::Event("hello".into()));
        assert_eq!(rx2.try_recv().unwrap(), Outbound::Event("hello".into()));
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn push_to_full_queue_drops() {
        let registry = ConnectionRegistry::new(1);
        let (id, _rx) = registry.register();
        registry.bind(&id, user('a').as_str()).unwrap();

        assert_eq!(registry.push_to_user(&user('a'), "one"), 1);
        assert_eq!(registry.push_to_user(&user('a'), "two"), 0);
    }

    #[test]
    fn sweep_evicts_after_two_silent_passes() {
        let registry = ConnectionRegistry::new(32);
        let (id, mut rx) = registry.register();
        registry.bind(&id, user('a').as_str()).unwrap();

        // First sweep: still alive, gets a ping and the flag cleared.
        assert_eq!(registry.sweep(), 0);
        assert_eq!(rx.try_recv().unwrap(), Outbound::Ping);
        assert_eq!(registry.count(), 1);

        // No pong arrives. Second sweep closes and evicts.
        assert_eq!(registry.sweep(), 1);
        assert!(matches!(rx.try_recv().unwrap(), Outbound::Close { .. }));
        assert_eq!(registry.count(), 0);
        assert!(registry.connections_for(&user('a')).is_empty());
    }

    #[test]
    fn pong_resets_the_clock() {
        let registry = ConnectionRegistry::new(32);
        let (id, mut rx) = registry.register();

        assert_eq!(registry.sweep(), 0);
        assert_eq!(rx.try_recv().unwrap(), Outbound::Ping);

        registry.record_pong(&id);
        assert_eq!(registry.sweep(), 0);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn pong_lands_while_events_are_in_flight() {
        let registry = ConnectionRegistry::new(32);
        let (id, mut rx) = registry.register();
        registry.bind(&id, user('a').as_str()).unwrap();

        // Flag the connection as awaiting a pong, then answer it while
        // its queue is being used. The pong must always count.
        assert_eq!(registry.sweep(), 0);
        registry.push_to_user(&user('a'), "busy");
        registry.record_pong(&id);

        assert_eq!(registry.sweep(), 0);
        assert_eq!(registry.count(), 1);
        assert_eq!(rx.try_recv().unwrap(), Outbound::Ping);
    }
}
