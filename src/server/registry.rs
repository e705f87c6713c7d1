// ABOUTME: Registry of bound sessions for outbound deliveries
// ABOUTME: Round-robin lookup overall or per system_id, plus the server-wide sequence counter

use crate::codec::Frame;
use crate::datatypes::BindType;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

// Highest sequence number SMPP allows before wrapping back to 1
const MAX_SEQUENCE_NUMBER: u32 = 0x7FFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("session is not bound")]
    NotBound,

    #[error("session connection is closed")]
    Closed,

    #[error("session window stayed full for the whole send timeout")]
    Timeout,
}

/// Registry-side view of a bound session: who it is and a bounded channel
/// into its connection task.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    system_id: String,
    bind_type: BindType,
    outbound: mpsc::Sender<Frame>,
    bound: AtomicBool,
}

impl SessionHandle {
    pub fn new(
        id: SessionId,
        system_id: impl Into<String>,
        bind_type: BindType,
        outbound: mpsc::Sender<Frame>,
    ) -> Self {
        SessionHandle {
            id,
            system_id: system_id.into(),
            bind_type,
            outbound,
            bound: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    pub fn bind_type(&self) -> BindType {
        self.bind_type
    }

    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::Acquire) && !self.outbound.is_closed()
    }

    /// First step of teardown; lookups stop returning this handle.
    pub fn mark_unbound(&self) {
        self.bound.store(false, Ordering::Release);
    }

    /// Queue `frame` for the connection, waiting at most `timeout` for room
    /// in the session window.
    pub async fn send(&self, frame: Frame, timeout: Duration) -> Result<(), SendError> {
        if !self.bound.load(Ordering::Acquire) {
            return Err(SendError::NotBound);
        }
        self.outbound
            .send_timeout(frame, timeout)
            .await
            .map_err(|err| match err {
                mpsc::error::SendTimeoutError::Timeout(_) => SendError::Timeout,
                mpsc::error::SendTimeoutError::Closed(_) => SendError::Closed,
            })
    }

    fn can_receive(&self) -> bool {
        self.bind_type.can_receive() && self.is_bound()
    }
}

/// Sessions in insertion order with O(1) removal and a rotating cursor.
#[derive(Debug, Default)]
struct RoundRobin {
    sessions: Vec<Arc<SessionHandle>>,
    positions: HashMap<SessionId, usize>,
    cursor: AtomicUsize,
}

impl RoundRobin {
    fn insert(&mut self, session: Arc<SessionHandle>) {
        if self.positions.contains_key(&session.id) {
            return;
        }
        self.positions.insert(session.id, self.sessions.len());
        self.sessions.push(session);
    }

    fn remove(&mut self, id: SessionId) -> Option<Arc<SessionHandle>> {
        let index = self.positions.remove(&id)?;
        let removed = self.sessions.swap_remove(index);
        if let Some(moved) = self.sessions.get(index) {
            self.positions.insert(moved.id, index);
        }
        Some(removed)
    }

    fn next(&self) -> Option<Arc<SessionHandle>> {
        let len = self.sessions.len();
        if len == 0 {
            return None;
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        (0..len)
            .map(|offset| &self.sessions[(start + offset) % len])
            .find(|session| session.can_receive())
            .cloned()
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }
}

#[derive(Debug, Default)]
struct Membership {
    all: RoundRobin,
    by_system_id: HashMap<String, RoundRobin>,
}

/// Bound sessions, shared by connection tasks (add/remove) and the
/// scheduler (lookups).
///
/// Membership changes and lookups are serialized by one lock, and lookups
/// skip sessions that have begun teardown.
#[derive(Debug)]
pub struct SessionRegistry {
    members: RwLock<Membership>,
    sequence: AtomicU32,
    session_ids: AtomicU64,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            members: RwLock::new(Membership::default()),
            sequence: AtomicU32::new(0),
            session_ids: AtomicU64::new(0),
        }
    }

    pub fn next_session_id(&self) -> SessionId {
        SessionId(self.session_ids.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn add_session(&self, session: Arc<SessionHandle>) {
        let mut members = self.write();
        members
            .by_system_id
            .entry(session.system_id.clone())
            .or_default()
            .insert(Arc::clone(&session));
        debug!(
            session_id = %session.id,
            system_id = %session.system_id,
            "session registered"
        );
        members.all.insert(session);
    }

    pub fn remove_session(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        let mut members = self.write();
        let removed = members.all.remove(id)?;
        removed.mark_unbound();

        if let Some(group) = members.by_system_id.get_mut(&removed.system_id) {
            group.remove(id);
            if group.len() == 0 {
                members.by_system_id.remove(&removed.system_id);
            }
        }
        debug!(session_id = %id, system_id = %removed.system_id, "session unregistered");
        Some(removed)
    }

    /// Next session able to receive, round-robin over all of them.
    pub fn next_session(&self) -> Option<Arc<SessionHandle>> {
        self.read().all.next()
    }

    /// Next receiving session bound under `system_id`.
    pub fn next_session_for(&self, system_id: &str) -> Option<Arc<SessionHandle>> {
        self.read().by_system_id.get(system_id)?.next()
    }

    /// Server-wide sequence number for PDUs the gateway originates.
    /// Values run 1..=0x7FFFFFFF and then wrap to 1.
    pub fn next_sequence_number(&self) -> u32 {
        let previous = self
            .sequence
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(next_sequence(current))
            })
            .unwrap_or_else(|current| current);
        next_sequence(previous)
    }

    pub fn len(&self) -> usize {
        self.read().all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_for(&self, system_id: &str) -> usize {
        self.read()
            .by_system_id
            .get(system_id)
            .map_or(0, RoundRobin::len)
    }

    // Every mutation completes under the lock, so a poisoned guard is still consistent
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Membership> {
        self.members.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Membership> {
        self.members.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn next_sequence(current: u32) -> u32 {
    if current >= MAX_SEQUENCE_NUMBER {
        1
    } else {
        current + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::EnquireLink;
    use std::collections::HashSet;

    fn handle(
        registry: &SessionRegistry,
        system_id: &str,
        bind_type: BindType,
    ) -> (Arc<SessionHandle>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(4);
        let handle = Arc::new(SessionHandle::new(
            registry.next_session_id(),
            system_id,
            bind_type,
            tx,
        ));
        registry.add_session(Arc::clone(&handle));
        (handle, rx)
    }

    #[test]
    fn round_robin_per_system_id() {
        let registry = SessionRegistry::new();
        let (a1, _rx1) = handle(&registry, "alpha", BindType::Transceiver);
        let (a2, _rx2) = handle(&registry, "alpha", BindType::Transceiver);
        let (b1, _rx3) = handle(&registry, "beta", BindType::Transceiver);

        let picks: Vec<SessionId> = (0..4)
            .filter_map(|_| registry.next_session_for("alpha"))
            .map(|s| s.id())
            .collect();
        assert_eq!(picks.len(), 4);
        assert_ne!(picks[0], picks[1]);
        assert_eq!(picks[0], picks[2]);
        assert!(picks.iter().all(|id| *id == a1.id() || *id == a2.id()));

        assert_eq!(registry.next_session_for("beta").unwrap().id(), b1.id());
        assert!(registry.next_session_for("gamma").is_none());
        assert_eq!(registry.count_for("alpha"), 2);
    }

    #[test]
    fn removed_sessions_are_never_returned() {
        let registry = SessionRegistry::new();
        let (a1, _rx1) = handle(&registry, "alpha", BindType::Transceiver);
        let (a2, _rx2) = handle(&registry, "alpha", BindType::Transceiver);

        assert!(registry.remove_session(a1.id()).is_some());
        assert!(!a1.is_bound());
        for _ in 0..3 {
            assert_eq!(registry.next_session_for("alpha").unwrap().id(), a2.id());
            assert_eq!(registry.next_session().unwrap().id(), a2.id());
        }

        registry.remove_session(a2.id());
        assert!(registry.next_session().is_none());
        assert!(registry.next_session_for("alpha").is_none());
        assert!(registry.is_empty());
        assert!(registry.remove_session(a2.id()).is_none());
    }

    #[test]
    fn lookups_skip_tearing_down_and_transmit_only_sessions() {
        let registry = SessionRegistry::new();
        let (_tx_only, _rx1) = handle(&registry, "alpha", BindType::Transmitter);
        let (closing, _rx2) = handle(&registry, "alpha", BindType::Transceiver);
        closing.mark_unbound();
        assert!(registry.next_session_for("alpha").is_none());

        let (rx_only, _rx3) = handle(&registry, "alpha", BindType::Receiver);
        assert_eq!(registry.next_session_for("alpha").unwrap().id(), rx_only.id());
    }

    #[tokio::test]
    async fn send_reports_closed_and_full_windows() {
        let registry = SessionRegistry::new();
        let (session, mut rx) = handle(&registry, "alpha", BindType::Transceiver);
        let timeout = Duration::from_millis(20);

        for seq in 1..=4 {
            let frame = Frame::EnquireLink(EnquireLink::new(seq));
            session.send(frame, timeout).await.unwrap();
        }
        let overflow = Frame::EnquireLink(EnquireLink::new(5));
        assert_eq!(session.send(overflow.clone(), timeout).await, Err(SendError::Timeout));

        assert_eq!(rx.recv().await.map(|f| f.sequence_number()), Some(1));
        drop(rx);
        assert_eq!(session.send(overflow.clone(), timeout).await, Err(SendError::Closed));

        session.mark_unbound();
        assert_eq!(session.send(overflow, timeout).await, Err(SendError::NotBound));
    }

    #[test]
    fn sequence_numbers_skip_zero_and_wrap() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.next_sequence_number(), 1);
        assert_eq!(registry.next_sequence_number(), 2);

        registry.sequence.store(MAX_SEQUENCE_NUMBER - 1, Ordering::SeqCst);
        assert_eq!(registry.next_sequence_number(), MAX_SEQUENCE_NUMBER);
        assert_eq!(registry.next_sequence_number(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sequence_numbers_are_unique_and_increasing_across_tasks() {
        let registry = Arc::new(SessionRegistry::new());
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    (0..1000)
                        .map(|_| registry.next_sequence_number())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for task in tasks {
            let issued = task.await.unwrap();
            assert!(issued.windows(2).all(|w| w[0] < w[1]));
            all.extend(issued);
        }
        assert_eq!(all.len(), 8000);
        assert!(!all.contains(&0));
        assert_eq!(all.iter().max(), Some(&8000));
    }
}
