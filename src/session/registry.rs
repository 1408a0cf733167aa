// ABOUTME: In-memory registry of live sender sessions with owner-bound lifetimes
// ABOUTME: Validates codes, attaches/detaches receivers, and retires codes on close

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{generate_code, Direction, ReceiverInfo, Session, SessionStatus};
use crate::error::{Result, TransferError};

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<String, Session>,
    /// Codes of deleted sessions; never handed out again.
    retired: HashSet<String>,
}

/// Registry of live sessions.
///
/// Cloning is cheap and shares state. All mutation happens under one mutex,
/// so concurrent attach/detach calls are applied one at a time.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Session registry lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Open a new session and return the handle that owns it.
    ///
    /// The session lives exactly as long as the returned `SessionOwner`.
    pub fn create_session(&self, direction: Direction) -> SessionOwner {
        let mut inner = self.lock();
        let code = loop {
            let candidate = generate_code();
            if !inner.sessions.contains_key(&candidate) && !inner.retired.contains(&candidate) {
                break candidate;
            }
        };

        inner
            .sessions
            .insert(code.clone(), Session::new(code.clone(), direction));
        tracing::info!(
            "Opened {} session ({} live)",
            direction,
            inner.sessions.len()
        );

        SessionOwner {
            code,
            registry: self.clone(),
        }
    }

    pub fn get_session(&self, code: &str) -> Option<Session> {
        self.lock().sessions.get(code).cloned()
    }

    /// Check that `code` belongs to a live session accepting receivers.
    pub fn validate(&self, code: &str) -> Result<Session> {
        let inner = self.lock();
        Self::check(&inner, code).cloned()
    }

    fn check<'a>(inner: &'a RegistryInner, code: &str) -> Result<&'a Session> {
        match inner.sessions.get(code) {
            Some(session) if session.status == SessionStatus::Closed => {
                Err(TransferError::SessionClosed)
            }
            Some(session) if session.direction != Direction::Send => {
                Err(TransferError::InvalidCode)
            }
            Some(session) => Ok(session),
            None if inner.retired.contains(code) => Err(TransferError::SessionClosed),
            None => Err(TransferError::InvalidCode),
        }
    }

    /// Validate `code` and record `receiver` as attached.
    ///
    /// Several receivers may attach to the same session; the first one moves
    /// the session from `pending` to `connected`.
    pub fn validate_and_attach(&self, code: &str, receiver: ReceiverInfo) -> Result<Session> {
        let mut inner = self.lock();
        Self::check(&inner, code)?;

        let session = inner
            .sessions
            .get_mut(code)
            .ok_or(TransferError::InvalidCode)?;
        tracing::info!(
            "Receiver '{}' <{}> attached from {}",
            crate::utils::sanitize_identifier(&receiver.identity.name),
            crate::utils::sanitize_identifier(&receiver.identity.email),
            receiver.ip.as_deref().unwrap_or("unknown address")
        );
        session.receivers.push(receiver);
        session.status = SessionStatus::Connected;
        Ok(session.clone())
    }

    /// Remove a receiver from a session. Returns false if either is unknown.
    pub fn detach(&self, code: &str, receiver_id: &str) -> bool {
        let mut inner = self.lock();
        let Some(session) = inner.sessions.get_mut(code) else {
            return false;
        };
        let before = session.receivers.len();
        session.receivers.retain(|r| r.id != receiver_id);
        let removed = session.receivers.len() < before;
        if removed {
            tracing::info!(
                "Receiver {} detached ({} still attached)",
                receiver_id,
                session.receivers.len()
            );
        }
        removed
    }

    /// Close a session and retire its code. Returns the final snapshot.
    pub fn delete_session(&self, code: &str) -> Option<Session> {
        let mut inner = self.lock();
        let mut session = inner.sessions.remove(code)?;
        inner.retired.insert(code.to_string());
        session.status = SessionStatus::Closed;
        tracing::info!(
            "Closed {} session ({} receivers were attached)",
            session.direction,
            session.receivers.len()
        );
        Some(session)
    }

    /// Close every live session. Returns how many were closed.
    pub fn end_all(&self) -> usize {
        let mut inner = self.lock();
        let codes: Vec<String> = inner.sessions.keys().cloned().collect();
        for code in &codes {
            inner.sessions.remove(code);
            inner.retired.insert(code.clone());
        }
        if !codes.is_empty() {
            tracing::info!("Ended all sessions ({} closed)", codes.len());
        }
        codes.len()
    }

    pub fn live_sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.lock().sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }
}

/// Owning handle for a session, held by the sender's controlling task.
///
/// Dropping the handle closes the session and invalidates its code.
pub struct SessionOwner {
    code: String,
    registry: SessionRegistry,
}

impl SessionOwner {
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Current snapshot, or `None` if the session was closed out from under us.
    pub fn session(&self) -> Option<Session> {
        self.registry.get_session(&self.code)
    }

    /// Close explicitly and return the final snapshot.
    pub fn close(self) -> Option<Session> {
        // Drop runs afterwards and finds nothing left to remove.
        self.registry.delete_session(&self.code)
    }
}

impl Drop for SessionOwner {
    fn drop(&mut self) {
        self.registry.delete_session(&self.code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ReceiverIdentity;

    fn receiver(name: &str) -> ReceiverInfo {
        ReceiverInfo::new(
            ReceiverIdentity {
                name: name.to_string(),
                email: format!("{name}@example.com"),
                ..Default::default()
            },
            Some("10.0.0.2".to_string()),
            Some("table-mirror/test".to_string()),
        )
    }

    #[test]
    fn test_create_session_is_pending() {
        let registry = SessionRegistry::new();
        let owner = registry.create_session(Direction::Send);
        let session = registry.get_session(owner.code()).unwrap();
        assert_eq!(session.status, SessionStatus::Pending);
        assert_eq!(session.direction, Direction::Send);
        assert!(session.receivers.is_empty());
    }

    #[test]
    fn test_codes_unique_among_live_sessions() {
        let registry = SessionRegistry::new();
        let owners: Vec<_> = (0..50)
            .map(|_| registry.create_session(Direction::Send))
            .collect();
        let codes: HashSet<_> = owners.iter().map(|o| o.code().to_string()).collect();
        assert_eq!(codes.len(), 50);
    }

    #[test]
    fn test_attach_moves_to_connected_and_allows_more_receivers() {
        let registry = SessionRegistry::new();
        let owner = registry.create_session(Direction::Send);

        let session = registry
            .validate_and_attach(owner.code(), receiver("alice"))
            .unwrap();
        assert_eq!(session.status, SessionStatus::Connected);

        let session = registry
            .validate_and_attach(owner.code(), receiver("bob"))
            .unwrap();
        assert_eq!(session.receivers.len(), 2);
        assert_eq!(session.receivers[0].identity.name, "alice");
        assert_eq!(session.receivers[1].identity.name, "bob");
    }

    #[test]
    fn test_unknown_code_is_invalid() {
        let registry = SessionRegistry::new();
        let err = registry
            .validate_and_attach("ABCDEFGH", receiver("x"))
            .unwrap_err();
        assert_eq!(err, TransferError::InvalidCode);
    }

    #[test]
    fn test_dropping_owner_closes_session() {
        let registry = SessionRegistry::new();
        let owner = registry.create_session(Direction::Send);
        let code = owner.code().to_string();
        drop(owner);

        assert!(registry.get_session(&code).is_none());
        assert_eq!(
            registry.validate_and_attach(&code, receiver("late")).unwrap_err(),
            TransferError::SessionClosed
        );
    }

    #[test]
    fn test_close_returns_closed_snapshot() {
        let registry = SessionRegistry::new();
        let owner = registry.create_session(Direction::Send);
        registry
            .validate_and_attach(owner.code(), receiver("alice"))
            .unwrap();
        let last = owner.close().unwrap();
        assert_eq!(last.status, SessionStatus::Closed);
        assert_eq!(last.receivers.len(), 1);
        assert!(registry.live_sessions().is_empty());
    }

    #[test]
    fn test_detach_removes_only_that_receiver() {
        let registry = SessionRegistry::new();
        let owner = registry.create_session(Direction::Send);
        let alice = registry
            .validate_and_attach(owner.code(), receiver("alice"))
            .unwrap()
            .receivers[0]
            .id
            .clone();
        registry
            .validate_and_attach(owner.code(), receiver("bob"))
            .unwrap();

        assert!(registry.detach(owner.code(), &alice));
        assert!(!registry.detach(owner.code(), &alice));
        let session = registry.get_session(owner.code()).unwrap();
        assert_eq!(session.receivers.len(), 1);
        assert_eq!(session.receivers[0].identity.name, "bob");
    }

    #[test]
    fn test_end_all_retires_every_code() {
        let registry = SessionRegistry::new();
        let a = registry.create_session(Direction::Send);
        let b = registry.create_session(Direction::Send);
        assert_eq!(registry.end_all(), 2);
        assert_eq!(
            registry.validate(a.code()).unwrap_err(),
            TransferError::SessionClosed
        );
        assert_eq!(
            registry.validate(b.code()).unwrap_err(),
            TransferError::SessionClosed
        );
    }

    #[test]
    fn test_receive_sessions_do_not_accept_receivers() {
        let registry = SessionRegistry::new();
        let owner = registry.create_session(Direction::Receive);
        assert_eq!(
            registry.validate(owner.code()).unwrap_err(),
            TransferError::InvalidCode
        );
    }

    #[test]
    fn test_concurrent_attach_keeps_every_receiver() {
        let registry = SessionRegistry::new();
        let owner = registry.create_session(Direction::Send);
        let code = owner.code().to_string();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = registry.clone();
                let code = code.clone();
                std::thread::spawn(move || {
                    registry
                        .validate_and_attach(&code, receiver(&format!("r{i}")))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.get_session(&code).unwrap().receivers.len(), 16);
    }
}
