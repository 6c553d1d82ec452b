//! In-memory session set

use std::collections::HashMap;

use mg_core::types::{ContentId, LifecyclePhase, PersistedRecord, Session};

/// Live sessions keyed by content id. Guarded by the orchestrator's lock.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<ContentId, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ContentId) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &ContentId) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    pub fn contains(&self, id: &ContentId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn insert(&mut self, session: Session) {
        self.sessions.insert(session.id.clone(), session);
    }

    pub fn remove(&mut self, id: &ContentId) -> Option<Session> {
        self.sessions.remove(id)
    }

    /// Ids of every session, in added order
    pub fn ids(&self) -> Vec<ContentId> {
        self.list().into_iter().map(|s| s.id).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions in the order they were added
    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.added_at.cmp(&b.added_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    /// Durable projection of every live session, in added order
    pub fn records(&self) -> Vec<PersistedRecord> {
        self.list().iter().map(Session::record).collect()
    }

    /// Whether any session should be fetching pieces right now
    pub fn any_transferring(&self) -> bool {
        self.sessions.values().any(Session::wants_transfer)
    }

    /// Sessions neither paused nor completed
    pub fn active_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| !s.is_paused() && s.phase != LifecyclePhase::Completed)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mg_core::types::DesiredState;
    use std::path::PathBuf;

    fn session(id: &str, added_at: u64, phase: LifecyclePhase) -> Session {
        Session {
            id: ContentId::new(id),
            source_uri: format!("magnet:?xt=urn:btih:{}", id),
            destination: PathBuf::from("/tmp"),
            desired_state: DesiredState::Active,
            added_at,
            completed_at: None,
            phase,
        }
    }

    #[test]
    fn test_records_follow_added_order() {
        let mut table = SessionTable::new();
        table.insert(session("bb", 20, LifecyclePhase::Discovering));
        table.insert(session("aa", 10, LifecyclePhase::Discovering));

        let records = table.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].added_at, 10);
        assert_eq!(records[1].added_at, 20);
    }

    #[test]
    fn test_counts() {
        let mut table = SessionTable::new();
        assert!(!table.any_transferring());

        table.insert(session("aa", 1, LifecyclePhase::Transferring));
        table.insert(session("bb", 2, LifecyclePhase::Completed));
        let mut paused = session("cc", 3, LifecyclePhase::Transferring);
        paused.desired_state = DesiredState::Paused;
        table.insert(paused);

        assert!(table.any_transferring());
        assert_eq!(table.active_count(), 1);
        assert_eq!(table.ids().len(), 3);
        assert_eq!(table.ids()[0], ContentId::new("aa"));
    }
}
