//! Connection registry for live collaborators.
//!
//! Tracks who is connected, since when and when they last changed the
//! document. The live count feeds the `userCount` broadcast.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use super::{ConnectionId, SyncError, SyncResult};

/// Bookkeeping for one live connection
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub connection_id: ConnectionId,
    pub connected_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl ConnectionRecord {
    pub fn new(connection_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            connection_id: connection_id.into(),
            connected_at: now,
            last_activity_at: now,
        }
    }

    /// Update the last activity timestamp
    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    /// Short display label derived from the id
    pub fn short_name(&self) -> String {
        short_name(&self.connection_id)
    }
}

/// First eight characters of a connection id
pub fn short_name(connection_id: &str) -> String {
    connection_id.chars().take(8).collect()
}

/// Map of live connections keyed by id
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, ConnectionRecord>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection
    pub fn on_connect(&mut self, connection_id: &str) -> SyncResult<()> {
        if self.connections.contains_key(connection_id) {
            return Err(SyncError::DuplicateConnection(connection_id.to_string()));
        }

        self.connections.insert(
            connection_id.to_string(),
            ConnectionRecord::new(connection_id),
        );
        Ok(())
    }

    /// Remove a connection; absent ids are ignored
    pub fn on_disconnect(&mut self, connection_id: &str) -> Option<ConnectionRecord> {
        self.connections.remove(connection_id)
    }

    /// Mark activity on a connection; absent ids are ignored
    pub fn touch(&mut self, connection_id: &str) {
        if let Some(record) = self.connections.get_mut(connection_id) {
            record.touch();
        }
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn list(&self) -> HashSet<ConnectionId> {
        self.connections.keys().cloned().collect()
    }

    pub fn get(&self, connection_id: &str) -> Option<ConnectionRecord> {
        self.connections.get(connection_id).cloned()
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_and_count() {
        let mut registry = ConnectionRegistry::new();
        registry.on_connect("a").unwrap();
        registry.on_connect("b").unwrap();

        assert_eq!(registry.count(), 2);
        assert_eq!(
            registry.list(),
            HashSet::from(["a".to_string(), "b".to_string()])
        );

        let record = registry.get("a").unwrap();
        assert_eq!(record.connected_at, record.last_activity_at);
    }

    #[test]
    fn test_duplicate_connection() {
        let mut registry = ConnectionRegistry::new();
        registry.on_connect("a").unwrap();

        let result = registry.on_connect("a");
        assert!(matches!(result, Err(SyncError::DuplicateConnection(id)) if id == "a"));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut registry = ConnectionRegistry::new();
        registry.on_connect("a").unwrap();
        registry.on_connect("b").unwrap();

        assert!(registry.on_disconnect("a").is_some());
        assert!(registry.on_disconnect("a").is_none());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_touch_updates_activity() {
        let mut registry = ConnectionRegistry::new();
        registry.on_connect("a").unwrap();
        let before = registry.get("a").unwrap().last_activity_at;

        std::thread::sleep(std::time::Duration::from_millis(5));
        registry.touch("a");
        registry.touch("missing");

        let record = registry.get("a").unwrap();
        assert!(record.last_activity_at > before);
        assert_eq!(record.connected_at, before);
    }

    #[test]
    fn test_short_name() {
        let record = ConnectionRecord::new("0123456789abcdef");
        assert_eq!(record.short_name(), "01234567");
        assert_eq!(short_name("abc"), "abc");
    }
}
