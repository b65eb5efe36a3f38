use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

/// Live terminal connections, keyed by a per-connection id.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<DashMap<Uuid, SessionEntry>>,
}

#[derive(Debug, Clone)]
struct SessionEntry {
    resource_id: String,
    started_at: OffsetDateTime,
    attached: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub connection_id: Uuid,
    pub resource_id: String,
    pub started_at: String,
    pub attached: bool,
    pub age_secs: i64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection. The entry lives exactly as long as the guard.
    pub fn register(&self, resource_id: impl Into<String>) -> SessionGuard {
        let connection_id = Uuid::new_v4();
        self.inner.insert(
            connection_id,
            SessionEntry {
                resource_id: resource_id.into(),
                started_at: OffsetDateTime::now_utc(),
                attached: false,
            },
        );
        SessionGuard {
            registry: self.clone(),
            connection_id,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Connections whose remote side has been hijacked.
    pub fn attached(&self) -> usize {
        self.inner.iter().filter(|entry| entry.attached).count()
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let now = OffsetDateTime::now_utc();
        let mut entries: Vec<(OffsetDateTime, SessionSnapshot)> = self
            .inner
            .iter()
            .map(|entry| {
                let started_at = entry.started_at;
                (
                    started_at,
                    SessionSnapshot {
                        connection_id: *entry.key(),
                        resource_id: entry.resource_id.clone(),
                        started_at: started_at.format(&Rfc3339).unwrap_or_default(),
                        attached: entry.attached,
                        age_secs: (now - started_at).whole_seconds(),
                    },
                )
            })
            .collect();
        entries.sort_by_key(|(started_at, _)| *started_at);
        entries.into_iter().map(|(_, snapshot)| snapshot).collect()
    }
}

/// Removes its registry entry when dropped.
pub struct SessionGuard {
    registry: SessionRegistry,
    connection_id: Uuid,
}

impl SessionGuard {
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn mark_attached(&self) {
        if let Some(mut entry) = self.registry.inner.get_mut(&self.connection_id) {
            entry.attached = true;
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.inner.remove(&self.connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_removes_entry_on_drop() {
        let registry = SessionRegistry::new();
        let first = registry.register("c0ffee");
        let second = registry.register("web");
        assert_eq!(registry.len(), 2);
        assert_ne!(first.connection_id(), second.connection_id());

        drop(first);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].resource_id, "web");
        assert_eq!(snapshot[0].connection_id, second.connection_id());

        drop(second);
        assert!(registry.is_empty());
    }

    #[test]
    fn attached_flag_shows_in_snapshot() {
        let registry = SessionRegistry::new();
        let guard = registry.register("c0ffee");
        assert_eq!(registry.attached(), 0);
        assert!(!registry.snapshot()[0].attached);

        guard.mark_attached();
        assert_eq!(registry.attached(), 1);
        let snapshot = registry.snapshot();
        assert!(snapshot[0].attached);
        assert!(snapshot[0].age_secs >= 0);
        assert!(snapshot[0].started_at.contains('T'));
    }
}
