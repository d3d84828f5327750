//! Append-only bounded event log for operator visibility (spec §2, §4.6).

use std::collections::VecDeque;
use std::sync::RwLock;

use chrono::Utc;
use uuid::Uuid;

use crate::model::{IncidentSeverity, SystemIncident};

const DEFAULT_CAPACITY: usize = 1000;

/// Thread-safe bounded ring of [`SystemIncident`]s. Oldest entries are
/// dropped once `capacity` is exceeded; this is an operator-visibility aid,
/// not a durable audit log.
#[derive(Debug)]
pub struct IncidentStore {
    capacity: usize,
    incidents: RwLock<VecDeque<SystemIncident>>,
}

impl IncidentStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            incidents: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record(&self, severity: IncidentSeverity, source: &str, message: &str) -> SystemIncident {
        let incident = SystemIncident {
            id: Uuid::new_v4().to_string(),
            severity,
            source: source.to_string(),
            message: message.to_string(),
            created_at: Utc::now(),
            resolved_at: None,
        };
        let mut incidents = self.incidents.write().unwrap();
        if incidents.len() >= self.capacity {
            incidents.pop_front();
        }
        incidents.push_back(incident.clone());
        incident
    }

    pub fn info(&self, source: &str, message: &str) -> SystemIncident {
        self.record(IncidentSeverity::Info, source, message)
    }

    pub fn warning(&self, source: &str, message: &str) -> SystemIncident {
        self.record(IncidentSeverity::Warning, source, message)
    }

    pub fn critical(&self, source: &str, message: &str) -> SystemIncident {
        self.record(IncidentSeverity::Critical, source, message)
    }

    pub fn list(&self) -> Vec<SystemIncident> {
        self.incidents.read().unwrap().iter().cloned().collect()
    }

    pub fn restore(&self, incidents: Vec<SystemIncident>) {
        let mut state = self.incidents.write().unwrap();
        *state = incidents.into_iter().collect();
        while state.len() > self.capacity {
            state.pop_front();
        }
    }

    pub fn snapshot(&self) -> Vec<SystemIncident> {
        self.list()
    }
}

impl Default for IncidentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_log_drops_oldest() {
        let store = IncidentStore::with_capacity(2);
        store.info("a", "first");
        store.info("a", "second");
        store.info("a", "third");

        let incidents = store.list();
        assert_eq!(incidents.len(), 2);
        assert_eq!(incidents[0].message, "second");
        assert_eq!(incidents[1].message, "third");
    }

    #[test]
    fn records_severity_correctly() {
        let store = IncidentStore::new();
        let incident = store.critical("proxy", "timeout dispatching request");
        assert!(matches!(incident.severity, IncidentSeverity::Critical));
    }
}
