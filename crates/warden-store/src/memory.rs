//! In-memory audit sink for tests and ephemeral runs

use std::sync::{Arc, Mutex};

use crate::{AuditEvent, AuditSink, StoreError, StoreResult};

/// Keeps appended events in a vector.
///
/// `fail_appends` makes every append fail, for exercising the monitor's backlog.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
    pub fail_appends: Arc<Mutex<bool>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_appends(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_appends.lock() {
            *flag = fail;
        }
    }

    /// Every stored event, oldest first
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl AuditSink for MemorySink {
    fn append(&self, event: &AuditEvent) -> StoreResult<()> {
        if self.fail_appends.lock().map(|f| *f).unwrap_or(false) {
            return Err(StoreError::Unavailable("memory sink set to fail".into()));
        }
        self.events
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .push(event.clone());
        Ok(())
    }

    fn recent(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let events = self.events.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(events.iter().rev().take(limit).cloned().collect())
    }

    fn last_seq(&self) -> StoreResult<u64> {
        let events = self.events.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(events.iter().map(|e| e.id).max().unwrap_or(0))
    }

    fn is_healthy(&self) -> bool {
        !self.fail_appends.lock().map(|f| *f).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuditEventKind;
    use warden_util::{SessionId, ToolName};

    #[test]
    fn fail_switch() {
        let sink = MemorySink::new();
        let event = AuditEvent::new(
            SessionId::new("s1"),
            ToolName::new("backup_data"),
            AuditEventKind::ApprovalRequested,
        );

        sink.set_fail_appends(true);
        assert!(sink.append(&event).is_err());
        assert!(!sink.is_healthy());

        sink.set_fail_appends(false);
        sink.append(&event).unwrap();
        assert_eq!(sink.events().len(), 1);
        assert_eq!(sink.recent(5).unwrap().len(), 1);
        assert_eq!(sink.last_seq().unwrap(), 0);
    }
}
