//! Index update triggers.
//!
//! A trigger observes the entries an index writes. Simple indexes report
//! entries keyed by document id; aggregating indexes report them keyed by
//! aggregation key. Triggers run under the index's writer lock, after the
//! store has accepted the change.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::segment::IndexEntry;

/// Observer of index writes. Both callbacks default to doing nothing.
pub trait IndexUpdateTrigger: Send + Sync + fmt::Debug {
    /// Every entry stored under `entry_key` was removed.
    fn on_entry_deleted(&self, _index: &str, _entry_key: &str) {}

    /// `entry` was stored under `entry_key`.
    fn on_entry_created(&self, _index: &str, _entry_key: &str, _entry: &IndexEntry) {}
}

/// The triggers registered with a storage, shared by all of its indexes.
#[derive(Clone, Default)]
pub struct Triggers {
    registered: Arc<RwLock<Vec<Arc<dyn IndexUpdateTrigger>>>>,
}

impl Triggers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, trigger: Arc<dyn IndexUpdateTrigger>) {
        self.registered.write().push(trigger);
    }

    pub fn is_empty(&self) -> bool {
        self.registered.read().is_empty()
    }

    /// Report that the entries under `entry_key` were replaced by `entries`.
    pub(crate) fn entries_replaced(
        &self,
        index: &str,
        entry_key: &str,
        deleted: usize,
        entries: &[IndexEntry],
    ) {
        let registered = self.registered.read();
        for trigger in registered.iter() {
            if deleted > 0 {
                trigger.on_entry_deleted(index, entry_key);
            }
            for entry in entries {
                trigger.on_entry_created(index, entry_key, entry);
            }
        }
    }
}

impl fmt::Debug for Triggers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Triggers")
            .field("registered", &self.registered.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl IndexUpdateTrigger for Recorder {
        fn on_entry_deleted(&self, index: &str, entry_key: &str) {
            self.events.lock().push(format!("deleted {index} {entry_key}"));
        }

        fn on_entry_created(&self, index: &str, entry_key: &str, entry: &IndexEntry) {
            let name = entry.first("Name").unwrap_or_default();
            self.events
                .lock()
                .push(format!("created {index} {entry_key} {name}"));
        }
    }

    #[test]
    fn test_replacement_reports_delete_then_creates() {
        let triggers = Triggers::new();
        assert!(triggers.is_empty());

        let recorder = Arc::new(Recorder::default());
        triggers.register(recorder.clone());

        let entry = IndexEntry::new().with_field("Name", "ayende", true);
        triggers.entries_replaced("Users", "users/1", 0, std::slice::from_ref(&entry));
        triggers.entries_replaced("Users", "users/1", 1, &[]);

        assert_eq!(
            *recorder.events.lock(),
            vec!["created Users users/1 ayende", "deleted Users users/1"]
        );
    }
}
