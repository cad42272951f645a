//! Dimension-state store — the persisted view of assessment progress.
//!
//! Mirrors exactly what the agent last sent (or what storage held at
//! startup). Snapshots replace state wholesale; nothing is merged or derived.

use serde_json::Value;
use tracing::{debug, info, warn};

use assessment_protocol::DimensionState;

use crate::error::{DecodeError, StorageError};
use crate::storage::StateStorage;

pub struct DimensionStore {
    state: Option<DimensionState>,
    completed: bool,
    storage: Box<dyn StateStorage>,
}

impl DimensionStore {
    /// Build a store, rehydrating from storage once.
    pub fn new(storage: Box<dyn StateStorage>) -> Self {
        let state = load_state(storage.as_ref());
        let completed = state.as_ref().is_some_and(DimensionState::is_completed);
        if let Some(state) = &state {
            info!(
                component = "dimension_store",
                event = "dimension_store.rehydrated",
                current = ?state.current,
                completed,
                "Rehydrated assessment state from storage"
            );
        }
        Self {
            state,
            completed,
            storage,
        }
    }

    pub fn state(&self) -> Option<&DimensionState> {
        self.state.as_ref()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Replace state with the agent's snapshot and persist it.
    pub fn apply_state_update(&mut self, snapshot: DimensionState) {
        if snapshot.is_completed() {
            self.completed = true;
        }
        debug!(
            component = "dimension_store",
            event = "dimension_store.update_applied",
            current = ?snapshot.current,
            completed = self.completed,
            "Applied agent state snapshot"
        );
        self.state = Some(snapshot);
        self.persist();
    }

    /// Seed from the continuity service's `custom_state` (resume path).
    pub fn seed_from_value(&mut self, custom_state: &Value) -> Result<(), DecodeError> {
        let snapshot: DimensionState =
            serde_json::from_value(custom_state.clone()).map_err(|source| DecodeError::Json {
                topic: "session-continuity".to_string(),
                source,
            })?;
        self.apply_state_update(snapshot);
        Ok(())
    }

    /// Drop in-memory state, the completion flag, and the storage entry.
    pub fn reset(&mut self) {
        self.state = None;
        self.completed = false;
        if let Err(e) = self.storage.remove() {
            warn!(
                component = "dimension_store",
                event = "dimension_store.remove_failed",
                error = %e,
                "Failed to remove stored assessment state"
            );
        }
        info!(
            component = "dimension_store",
            event = "dimension_store.reset",
            "Assessment state reset"
        );
    }

    fn persist(&mut self) {
        let Some(state) = &self.state else {
            return;
        };
        let result = serde_json::to_string(state)
            .map_err(StorageError::from)
            .and_then(|json| self.storage.save(&json));
        if let Err(e) = result {
            warn!(
                component = "dimension_store",
                event = "dimension_store.save_failed",
                error = %e,
                "Failed to persist assessment state"
            );
        }
    }
}

/// Absent or unreadable storage means "no prior session".
pub fn load_state(storage: &dyn StateStorage) -> Option<DimensionState> {
    let raw = match storage.load() {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            warn!(
                component = "dimension_store",
                event = "dimension_store.load_failed",
                error = %e,
                "Failed to read stored assessment state"
            );
            return None;
        }
    };

    match serde_json::from_str::<DimensionState>(&raw) {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(
                component = "dimension_store",
                event = "dimension_store.stored_state_malformed",
                error = %e,
                "Ignoring malformed stored assessment state"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use assessment_protocol::{Dimension, DimensionRecord, FinalReport, Stage};
    use serde_json::json;

    fn snapshot(current: Stage, evolution_score: Option<f64>) -> DimensionState {
        DimensionState {
            evolution: Some(DimensionRecord {
                scoring: evolution_score,
                justification: "Incremental adoption".into(),
                ..Default::default()
            }),
            current: Some(current),
            ..Default::default()
        }
    }

    #[test]
    fn last_snapshot_wins_and_storage_matches_memory() {
        let storage = MemoryStorage::new();
        let mut store = DimensionStore::new(Box::new(storage.clone()));

        let updates = [
            snapshot(Stage::Dimension(Dimension::Evolution), None),
            snapshot(Stage::Dimension(Dimension::Outcome), Some(2.0)),
            DimensionState {
                current: Some(Stage::Dimension(Dimension::Leverage)),
                ..Default::default()
            },
        ];

        for update in updates.iter().cloned() {
            store.apply_state_update(update.clone());
            assert_eq!(store.state(), Some(&update));

            let stored: DimensionState =
                serde_json::from_str(&storage.peek().expect("stored")).unwrap();
            assert_eq!(Some(&stored), store.state());
        }

        // Wholesale replacement: the Evolution record from the previous snapshot is gone
        assert!(store.state().unwrap().evolution.is_none());
    }

    #[test]
    fn reload_from_storage_yields_identical_state() {
        let storage = MemoryStorage::new();
        let mut store = DimensionStore::new(Box::new(storage.clone()));
        let update = snapshot(Stage::Dimension(Dimension::Outcome), Some(4.0));
        store.apply_state_update(update.clone());

        let reloaded = DimensionStore::new(Box::new(storage));
        assert_eq!(reloaded.state(), Some(&update));
        assert!(!reloaded.is_completed());
    }

    #[test]
    fn reset_removes_storage_key() {
        let storage = MemoryStorage::new();
        let mut store = DimensionStore::new(Box::new(storage.clone()));
        store.apply_state_update(snapshot(Stage::Completed, Some(3.0)));
        assert!(store.is_completed());

        store.reset();
        assert!(store.state().is_none());
        assert!(!store.is_completed());
        assert_eq!(storage.peek(), None);
        assert!(load_state(&storage).is_none());
    }

    #[test]
    fn malformed_storage_is_treated_as_no_session() {
        let storage = MemoryStorage::with_value("{not json");
        let store = DimensionStore::new(Box::new(storage));
        assert!(store.state().is_none());
    }

    #[test]
    fn rehydrated_completed_state_sets_flag() {
        let stored = json!({ "current": "COMPLETED", "final_report": { "executive_summary": "Done", "recommendations": [] } });
        let storage = MemoryStorage::with_value(stored.to_string());
        let store = DimensionStore::new(Box::new(storage));
        assert!(store.is_completed());
        assert!(store.state().unwrap().is_renderable());
    }

    #[test]
    fn completion_flag_sticks_until_reset() {
        let mut store = DimensionStore::new(Box::new(MemoryStorage::new()));
        store.apply_state_update(snapshot(Stage::Completed, None));
        store.apply_state_update(snapshot(Stage::Dimension(Dimension::Alignment), None));
        assert!(store.is_completed());
    }

    #[test]
    fn stage_progression_requires_final_report_to_render() {
        let mut store = DimensionStore::new(Box::new(MemoryStorage::new()));
        for dimension in Dimension::ALL {
            store.apply_state_update(snapshot(Stage::Dimension(dimension), Some(1.0)));
            assert!(!store.is_completed());
        }

        store.apply_state_update(snapshot(Stage::Completed, Some(1.0)));
        assert!(store.is_completed());
        assert!(!store.state().unwrap().is_renderable());

        let mut with_report = snapshot(Stage::Completed, Some(1.0));
        with_report.final_report = Some(FinalReport {
            executive_summary: "Ready to scale".into(),
            recommendations: vec![],
        });
        store.apply_state_update(with_report);
        assert!(store.state().unwrap().is_renderable());
    }

    #[test]
    fn seed_from_value_persists_custom_state() {
        let storage = MemoryStorage::new();
        let mut store = DimensionStore::new(Box::new(storage.clone()));
        store
            .seed_from_value(&json!({ "current": "Sponsorship" }))
            .unwrap();
        assert_eq!(
            store.state().unwrap().current,
            Some(Stage::Dimension(Dimension::Sponsorship))
        );
        assert!(storage.peek().is_some());

        assert!(store.seed_from_value(&json!({ "current": 7 })).is_err());
        // A rejected seed leaves the previous state alone
        assert_eq!(
            store.state().unwrap().current,
            Some(Stage::Dimension(Dimension::Sponsorship))
        );
    }
}
