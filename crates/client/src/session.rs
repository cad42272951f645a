//! Assessment session state
//!
//! `AssessmentSession` owns everything one live session mutates: the
//! dimension store, the analysis machine, the timeline sources, and the
//! retained timeline. It is driven exclusively by the session actor, and
//! every mutation ends with a refreshed `SessionSnapshot` that readers load
//! without locking.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde_json::Value;
use tracing::{debug, info};

use assessment_protocol::agent::{ChatPayload, TranscriptionSegment};
use assessment_protocol::DimensionState;

use crate::analysis::{
    self, AnalysisContext, AnalysisEffect, AnalysisInput, AnalysisPhase, AnalysisState,
    DEFAULT_ANALYSIS_TIMEOUT_MS,
};
use crate::dimension_store::DimensionStore;
use crate::error::DecodeError;
use crate::inactivity::{self, InactivityAction};
use crate::notice::UiEvent;
use crate::router::SideChannelEvent;
use crate::storage::StateStorage;
use crate::timeline::{
    ChatMessage, RetainedTimeline, TimelineSources, DEFAULT_MERGE_THRESHOLD_MS,
};
use crate::view::{self, Progress};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub merge_threshold_ms: i64,
    pub analysis_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            merge_threshold_ms: DEFAULT_MERGE_THRESHOLD_MS,
            analysis_timeout: Duration::from_millis(DEFAULT_ANALYSIS_TIMEOUT_MS),
        }
    }
}

/// Work the actor performs after a state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEffect {
    Analysis(AnalysisEffect),
    Ui(UiEvent),
    Disconnect,
}

/// Lock-free view of the session for the UI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub revision: u64,
    pub connected: bool,
    pub history_loaded: bool,
    pub dimension_state: Option<DimensionState>,
    pub is_completed: bool,
    pub analysis: AnalysisPhase,
    pub messages: Vec<ChatMessage>,
    pub retained_messages: Vec<ChatMessage>,
}

impl SessionSnapshot {
    /// Once the assessment is completed the live view may be torn down, so
    /// the retained timeline is shown instead.
    pub fn display_messages(&self) -> &[ChatMessage] {
        if self.is_completed {
            &self.retained_messages
        } else {
            &self.messages
        }
    }

    pub fn progress(&self) -> Progress {
        Progress::from_state(self.dimension_state.as_ref(), self.is_completed)
    }

    pub fn chart_scores(&self) -> Vec<(assessment_protocol::Dimension, f64)> {
        view::chart_scores(self.dimension_state.as_ref())
    }

    /// Completed results are shown only once the final report is in.
    pub fn is_renderable(&self) -> bool {
        self.dimension_state
            .as_ref()
            .is_some_and(DimensionState::is_renderable)
    }
}

pub struct AssessmentSession {
    settings: SessionSettings,
    store: DimensionStore,
    analysis: AnalysisState,
    sources: TimelineSources,
    retained: RetainedTimeline,
    history_loaded: bool,
    connected: bool,
    local_identity: Option<String>,
    agent_identity: Option<String>,
    revision: u64,
    snapshot: Arc<ArcSwap<SessionSnapshot>>,
}

impl AssessmentSession {
    pub fn new(storage: Box<dyn StateStorage>, settings: SessionSettings) -> Self {
        let mut session = Self {
            settings,
            store: DimensionStore::new(storage),
            analysis: AnalysisState::default(),
            sources: TimelineSources::new(),
            retained: RetainedTimeline::new(),
            history_loaded: false,
            connected: false,
            local_identity: None,
            agent_identity: None,
            revision: 0,
            snapshot: Arc::new(ArcSwap::from_pointee(SessionSnapshot::default())),
        };
        session.refresh_snapshot();
        session
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    pub fn snapshot_arc(&self) -> Arc<ArcSwap<SessionSnapshot>> {
        Arc::clone(&self.snapshot)
    }

    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.snapshot.load_full()
    }

    pub fn analysis_phase(&self) -> AnalysisPhase {
        self.analysis.phase
    }

    // -- Transport lifecycle --

    pub fn on_connected(&mut self, local_identity: String) {
        self.connected = true;
        self.local_identity = Some(local_identity);
        self.refresh_snapshot();
    }

    /// Live sources belong to the connection; the store and the retained
    /// timeline outlive it.
    pub fn on_disconnected(&mut self) {
        self.connected = false;
        self.history_loaded = false;
        self.agent_identity = None;
        self.sources.clear();
        self.refresh_snapshot();
    }

    pub fn on_participant_joined(&mut self, identity: String) {
        if self.agent_identity.is_none() {
            self.agent_identity = Some(identity);
        }
    }

    pub fn on_participant_left(&mut self, identity: &str) {
        if self.agent_identity.as_deref() == Some(identity) {
            self.agent_identity = None;
        }
    }

    // -- Timeline --

    pub fn on_transcription(&mut self, segment: &TranscriptionSegment, is_local: bool) {
        self.sources.upsert_transcription(segment, is_local);
        self.refresh_snapshot();
    }

    pub fn on_chat(&mut self, message: &ChatPayload, is_local: bool) {
        self.sources.push_chat(message, is_local);
        self.refresh_snapshot();
    }

    // -- Side channel --

    pub fn on_side_channel(&mut self, event: SideChannelEvent, now_ms: i64) -> Vec<SessionEffect> {
        let mut effects = Vec::new();
        match event {
            SideChannelEvent::HistoryBackfill {
                items,
                sender_identity,
            } => {
                if self.history_loaded {
                    debug!(
                        component = "session",
                        event = "session.history_ignored",
                        "History already loaded for this connection"
                    );
                } else {
                    let agent = sender_identity.or_else(|| self.agent_identity.clone());
                    self.sources.load_history(
                        &items,
                        agent.as_deref(),
                        now_ms,
                        self.settings.merge_threshold_ms,
                    );
                    self.history_loaded = true;
                    info!(
                        component = "session",
                        event = "session.history_loaded",
                        items = items.len(),
                        "Loaded conversation history"
                    );
                }
            }
            SideChannelEvent::StateSnapshot(snapshot) => {
                self.store.apply_state_update(snapshot);
                effects.extend(self.step_analysis(AnalysisInput::StateApplied));
            }
            SideChannelEvent::Analysis(notification) => {
                debug!(
                    component = "session",
                    event = "session.analysis_notification",
                    dimension = %notification.dimension,
                    status = ?notification.status,
                    "Analysis notification received"
                );
                effects.extend(self.step_analysis(AnalysisInput::Notification(notification)));
            }
            SideChannelEvent::Inactivity(notification) => {
                if let InactivityAction::EndSession { notice } = inactivity::evaluate(&notification)
                {
                    info!(
                        component = "session",
                        event = "session.inactivity_timeout",
                        reason = ?notification.reason,
                        "Server ended session for inactivity"
                    );
                    effects.push(SessionEffect::Ui(UiEvent::Notice(notice)));
                    effects.extend(self.reset_progress());
                    effects.push(SessionEffect::Ui(UiEvent::SessionEnded));
                    if self.connected {
                        effects.push(SessionEffect::Disconnect);
                    }
                }
            }
        }
        self.refresh_snapshot();
        effects
    }

    // -- User actions --

    pub fn continue_with_next_dimension(&mut self) -> Vec<SessionEffect> {
        let effects = self.step_analysis(AnalysisInput::Continue);
        self.refresh_snapshot();
        effects
    }

    pub fn reset(&mut self) -> Vec<SessionEffect> {
        let effects = self.reset_progress();
        self.retained.clear();
        self.refresh_snapshot();
        effects
    }

    pub fn seed_from_continuity(&mut self, custom_state: &Value) -> Result<(), DecodeError> {
        self.store.seed_from_value(custom_state)?;
        self.refresh_snapshot();
        Ok(())
    }

    pub fn analysis_timer_elapsed(&mut self, generation: u64) -> Vec<SessionEffect> {
        let effects = self.step_analysis(AnalysisInput::TimerElapsed { generation });
        self.refresh_snapshot();
        effects
    }

    // -- Internals --

    fn reset_progress(&mut self) -> Vec<SessionEffect> {
        self.store.reset();
        self.step_analysis(AnalysisInput::Reset)
    }

    fn step_analysis(&mut self, input: AnalysisInput) -> Vec<SessionEffect> {
        let ctx = AnalysisContext {
            completed: self.store.is_completed(),
            dimension_state: self.store.state(),
        };
        let (next, effects) = analysis::transition(self.analysis, input, ctx);
        if next.phase != self.analysis.phase {
            debug!(
                component = "session",
                event = "session.analysis_transition",
                from = ?self.analysis.phase,
                to = ?next.phase,
                "Analysis phase changed"
            );
        }
        self.analysis = next;
        effects.into_iter().map(SessionEffect::Analysis).collect()
    }

    /// Rebuild the merged timeline and publish a new snapshot.
    pub fn refresh_snapshot(&mut self) {
        self.revision += 1;
        let messages = self.sources.merged(self.settings.merge_threshold_ms);
        let retained_messages = self.retained.observe(&messages).to_vec();
        self.snapshot.store(Arc::new(SessionSnapshot {
            revision: self.revision,
            connected: self.connected,
            history_loaded: self.history_loaded,
            dimension_state: self.store.state().cloned(),
            is_completed: self.store.is_completed(),
            analysis: self.analysis.phase,
            messages,
            retained_messages,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::timeline::Origin;
    use assessment_protocol::agent::{HistoryContent, HistoryItem, HistoryRole};
    use assessment_protocol::{
        AnalysisNotification, Dimension, DimensionRecord, InactivityTimeoutNotification, Stage,
    };

    fn session_with(storage: MemoryStorage) -> AssessmentSession {
        AssessmentSession::new(Box::new(storage), SessionSettings::default())
    }

    fn feedback_snapshot(dimension: Dimension) -> DimensionState {
        let mut state = DimensionState {
            current: Some(Stage::Dimension(dimension)),
            ..Default::default()
        };
        *state.record_mut(dimension) = Some(DimensionRecord {
            scoring: Some(2.0),
            partial_feedback: vec!["Document your AI use cases".into()],
            ..Default::default()
        });
        state
    }

    fn chat(id: &str, ts: i64, text: &str) -> ChatPayload {
        ChatPayload {
            id: id.into(),
            timestamp: ts,
            message: text.into(),
            from_identity: Some("user-1".into()),
        }
    }

    #[test]
    fn history_loads_once_per_connection() {
        let mut session = session_with(MemoryStorage::new());
        session.on_connected("user-1".into());

        let items = vec![HistoryItem {
            id: Some("h1".into()),
            role: HistoryRole::Assistant,
            content: HistoryContent::Text("Welcome back".into()),
            created_at: Some(1_000.0),
        }];
        session.on_side_channel(
            SideChannelEvent::HistoryBackfill {
                items: items.clone(),
                sender_identity: Some("agent-1".into()),
            },
            5_000_000,
        );
        session.on_side_channel(
            SideChannelEvent::HistoryBackfill {
                items,
                sender_identity: Some("agent-1".into()),
            },
            5_000_000,
        );

        let snapshot = session.snapshot();
        assert!(snapshot.history_loaded);
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].origin, Origin::Remote("agent-1".into()));

        session.on_disconnected();
        let snapshot = session.snapshot();
        assert!(!snapshot.history_loaded);
        assert!(snapshot.messages.is_empty());
        assert_eq!(snapshot.retained_messages.len(), 1);
    }

    #[test]
    fn disconnect_keeps_durable_state() {
        let storage = MemoryStorage::new();
        let mut session = session_with(storage.clone());
        session.on_side_channel(
            SideChannelEvent::StateSnapshot(feedback_snapshot(Dimension::Outcome)),
            0,
        );
        session.on_disconnected();

        assert!(session.snapshot().dimension_state.is_some());
        assert!(storage.peek().is_some());
    }

    #[test]
    fn snapshot_with_feedback_moves_waiting_analysis_to_viewing() {
        let mut session = session_with(MemoryStorage::new());
        let effects = session.on_side_channel(
            SideChannelEvent::Analysis(AnalysisNotification::started(Dimension::Coverage)),
            0,
        );
        assert!(matches!(
            effects.as_slice(),
            [SessionEffect::Analysis(AnalysisEffect::StartTimer { .. })]
        ));

        let effects = session.on_side_channel(
            SideChannelEvent::StateSnapshot(feedback_snapshot(Dimension::Coverage)),
            0,
        );
        assert_eq!(
            effects,
            vec![SessionEffect::Analysis(AnalysisEffect::CancelTimer)]
        );
        assert_eq!(
            session.snapshot().analysis.viewing(),
            Some(Dimension::Coverage)
        );

        session.continue_with_next_dimension();
        assert_eq!(session.snapshot().analysis, AnalysisPhase::Idle);
    }

    #[test]
    fn inactivity_resets_progress_and_requests_disconnect() {
        let storage = MemoryStorage::new();
        let mut session = session_with(storage.clone());
        session.on_connected("user-1".into());
        session.on_side_channel(
            SideChannelEvent::StateSnapshot(feedback_snapshot(Dimension::Evolution)),
            0,
        );
        session.on_side_channel(
            SideChannelEvent::Analysis(AnalysisNotification::started(Dimension::Outcome)),
            0,
        );

        let effects = session.on_side_channel(
            SideChannelEvent::Inactivity(InactivityTimeoutNotification::session_ended(
                "Closed for inactivity",
            )),
            0,
        );

        assert!(matches!(effects.first(), Some(SessionEffect::Ui(UiEvent::Notice(_)))));
        assert!(effects.contains(&SessionEffect::Analysis(AnalysisEffect::CancelTimer)));
        assert!(effects.contains(&SessionEffect::Ui(UiEvent::SessionEnded)));
        assert_eq!(effects.last(), Some(&SessionEffect::Disconnect));

        let snapshot = session.snapshot();
        assert!(snapshot.dimension_state.is_none());
        assert_eq!(snapshot.analysis, AnalysisPhase::Idle);
        assert_eq!(storage.peek(), None);
    }

    #[test]
    fn display_switches_to_retained_timeline_once_completed() {
        let mut session = session_with(MemoryStorage::new());
        session.on_connected("user-1".into());
        session.on_chat(&chat("m1", 1_000, "We automate testing"), true);
        session.on_chat(&chat("m2", 5_000, "And code review"), true);
        session.on_side_channel(
            SideChannelEvent::StateSnapshot(DimensionState {
                current: Some(Stage::Completed),
                ..Default::default()
            }),
            0,
        );
        session.on_disconnected();

        let snapshot = session.snapshot();
        assert!(snapshot.is_completed);
        assert!(snapshot.messages.is_empty());
        assert_eq!(snapshot.display_messages().len(), 2);
        assert!(!snapshot.is_renderable());
    }

    #[test]
    fn seed_from_continuity_rehydrates_store() {
        let mut session = session_with(MemoryStorage::new());
        session
            .seed_from_continuity(&serde_json::json!({ "current": "Coverage" }))
            .unwrap();
        assert_eq!(session.snapshot().progress().current_index, 4);
    }

    #[test]
    fn revision_increases_with_each_change() {
        let mut session = session_with(MemoryStorage::new());
        let before = session.snapshot().revision;
        session.on_chat(&chat("m1", 1, "hi"), true);
        assert!(session.snapshot().revision > before);
    }
}
