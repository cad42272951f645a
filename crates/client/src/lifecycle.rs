//! Transport session lifecycle
//!
//! Drives one `Transport`: connects with retry, routes its events into the
//! session actor and the stream router, carries outbound RPCs and chat, and
//! tears everything down on disconnect or unload.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use assessment_protocol::client::{AudioToggle, RpcMethod, TrackSource};

use crate::error::TransportError;
use crate::notice::{UiEvent, UserNotice};
use crate::router::{register_default_topics, StreamRouter, TopicRegistration};
use crate::session_actor::SessionActorHandle;
use crate::session_command::{SessionCommand, SessionOutput};
use crate::transport::retry::{AttemptOutcome, ConnectAttempts, RetryPolicy, Sleeper};
use crate::transport::{Transport, TransportEvent};

const CAPTURE_SOURCES: [TrackSource; 3] = [
    TrackSource::Microphone,
    TrackSource::Camera,
    TrackSource::ScreenShare,
];

pub struct TransportSession<T: Transport> {
    transport: Arc<T>,
    router: Arc<StreamRouter>,
    actor: SessionActorHandle,
    registration: Option<TopicRegistration>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    ui: mpsc::UnboundedSender<UiEvent>,
}

impl<T: Transport> TransportSession<T> {
    pub fn new(
        transport: Arc<T>,
        actor: SessionActorHandle,
        policy: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
        ui: mpsc::UnboundedSender<UiEvent>,
    ) -> Self {
        Self {
            transport,
            router: Arc::new(StreamRouter::new()),
            actor,
            registration: None,
            policy,
            sleeper,
            ui,
        }
    }

    pub fn router(&self) -> &Arc<StreamRouter> {
        &self.router
    }

    pub fn actor(&self) -> &SessionActorHandle {
        &self.actor
    }

    /// Connect, retrying per policy. The microphone is enabled alongside
    /// each attempt so audio captured before the agent joins is buffered.
    /// Exhausting the retries raises a fatal notice.
    pub async fn connect_with_retry(
        &mut self,
        server_url: &str,
        token: &str,
    ) -> Result<(), TransportError> {
        let mut attempts = ConnectAttempts::new(self.policy);

        loop {
            let (mic, result) = tokio::join!(
                self.transport
                    .set_track_enabled(TrackSource::Microphone, true, true),
                self.transport.connect(server_url, token),
            );

            if let Err(e) = mic {
                self.media_device_error(e.to_string());
            }

            let err = match result {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            match attempts.record_failure() {
                AttemptOutcome::Retry { retry, delay } => {
                    warn!(
                        component = "lifecycle",
                        event = "lifecycle.connect_retry",
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Connect failed, retrying"
                    );
                    self.sleeper.sleep(delay).await;
                }
                AttemptOutcome::GiveUp { attempts } => {
                    error!(
                        component = "lifecycle",
                        event = "lifecycle.connect_failed",
                        attempts,
                        error = %err,
                        "Giving up on connecting to agent"
                    );
                    let _ = self
                        .ui
                        .send(UiEvent::Notice(UserNotice::connect_failed(err.to_string())));
                    return Err(TransportError::RetriesExhausted {
                        attempts,
                        last_error: err.to_string(),
                    });
                }
            }
        }
    }

    pub async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { local_identity } => {
                // Replacing the guard re-registers every topic for this connection
                self.registration = Some(register_default_topics(
                    &self.router,
                    self.actor.side_channel_sink(),
                ));
                self.actor
                    .send(SessionCommand::Connected { local_identity })
                    .await;
            }
            TransportEvent::Disconnected { reason } => {
                self.release_topics();
                self.disable_capture().await;
                self.actor.send(SessionCommand::Disconnected { reason }).await;
                let _ = self.ui.send(UiEvent::SessionFinished);
            }
            TransportEvent::MediaDevicesError { message } => {
                self.media_device_error(message);
            }
            TransportEvent::ParticipantJoined { identity } => {
                self.actor
                    .send(SessionCommand::ParticipantJoined { identity })
                    .await;
            }
            TransportEvent::ParticipantLeft { identity } => {
                self.actor
                    .send(SessionCommand::ParticipantLeft { identity })
                    .await;
            }
            TransportEvent::TopicStream(stream) => {
                let topic = stream.topic.clone();
                if let Err(e) = self.router.dispatch(stream) {
                    warn!(
                        component = "lifecycle",
                        event = "lifecycle.stream_unrouted",
                        topic = %topic,
                        error = %e,
                        "Dropping stream with no registered handler"
                    );
                }
            }
            TransportEvent::Transcription { segment, is_local } => {
                self.actor
                    .send(SessionCommand::Transcription { segment, is_local })
                    .await;
            }
            TransportEvent::Chat { message, is_local } => {
                self.actor
                    .send(SessionCommand::Chat { message, is_local })
                    .await;
            }
        }
    }

    pub async fn handle_output(&mut self, output: SessionOutput) {
        match output {
            SessionOutput::Ui(event) => {
                let _ = self.ui.send(event);
            }
            SessionOutput::RequestDisconnect => {
                if self.transport.is_connected() {
                    self.transport.disconnect().await;
                }
            }
        }
    }

    /// Pump transport events and actor outputs until the transport goes away.
    pub async fn run(
        &mut self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        mut outputs: mpsc::UnboundedReceiver<SessionOutput>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    self.handle_event(event).await;
                }
                Some(output) = outputs.recv() => {
                    self.handle_output(output).await;
                }
            }
        }
    }

    pub async fn disconnect(&mut self) {
        self.transport.disconnect().await;
    }

    /// Best-effort teardown when the hosting process is going away.
    pub async fn before_unload(&mut self) {
        self.release_topics();
        self.disable_capture().await;
        self.transport.disconnect().await;
        info!(
            component = "lifecycle",
            event = "lifecycle.unloaded",
            "Session torn down before unload"
        );
    }

    // -- Outbound --

    /// The agent is the first remote participant.
    pub fn agent_identity(&self) -> Option<String> {
        self.transport.remote_participants().into_iter().next()
    }

    pub async fn send_toggle_input(&self, enabled: bool) {
        self.send_toggle(RpcMethod::ToggleInput, AudioToggle::from_enabled(enabled))
            .await;
    }

    pub async fn send_toggle_output(&self, enabled: bool) {
        self.send_toggle(RpcMethod::ToggleOutput, AudioToggle::from_enabled(enabled))
            .await;
    }

    /// Voice mode switches both directions together.
    pub async fn set_voice_mode(&self, enabled: bool) {
        self.send_toggle_input(enabled).await;
        self.send_toggle_output(enabled).await;
    }

    pub async fn send_chat(&self, text: &str) -> Result<(), TransportError> {
        let message = self.transport.send_chat(text).await?;
        self.actor
            .send(SessionCommand::Chat {
                message,
                is_local: true,
            })
            .await;
        Ok(())
    }

    async fn send_toggle(&self, method: RpcMethod, toggle: AudioToggle) {
        let Some(agent) = self.agent_identity() else {
            warn!(
                component = "lifecycle",
                event = "lifecycle.rpc_skipped",
                method = method.as_str(),
                "No agent participant to address"
            );
            return;
        };
        if let Err(e) = self
            .transport
            .perform_rpc(&agent, method, toggle.as_str())
            .await
        {
            warn!(
                component = "lifecycle",
                event = "lifecycle.rpc_failed",
                method = method.as_str(),
                agent = %agent,
                error = %e,
                "Agent RPC failed"
            );
        }
    }

    fn release_topics(&mut self) {
        self.registration = None;
        self.router.unregister_all();
    }

    async fn disable_capture(&self) {
        for source in CAPTURE_SOURCES {
            if let Err(e) = self.transport.set_track_enabled(source, false, false).await {
                warn!(
                    component = "lifecycle",
                    event = "lifecycle.disable_track_failed",
                    source = ?source,
                    error = %e,
                    "Failed to disable local capture"
                );
            }
        }
    }

    fn media_device_error(&self, message: String) {
        warn!(
            component = "lifecycle",
            event = "lifecycle.media_devices_error",
            error = %message,
            "Media device error"
        );
        let _ = self
            .ui
            .send(UiEvent::Notice(UserNotice::media_devices(message)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notice::Severity;
    use crate::session::{AssessmentSession, SessionSettings};
    use crate::storage::MemoryStorage;
    use crate::transport::TopicStream;
    use assessment_protocol::agent::{topics, ChatPayload};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeTransport {
        failures_before_success: u32,
        connect_calls: AtomicU32,
        connected: AtomicBool,
        participants: Mutex<Vec<String>>,
        tracks: Mutex<Vec<(TrackSource, bool)>>,
        rpcs: Mutex<Vec<(String, RpcMethod, String)>>,
        fail_rpcs: bool,
        fail_mic: bool,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn connect(&self, _server_url: &str, _token: &str) -> Result<(), TransportError> {
            let call = self.connect_calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                return Err(TransportError::Connect("connection refused".into()));
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }

        async fn set_track_enabled(
            &self,
            source: TrackSource,
            enabled: bool,
            _pre_connect_buffer: bool,
        ) -> Result<(), TransportError> {
            if self.fail_mic && source == TrackSource::Microphone && enabled {
                return Err(TransportError::MediaDevice("no microphone".into()));
            }
            self.tracks.lock().unwrap().push((source, enabled));
            Ok(())
        }

        fn remote_participants(&self) -> Vec<String> {
            self.participants.lock().unwrap().clone()
        }

        fn local_identity(&self) -> Option<String> {
            Some("user-1".into())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn perform_rpc(
            &self,
            destination: &str,
            method: RpcMethod,
            payload: &str,
        ) -> Result<String, TransportError> {
            self.rpcs
                .lock()
                .unwrap()
                .push((destination.into(), method, payload.into()));
            if self.fail_rpcs {
                return Err(TransportError::Rpc {
                    method: method.as_str().into(),
                    message: "unsupported".into(),
                });
            }
            Ok(String::new())
        }

        async fn send_chat(&self, text: &str) -> Result<ChatPayload, TransportError> {
            Ok(ChatPayload {
                id: "chat-1".into(),
                timestamp: 42,
                message: text.into(),
                from_identity: Some("user-1".into()),
            })
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    struct Harness {
        session: TransportSession<FakeTransport>,
        transport: Arc<FakeTransport>,
        sleeper: Arc<RecordingSleeper>,
        ui: mpsc::UnboundedReceiver<UiEvent>,
        outputs: mpsc::UnboundedReceiver<SessionOutput>,
    }

    fn harness(transport: FakeTransport) -> Harness {
        let transport = Arc::new(transport);
        let sleeper = Arc::new(RecordingSleeper::default());
        let (actor, outputs) = SessionActorHandle::spawn(AssessmentSession::new(
            Box::new(MemoryStorage::new()),
            SessionSettings::default(),
        ));
        let (ui_tx, ui) = mpsc::unbounded_channel();
        let session = TransportSession::new(
            Arc::clone(&transport),
            actor,
            RetryPolicy::default(),
            sleeper.clone(),
            ui_tx,
        );
        Harness {
            session,
            transport,
            sleeper,
            ui,
            outputs,
        }
    }

    #[tokio::test]
    async fn connect_retries_with_linear_backoff() {
        let mut h = harness(FakeTransport {
            failures_before_success: 2,
            ..Default::default()
        });

        h.session.connect_with_retry("ws://agent", "token").await.unwrap();

        assert_eq!(h.transport.connect_calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *h.sleeper.slept.lock().unwrap(),
            vec![Duration::from_millis(1000), Duration::from_millis(2000)]
        );
        assert!(h.ui.try_recv().is_err());
        // Microphone requested alongside every attempt
        let mic_requests = h
            .transport
            .tracks
            .lock()
            .unwrap()
            .iter()
            .filter(|(source, enabled)| *source == TrackSource::Microphone && *enabled)
            .count();
        assert_eq!(mic_requests, 3);
    }

    #[tokio::test]
    async fn exhausted_retries_raise_fatal_notice() {
        let mut h = harness(FakeTransport {
            failures_before_success: u32::MAX,
            ..Default::default()
        });

        let err = h
            .session
            .connect_with_retry("ws://agent", "token")
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::RetriesExhausted { attempts: 4, .. }));
        assert_eq!(h.transport.connect_calls.load(Ordering::SeqCst), 4);
        assert_eq!(h.sleeper.slept.lock().unwrap().len(), 3);
        assert!(!h.transport.is_connected());

        let Ok(UiEvent::Notice(notice)) = h.ui.try_recv() else {
            panic!("expected notice");
        };
        assert_eq!(notice.severity, Severity::Fatal);
    }

    #[tokio::test]
    async fn media_error_is_dismissible_and_connect_continues() {
        let mut h = harness(FakeTransport {
            fail_mic: true,
            ..Default::default()
        });
        h.session.connect_with_retry("ws://agent", "token").await.unwrap();

        let Ok(UiEvent::Notice(notice)) = h.ui.try_recv() else {
            panic!("expected notice");
        };
        assert_eq!(notice.severity, Severity::Dismissible);
        assert!(h.transport.is_connected());
    }

    #[tokio::test]
    async fn connected_registers_topics_and_disconnect_cleans_up() {
        let mut h = harness(FakeTransport::default());

        h.session
            .handle_event(TransportEvent::Connected {
                local_identity: "user-1".into(),
            })
            .await;
        for topic in topics::ALL {
            assert!(h.session.router().is_registered(topic));
        }

        // Reconnect re-registers without duplicating
        h.session
            .handle_event(TransportEvent::Connected {
                local_identity: "user-1".into(),
            })
            .await;
        assert_eq!(h.session.router().registered_topics().len(), topics::ALL.len());

        h.session
            .handle_event(TransportEvent::TopicStream(TopicStream::complete(
                topics::AGENT_STATE,
                r#"{"current":"Outcome"}"#,
            )))
            .await;
        // Let the route worker hand the snapshot to the actor
        let mut snapshot = h.session.actor().synced_snapshot().await.unwrap();
        for _ in 0..10 {
            if snapshot.dimension_state.is_some() {
                break;
            }
            tokio::task::yield_now().await;
            snapshot = h.session.actor().synced_snapshot().await.unwrap();
        }
        assert!(snapshot.connected);
        assert!(snapshot.dimension_state.is_some());

        h.session
            .handle_event(TransportEvent::Disconnected { reason: None })
            .await;
        assert!(h.session.router().registered_topics().is_empty());

        let disabled: Vec<TrackSource> = h
            .transport
            .tracks
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, enabled)| !enabled)
            .map(|(source, _)| *source)
            .collect();
        assert_eq!(disabled, CAPTURE_SOURCES.to_vec());
        assert_eq!(h.ui.try_recv().ok(), Some(UiEvent::SessionFinished));

        let snapshot = h.session.actor().synced_snapshot().await.unwrap();
        assert!(!snapshot.connected);
        // Durable state survives the disconnect
        assert!(snapshot.dimension_state.is_some());
    }

    #[tokio::test]
    async fn voice_mode_sends_both_toggles_to_agent() {
        let h = harness(FakeTransport::default());
        h.transport
            .participants
            .lock()
            .unwrap()
            .push("agent-1".into());

        h.session.set_voice_mode(true).await;
        h.session.set_voice_mode(false).await;

        let rpcs = h.transport.rpcs.lock().unwrap().clone();
        assert_eq!(
            rpcs,
            vec![
                ("agent-1".to_string(), RpcMethod::ToggleInput, "audio_on".to_string()),
                ("agent-1".to_string(), RpcMethod::ToggleOutput, "audio_on".to_string()),
                ("agent-1".to_string(), RpcMethod::ToggleInput, "audio_off".to_string()),
                ("agent-1".to_string(), RpcMethod::ToggleOutput, "audio_off".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn rpc_without_agent_or_with_errors_is_swallowed() {
        let h = harness(FakeTransport {
            fail_rpcs: true,
            ..Default::default()
        });
        h.session.send_toggle_input(true).await;
        assert!(h.transport.rpcs.lock().unwrap().is_empty());

        h.transport
            .participants
            .lock()
            .unwrap()
            .push("agent-1".into());
        h.session.send_toggle_output(false).await;
        assert_eq!(h.transport.rpcs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn send_chat_appends_local_message() {
        let h = harness(FakeTransport::default());
        h.session.send_chat("We run weekly retros").await.unwrap();

        let snapshot = h.session.actor().synced_snapshot().await.unwrap();
        assert_eq!(snapshot.messages.len(), 1);
        assert!(snapshot.messages[0].origin.is_local());
        assert_eq!(snapshot.messages[0].text, "We run weekly retros");
    }

    #[tokio::test]
    async fn disconnect_request_from_actor_closes_transport() {
        let mut h = harness(FakeTransport::default());
        h.session.connect_with_retry("ws://agent", "token").await.unwrap();
        assert!(h.transport.is_connected());

        h.session.handle_output(SessionOutput::RequestDisconnect).await;
        assert!(!h.transport.is_connected());
        assert!(h.outputs.try_recv().is_err());
    }

    #[tokio::test]
    async fn run_pumps_events_until_transport_channel_closes() {
        let Harness {
            mut session,
            transport,
            mut ui,
            outputs,
            ..
        } = harness(FakeTransport::default());
        let (event_tx, events) = mpsc::unbounded_channel();

        event_tx
            .send(TransportEvent::MediaDevicesError {
                message: "camera busy".into(),
            })
            .unwrap();
        event_tx
            .send(TransportEvent::Disconnected {
                reason: Some("agent left".into()),
            })
            .unwrap();
        drop(event_tx);

        session.run(events, outputs).await;

        assert!(matches!(ui.try_recv(), Ok(UiEvent::Notice(_))));
        assert_eq!(ui.try_recv().ok(), Some(UiEvent::SessionFinished));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn before_unload_tears_everything_down() {
        let mut h = harness(FakeTransport::default());
        h.session.connect_with_retry("ws://agent", "token").await.unwrap();
        h.session
            .handle_event(TransportEvent::Connected {
                local_identity: "user-1".into(),
            })
            .await;

        h.session.before_unload().await;
        assert!(!h.transport.is_connected());
        assert!(h.session.router().registered_topics().is_empty());
    }
}
