//! Session actor — owns an AssessmentSession and processes commands sequentially.
//!
//! Commands from the transport driver and the UI arrive over one mpsc
//! channel, decoded side-channel events over another. Both are handled by
//! a single task, so the session has exactly one writer. Reads go through
//! `ArcSwap` and never block the actor.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::analysis::AnalysisEffect;
use crate::router::SideChannelEvent;
use crate::session::{AssessmentSession, SessionEffect, SessionSnapshot};
use crate::session_command::{SessionCommand, SessionOutput};

/// Handle to a running session actor (cheap to Clone).
#[derive(Clone)]
pub struct SessionActorHandle {
    command_tx: mpsc::Sender<SessionCommand>,
    side_channel_tx: mpsc::UnboundedSender<SideChannelEvent>,
    snapshot: Arc<ArcSwap<SessionSnapshot>>,
}

impl SessionActorHandle {
    /// Spawn the actor. The returned receiver carries requests for the driver.
    pub fn spawn(session: AssessmentSession) -> (Self, mpsc::UnboundedReceiver<SessionOutput>) {
        let (command_tx, command_rx) = mpsc::channel(256);
        let (side_channel_tx, side_channel_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let snapshot = session.snapshot_arc();

        tokio::spawn(actor_loop(
            session,
            command_rx,
            side_channel_rx,
            command_tx.downgrade(),
            output_tx,
        ));

        (
            Self {
                command_tx,
                side_channel_tx,
                snapshot,
            },
            output_rx,
        )
    }

    /// Send a command to the actor (fire-and-forget).
    pub async fn send(&self, cmd: SessionCommand) {
        if self.command_tx.send(cmd).await.is_err() {
            warn!(
                component = "session_actor",
                event = "session_actor.command_dropped",
                "Actor channel closed, command dropped"
            );
        }
    }

    /// Sink for decoded side-channel events (handed to the router).
    pub fn side_channel_sink(&self) -> mpsc::UnboundedSender<SideChannelEvent> {
        self.side_channel_tx.clone()
    }

    /// Lock-free snapshot read.
    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.snapshot.load_full()
    }

    /// Snapshot after every command queued so far has been processed.
    pub async fn synced_snapshot(&self) -> Option<Arc<SessionSnapshot>> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::GetSnapshot { reply }).await;
        rx.await.ok()
    }
}

struct AnalysisTimer {
    generation: u64,
    task: JoinHandle<()>,
}

async fn actor_loop(
    mut session: AssessmentSession,
    mut command_rx: mpsc::Receiver<SessionCommand>,
    mut side_channel_rx: mpsc::UnboundedReceiver<SideChannelEvent>,
    self_tx: mpsc::WeakSender<SessionCommand>,
    outputs: mpsc::UnboundedSender<SessionOutput>,
) {
    let mut timer: Option<AnalysisTimer> = None;

    loop {
        let effects = tokio::select! {
            // Side-channel events first: a snapshot that arrived before a
            // query must be visible to it.
            biased;

            Some(event) = side_channel_rx.recv() => {
                session.on_side_channel(event, crate::now_millis())
            }
            cmd = command_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match handle_command(cmd, &mut session) {
                    Some(effects) => effects,
                    None => break,
                }
            }
        };

        for effect in effects {
            match effect {
                SessionEffect::Analysis(AnalysisEffect::StartTimer {
                    generation,
                    dimension,
                }) => {
                    cancel_timer(&mut timer);
                    let timeout = session.settings().analysis_timeout;
                    let tx = self_tx.clone();
                    let task = tokio::spawn(async move {
                        tokio::time::sleep(timeout).await;
                        if let Some(tx) = tx.upgrade() {
                            let _ = tx
                                .send(SessionCommand::AnalysisTimerElapsed { generation })
                                .await;
                        }
                    });
                    info!(
                        component = "session_actor",
                        event = "analysis.waiting",
                        dimension = %dimension,
                        timeout_ms = timeout.as_millis() as u64,
                        "Waiting for dimension analysis"
                    );
                    timer = Some(AnalysisTimer { generation, task });
                }
                SessionEffect::Analysis(AnalysisEffect::CancelTimer) => {
                    cancel_timer(&mut timer);
                }
                SessionEffect::Analysis(AnalysisEffect::TimedOut { dimension }) => {
                    timer = None;
                    info!(
                        component = "session_actor",
                        event = "analysis.timed_out",
                        dimension = %dimension,
                        "Analysis produced no feedback in time"
                    );
                }
                SessionEffect::Ui(event) => {
                    let _ = outputs.send(SessionOutput::Ui(event));
                }
                SessionEffect::Disconnect => {
                    let _ = outputs.send(SessionOutput::RequestDisconnect);
                }
            }
        }
    }

    cancel_timer(&mut timer);
}

fn cancel_timer(timer: &mut Option<AnalysisTimer>) {
    if let Some(timer) = timer.take() {
        timer.task.abort();
        tracing::debug!(
            component = "session_actor",
            event = "analysis.timer_cancelled",
            generation = timer.generation,
            "Analysis timer cancelled"
        );
    }
}

/// Apply one command. `None` stops the actor.
fn handle_command(
    cmd: SessionCommand,
    session: &mut AssessmentSession,
) -> Option<Vec<SessionEffect>> {
    let effects = match cmd {
        SessionCommand::Connected { local_identity } => {
            session.on_connected(local_identity);
            Vec::new()
        }
        SessionCommand::Disconnected { reason } => {
            info!(
                component = "session_actor",
                event = "session.disconnected",
                reason = ?reason,
                "Session transport disconnected"
            );
            session.on_disconnected();
            Vec::new()
        }
        SessionCommand::ParticipantJoined { identity } => {
            session.on_participant_joined(identity);
            Vec::new()
        }
        SessionCommand::ParticipantLeft { identity } => {
            session.on_participant_left(&identity);
            Vec::new()
        }
        SessionCommand::Transcription { segment, is_local } => {
            session.on_transcription(&segment, is_local);
            Vec::new()
        }
        SessionCommand::Chat { message, is_local } => {
            session.on_chat(&message, is_local);
            Vec::new()
        }
        SessionCommand::ContinueWithNextDimension => session.continue_with_next_dimension(),
        SessionCommand::Reset => session.reset(),
        SessionCommand::SeedFromContinuity {
            custom_state,
            reply,
        } => {
            let _ = reply.send(session.seed_from_continuity(&custom_state));
            Vec::new()
        }
        SessionCommand::AnalysisTimerElapsed { generation } => {
            session.analysis_timer_elapsed(generation)
        }
        SessionCommand::GetSnapshot { reply } => {
            let _ = reply.send(session.snapshot());
            Vec::new()
        }
        SessionCommand::Shutdown => return None,
    };
    Some(effects)
}
