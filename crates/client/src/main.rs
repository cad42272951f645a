//! Assessment client
//!
//! Terminal front end for the maturity assessment: joins the agent's room,
//! relays chat from stdin, and prints progress and notices as they change.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use assessment_protocol::log_filter;

use assessment_client::continuity::{ContinuityClient, WelcomeOffer};
use assessment_client::dimension_store::load_state;
use assessment_client::notice::UiEvent;
use assessment_client::session_command::SessionCommand;
use assessment_client::storage::{FileStorage, StateStorage};
use assessment_client::transport::retry::TokioSleeper;
use assessment_client::transport::ws::WsTransport;
use assessment_client::view::Progress;
use assessment_client::{
    AssessmentSession, ClientConfig, SessionActorHandle, SessionSnapshot, TransportSession,
};

const DEFAULT_FILTER: &str = "warn,assessment_client=info";

#[derive(Parser)]
#[command(name = "assessment", about = "AI maturity assessment client")]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, env = "ASSESSMENT_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Join the agent's room and run the assessment
    Connect {
        /// Resume the session held by the continuity service
        #[arg(long)]
        resume: bool,
    },
    /// Ask the continuity service for a resumable session
    Check,
    /// Discard the server session and local progress
    Clear,
    /// Show locally stored progress
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter::from_env(DEFAULT_FILTER).filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };

    match cli.command {
        Command::Connect { resume } => connect(config, resume).await,
        Command::Check => check(config).await,
        Command::Clear => clear(config).await,
        Command::Status => {
            status(&config);
            Ok(())
        }
    }
}

fn continuity_client(config: &ClientConfig) -> ContinuityClient {
    ContinuityClient::new(&config.continuity_url, config.continuity_token.clone())
}

fn storage(config: &ClientConfig) -> FileStorage {
    FileStorage::new(&config.resolved_data_dir())
}

async fn check(config: ClientConfig) -> anyhow::Result<()> {
    let client = continuity_client(&config);
    let response = client.check_session().await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    print_welcome_offer(client.welcome_offer());
    Ok(())
}

fn print_welcome_offer(offer: WelcomeOffer) {
    match offer {
        WelcomeOffer::ResumeOrStartNew => println!("A previous session can be resumed."),
        WelcomeOffer::StartNewOnly => println!("No previous session."),
    }
}

async fn clear(config: ClientConfig) -> anyhow::Result<()> {
    let response = continuity_client(&config).clear_session().await?;
    let mut storage = storage(&config);
    storage.remove()?;
    println!("{}", response.message);
    Ok(())
}

fn status(config: &ClientConfig) {
    let storage = storage(config);
    let state = load_state(&storage);
    let completed = state.as_ref().is_some_and(|s| s.is_completed());
    let progress = Progress::from_state(state.as_ref(), completed);
    println!(
        "{}/{} dimensions complete{}",
        progress.current_index,
        progress.total,
        if completed { " (assessment finished)" } else { "" }
    );
}

async fn connect(config: ClientConfig, resume: bool) -> anyhow::Result<()> {
    let token = config
        .token
        .clone()
        .context("a room token is required (set `token` in the config file)")?;

    let session = AssessmentSession::new(Box::new(storage(&config)), config.session_settings());
    let (actor, mut outputs) = SessionActorHandle::spawn(session);

    let continuity = continuity_client(&config);
    if resume {
        continuity.check_session().await?;
        if continuity.resume_assessment(&actor).await? {
            info!(
                component = "cli",
                event = "cli.resumed",
                "Resumed previous assessment"
            );
        }
    }

    let (event_tx, mut events) = mpsc::unbounded_channel();
    let (ui_tx, mut ui) = mpsc::unbounded_channel();
    let transport = Arc::new(WsTransport::new(event_tx));
    let mut driver = TransportSession::new(
        transport,
        actor.clone(),
        config.retry_policy(),
        Arc::new(TokioSleeper),
        ui_tx,
    );

    if driver
        .connect_with_retry(&config.server_url, &token)
        .await
        .is_err()
    {
        while let Ok(event) = ui.try_recv() {
            print_ui_event(&event);
        }
        return Ok(());
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut last_revision = 0;
    let mut session_over = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                driver.handle_event(event).await;
            }
            Some(output) = outputs.recv() => {
                driver.handle_output(output).await;
            }
            Some(event) = ui.recv() => {
                print_ui_event(&event);
                if matches!(event, UiEvent::SessionFinished | UiEvent::SessionEnded) {
                    session_over = true;
                    break;
                }
            }
            line = stdin.next_line() => {
                match line? {
                    Some(line) => {
                        if !handle_input(&driver, &actor, line.trim()).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }

        let snapshot = actor.snapshot();
        if snapshot.revision != last_revision {
            last_revision = snapshot.revision;
            print_progress(&snapshot);
        }
    }

    driver.before_unload().await;
    actor.send(SessionCommand::Shutdown).await;

    if session_over {
        match continuity.refetch().await {
            Ok(offer) => print_welcome_offer(offer),
            Err(e) => eprintln!("Could not check for a resumable session: {e}"),
        }
    }
    Ok(())
}

/// Returns `false` when the user asked to quit.
async fn handle_input(
    driver: &TransportSession<WsTransport>,
    actor: &SessionActorHandle,
    line: &str,
) -> bool {
    match line {
        "" => {}
        "/quit" => return false,
        "/continue" => actor.send(SessionCommand::ContinueWithNextDimension).await,
        "/voice on" => driver.set_voice_mode(true).await,
        "/voice off" => driver.set_voice_mode(false).await,
        text => {
            if let Err(e) = driver.send_chat(text).await {
                eprintln!("Message not sent: {e}");
            }
        }
    }
    true
}

fn print_ui_event(event: &UiEvent) {
    match event {
        UiEvent::Notice(notice) => match &notice.description {
            Some(description) => eprintln!("[{:?}] {}: {}", notice.severity, notice.title, description),
            None => eprintln!("[{:?}] {}", notice.severity, notice.title),
        },
        UiEvent::SessionFinished => eprintln!("Session finished."),
        UiEvent::SessionEnded => eprintln!("Session ended by the server."),
    }
}

fn print_progress(snapshot: &SessionSnapshot) {
    let progress = snapshot.progress();
    if let Some(dimension) = snapshot.analysis.viewing() {
        if let Some(record) = snapshot
            .dimension_state
            .as_ref()
            .and_then(|s| s.record(dimension))
        {
            println!("--- Feedback: {dimension} ---");
            for item in &record.partial_feedback {
                println!("  * {item}");
            }
            println!("(type /continue to move on)");
        }
    } else if snapshot.analysis.is_waiting() {
        println!("Analysing...");
    }
    if snapshot.is_renderable() {
        if let Some(report) = snapshot
            .dimension_state
            .as_ref()
            .and_then(|s| s.final_report.as_ref())
        {
            println!("=== Final report ===\n{}", report.executive_summary);
            for (dimension, score) in snapshot.chart_scores() {
                println!("  {dimension:<12} {score:.1}");
            }
        }
    } else {
        println!(
            "Progress: {}/{} ({} remaining)",
            progress.current_index, progress.total, progress.remaining
        );
    }
    if let Some(message) = snapshot.display_messages().last() {
        let who = if message.origin.is_local() { "you" } else { "agent" };
        println!("{who}: {}", message.text);
    }
}
