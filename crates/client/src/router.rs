//! Side-channel stream router
//!
//! One route per topic. Each route owns a worker that reads its streams to
//! completion in arrival order, decodes them into a typed
//! `SideChannelEvent`, and forwards the event to the session. A bad payload
//! is logged and dropped; it never stalls its own topic or any other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use assessment_protocol::agent::topics;
use assessment_protocol::{
    AnalysisNotification, DimensionState, HistoryItem, InactivityTimeoutNotification,
};

use crate::error::DecodeError;
use crate::transport::TopicStream;

/// A fully read and decoded side-channel payload.
#[derive(Debug, Clone, PartialEq)]
pub enum SideChannelEvent {
    HistoryBackfill {
        items: Vec<HistoryItem>,
        sender_identity: Option<String>,
    },
    StateSnapshot(DimensionState),
    Analysis(AnalysisNotification),
    Inactivity(InactivityTimeoutNotification),
}

pub type Decoder =
    fn(topic: &str, sender: Option<&str>, body: &[u8]) -> Result<SideChannelEvent, DecodeError>;

struct TopicRoute {
    id: u64,
    queue: mpsc::UnboundedSender<TopicStream>,
    worker: JoinHandle<()>,
}

impl Drop for TopicRoute {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[derive(Default)]
pub struct StreamRouter {
    routes: Mutex<HashMap<String, TopicRoute>>,
    next_id: AtomicU64,
}

impl StreamRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `decoder` for `topic`, replacing any existing route.
    /// Returns the route id used for guarded unregistration.
    pub fn register(
        &self,
        topic: &str,
        decoder: Decoder,
        sink: mpsc::UnboundedSender<SideChannelEvent>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (queue, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(route_worker(rx, decoder, sink));
        let route = TopicRoute { id, queue, worker };

        if let Ok(mut routes) = self.routes.lock() {
            let replaced = routes.insert(topic.to_string(), route).is_some();
            debug!(
                component = "router",
                event = "router.topic_registered",
                topic = %topic,
                replaced,
                "Registered topic handler"
            );
        }
        id
    }

    pub fn unregister(&self, topic: &str) -> bool {
        self.routes
            .lock()
            .map(|mut routes| routes.remove(topic).is_some())
            .unwrap_or(false)
    }

    /// Unregister only if the route is still the one registered as `id`.
    fn unregister_if(&self, topic: &str, id: u64) {
        if let Ok(mut routes) = self.routes.lock() {
            if routes.get(topic).is_some_and(|route| route.id == id) {
                routes.remove(topic);
            }
        }
    }

    pub fn unregister_all(&self) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.clear();
        }
    }

    pub fn is_registered(&self, topic: &str) -> bool {
        self.routes
            .lock()
            .map(|routes| routes.contains_key(topic))
            .unwrap_or(false)
    }

    pub fn registered_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .routes
            .lock()
            .map(|routes| routes.keys().cloned().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }

    /// Queue a stream on its topic's route.
    pub fn dispatch(&self, stream: TopicStream) -> Result<(), DecodeError> {
        let routes = self
            .routes
            .lock()
            .map_err(|_| DecodeError::Unregistered(stream.topic.clone()))?;
        let Some(route) = routes.get(&stream.topic) else {
            return Err(DecodeError::Unregistered(stream.topic.clone()));
        };
        let topic = stream.topic.clone();
        route
            .queue
            .send(stream)
            .map_err(|_| DecodeError::Unregistered(topic))
    }
}

async fn route_worker(
    mut rx: mpsc::UnboundedReceiver<TopicStream>,
    decoder: Decoder,
    sink: mpsc::UnboundedSender<SideChannelEvent>,
) {
    while let Some(stream) = rx.recv().await {
        let topic = stream.topic.clone();
        let stream_id = stream.stream_id.clone();
        let sender = stream.sender_identity.clone();

        let decoded = match stream.read_all().await {
            Ok(body) => decoder(&topic, sender.as_deref(), &body),
            Err(e) => Err(e),
        };

        match decoded {
            Ok(event) => {
                if sink.send(event).is_err() {
                    break;
                }
            }
            Err(e) => warn!(
                component = "router",
                event = "router.payload_dropped",
                topic = %topic,
                stream_id = %stream_id,
                error = %e,
                "Dropping undecodable side-channel payload"
            ),
        }
    }
}

/// Holds a set of topic registrations; dropping it unregisters them.
pub struct TopicRegistration {
    router: Arc<StreamRouter>,
    routes: Vec<(String, u64)>,
}

impl TopicRegistration {
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|(topic, _)| topic.as_str())
    }
}

impl Drop for TopicRegistration {
    fn drop(&mut self) {
        for (topic, id) in &self.routes {
            self.router.unregister_if(topic, *id);
        }
        debug!(
            component = "router",
            event = "router.registration_dropped",
            topics = self.routes.len(),
            "Released topic registrations"
        );
    }
}

/// Register every side-channel topic the session consumes.
pub fn register_default_topics(
    router: &Arc<StreamRouter>,
    sink: mpsc::UnboundedSender<SideChannelEvent>,
) -> TopicRegistration {
    let routes = topics::ALL
        .iter()
        .filter_map(|topic| {
            let decoder = decoder_for(topic)?;
            let id = router.register(topic, decoder, sink.clone());
            Some((topic.to_string(), id))
        })
        .collect::<Vec<_>>();

    info!(
        component = "router",
        event = "router.topics_registered",
        count = routes.len(),
        "Registered side-channel topics"
    );
    TopicRegistration {
        router: Arc::clone(router),
        routes,
    }
}

pub fn decoder_for(topic: &str) -> Option<Decoder> {
    match topic {
        topics::HISTORY_BACKFILL => Some(decode_history as Decoder),
        topics::AGENT_STATE => Some(decode_state as Decoder),
        topics::DIMENSION_ANALYSIS => Some(decode_analysis as Decoder),
        topics::INACTIVITY_TIMEOUT => Some(decode_inactivity as Decoder),
        _ => None,
    }
}

fn parse_json<T: DeserializeOwned>(topic: &str, body: &[u8]) -> Result<T, DecodeError> {
    let text = std::str::from_utf8(body).map_err(|_| DecodeError::Utf8 {
        topic: topic.to_string(),
    })?;
    serde_json::from_str(text).map_err(|source| DecodeError::Json {
        topic: topic.to_string(),
        source,
    })
}

/// Rows that fail to parse are skipped; the rest of the backfill survives.
/// A body that is not an array still counts as a backfill with no rows, so the
/// session stops waiting for history.
fn decode_history(
    topic: &str,
    sender: Option<&str>,
    body: &[u8],
) -> Result<SideChannelEvent, DecodeError> {
    let rows = match parse_json::<Value>(topic, body) {
        Ok(Value::Array(rows)) => rows,
        Ok(_) => {
            warn!(
                component = "router",
                event = "router.history_not_array",
                topic = %topic,
                "History backfill is not an array; treating as empty"
            );
            Vec::new()
        }
        Err(e) => {
            warn!(
                component = "router",
                event = "router.history_unparsable",
                error = %e,
                "History backfill failed to parse; treating as empty"
            );
            Vec::new()
        }
    };

    let total = rows.len();
    let items: Vec<HistoryItem> = rows
        .into_iter()
        .filter_map(|row| serde_json::from_value(row).ok())
        .collect();
    if items.len() < total {
        debug!(
            component = "router",
            event = "router.history_rows_skipped",
            skipped = total - items.len(),
            "Skipped malformed history rows"
        );
    }

    Ok(SideChannelEvent::HistoryBackfill {
        items,
        sender_identity: sender.map(str::to_string),
    })
}

fn decode_state(
    topic: &str,
    _sender: Option<&str>,
    body: &[u8],
) -> Result<SideChannelEvent, DecodeError> {
    parse_json(topic, body).map(SideChannelEvent::StateSnapshot)
}

fn decode_analysis(
    topic: &str,
    _sender: Option<&str>,
    body: &[u8],
) -> Result<SideChannelEvent, DecodeError> {
    parse_json(topic, body).map(SideChannelEvent::Analysis)
}

fn decode_inactivity(
    topic: &str,
    _sender: Option<&str>,
    body: &[u8],
) -> Result<SideChannelEvent, DecodeError> {
    parse_json(topic, body).map(SideChannelEvent::Inactivity)
}
