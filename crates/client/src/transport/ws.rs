//! WebSocket transport
//!
//! Speaks JSON frames to the agent's room gateway: `AgentFrame` inbound,
//! `ClientFrame` outbound. Side-channel streams arrive as
//! header/chunk/end frames and are reassembled into `TopicStream`s.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use assessment_protocol::agent::{ChatPayload, StreamKind};
use assessment_protocol::client::{RpcMethod, TrackSource};
use assessment_protocol::{new_id, AgentFrame, ClientFrame};

use super::{StreamWriter, TopicStream, Transport, TransportEvent};
use crate::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type RpcReply = Result<String, String>;

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);
const LEAVE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

pub struct WsTransport {
    inner: Arc<Inner>,
}

struct Inner {
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientFrame>>>,
    connected: AtomicBool,
    disconnect_emitted: AtomicBool,
    local_identity: Mutex<Option<String>>,
    participants: Mutex<Vec<String>>,
    /// Desired capture state; replayed after connecting.
    tracks: Mutex<HashMap<TrackSource, (bool, bool)>>,
    pending_rpcs: Mutex<HashMap<String, oneshot::Sender<RpcReply>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    rpc_timeout: Duration,
}

impl WsTransport {
    pub fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self::with_rpc_timeout(events, DEFAULT_RPC_TIMEOUT)
    }

    pub fn with_rpc_timeout(
        events: mpsc::UnboundedSender<TransportEvent>,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                events,
                outbound: Mutex::new(None),
                connected: AtomicBool::new(false),
                disconnect_emitted: AtomicBool::new(false),
                local_identity: Mutex::new(None),
                participants: Mutex::new(Vec::new()),
                tracks: Mutex::new(HashMap::new()),
                pending_rpcs: Mutex::new(HashMap::new()),
                tasks: Mutex::new(Vec::new()),
                rpc_timeout,
            }),
        }
    }
}

impl Inner {
    fn send_frame(&self, frame: ClientFrame) -> Result<(), TransportError> {
        let guard = self
            .outbound
            .lock()
            .map_err(|_| TransportError::ChannelClosed)?;
        let tx = guard.as_ref().ok_or(TransportError::NotConnected)?;
        tx.send(frame).map_err(|_| TransportError::ChannelClosed)
    }

    fn local_identity(&self) -> Option<String> {
        self.local_identity.lock().ok().and_then(|id| id.clone())
    }

    /// Tear down connection state and emit `Disconnected` at most once.
    fn mark_disconnected(&self, reason: Option<String>) {
        self.connected.store(false, Ordering::SeqCst);
        if let Ok(mut outbound) = self.outbound.lock() {
            *outbound = None;
        }
        if let Ok(mut participants) = self.participants.lock() {
            participants.clear();
        }
        // Dropping the senders fails every in-flight RPC
        if let Ok(mut pending) = self.pending_rpcs.lock() {
            pending.clear();
        }
        if self.disconnect_emitted.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            component = "transport",
            event = "transport.disconnected",
            reason = ?reason,
            "Disconnected from agent room"
        );
        let _ = self.events.send(TransportEvent::Disconnected { reason });
    }

    fn abort_tasks(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, server_url: &str, token: &str) -> Result<(), TransportError> {
        let url = reqwest::Url::parse_with_params(server_url, &[("access_token", token)])
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (mut sink, mut stream) = ws.split();

        let local_identity = match tokio::time::timeout(JOIN_TIMEOUT, await_join(&mut stream)).await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(TransportError::Connect(
                    "room did not acknowledge join".to_string(),
                ))
            }
        };

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientFrame>();
        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let json = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(
                            component = "transport",
                            event = "transport.encode_failed",
                            error = %e,
                            "Failed to encode outbound frame"
                        );
                        continue;
                    }
                };
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let inner = &self.inner;
        inner.abort_tasks();
        if let Ok(mut id) = inner.local_identity.lock() {
            *id = Some(local_identity.clone());
        }
        if let Ok(mut outbound) = inner.outbound.lock() {
            *outbound = Some(out_tx);
        }
        inner.disconnect_emitted.store(false, Ordering::SeqCst);
        inner.connected.store(true, Ordering::SeqCst);

        let reader = tokio::spawn(read_loop(Arc::clone(inner), stream));
        if let Ok(mut tasks) = inner.tasks.lock() {
            tasks.push(writer);
            tasks.push(reader);
        }

        // Capture requested before the join took effect
        let tracks: Vec<_> = inner
            .tracks
            .lock()
            .map(|t| t.iter().map(|(s, v)| (*s, *v)).collect())
            .unwrap_or_default();
        for (source, (enabled, pre_connect_buffer)) in tracks {
            inner.send_frame(ClientFrame::SetTrackEnabled {
                source,
                enabled,
                pre_connect_buffer,
            })?;
        }

        info!(
            component = "transport",
            event = "transport.connected",
            local_identity = %local_identity,
            "Joined agent room"
        );
        let _ = inner.events.send(TransportEvent::Connected { local_identity });
        Ok(())
    }

    async fn disconnect(&self) {
        if self.inner.connected.load(Ordering::SeqCst) {
            let _ = self.inner.send_frame(ClientFrame::Leave);
        }
        // Closing the outbound channel lets the writer flush and close the socket
        if let Ok(mut outbound) = self.inner.outbound.lock() {
            *outbound = None;
        }
        let tasks: Vec<JoinHandle<()>> = self
            .inner
            .tasks
            .lock()
            .map(|mut tasks| tasks.drain(..).collect())
            .unwrap_or_default();
        let mut tasks = tasks.into_iter();
        if let Some(mut writer) = tasks.next() {
            let _ = tokio::time::timeout(LEAVE_FLUSH_TIMEOUT, &mut writer).await;
            writer.abort();
        }
        for task in tasks {
            task.abort();
        }
        self.inner
            .mark_disconnected(Some("client disconnect".to_string()));
    }

    async fn set_track_enabled(
        &self,
        source: TrackSource,
        enabled: bool,
        pre_connect_buffer: bool,
    ) -> Result<(), TransportError> {
        if let Ok(mut tracks) = self.inner.tracks.lock() {
            tracks.insert(source, (enabled, pre_connect_buffer));
        }
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.send_frame(ClientFrame::SetTrackEnabled {
            source,
            enabled,
            pre_connect_buffer,
        })
    }

    fn remote_participants(&self) -> Vec<String> {
        self.inner
            .participants
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    fn local_identity(&self) -> Option<String> {
        self.inner.local_identity()
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn perform_rpc(
        &self,
        destination: &str,
        method: RpcMethod,
        payload: &str,
    ) -> Result<String, TransportError> {
        let request_id = new_id();
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.inner.pending_rpcs.lock() {
            pending.insert(request_id.clone(), tx);
        }

        let sent = self.inner.send_frame(ClientFrame::Rpc {
            request_id: request_id.clone(),
            destination_identity: destination.to_string(),
            method,
            payload: payload.to_string(),
        });
        if let Err(e) = sent {
            if let Ok(mut pending) = self.inner.pending_rpcs.lock() {
                pending.remove(&request_id);
            }
            return Err(e);
        }

        match tokio::time::timeout(self.inner.rpc_timeout, rx).await {
            Ok(Ok(Ok(response))) => Ok(response),
            Ok(Ok(Err(message))) => Err(TransportError::Rpc {
                method: method.as_str().to_string(),
                message,
            }),
            Ok(Err(_)) => Err(TransportError::ChannelClosed),
            Err(_) => {
                if let Ok(mut pending) = self.inner.pending_rpcs.lock() {
                    pending.remove(&request_id);
                }
                Err(TransportError::RpcTimeout(method.as_str().to_string()))
            }
        }
    }

    async fn send_chat(&self, text: &str) -> Result<ChatPayload, TransportError> {
        let message = ChatPayload {
            id: new_id(),
            timestamp: crate::now_millis(),
            message: text.to_string(),
            from_identity: self.inner.local_identity(),
        };
        self.inner.send_frame(ClientFrame::Chat {
            message: message.clone(),
        })?;
        Ok(message)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.inner.abort_tasks();
    }
}

/// Wait for the gateway's `joined` frame.
async fn await_join(stream: &mut SplitStream<WsStream>) -> Result<String, TransportError> {
    while let Some(msg) = stream.next().await {
        match msg? {
            Message::Text(text) => match serde_json::from_str::<AgentFrame>(text.as_str())? {
                AgentFrame::Joined { local_identity } => return Ok(local_identity),
                AgentFrame::Disconnect { reason } => {
                    return Err(TransportError::Connect(
                        reason.unwrap_or_else(|| "rejected by room".to_string()),
                    ))
                }
                other => debug!(
                    component = "transport",
                    event = "transport.pre_join_frame_skipped",
                    frame = ?other,
                    "Skipping frame received before join"
                ),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(TransportError::Connect(
        "connection closed before join".to_string(),
    ))
}

struct OpenStream {
    writer: StreamWriter,
    kind: StreamKind,
    topic: String,
}

async fn read_loop(inner: Arc<Inner>, mut stream: SplitStream<WsStream>) {
    let mut open_streams: HashMap<String, OpenStream> = HashMap::new();
    let mut reason = None;

    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(frame)) => {
                reason = frame.map(|f| f.reason.as_str().to_string());
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                reason = Some(e.to_string());
                break;
            }
        };

        let frame = match serde_json::from_str::<AgentFrame>(text.as_str()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(
                    component = "transport",
                    event = "transport.frame_malformed",
                    error = %e,
                    "Dropping malformed frame"
                );
                continue;
            }
        };

        match frame {
            AgentFrame::Joined { .. } => {}
            AgentFrame::ParticipantJoined { identity } => {
                if let Ok(mut participants) = inner.participants.lock() {
                    if !participants.contains(&identity) {
                        participants.push(identity.clone());
                    }
                }
                let _ = inner
                    .events
                    .send(TransportEvent::ParticipantJoined { identity });
            }
            AgentFrame::ParticipantLeft { identity } => {
                if let Ok(mut participants) = inner.participants.lock() {
                    participants.retain(|p| p != &identity);
                }
                let _ = inner.events.send(TransportEvent::ParticipantLeft { identity });
            }
            AgentFrame::StreamHeader {
                stream_id,
                topic,
                kind,
                sender_identity,
            } => {
                let (writer, reader) =
                    TopicStream::channel(stream_id.clone(), topic.clone(), sender_identity);
                open_streams.insert(
                    stream_id,
                    OpenStream {
                        writer,
                        kind,
                        topic,
                    },
                );
                let _ = inner.events.send(TransportEvent::TopicStream(reader));
            }
            AgentFrame::StreamChunk { stream_id, data } => {
                let Some(open) = open_streams.get(&stream_id) else {
                    debug!(
                        component = "transport",
                        event = "transport.chunk_unknown_stream",
                        stream_id = %stream_id,
                        "Chunk for unknown stream"
                    );
                    continue;
                };
                let bytes = match open.kind {
                    StreamKind::Text => Ok(Bytes::from(data.into_bytes())),
                    StreamKind::Byte => BASE64.decode(data.as_bytes()).map(Bytes::from),
                };
                match bytes {
                    Ok(bytes) => {
                        open.writer.push(bytes);
                    }
                    Err(e) => {
                        warn!(
                            component = "transport",
                            event = "transport.chunk_malformed",
                            topic = %open.topic,
                            stream_id = %stream_id,
                            error = %e,
                            "Aborting stream with undecodable chunk"
                        );
                        // Dropping the writer aborts the reader
                        open_streams.remove(&stream_id);
                    }
                }
            }
            AgentFrame::StreamEnd { stream_id } => {
                if let Some(open) = open_streams.remove(&stream_id) {
                    open.writer.finish();
                }
            }
            AgentFrame::Transcription { segment } => {
                let is_local =
                    inner.local_identity().as_deref() == Some(segment.participant_identity.as_str());
                let _ = inner
                    .events
                    .send(TransportEvent::Transcription { segment, is_local });
            }
            AgentFrame::Chat { message } => {
                let is_local = message.from_identity.is_some()
                    && message.from_identity == inner.local_identity();
                let _ = inner.events.send(TransportEvent::Chat { message, is_local });
            }
            AgentFrame::RpcResponse {
                request_id,
                payload,
                error,
            } => {
                let waiter = inner
                    .pending_rpcs
                    .lock()
                    .ok()
                    .and_then(|mut pending| pending.remove(&request_id));
                if let Some(waiter) = waiter {
                    let reply = match error {
                        Some(error) => Err(error),
                        None => Ok(payload.unwrap_or_default()),
                    };
                    let _ = waiter.send(reply);
                }
            }
            AgentFrame::Disconnect { reason: r } => {
                reason = r;
                break;
            }
        }
    }

    // Streams still open are aborted when their writers drop here
    drop(open_streams);
    inner.mark_disconnected(reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use assessment_protocol::agent::topics;
    use tokio::net::TcpListener;

    type ServerWs = WebSocketStream<TcpStream>;

    async fn gateway() -> (String, tokio::task::JoinHandle<ServerWs>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            send(&mut ws, AgentFrame::Joined {
                local_identity: "user-1".into(),
            })
            .await;
            ws
        });
        (format!("ws://{addr}/room"), handle)
    }

    async fn send(ws: &mut ServerWs, frame: AgentFrame) {
        let json = serde_json::to_string(&frame).unwrap();
        ws.send(Message::Text(json.into())).await.unwrap();
    }

    async fn recv_frame(ws: &mut ServerWs) -> ClientFrame {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn connect_reassembles_streams_and_emits_single_disconnect() {
        let (url, server) = gateway().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = WsTransport::new(tx);

        transport.connect(&url, "secret").await.unwrap();
        assert!(transport.is_connected());
        assert_eq!(transport.local_identity().as_deref(), Some("user-1"));
        assert!(matches!(
            rx.recv().await,
            Some(TransportEvent::Connected { ref local_identity }) if local_identity == "user-1"
        ));

        let mut ws = server.await.unwrap();
        send(&mut ws, AgentFrame::ParticipantJoined { identity: "agent-1".into() }).await;
        send(
            &mut ws,
            AgentFrame::StreamHeader {
                stream_id: "s1".into(),
                topic: topics::AGENT_STATE.into(),
                kind: StreamKind::Byte,
                sender_identity: Some("agent-1".into()),
            },
        )
        .await;
        send(
            &mut ws,
            AgentFrame::StreamChunk {
                stream_id: "s1".into(),
                data: BASE64.encode(br#"{"current":"#),
            },
        )
        .await;
        send(
            &mut ws,
            AgentFrame::StreamChunk {
                stream_id: "s1".into(),
                data: BASE64.encode(br#""Outcome"}"#),
            },
        )
        .await;
        send(&mut ws, AgentFrame::StreamEnd { stream_id: "s1".into() }).await;

        assert!(matches!(
            rx.recv().await,
            Some(TransportEvent::ParticipantJoined { ref identity }) if identity == "agent-1"
        ));
        let Some(TransportEvent::TopicStream(stream)) = rx.recv().await else {
            panic!("expected topic stream");
        };
        assert_eq!(stream.topic, topics::AGENT_STATE);
        let body = stream.read_all().await.unwrap();
        assert_eq!(&body[..], br#"{"current":"Outcome"}"#);
        assert_eq!(transport.remote_participants(), vec!["agent-1".to_string()]);

        send(&mut ws, AgentFrame::Disconnect { reason: Some("room closed".into()) }).await;
        assert!(matches!(
            rx.recv().await,
            Some(TransportEvent::Disconnected { reason: Some(ref r) }) if r == "room closed"
        ));

        // A later explicit disconnect does not emit a second event
        transport.disconnect().await;
        assert!(!transport.is_connected());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rpc_round_trip_and_track_replay() {
        let (url, server) = gateway().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = Arc::new(WsTransport::new(tx));

        // Requested before connecting; replayed once joined
        transport
            .set_track_enabled(TrackSource::Microphone, true, true)
            .await
            .unwrap();
        transport.connect(&url, "secret").await.unwrap();
        let mut ws = server.await.unwrap();

        assert_eq!(
            recv_frame(&mut ws).await,
            ClientFrame::SetTrackEnabled {
                source: TrackSource::Microphone,
                enabled: true,
                pre_connect_buffer: true,
            }
        );

        let caller = Arc::clone(&transport);
        let call = tokio::spawn(async move {
            caller
                .perform_rpc("agent-1", RpcMethod::ToggleInput, "audio_on")
                .await
        });

        let ClientFrame::Rpc {
            request_id,
            destination_identity,
            method,
            payload,
        } = recv_frame(&mut ws).await
        else {
            panic!("expected rpc frame");
        };
        assert_eq!(destination_identity, "agent-1");
        assert_eq!(method, RpcMethod::ToggleInput);
        assert_eq!(payload, "audio_on");

        send(
            &mut ws,
            AgentFrame::RpcResponse {
                request_id,
                payload: Some("ok".into()),
                error: None,
            },
        )
        .await;
        assert_eq!(call.await.unwrap().unwrap(), "ok");
    }

    #[tokio::test]
    async fn rpc_without_connection_fails_fast() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = WsTransport::new(tx);
        let err = transport
            .perform_rpc("agent-1", RpcMethod::ToggleOutput, "audio_off")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }
}
