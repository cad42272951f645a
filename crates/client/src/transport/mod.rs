//! Realtime transport abstraction
//!
//! A transport connects to the agent's room, delivers lifecycle events and
//! side-channel topic streams, and carries outbound RPCs and chat. The
//! session layer only ever talks to the `Transport` trait.

pub mod retry;
pub mod ws;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use assessment_protocol::agent::{ChatPayload, TranscriptionSegment};
use assessment_protocol::client::{RpcMethod, TrackSource};

use crate::error::{DecodeError, TransportError};

/// Events a transport emits towards the session.
#[derive(Debug)]
pub enum TransportEvent {
    Connected { local_identity: String },
    /// Emitted once per connection, whatever the cause.
    Disconnected { reason: Option<String> },
    MediaDevicesError { message: String },
    ParticipantJoined { identity: String },
    ParticipantLeft { identity: String },
    TopicStream(TopicStream),
    Transcription {
        segment: TranscriptionSegment,
        is_local: bool,
    },
    Chat {
        message: ChatPayload,
        is_local: bool,
    },
}

#[derive(Debug)]
pub enum StreamChunk {
    Data(Bytes),
    End,
}

/// Incoming side-channel stream. Must be read to completion before decoding.
#[derive(Debug)]
pub struct TopicStream {
    pub stream_id: String,
    pub topic: String,
    pub sender_identity: Option<String>,
    chunks: mpsc::UnboundedReceiver<StreamChunk>,
}

/// Producer half of a `TopicStream`. Dropping it without `finish` aborts
/// the stream.
#[derive(Debug)]
pub struct StreamWriter {
    tx: mpsc::UnboundedSender<StreamChunk>,
}

impl StreamWriter {
    pub fn push(&self, data: Bytes) -> bool {
        self.tx.send(StreamChunk::Data(data)).is_ok()
    }

    pub fn finish(self) {
        let _ = self.tx.send(StreamChunk::End);
    }
}

impl TopicStream {
    pub fn channel(
        stream_id: impl Into<String>,
        topic: impl Into<String>,
        sender_identity: Option<String>,
    ) -> (StreamWriter, TopicStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            StreamWriter { tx },
            TopicStream {
                stream_id: stream_id.into(),
                topic: topic.into(),
                sender_identity,
                chunks: rx,
            },
        )
    }

    /// Convenience for tests and in-process transports: a complete stream.
    pub fn complete(topic: impl Into<String>, body: impl Into<Bytes>) -> TopicStream {
        let (writer, stream) = Self::channel(assessment_protocol::new_id(), topic, None);
        writer.push(body.into());
        writer.finish();
        stream
    }

    pub async fn read_all(mut self) -> Result<Bytes, DecodeError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.chunks.recv().await {
            match chunk {
                StreamChunk::Data(data) => buf.extend_from_slice(&data),
                StreamChunk::End => return Ok(buf.freeze()),
            }
        }
        Err(DecodeError::Aborted { topic: self.topic })
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect and join the room. Resolves once the join is acknowledged.
    async fn connect(&self, server_url: &str, token: &str) -> Result<(), TransportError>;

    /// Leave the room. Safe to call when already disconnected.
    async fn disconnect(&self);

    /// Enable or disable local capture. With `pre_connect_buffer` the
    /// microphone records before the agent joins.
    async fn set_track_enabled(
        &self,
        source: TrackSource,
        enabled: bool,
        pre_connect_buffer: bool,
    ) -> Result<(), TransportError>;

    fn remote_participants(&self) -> Vec<String>;

    fn local_identity(&self) -> Option<String>;

    fn is_connected(&self) -> bool;

    async fn perform_rpc(
        &self,
        destination: &str,
        method: RpcMethod,
        payload: &str,
    ) -> Result<String, TransportError>;

    /// Publish a chat message; returns it as published.
    async fn send_chat(&self, text: &str) -> Result<ChatPayload, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_all_concatenates_chunks() {
        let (writer, stream) = TopicStream::channel("s1", "agent-state-update", None);
        writer.push(Bytes::from_static(b"{\"current\":"));
        writer.push(Bytes::from_static(b"\"Outcome\"}"));
        writer.finish();

        let body = stream.read_all().await.unwrap();
        assert_eq!(&body[..], b"{\"current\":\"Outcome\"}");
    }

    #[tokio::test]
    async fn dropped_writer_aborts_stream() {
        let (writer, stream) = TopicStream::channel("s1", "agent-state-update", None);
        writer.push(Bytes::from_static(b"{\"cur"));
        drop(writer);

        let err = stream.read_all().await.unwrap_err();
        assert!(matches!(err, DecodeError::Aborted { ref topic } if topic == "agent-state-update"));
    }
}
