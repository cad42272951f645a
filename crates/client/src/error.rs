//! Error types for the client core

use thiserror::Error;

/// Errors raised by a realtime transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Gave up connecting after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RPC {method} failed: {message}")]
    Rpc { method: String, message: String },

    #[error("RPC {0} timed out")]
    RpcTimeout(String),

    #[error("Media device error: {0}")]
    MediaDevice(String),

    #[error("Channel closed")]
    ChannelClosed,
}

/// Errors turning a side-channel stream into a typed event.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Stream on {topic} ended before completion")]
    Aborted { topic: String },

    #[error("Stream on {topic} is not valid UTF-8")]
    Utf8 { topic: String },

    #[error("Malformed payload on {topic}: {source}")]
    Json {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("No handler registered for topic {0}")]
    Unregistered(String),
}

/// Errors reading or writing durable client storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from the session continuity endpoints.
#[derive(Debug, Error)]
pub enum ContinuityError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{body}")]
    Status { status: u16, body: String },
}
