//! Client → Agent frames

use serde::{Deserialize, Serialize};

use crate::agent::ChatPayload;

/// Remote procedures exposed by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcMethod {
    ToggleInput,
    ToggleOutput,
}

impl RpcMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcMethod::ToggleInput => "toggle_input",
            RpcMethod::ToggleOutput => "toggle_output",
        }
    }
}

/// Payload for the audio toggle procedures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioToggle {
    AudioOn,
    AudioOff,
}

impl AudioToggle {
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            AudioToggle::AudioOn
        } else {
            AudioToggle::AudioOff
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioToggle::AudioOn => "audio_on",
            AudioToggle::AudioOff => "audio_off",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackSource {
    Microphone,
    Camera,
    ScreenShare,
}

/// Frames sent from the client over the realtime transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Rpc {
        request_id: String,
        destination_identity: String,
        method: RpcMethod,
        payload: String,
    },
    Chat {
        message: ChatPayload,
    },
    SetTrackEnabled {
        source: TrackSource,
        enabled: bool,
        /// Buffer microphone audio until the agent joins.
        #[serde(default)]
        pre_connect_buffer: bool,
    },
    Leave,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rpc_frame_uses_wire_method_names() {
        let frame = ClientFrame::Rpc {
            request_id: "r1".into(),
            destination_identity: "agent-1".into(),
            method: RpcMethod::ToggleOutput,
            payload: AudioToggle::AudioOff.as_str().into(),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "rpc");
        assert_eq!(value["method"], RpcMethod::ToggleOutput.as_str());
        assert_eq!(value["payload"], "audio_off");
    }

    #[test]
    fn audio_toggle_from_enabled() {
        assert_eq!(AudioToggle::from_enabled(true), AudioToggle::AudioOn);
        assert_eq!(
            serde_json::to_value(AudioToggle::from_enabled(false)).unwrap(),
            json!("audio_off")
        );
    }
}
