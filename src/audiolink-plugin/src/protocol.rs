//! Wire protocol between the host and an audio source plugin process.
//!
//! Every message is one JSON object on its own line. The host writes
//! [`PluginRequest`]s to the plugin's stdin; the plugin writes
//! [`PluginMessage`]s to its stdout, which are either the response to a request
//! or an unsolicited [`PluginNotification`].

use crate::source::{AudioSourceCallback, SourceError, TrackInfo};
use serde::{Deserialize, Serialize};

/// Protocol version for compatibility checking.
pub const PROTOCOL_VERSION: u32 = 1;

/// Request sent from the host to a plugin process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRequest {
    /// Unique request ID for correlation.
    pub id: u64,
    pub method: PluginMethod,
}

/// Response from a plugin process to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginResponse {
    /// Request ID this response correlates to.
    pub id: u64,
    pub result: PluginResult,
}

/// Methods that can be invoked on a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params")]
pub enum PluginMethod {
    /// Handshake; returns plugin metadata.
    Initialize,
    /// Liveness ping.
    IsAlive,
    GetName,
    Activate,
    Deactivate,
    PlayTrack,
    PauseTrack,
    PreviousTrack,
    NextTrack,
    /// Deactivate and exit the serve loop.
    Shutdown,
}

/// Result of a plugin method invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum PluginResult {
    Initialized(PluginInfo),
    Alive,
    Name { name: String },
    /// The operation completed and has nothing to return.
    Done,
    ShutdownAck,
    Error(PluginError),
}

/// Unsolicited event from the plugin, mirroring [`AudioSourceCallback`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PluginNotification {
    TrackInfoChanged {
        title: String,
        artist: String,
        #[serde(default, with = "base64_opt")]
        album_art: Option<Vec<u8>>,
    },
    TrackPlaying,
    TrackPaused,
    TrackProgressChanged { percent: f64 },
}

impl PluginNotification {
    /// Replay this notification onto a callback.
    pub fn dispatch(self, callback: &dyn AudioSourceCallback) {
        match self {
            PluginNotification::TrackInfoChanged {
                title,
                artist,
                album_art,
            } => callback.track_info_changed(TrackInfo {
                title,
                artist,
                album_art,
            }),
            PluginNotification::TrackPlaying => callback.track_playing(),
            PluginNotification::TrackPaused => callback.track_paused(),
            PluginNotification::TrackProgressChanged { percent } => {
                callback.track_progress_changed(percent)
            }
        }
    }
}

impl From<TrackInfo> for PluginNotification {
    fn from(info: TrackInfo) -> Self {
        PluginNotification::TrackInfoChanged {
            title: info.title,
            artist: info.artist,
            album_art: info.album_art,
        }
    }
}

/// Everything a plugin writes to stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PluginMessage {
    Response(PluginResponse),
    Notification { event: PluginNotification },
}

/// Plugin initialization info returned after Initialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin's unique identifier.
    pub id: String,
    /// Human-friendly name.
    pub name: String,
    /// Plugin version (semantic versioning).
    pub version: String,
    /// Protocol version the plugin supports.
    pub protocol_version: u32,
}

/// Error returned by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginError {
    pub kind: PluginErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginErrorKind {
    /// The request line could not be decoded.
    Malformed,
    /// The target application is not reachable.
    Unavailable,
    NotSupported,
    ProtocolMismatch,
    Internal,
}

impl From<PluginError> for SourceError {
    fn from(err: PluginError) -> Self {
        match err.kind {
            PluginErrorKind::Unavailable => Self::Unavailable {
                message: err.message,
            },
            PluginErrorKind::NotSupported => Self::NotSupported {
                operation: err.message,
            },
            PluginErrorKind::Malformed
            | PluginErrorKind::ProtocolMismatch
            | PluginErrorKind::Internal => Self::Other {
                message: err.message,
            },
        }
    }
}

impl From<SourceError> for PluginError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Unavailable { message } => Self {
                kind: PluginErrorKind::Unavailable,
                message,
            },
            SourceError::NotSupported { operation } => Self {
                kind: PluginErrorKind::NotSupported,
                message: operation,
            },
            SourceError::Transport { message } | SourceError::Other { message } => Self {
                kind: PluginErrorKind::Internal,
                message,
            },
        }
    }
}

/// Album art travels as a base64 string instead of a JSON number array.
mod base64_opt {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => s.serialize_some(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|encoded| STANDARD.decode(encoded).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_correctly() {
        let req = PluginRequest {
            id: 1,
            method: PluginMethod::Activate,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"id":1,"method":{"type":"Activate"}}"#);
    }

    #[test]
    fn response_deserializes_correctly() {
        let json = r#"{"kind":"Response","id":1,"result":{"status":"Initialized","id":"media-app","name":"Media App","version":"0.1.0","protocol_version":1}}"#;
        let msg: PluginMessage = serde_json::from_str(json).unwrap();
        match msg {
            PluginMessage::Response(PluginResponse {
                id: 1,
                result: PluginResult::Initialized(info),
            }) => {
                assert_eq!(info.id, "media-app");
                assert_eq!(info.protocol_version, PROTOCOL_VERSION);
            }
            other => panic!("expected Initialized response, got {other:?}"),
        }
    }

    #[test]
    fn album_art_is_base64_on_the_wire() {
        let msg = PluginMessage::Notification {
            event: PluginNotification::TrackInfoChanged {
                title: "Song".into(),
                artist: "Band".into(),
                album_art: Some(vec![0xff, 0xd8, 0xff]),
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""kind":"Notification""#));
        assert!(json.contains(r#""album_art":"/9j/""#));

        let back: PluginMessage = serde_json::from_str(&json).unwrap();
        match back {
            PluginMessage::Notification {
                event: PluginNotification::TrackInfoChanged { album_art, .. },
            } => assert_eq!(album_art, Some(vec![0xff, 0xd8, 0xff])),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn missing_album_art_decodes_as_none() {
        let json = r#"{"kind":"Notification","event":{"type":"TrackInfoChanged","title":"","artist":""}}"#;
        let msg: PluginMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(
            msg,
            PluginMessage::Notification {
                event: PluginNotification::TrackInfoChanged {
                    album_art: None,
                    ..
                }
            }
        ));
    }

    #[test]
    fn error_converts_to_source_error() {
        let err = PluginError {
            kind: PluginErrorKind::Unavailable,
            message: "player closed".to_string(),
        };
        let source_err: SourceError = err.into();
        match source_err {
            SourceError::Unavailable { message } => assert_eq!(message, "player closed"),
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }
}
