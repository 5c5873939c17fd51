//! Contour Wire Protocol Types
//!
//! This crate defines the messages exchanged between the tracing client and
//! the Contour server over the WebSocket. Both sides depend on it so the JSON
//! field names live in exactly one place.
//!
//! # Message Categories
//!
//! - **Peer → Server**: one batch of raw touch samples per message,
//!   `{ "rawTouchData": [ { "rawX": .., "rawY": .. }, ... ] }`
//! - **Server → Peer**: the curve, `{ "points": [[x, y], ...] }`, and the bare
//!   text sentinels `START` / `END` (not JSON-wrapped)

#![deny(unsafe_code)]

use contour_curve::{CurvePath, CurvePoint};
use serde::{Deserialize, Serialize};

// ============================================================================
// Sentinels
// ============================================================================

/// Sentinel asking the peer to begin recording.
pub const START: &str = "START";

/// Sentinel asking the peer to stop recording and report.
pub const END: &str = "END";

// ============================================================================
// Errors
// ============================================================================

/// Inbound payload could not be read as a touch batch.
#[derive(Debug, thiserror::Error)]
pub enum MalformedMessageError {
    /// Not JSON, or JSON without the `rawTouchData` envelope.
    #[error("malformed peer message: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary frame whose bytes are not UTF-8.
    #[error("peer message is not valid UTF-8")]
    NotUtf8,
}

/// Outbound message could not be serialized.
#[derive(Debug, thiserror::Error)]
#[error("failed to encode outbound message: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

// ============================================================================
// Peer → Server
// ============================================================================

/// One raw pointer sample in device coordinates.
///
/// Missing coordinates default to `0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    #[serde(rename = "rawX", default)]
    pub raw_x: f64,

    #[serde(rename = "rawY", default)]
    pub raw_y: f64,
}

impl RawSample {
    pub fn new(raw_x: f64, raw_y: f64) -> Self {
        Self { raw_x, raw_y }
    }
}

/// A batch of samples recorded during one interaction, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TouchBatch {
    #[serde(rename = "rawTouchData")]
    pub raw_touch_data: Vec<RawSample>,
}

impl TouchBatch {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, MalformedMessageError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decode a binary frame carrying UTF-8 JSON.
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, MalformedMessageError> {
        let text = std::str::from_utf8(bytes).map_err(|_| MalformedMessageError::NotUtf8)?;
        Self::decode(text)
    }
}

/// A sample mapped into the curve's coordinate domain.
///
/// Values are not clamped; samples recorded outside the drawing area land
/// outside `[0, 10]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSample {
    pub x: f64,
    pub y: f64,
}

// ============================================================================
// Server → Peer
// ============================================================================

/// The curve as sent to the peer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurveMessage {
    pub points: Vec<[f64; 2]>,
}

/// Everything the server ever sends to the peer.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Curve(CurveMessage),
    Start,
    End,
}

impl ServerMessage {
    /// Render as the text frame the peer expects.
    ///
    /// The curve is pretty-printed with a four-space indent; sentinels are
    /// sent verbatim.
    pub fn encode(&self) -> Result<String, EncodeError> {
        match self {
            Self::Curve(curve) => {
                let mut buf = Vec::new();
                let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
                let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
                curve.serialize(&mut ser)?;
                // serde_json only ever emits UTF-8.
                Ok(String::from_utf8_lossy(&buf).into_owned())
            }
            Self::Start => Ok(START.to_string()),
            Self::End => Ok(END.to_string()),
        }
    }

    /// Parse a text frame as the peer would.
    pub fn decode(text: &str) -> Result<Self, MalformedMessageError> {
        match text {
            START => Ok(Self::Start),
            END => Ok(Self::End),
            _ => Ok(Self::Curve(serde_json::from_str(text)?)),
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Curve(_) => "curve",
            Self::Start => "start",
            Self::End => "end",
        }
    }
}

// ============================================================================
// Conversion Traits
// ============================================================================

impl From<&CurvePath> for CurveMessage {
    fn from(path: &CurvePath) -> Self {
        Self {
            points: path.points.iter().map(|p| [p.x, p.y]).collect(),
        }
    }
}

impl From<CurveMessage> for CurvePath {
    fn from(msg: CurveMessage) -> Self {
        Self {
            points: msg
                .points
                .into_iter()
                .map(|[x, y]| CurvePoint { x, y })
                .collect(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
