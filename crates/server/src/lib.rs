//! Contour Session Server
//!
//! The session server mediates between the operator and a single tracing
//! client. It owns:
//! - Session management (one attached peer at a time)
//! - Curve synthesis on request and delivery to the peer
//! - Start/stop signalling
//! - Normalization and storage of the samples the peer reports
//! - Hand-off of the last trial to the visualizer
//!
//! # Architecture
//!
//! [`Server`] is a synchronous state machine: every peer event and operator
//! command goes through one of its named operations (`on_connect`,
//! `on_disconnect`, `on_message`, `on_command`) and comes back as a
//! [`Dispatch`] describing the I/O to perform. All sockets, tasks and the
//! console live in [`edge`].

#![deny(unsafe_code)]

pub mod command;
pub mod edge;
pub mod normalize;
pub mod session;

use std::path::PathBuf;

use contour_curve::{ControlPoint, CurveParams, CurvePath, GeneratedCurve, InvalidInputError, generate_curve};
use contour_wire::{CurveMessage, MalformedMessageError, NormalizedSample, ServerMessage, TouchBatch};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use command::Command;
use normalize::{NormalizeConfig, normalize_with};
use session::{ConnectionId, PeerLink, Phase, SessionState};

// ============================================================================
// Default Parameters
// ============================================================================

/// Interface the WebSocket listener binds to.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Port the WebSocket listener binds to.
pub const DEFAULT_PORT: u16 = 8765;

/// Directory trial artifacts are written to.
pub const DEFAULT_OUTPUT_DIR: &str = "trials";

/// Frames queued per connection before senders wait.
pub const OUTBOX_CAPACITY: usize = 16;

// ============================================================================
// Errors
// ============================================================================

/// Send or receive failure on a peer connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection {id} is closed")]
    Closed { id: ConnectionId },

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Operator command rejected by the session.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("no client connected")]
    NotConnected,

    #[error("curve generation failed: {0}")]
    Generate(#[from] InvalidInputError),
}

// ============================================================================
// Server State
// ============================================================================

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub output_dir: PathBuf,
    pub outbox_capacity: usize,
    pub curve: CurveParams,
    pub normalize: NormalizeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            outbox_capacity: OUTBOX_CAPACITY,
            curve: CurveParams::default(),
            normalize: NormalizeConfig::default(),
        }
    }
}

/// What the edge must do after a command was accepted.
#[derive(Debug)]
pub enum Dispatch {
    /// Send `message` to the attached peer.
    Send {
        link: PeerLink,
        message: ServerMessage,
    },
    /// Hand the last trial to the visualizer; no network effect.
    Compare {
        curve: CurvePath,
        knots: Vec<ControlPoint>,
        samples: Vec<NormalizedSample>,
    },
}

/// Outcome of an inbound peer message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// Batch normalized and stored, replacing the previous one.
    Stored { samples: usize },
    /// Sender is not the attached connection; nothing stored.
    Stale,
}

/// Session state machine for one interactive client.
pub struct Server {
    config: ServerConfig,
    state: SessionState,
    next_connection_id: ConnectionId,
    /// Unseeded in production; tests substitute a seeded generator.
    rng: StdRng,
}

impl Server {
    /// Create a new server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Create a server drawing curves from `rng`.
    pub fn with_rng(config: ServerConfig, rng: StdRng) -> Self {
        Self {
            config,
            state: SessionState::default(),
            next_connection_id: 1,
            rng,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn is_connected(&self) -> bool {
        self.phase() == Phase::Connected
    }

    /// Reserve an identifier for a connection about to be attached.
    pub fn allocate_connection_id(&mut self) -> ConnectionId {
        let id = self.next_connection_id;
        self.next_connection_id += 1;
        id
    }

    /// Attach a peer.
    ///
    /// Returns the previously attached link, if any; the caller must close it.
    pub fn on_connect(&mut self, link: PeerLink) -> Option<PeerLink> {
        info!(id = link.id, addr = ?link.addr, "client connected");
        let replaced = self.state.active.replace(link);
        if let Some(old) = &replaced {
            warn!(id = old.id, "replacing previously attached client");
        }
        replaced
    }

    /// Detach the peer `id`.
    ///
    /// Returns `false` when `id` is not the attached connection (already
    /// detached or replaced), in which case nothing changes.
    pub fn on_disconnect(&mut self, id: ConnectionId) -> bool {
        if self.state.active_id() == Some(id) {
            self.state.active = None;
            info!(id, "client disconnected");
            true
        } else {
            debug!(id, "ignoring disconnect of a connection that is not attached");
            false
        }
    }

    /// Ingest one inbound message body from connection `id`.
    ///
    /// A valid batch replaces the stored samples wholesale. A malformed body
    /// leaves them untouched.
    pub fn on_message(&mut self, id: ConnectionId, body: &[u8]) -> Result<Ingest, MalformedMessageError> {
        if self.state.active_id() != Some(id) {
            debug!(id, "dropping message from a connection that is not attached");
            return Ok(Ingest::Stale);
        }

        let batch = TouchBatch::decode_bytes(body)?;
        let samples = normalize_with(&self.config.normalize, &batch.raw_touch_data);
        let count = samples.len();
        self.state.last_samples = samples;

        info!(id, samples = count, "stored touch batch");
        Ok(Ingest::Stored { samples: count })
    }

    /// Dispatch an operator command.
    ///
    /// Every command requires an attached peer; while idle it fails with
    /// [`ProtocolError::NotConnected`] and changes nothing.
    pub fn on_command(&mut self, command: Command) -> Result<Dispatch, ProtocolError> {
        let Some(link) = self.state.active.clone() else {
            return Err(ProtocolError::NotConnected);
        };

        let dispatch = match command {
            Command::Generate => {
                let GeneratedCurve { knots, path } = generate_curve(&self.config.curve, &mut self.rng)?;
                let message = ServerMessage::Curve(CurveMessage::from(&path));
                debug!(samples = path.len(), knots = knots.len(), "generated curve");
                self.state.last_curve = Some(path);
                self.state.last_knots = knots;
                Dispatch::Send { link, message }
            }
            Command::Start => Dispatch::Send {
                link,
                message: ServerMessage::Start,
            },
            Command::Stop => Dispatch::Send {
                link,
                message: ServerMessage::End,
            },
            Command::Compare => Dispatch::Compare {
                curve: self.state.last_curve.clone().unwrap_or_default(),
                knots: self.state.last_knots.clone(),
                samples: self.state.last_samples.clone(),
            },
        };

        Ok(dispatch)
    }
}

// ============================================================================
// Tests
// ============================================================================
