//! Session state for the single attached peer.

use std::net::SocketAddr;

use contour_curve::{ControlPoint, CurvePath};
use contour_wire::NormalizedSample;
use tokio::sync::{mpsc, oneshot};

use crate::TransportError;

/// Connection identifier (server-internal).
pub type ConnectionId = u64;

/// Whether a peer is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connected,
}

/// Work item for a connection's writer task.
#[derive(Debug)]
pub enum OutboundFrame {
    /// Send a text frame and report the outcome on `ack`.
    Text {
        text: String,
        ack: oneshot::Sender<Result<(), TransportError>>,
    },
    /// Send a close frame and stop writing.
    Close,
}

/// Handle identifying the attached connection.
///
/// The link does not own the socket: the writer task does. Sending through a
/// link whose writer has gone away fails with [`TransportError::Closed`].
#[derive(Debug, Clone)]
pub struct PeerLink {
    pub id: ConnectionId,
    pub addr: Option<SocketAddr>,
    outbox: mpsc::Sender<OutboundFrame>,
}

impl PeerLink {
    pub fn new(id: ConnectionId, addr: Option<SocketAddr>, outbox: mpsc::Sender<OutboundFrame>) -> Self {
        Self { id, addr, outbox }
    }

    /// Create a link together with the receiving end its writer drains.
    pub fn channel(
        id: ConnectionId,
        addr: Option<SocketAddr>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(id, addr, tx), rx)
    }

    /// Send a text frame and wait until the writer has flushed it or failed.
    pub async fn send_text(&self, text: String) -> Result<(), TransportError> {
        let (ack, done) = oneshot::channel();
        self.outbox
            .send(OutboundFrame::Text { text, ack })
            .await
            .map_err(|_| TransportError::Closed { id: self.id })?;
        done.await
            .map_err(|_| TransportError::Closed { id: self.id })?
    }

    /// Ask the writer to close the connection.
    pub async fn close(&self) {
        // A writer that already stopped has nothing left to close.
        let _ = self.outbox.send(OutboundFrame::Close).await;
    }
}

/// Process-wide record of the attached peer and the last trial data.
///
/// Mutated only through [`crate::Server`]'s named operations.
#[derive(Debug, Default)]
pub struct SessionState {
    pub(crate) active: Option<PeerLink>,
    pub(crate) last_curve: Option<CurvePath>,
    pub(crate) last_knots: Vec<ControlPoint>,
    pub(crate) last_samples: Vec<NormalizedSample>,
}

impl SessionState {
    pub fn phase(&self) -> Phase {
        if self.active.is_some() {
            Phase::Connected
        } else {
            Phase::Idle
        }
    }

    pub fn active_id(&self) -> Option<ConnectionId> {
        self.active.as_ref().map(|link| link.id)
    }

    pub fn last_curve(&self) -> Option<&CurvePath> {
        self.last_curve.as_ref()
    }

    /// Knots of the last generated curve; empty before the first `generate`.
    pub fn last_knots(&self) -> &[ControlPoint] {
        &self.last_knots
    }

    pub fn last_samples(&self) -> &[NormalizedSample] {
        &self.last_samples
    }
}
