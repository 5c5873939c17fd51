//! Network and console edge.
//!
//! Everything that waits lives here: the WebSocket accept loop, one reader
//! loop plus one writer task per connection, and the operator console loop.
//! They share the [`Server`] behind a mutex that is only ever held for the
//! duration of a single named operation, never across an `.await`.

use std::io::{self, BufRead};
use std::net::SocketAddr;
use std::sync::Arc;

use contour_trial::{TrialError, Visualizer};
use contour_wire::EncodeError;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::command::{Command, ConsoleInput, parse_line};
use crate::session::{ConnectionId, OutboundFrame, PeerLink};
use crate::{Dispatch, Ingest, ProtocolError, Server, TransportError};

/// Console lines buffered between the stdin thread and the console loop.
const CONSOLE_QUEUE: usize = 8;

// ============================================================================
// Command Results
// ============================================================================

/// Failure of one operator command. None of these end the console loop.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("send failed: {0}")]
    Transport(#[from] TransportError),

    #[error("visualization failed: {0}")]
    Visualize(#[from] TrialError),

    #[error("visualization task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// What a successful command did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReport {
    Sent {
        id: ConnectionId,
        kind: &'static str,
    },
    Compared {
        curve_points: usize,
        samples: usize,
    },
}

// ============================================================================
// Edge
// ============================================================================

/// Shared handle driving a [`Server`] from the network and the console.
#[derive(Clone)]
pub struct Edge {
    server: Arc<Mutex<Server>>,
    visualizer: Arc<dyn Visualizer>,
}

impl Edge {
    pub fn new(server: Server, visualizer: Arc<dyn Visualizer>) -> Self {
        Self {
            server: Arc::new(Mutex::new(server)),
            visualizer,
        }
    }

    pub fn server(&self) -> &Arc<Mutex<Server>> {
        &self.server
    }

    /// Accept connections forever, one task per connection.
    pub async fn serve(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let edge = self.clone();
                    tokio::spawn(async move { edge.handle_tcp(stream, addr).await });
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }
    }

    async fn handle_tcp(self, stream: TcpStream, addr: SocketAddr) {
        match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => self.run_peer(ws, Some(addr)).await,
            Err(e) => warn!(%addr, error = %e, "websocket handshake failed"),
        }
    }

    /// Attach `ws` as the active peer and service its messages until it
    /// closes.
    ///
    /// A previously attached peer is closed first. Malformed messages are
    /// logged and skipped; a receive error ends the loop like a close does.
    /// The loop also ends once the connection's writer stops (failed send,
    /// explicit close, or the peer was detached), which drops the socket.
    pub async fn run_peer<S>(&self, ws: WebSocketStream<S>, addr: Option<SocketAddr>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, mut stream) = ws.split();

        let (id, capacity) = {
            let mut server = self.server.lock();
            (server.allocate_connection_id(), server.config().outbox_capacity)
        };
        let (link, outbox) = PeerLink::channel(id, addr, capacity);
        let mut writer = tokio::spawn(write_loop(id, sink, outbox));

        let replaced = self.server.lock().on_connect(link);
        if let Some(old) = replaced {
            old.close().await;
        }

        loop {
            let frame = tokio::select! {
                frame = stream.next() => frame,
                _ = &mut writer => {
                    debug!(id, "writer stopped, dropping connection");
                    break;
                }
            };
            let Some(frame) = frame else { break };

            let body = match frame {
                Ok(Message::Text(text)) => text.into_bytes(),
                Ok(Message::Binary(bytes)) => bytes,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!(id, error = %e, "receive failed");
                    break;
                }
            };

            let result = self.server.lock().on_message(id, &body);
            match result {
                Ok(Ingest::Stored { .. }) => {}
                Ok(Ingest::Stale) => debug!(id, "message from detached connection dropped"),
                Err(e) => warn!(id, error = %e, "ignoring malformed message"),
            }
        }

        self.server.lock().on_disconnect(id);
    }

    /// Run one operator command to completion.
    ///
    /// Returns only after the send was flushed (or failed) or the visualizer
    /// finished, so commands never overlap. A failed send detaches the peer.
    pub async fn run_command(&self, command: Command) -> Result<CommandReport, CommandError> {
        let dispatch = self.server.lock().on_command(command)?;

        match dispatch {
            Dispatch::Send { link, message } => {
                let text = message.encode()?;
                if let Err(e) = link.send_text(text).await {
                    self.server.lock().on_disconnect(link.id);
                    return Err(e.into());
                }
                Ok(CommandReport::Sent {
                    id: link.id,
                    kind: message.kind(),
                })
            }
            Dispatch::Compare {
                curve,
                knots,
                samples,
            } => {
                let report = CommandReport::Compared {
                    curve_points: curve.len(),
                    samples: samples.len(),
                };
                let visualizer = Arc::clone(&self.visualizer);
                tokio::task::spawn_blocking(move || visualizer.render(&curve, &knots, &samples))
                    .await??;
                Ok(report)
            }
        }
    }

    /// Consume console lines until `quit` or until the sender goes away.
    pub async fn run_console(&self, mut lines: mpsc::Receiver<String>) {
        info!("commands: {}", Command::usage());

        while let Some(line) = lines.recv().await {
            match parse_line(&line) {
                ConsoleInput::Quit => break,
                ConsoleInput::Unknown(input) => warn!(input = %input, "Invalid command"),
                ConsoleInput::Command(command) => self.console_command(command).await,
            }
        }

        info!("console closed");
    }

    async fn console_command(&self, command: Command) {
        match self.run_command(command).await {
            Ok(CommandReport::Sent { id, kind }) => info!(id, kind, %command, "sent to client"),
            Ok(CommandReport::Compared {
                curve_points,
                samples,
            }) => info!(curve_points, samples, "comparison written"),
            Err(CommandError::Protocol(ProtocolError::NotConnected)) => {
                warn!(%command, "No client connected!")
            }
            Err(e) => error!(%command, error = %e, "command failed"),
        }
    }
}

/// Drain `outbox` into `sink`, acknowledging every text frame.
///
/// Stops after a failed send, or with a close handshake once asked to close
/// or once every [`PeerLink`] to this connection is gone.
async fn write_loop<S>(
    id: ConnectionId,
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outbox: mpsc::Receiver<OutboundFrame>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(frame) = outbox.recv().await {
        match frame {
            OutboundFrame::Text { text, ack } => {
                let result = sink
                    .send(Message::Text(text))
                    .await
                    .map_err(TransportError::from);
                let failed = result.is_err();
                // The command may have given up waiting; nothing to report to.
                let _ = ack.send(result);
                if failed {
                    debug!(id, "writer stopped after a failed send");
                    return;
                }
            }
            OutboundFrame::Close => break,
        }
    }

    if let Err(e) = sink.close().await {
        debug!(id, error = %e, "close handshake failed");
    }
    debug!(id, "writer stopped");
}

/// Read stdin on a dedicated thread and forward each line.
///
/// Blocking stdin reads stay off the runtime so shutdown never waits on them.
pub fn spawn_stdin_reader() -> io::Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(CONSOLE_QUEUE);
    std::thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::task::{Context, Poll};
    use std::time::Duration;

    use tokio::io::ReadBuf;
    use tokio_tungstenite::tungstenite::protocol::Role;

    use contour_curve::{ControlPoint, CurvePath};
    use contour_wire::{NormalizedSample, ServerMessage};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use crate::ServerConfig;
    use crate::session::Phase;

    type Calls = Vec<(CurvePath, Vec<ControlPoint>, Vec<NormalizedSample>)>;

    #[derive(Default)]
    struct RecordingVisualizer {
        calls: Mutex<Calls>,
    }

    impl Visualizer for RecordingVisualizer {
        fn render(
            &self,
            curve: &CurvePath,
            knots: &[ControlPoint],
            samples: &[NormalizedSample],
        ) -> Result<(), TrialError> {
            self.calls.lock().push((curve.clone(), knots.to_vec(), samples.to_vec()));
            Ok(())
        }
    }

    fn test_edge() -> (Edge, Arc<RecordingVisualizer>) {
        let visualizer = Arc::new(RecordingVisualizer::default());
        let server = Server::with_rng(ServerConfig::default(), StdRng::seed_from_u64(7));
        (Edge::new(server, visualizer.clone()), visualizer)
    }

    async fn serve_on_loopback(edge: &Edge) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        tokio::spawn(edge.clone().serve(listener));
        url
    }

    async fn wait_until(edge: &Edge, cond: impl Fn(&Server) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if cond(&edge.server().lock()) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    /// Attach a link served by a fake writer that records and acknowledges
    /// every text frame.
    fn attach_fake_peer(edge: &Edge) -> Arc<Mutex<Vec<String>>> {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let id = edge.server().lock().allocate_connection_id();
        let (link, mut rx) = PeerLink::channel(id, None, 4);
        edge.server().lock().on_connect(link);

        let log = Arc::clone(&sent);
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let OutboundFrame::Text { text, ack } = frame {
                    log.lock().push(text);
                    let _ = ack.send(Ok(()));
                }
            }
        });
        sent
    }

    #[tokio::test]
    async fn test_command_while_idle_is_rejected() {
        let (edge, visualizer) = test_edge();

        let err = edge.run_command(Command::Generate).await.unwrap_err();
        assert!(matches!(err, CommandError::Protocol(ProtocolError::NotConnected)));
        assert!(edge.server().lock().state().last_curve().is_none());
        assert!(visualizer.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_generate_reaches_connected_client() {
        let (edge, _) = test_edge();
        let url = serve_on_loopback(&edge).await;

        let (mut client, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        wait_until(&edge, Server::is_connected).await;

        let report = edge.run_command(Command::Generate).await.unwrap();
        assert!(matches!(report, CommandReport::Sent { kind: "curve", .. }));

        let Message::Text(text) = client.next().await.unwrap().unwrap() else {
            panic!("expected a text frame");
        };
        let ServerMessage::Curve(msg) = ServerMessage::decode(&text).unwrap() else {
            panic!("expected a curve");
        };
        assert!(!msg.points.is_empty());

        let stored = edge.server().lock().state().last_curve().cloned().unwrap();
        assert_eq!(CurvePath::from(msg), stored);
    }

    #[tokio::test]
    async fn test_start_and_stop_reach_client_in_order() {
        let (edge, _) = test_edge();
        let url = serve_on_loopback(&edge).await;

        let (mut client, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        wait_until(&edge, Server::is_connected).await;

        edge.run_command(Command::Start).await.unwrap();
        edge.run_command(Command::Stop).await.unwrap();

        assert_eq!(client.next().await.unwrap().unwrap(), Message::Text("START".to_string()));
        assert_eq!(client.next().await.unwrap().unwrap(), Message::Text("END".to_string()));
    }

    #[tokio::test]
    async fn test_client_batches_survive_malformed_messages() {
        let (edge, _) = test_edge();
        let url = serve_on_loopback(&edge).await;

        let (mut client, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        wait_until(&edge, Server::is_connected).await;

        client
            .send(Message::Text(
                r#"{"rawTouchData":[{"rawX":16,"rawY":320},{"rawX":380,"rawY":16}]}"#.to_string(),
            ))
            .await
            .unwrap();
        wait_until(&edge, |s| s.state().last_samples().len() == 2).await;
        assert_eq!(
            edge.server().lock().state().last_samples(),
            &[
                NormalizedSample { x: 0.0, y: 0.0 },
                NormalizedSample { x: 10.0, y: 10.0 }
            ]
        );

        client.send(Message::Text("{oops".to_string())).await.unwrap();
        client
            .send(Message::Binary(br#"{"rawTouchData":[{"rawX":198,"rawY":168}]}"#.to_vec()))
            .await
            .unwrap();
        wait_until(&edge, |s| s.state().last_samples().len() == 1).await;
        assert!(edge.server().lock().is_connected());
    }

    #[tokio::test]
    async fn test_client_close_returns_to_idle() {
        let (edge, _) = test_edge();
        let url = serve_on_loopback(&edge).await;

        let (mut client, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        wait_until(&edge, Server::is_connected).await;

        client.close(None).await.unwrap();
        wait_until(&edge, |s| s.phase() == Phase::Idle).await;

        let err = edge.run_command(Command::Start).await.unwrap_err();
        assert!(matches!(err, CommandError::Protocol(ProtocolError::NotConnected)));
    }

    #[tokio::test]
    async fn test_second_client_replaces_and_closes_first() {
        let (edge, _) = test_edge();
        let url = serve_on_loopback(&edge).await;

        let (mut first, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        wait_until(&edge, Server::is_connected).await;
        let first_id = edge.server().lock().state().active_id();

        let (mut second, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        wait_until(&edge, |s| s.is_connected() && s.state().active_id() != first_id).await;

        // The first client is told to go away.
        assert_closed_by_server(&mut first).await;

        // Commands now reach the second client, and the first one's late
        // close did not detach it.
        edge.run_command(Command::Start).await.unwrap();
        assert_eq!(second.next().await.unwrap().unwrap(), Message::Text("START".to_string()));
        assert!(edge.server().lock().is_connected());
    }

    /// Wait until the client sees its connection end.
    async fn assert_closed_by_server<S>(client: &mut WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match client.next().await {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "connection was not closed by the server");
    }

    #[tokio::test]
    async fn test_detached_peer_transport_is_closed() {
        let (edge, _) = test_edge();
        let url = serve_on_loopback(&edge).await;

        let (mut client, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        wait_until(&edge, Server::is_connected).await;

        // Same path a failed send takes: the session lets go of the link.
        let id = edge.server().lock().state().active_id().unwrap();
        assert!(edge.server().lock().on_disconnect(id));

        assert_closed_by_server(&mut client).await;
        assert_eq!(edge.server().lock().phase(), Phase::Idle);
    }

    /// In-memory transport whose writes can be made to fail on demand.
    struct FlakyIo {
        inner: tokio::io::DuplexStream,
        fail_writes: Arc<AtomicBool>,
    }

    impl FlakyIo {
        fn check(&self) -> io::Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "write side broken"))
            } else {
                Ok(())
            }
        }
    }

    impl AsyncRead for FlakyIo {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for FlakyIo {
        fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            let this = self.get_mut();
            if let Err(e) = this.check() {
                return Poll::Ready(Err(e));
            }
            Pin::new(&mut this.inner).poll_write(cx, buf)
        }

        fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            let this = self.get_mut();
            if let Err(e) = this.check() {
                return Poll::Ready(Err(e));
            }
            Pin::new(&mut this.inner).poll_flush(cx)
        }

        fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
        }
    }

    #[tokio::test]
    async fn test_failed_send_ends_reader_of_open_connection() {
        let (edge, _) = test_edge();
        let (server_io, client_io) = tokio::io::duplex(4096);
        let fail_writes = Arc::new(AtomicBool::new(false));
        let server_io = FlakyIo {
            inner: server_io,
            fail_writes: Arc::clone(&fail_writes),
        };
        let server_ws = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        // The client stays open for the whole test.
        let _client_ws = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;

        let peer = {
            let edge = edge.clone();
            tokio::spawn(async move { edge.run_peer(server_ws, None).await })
        };
        wait_until(&edge, Server::is_connected).await;

        fail_writes.store(true, Ordering::SeqCst);
        let err = edge.run_command(Command::Start).await.unwrap_err();
        assert!(matches!(err, CommandError::Transport(TransportError::WebSocket(_))));
        assert_eq!(edge.server().lock().phase(), Phase::Idle);

        tokio::time::timeout(Duration::from_secs(5), peer)
            .await
            .expect("reader kept running after its writer failed")
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_failure_detaches_peer() {
        let (edge, _) = test_edge();
        let id = edge.server().lock().allocate_connection_id();
        let (link, rx) = PeerLink::channel(id, None, 4);
        edge.server().lock().on_connect(link);
        drop(rx);

        let err = edge.run_command(Command::Start).await.unwrap_err();
        assert!(matches!(err, CommandError::Transport(TransportError::Closed { .. })));
        assert_eq!(edge.server().lock().phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_compare_invokes_visualizer_without_sending() {
        let (edge, visualizer) = test_edge();
        let sent = attach_fake_peer(&edge);

        edge.run_command(Command::Generate).await.unwrap();
        let report = edge.run_command(Command::Compare).await.unwrap();

        let curve = edge.server().lock().state().last_curve().cloned().unwrap();
        assert_eq!(
            report,
            CommandReport::Compared {
                curve_points: curve.len(),
                samples: 0
            }
        );
        let calls = visualizer.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, curve);
        assert_eq!(calls[0].1, edge.server().lock().state().last_knots());
        // Only the curve went out; compare has no network effect.
        assert_eq!(sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_console_dispatches_lines_in_order() {
        let (edge, visualizer) = test_edge();
        let sent = attach_fake_peer(&edge);

        let (tx, rx) = mpsc::channel(16);
        for line in ["7", "2", "3", "4", " q ", "1"] {
            tx.send(line.to_string()).await.unwrap();
        }
        drop(tx);

        edge.run_console(rx).await;

        assert_eq!(*sent.lock(), vec!["START".to_string(), "END".to_string()]);
        assert_eq!(visualizer.calls.lock().len(), 1);
        // "1" came after quit and was never run.
        assert!(edge.server().lock().state().last_curve().is_none());
    }

    #[tokio::test]
    async fn test_console_survives_idle_commands() {
        let (edge, visualizer) = test_edge();

        let (tx, rx) = mpsc::channel(16);
        for line in ["1", "2", "4"] {
            tx.send(line.to_string()).await.unwrap();
        }
        drop(tx);

        edge.run_console(rx).await;

        assert!(visualizer.calls.lock().is_empty());
        assert_eq!(edge.server().lock().phase(), Phase::Idle);
    }
}
