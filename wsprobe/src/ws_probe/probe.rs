use std::net::SocketAddr;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::{FutureExt, SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at};
use tokio_native_tls::TlsStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream, client_async_tls_with_config};
use trust_dns_resolver::TokioAsyncResolver;
use x509_parser::parse_x509_certificate;

use super::prelude::*;
use super::state::Lifecycle;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOptions {
    /// Upper bound on the whole probe, from DNS lookup to close.
    pub timeout: Duration,
    /// How long to listen after the handshake before the first send. A
    /// close seen in this window means the server hung up before taking
    /// any message. Never longer than `timeout`.
    pub grace: Duration,
    /// When set, the probe closes the connection itself once no frame has
    /// arrived for this long after the last send.
    pub settle: Option<Duration>,
}

impl ProbeOptions {
    /// The grace window, never longer than `timeout`.
    pub fn effective_grace(&self) -> Duration {
        self.grace.min(self.timeout)
    }
}

impl Default for ProbeOptions {
    fn default() -> Self {
        ProbeOptions {
            timeout: DEFAULT_TIMEOUT,
            grace: DEFAULT_GRACE,
            settle: None,
        }
    }
}

/// What an inbound frame means for the conversation.
enum Inbound {
    Data,
    Control,
    Close,
}

/// Everything recorded while a probe runs. It lives outside the timed
/// future so that it survives the future being dropped on timeout.
struct ProbeRun {
    lifecycle: Lifecycle,
    transcript: Transcript,
    timings: PhaseTimings,
    close: Option<CloseInfo>,
    cert_validity_days: Option<i64>,
}

/// Probe a WebSocket endpoint: connect, send `messages` in order, record
/// everything that comes back, and report how the connection ended.
///
/// This never fails. Handshake problems, dropped connections and the
/// deadline all end up in the returned [`ProbeResult`]. Exactly one
/// connection is opened, and it is closed or dropped before returning.
pub async fn probe_endpoint(
    endpoint: &Endpoint,
    messages: &[String],
    options: &ProbeOptions,
    connector: &native_tls::TlsConnector,
    resolver: &TokioAsyncResolver,
) -> ProbeResult {
    let start = Instant::now();
    let mut run = ProbeRun::new();

    let session = run.session(endpoint, messages, options, connector, resolver);
    let finished = timeout(options.timeout, session).await;
    let error = match finished {
        Ok(Ok(())) => None,
        Ok(Err(e)) => {
            run.lifecycle.advance(ProbeState::Failed);
            Some(e)
        }
        Err(_) => {
            run.lifecycle.advance(ProbeState::TimedOut);
            Some(ProbeError::Timeout(options.timeout))
        }
    };

    match &error {
        None => info!("Probe of {endpoint} succeeded"),
        Some(e) => warn!("Probe of {endpoint} failed: {e}"),
    }

    ProbeResult {
        url: endpoint.url(),
        outcome: error.as_ref().map_or(Outcome::Success, ProbeError::outcome),
        state: run.lifecycle.state(),
        error,
        close: run.close,
        timings: run.timings,
        total_probe_time: start.elapsed().as_secs_f64(),
        cert_validity_days: run.cert_validity_days,
        transcript: run.transcript,
    }
}

impl ProbeRun {
    fn new() -> Self {
        ProbeRun {
            lifecycle: Lifecycle::new(),
            transcript: Transcript::new(),
            timings: PhaseTimings::default(),
            close: None,
            cert_validity_days: None,
        }
    }

    async fn session(
        &mut self,
        endpoint: &Endpoint,
        messages: &[String],
        options: &ProbeOptions,
        connector: &native_tls::TlsConnector,
        resolver: &TokioAsyncResolver,
    ) -> Result<(), ProbeError> {
        self.lifecycle.advance(ProbeState::Connecting);
        let mut ws = self.connect(endpoint, connector, resolver).await?;
        self.lifecycle.advance(ProbeState::Open);
        info!("Opened WebSocket connection on {endpoint}");

        if !messages.is_empty() && self.listen_for(&mut ws, options.effective_grace()).await? {
            return Err(self.closed_early(&mut ws, 0, messages.len()).await);
        }

        for (sent, message) in messages.iter().enumerate() {
            if self.drain_inbound(&mut ws)? {
                return Err(self.closed_early(&mut ws, sent, messages.len()).await);
            }

            ws.send(Message::Text(message.clone()))
                .await
                .map_err(|e| ProbeError::SendFailure(e.to_string()))?;
            self.transcript.record_sent(message);
        }

        self.await_close(&mut ws, options.settle).await
    }

    /// Answer a close that came before the whole sequence was sent.
    async fn closed_early(&mut self, ws: &mut WsStream, sent: usize, total: usize) -> ProbeError {
        self.lifecycle.advance(ProbeState::Closing);
        finish_close(ws).await;
        ProbeError::ConnectionDropped(format!(
            "remote closed the connection after {sent} of {total} messages"
        ))
    }

    async fn connect(
        &mut self,
        endpoint: &Endpoint,
        connector: &native_tls::TlsConnector,
        resolver: &TokioAsyncResolver,
    ) -> Result<WsStream, ProbeError> {
        let ip = match endpoint.ip_literal() {
            Some(ip) => ip,
            None => {
                let start = Instant::now();
                let lookup = resolver.lookup_ip(endpoint.host()).await.map_err(|e| {
                    ProbeError::HandshakeFailure(format!(
                        "DNS lookup for {} failed: {e}",
                        endpoint.host()
                    ))
                })?;
                self.timings.dns = Some(start.elapsed().as_secs_f64());
                lookup.iter().next().ok_or_else(|| {
                    ProbeError::HandshakeFailure(format!(
                        "DNS lookup for {} returned no addresses",
                        endpoint.host()
                    ))
                })?
            }
        };

        let addr = SocketAddr::new(ip, endpoint.port());
        let start = Instant::now();
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            ProbeError::HandshakeFailure(format!("TCP connect to {addr} failed: {e}"))
        })?;
        self.timings.connect = Some(start.elapsed().as_secs_f64());

        let tls = match endpoint.scheme() {
            Scheme::Wss => Connector::NativeTls(connector.clone()),
            Scheme::Ws => Connector::Plain,
        };
        let start = Instant::now();
        let (ws, response) = client_async_tls_with_config(endpoint.url(), stream, None, Some(tls))
            .await
            .map_err(|e| ProbeError::HandshakeFailure(e.to_string()))?;
        self.timings.handshake = Some(start.elapsed().as_secs_f64());
        debug!("Upgrade response from {endpoint}: {}", response.status());

        if let MaybeTlsStream::NativeTls(tls_stream) = ws.get_ref() {
            self.cert_validity_days = cert_validity_days(tls_stream);
        }

        Ok(ws)
    }

    /// Record every frame arriving within `window`. Returns true as soon as
    /// the peer sends a close frame. Frames already buffered are read even
    /// when `window` is zero.
    async fn listen_for(&mut self, ws: &mut WsStream, window: Duration) -> Result<bool, ProbeError> {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match timeout_at(deadline, ws.next()).await {
                Err(_) => return Ok(false),
                Ok(Some(Ok(message))) => {
                    if let Inbound::Close = self.record_inbound(message) {
                        return Ok(true);
                    }
                }
                Ok(Some(Err(e))) => return Err(ProbeError::ConnectionDropped(e.to_string())),
                Ok(None) => return Err(dropped_without_close()),
            }
        }
    }

    /// Record every frame that has already arrived, without waiting for
    /// more. Returns true when the peer has sent a close frame.
    fn drain_inbound(&mut self, ws: &mut WsStream) -> Result<bool, ProbeError> {
        while let Some(next) = ws.next().now_or_never() {
            match next {
                Some(Ok(message)) => {
                    if let Inbound::Close = self.record_inbound(message) {
                        return Ok(true);
                    }
                }
                Some(Err(e)) => return Err(ProbeError::ConnectionDropped(e.to_string())),
                None => return Err(dropped_without_close()),
            }
        }
        Ok(false)
    }

    /// Wait for the peer to close the connection. With a settle window, the
    /// probe closes it instead once the peer has gone quiet.
    async fn await_close(&mut self, ws: &mut WsStream, settle: Option<Duration>) -> Result<(), ProbeError> {
        loop {
            let next = match settle {
                Some(window) => match timeout(window, ws.next()).await {
                    Ok(next) => next,
                    Err(_) => return self.close_locally(ws).await,
                },
                None => ws.next().await,
            };

            match next {
                Some(Ok(message)) => {
                    if let Inbound::Close = self.record_inbound(message) {
                        self.lifecycle.advance(ProbeState::Closing);
                        finish_close(ws).await;
                        self.lifecycle.advance(ProbeState::Closed);
                        info!("Remote closed the connection cleanly");
                        return Ok(());
                    }
                }
                Some(Err(e)) => return Err(ProbeError::ConnectionDropped(e.to_string())),
                None => return Err(dropped_without_close()),
            }
        }
    }

    /// Start the close handshake from our side and wait for the reply.
    async fn close_locally(&mut self, ws: &mut WsStream) -> Result<(), ProbeError> {
        debug!("Connection settled, closing it");
        self.lifecycle.advance(ProbeState::Closing);

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "probe complete".into(),
        };
        ws.close(Some(frame))
            .await
            .map_err(|e| ProbeError::ConnectionDropped(e.to_string()))?;

        while let Some(next) = ws.next().await {
            match next {
                Ok(message) => {
                    self.record_inbound(message);
                }
                Err(e) => {
                    debug!("Connection ended during close handshake: {e}");
                    break;
                }
            }
        }

        self.lifecycle.advance(ProbeState::Closed);
        Ok(())
    }

    fn record_inbound(&mut self, message: Message) -> Inbound {
        match message {
            Message::Text(text) => {
                self.transcript.record_received(text, false);
                Inbound::Data
            }
            Message::Binary(bytes) => {
                let payload = String::from_utf8_lossy(&bytes).into_owned();
                self.transcript.record_received(payload, true);
                Inbound::Data
            }
            Message::Close(frame) => {
                debug!("Close frame received: {frame:?}");
                self.close = frame.map(CloseInfo::from);
                Inbound::Close
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Inbound::Control,
        }
    }
}

/// Flush our reply to a close frame the peer sent.
async fn finish_close(ws: &mut WsStream) {
    if let Err(e) = ws.close(None).await {
        debug!("Close reply not delivered: {e}");
    }
}

fn dropped_without_close() -> ProbeError {
    ProbeError::ConnectionDropped("connection closed without a close frame".to_string())
}

/// Days until the peer certificate expires, negative when already expired.
fn cert_validity_days(tls_stream: &TlsStream<TcpStream>) -> Option<i64> {
    let cert = tls_stream.get_ref().peer_certificate().ok().flatten()?;
    let cert_der = cert.to_der().ok()?;
    let (_, parsed) = parse_x509_certificate(&cert_der).ok()?;

    let not_after = parsed.validity().not_after.timestamp();
    Some((not_after - Utc::now().timestamp()) / 86400)
}
