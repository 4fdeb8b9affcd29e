use super::{ConnectionState, ReconnectPolicy, StatusHandle, StrategyContext};
use crate::access::WalletAccess;
use crate::error::DashboardError;
use crate::types::{ExchangeSnapshot, Feed};
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::watch;

const RECONNECT_BASE: Duration = Duration::from_secs(3);
const RECONNECT_CAP: Duration = Duration::from_secs(30);
const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// How often the stream loop re-checks the wallet capability while connected
const ACCESS_POLL: Duration = Duration::from_secs(1);

/// Why a single stream session ended
enum StreamEnd {
    Shutdown,
    /// The wallet capability changed under us; the subscription query
    /// parameters are stale and the stream must be rebuilt
    CapabilityChanged,
    TransportError(String),
}

/// SSE subscriber: one long-lived GET whose query string encodes the wallet
/// capability, so the server only pushes feeds this client may see. The
/// stale-response guard in the store still backstops a race on revocation.
pub(crate) async fn run(
    ctx: StrategyContext,
    status: StatusHandle,
    mut shutdown: watch::Receiver<bool>,
) {
    let client = reqwest::Client::new();
    let mut policy = ReconnectPolicy::new(RECONNECT_BASE, RECONNECT_CAP, MAX_RECONNECT_ATTEMPTS);

    loop {
        let access = ctx.store.wallet_access().await;
        if !access.has_any() {
            status
                .update(|s| {
                    s.is_connected = false;
                    s.connection = ConnectionState::Idle;
                })
                .await;
            tokio::select! {
                _ = tokio::time::sleep(ACCESS_POLL) => continue,
                _ = shutdown.changed() => return,
            }
        }

        status
            .update(|s| {
                s.is_loading = true;
                s.connection = ConnectionState::Connecting;
            })
            .await;

        let url = subscription_url(&ctx.tuning.sse_url, &access);
        let end = match client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                policy.reset();
                status
                    .update(|s| {
                        s.is_loading = false;
                        s.is_connected = true;
                        s.error = None;
                        s.connection = ConnectionState::Connected;
                    })
                    .await;
                tracing::info!("SSE stream connected");
                stream_session(&ctx, &status, &access, response, &mut shutdown).await
            }
            Ok(response) => StreamEnd::TransportError(format!(
                "SSE endpoint returned HTTP {}",
                response.status()
            )),
            Err(e) => StreamEnd::TransportError(e.to_string()),
        };

        match end {
            StreamEnd::Shutdown => {
                tracing::debug!("SSE subscriber shutting down");
                return;
            }
            StreamEnd::CapabilityChanged => {
                tracing::info!("Wallet capability changed, resubscribing SSE stream");
                policy.reset();
                status
                    .update(|s| {
                        s.is_connected = false;
                        s.connection = ConnectionState::Connecting;
                    })
                    .await;
            }
            StreamEnd::TransportError(reason) => {
                tracing::warn!("SSE stream failed: {}", reason);
                let Some(delay) = policy.next_delay() else {
                    let err = DashboardError::ConnectionLost {
                        attempts: policy.attempt(),
                    };
                    status
                        .update(|s| {
                            s.is_loading = false;
                            s.is_connected = false;
                            s.error = Some(err.to_string());
                            s.connection = ConnectionState::Lost;
                        })
                        .await;
                    tracing::error!("{}", err);
                    return;
                };

                let attempt = policy.attempt();
                status
                    .update(|s| {
                        s.is_loading = false;
                        s.is_connected = false;
                        s.error = Some(DashboardError::Stream(reason.clone()).to_string());
                        s.connection = ConnectionState::Reconnecting(attempt);
                    })
                    .await;
                tracing::info!(
                    "Reconnecting SSE in {:?} (attempt {}/{})",
                    delay,
                    attempt,
                    MAX_RECONNECT_ATTEMPTS
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => return,
                }
            }
        }
    }
}

/// Consume one connected stream until it ends for any reason
async fn stream_session(
    ctx: &StrategyContext,
    status: &StatusHandle,
    subscribed: &WalletAccess,
    response: reqwest::Response,
    shutdown: &mut watch::Receiver<bool>,
) -> StreamEnd {
    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::default();
    let mut access_check = tokio::time::interval(ACCESS_POLL);

    loop {
        tokio::select! {
            chunk = body.next() => match chunk {
                Some(Ok(bytes)) => {
                    for event in decoder.push(&bytes) {
                        handle_event(ctx, status, event).await;
                    }
                }
                Some(Err(e)) => return StreamEnd::TransportError(e.to_string()),
                None => return StreamEnd::TransportError("stream closed by server".into()),
            },
            _ = access_check.tick() => {
                if ctx.store.wallet_access().await != *subscribed {
                    return StreamEnd::CapabilityChanged;
                }
            }
            _ = shutdown.changed() => return StreamEnd::Shutdown,
        }
    }
}

async fn handle_event(ctx: &StrategyContext, status: &StatusHandle, event: SseEvent) {
    match event.name.as_str() {
        "kom_data" => apply_payload(ctx, status, Feed::Kom, &event.data).await,
        "bba_data" => apply_payload(ctx, status, Feed::Bba, &event.data).await,
        // Servers that multiplex everything over the default event wrap the
        // payload in an envelope instead of naming the event.
        "message" => match serde_json::from_str::<Envelope>(&event.data) {
            Ok(envelope) => match envelope_feed(&envelope.kind) {
                Some(feed) => {
                    apply_snapshots(ctx, status, feed, envelope.payload).await;
                }
                None => tracing::debug!("Ignoring SSE envelope type {}", envelope.kind),
            },
            Err(e) => tracing::warn!("Undecodable SSE envelope: {}", e),
        },
        "error" => {
            tracing::warn!("SSE server reported: {}", event.data);
            status.update(|s| s.error = Some(event.data)).await;
        }
        // Keepalives and the initial handshake carry no data.
        "connected" | "ping" => {}
        other => tracing::debug!("Ignoring SSE event {}", other),
    }
}

async fn apply_payload(ctx: &StrategyContext, status: &StatusHandle, feed: Feed, data: &str) {
    match serde_json::from_str::<Vec<ExchangeSnapshot>>(data) {
        Ok(snapshots) => apply_snapshots(ctx, status, feed, snapshots).await,
        Err(e) => {
            let err = DashboardError::malformed(feed, e.to_string());
            tracing::warn!("{}", err);
            status.update(|s| s.error = Some(err.to_string())).await;
        }
    }
}

async fn apply_snapshots(
    ctx: &StrategyContext,
    status: &StatusHandle,
    feed: Feed,
    snapshots: Vec<ExchangeSnapshot>,
) {
    if ctx.store.apply_snapshots(feed, snapshots.clone()).await {
        ctx.persister.persist_best_effort(&snapshots).await;
        status.update(|s| s.last_update = Some(Utc::now())).await;
    }
}

/// Envelope used on the default `message` event:
/// `{"type": "kom_data", "payload": [...]}`
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Vec<ExchangeSnapshot>,
}

/// The envelope `type` carries the event names from the named-event wire
/// format; bare feed names are tolerated as well.
fn envelope_feed(kind: &str) -> Option<Feed> {
    match kind {
        "kom_data" => Some(Feed::Kom),
        "bba_data" => Some(Feed::Bba),
        other => other.parse().ok(),
    }
}

/// The subscription advertises the wallet capability so the server can
/// filter push traffic per client
fn subscription_url(base: &str, access: &WalletAccess) -> String {
    format!(
        "{}?hasKOMAccess={}&hasBBAAccess={}",
        base, access.has_kom_access, access.has_bba_access
    )
}

/// A fully assembled server-sent event
#[derive(Debug, PartialEq)]
pub struct SseEvent {
    /// Defaults to `message` when the frame carries no `event:` line
    pub name: String,
    pub data: String,
}

/// Incremental SSE frame decoder.
///
/// Chunks from the transport can split frames (and even UTF-8 sequences)
/// anywhere, so the decoder buffers bytes and only emits an event once the
/// blank separator line arrives.
#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event_name: Option<String>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    /// Feed raw transport bytes; returns every event completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
            } else if let Some(name) = line.strip_prefix("event:") {
                self.event_name = Some(name.trim_start().to_string());
            } else if let Some(data) = line.strip_prefix("data:") {
                self.data_lines.push(data.trim_start().to_string());
            } else if line.starts_with(':') {
                // Comment line, used by servers as a keepalive.
            } else {
                tracing::debug!("Ignoring malformed SSE line: {}", line);
            }
        }

        events
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data_lines.is_empty() && self.event_name.is_none() {
            return None;
        }
        let name = self.event_name.take().unwrap_or_else(|| "message".into());
        let data = std::mem::take(&mut self.data_lines).join("\n");
        Some(SseEvent { name, data })
    }
}
