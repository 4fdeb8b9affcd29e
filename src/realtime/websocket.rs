use super::{ConnectionState, ReconnectPolicy, StatusHandle, StrategyContext};
use crate::access::WalletAccess;
use crate::error::DashboardError;
use crate::types::{ExchangeSnapshot, Feed};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_CAP: Duration = Duration::from_secs(30);
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

const ACCESS_POLL: Duration = Duration::from_secs(1);

enum SessionEnd {
    Shutdown,
    CapabilityChanged,
    TransportError(String),
}

/// WebSocket subscriber: after the transport opens, the client announces its
/// wallet capability and the server pushes only the granted feeds. Pings are
/// answered in-band; a closed or failed socket reconnects with exponential
/// backoff until the attempt budget runs out.
pub(crate) async fn run(
    ctx: StrategyContext,
    status: StatusHandle,
    mut shutdown: watch::Receiver<bool>,
) {
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

        let end = match connect_async(&ctx.tuning.ws_url).await {
            Ok((socket, _)) => {
                policy.reset();
                status
                    .update(|s| {
                        s.is_loading = false;
                        s.is_connected = true;
                        s.error = None;
                        s.connection = ConnectionState::Connected;
                    })
                    .await;
                tracing::info!("WebSocket connected");
                session(&ctx, &status, &access, socket, &mut shutdown).await
            }
            Err(e) => SessionEnd::TransportError(e.to_string()),
        };

        match end {
            SessionEnd::Shutdown => {
                tracing::debug!("WebSocket subscriber shutting down");
                return;
            }
            SessionEnd::CapabilityChanged => {
                tracing::info!("Wallet capability changed, re-announcing over a fresh socket");
                policy.reset();
                status
                    .update(|s| {
                        s.is_connected = false;
                        s.connection = ConnectionState::Connecting;
                    })
                    .await;
            }
            SessionEnd::TransportError(reason) => {
                tracing::warn!("WebSocket session failed: {}", reason);
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
                    "Reconnecting WebSocket in {:?} (attempt {}/{})",
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

async fn session<S>(
    ctx: &StrategyContext,
    status: &StatusHandle,
    subscribed: &WalletAccess,
    mut socket: S,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    // The capability announcement is the application-level handshake; a
    // server that rejects it closes the socket, which counts as a normal
    // failed attempt.
    let announce = handshake_message(subscribed);
    if let Err(e) = socket.send(Message::Text(announce)).await {
        return SessionEnd::TransportError(format!("handshake send failed: {e}"));
    }

    let mut access_check = tokio::time::interval(ACCESS_POLL);

    loop {
        tokio::select! {
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_text(ctx, status, &text).await {
                        if let Err(e) = socket.send(reply).await {
                            return SessionEnd::TransportError(e.to_string());
                        }
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = socket.send(Message::Pong(payload)).await {
                        return SessionEnd::TransportError(e.to_string());
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    return SessionEnd::TransportError("socket closed by server".into());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::TransportError(e.to_string()),
                None => return SessionEnd::TransportError("socket stream ended".into()),
            },
            _ = access_check.tick() => {
                if ctx.store.wallet_access().await != *subscribed {
                    return SessionEnd::CapabilityChanged;
                }
            }
            _ = shutdown.changed() => return SessionEnd::Shutdown,
        }
    }
}

/// Process one text frame; returns a reply frame when the protocol demands
/// one (currently only pong)
async fn handle_text(
    ctx: &StrategyContext,
    status: &StatusHandle,
    text: &str,
) -> Option<Message> {
    match serde_json::from_str::<SocketMessage>(text) {
        Ok(SocketMessage::KomData { data }) => {
            apply_snapshots(ctx, status, Feed::Kom, data).await;
            None
        }
        Ok(SocketMessage::BbaData { data }) => {
            apply_snapshots(ctx, status, Feed::Bba, data).await;
            None
        }
        Ok(SocketMessage::Ping) => {
            Some(Message::Text(pong_message()))
        }
        Ok(SocketMessage::Error { error }) => {
            tracing::warn!("WebSocket server reported: {}", error);
            status.update(|s| s.error = Some(error)).await;
            None
        }
        Ok(SocketMessage::Pong) | Ok(SocketMessage::Connected) => None,
        Ok(SocketMessage::Unknown) => {
            tracing::debug!("Ignoring unrecognized socket message");
            None
        }
        Err(e) => {
            tracing::warn!("Undecodable socket frame: {}", e);
            None
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

/// Application-level frames exchanged after the transport handshake
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SocketMessage {
    KomData {
        data: Vec<ExchangeSnapshot>,
    },
    BbaData {
        data: Vec<ExchangeSnapshot>,
    },
    Error {
        error: String,
    },
    Ping,
    Pong,
    Connected,
    #[serde(other)]
    Unknown,
}

fn handshake_message(access: &WalletAccess) -> String {
    serde_json::json!({
        "type": "wallet_access",
        "data": {
            "hasKOMAccess": access.has_kom_access,
            "hasBBAAccess": access.has_bba_access,
            "accessibleExchanges": access.accessible_feeds,
        }
    })
    .to_string()
}

fn pong_message() -> String {
    serde_json::json!({ "type": "pong" }).to_string()
}
