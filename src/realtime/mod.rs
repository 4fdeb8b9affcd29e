//! Real-time update strategies.
//!
//! Four interchangeable transports feed the shared store: basic polling,
//! adaptive polling, SSE push-streaming, and a bidirectional socket. The
//! factory owns at most one live strategy; switching tears the previous one
//! down before the next starts, so two strategies can never race on the
//! same feed.

pub mod adaptive;
pub mod poller;
pub mod sse;
pub mod websocket;

use crate::config::Config;
use crate::fetcher::FeedFetcher;
use crate::persister::MetricsPersister;
use crate::store::ExchangeStore;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

/// Which transport populates the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealTimeMethod {
    Polling,
    AdaptivePolling,
    Sse,
    WebSocket,
}

impl fmt::Display for RealTimeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RealTimeMethod::Polling => "polling",
            RealTimeMethod::AdaptivePolling => "adaptive-polling",
            RealTimeMethod::Sse => "sse",
            RealTimeMethod::WebSocket => "websocket",
        };
        f.write_str(name)
    }
}

impl FromStr for RealTimeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "polling" => Ok(RealTimeMethod::Polling),
            "adaptive-polling" | "adaptive" | "optimized-polling" => {
                Ok(RealTimeMethod::AdaptivePolling)
            }
            "sse" => Ok(RealTimeMethod::Sse),
            "websocket" | "ws" => Ok(RealTimeMethod::WebSocket),
            other => Err(format!("unknown real-time method: {other}")),
        }
    }
}

/// Connection lifecycle of the streaming strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Reconnecting(u32),
    /// Reconnect attempts exhausted; only a manual restart recovers
    Lost,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Lost)
    }
}

/// Exponential reconnect delay: base * 2^attempt, capped
pub fn reconnect_delay(base: Duration, attempt: u32, cap: Duration) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(cap).min(cap)
}

/// Bounded reconnect accounting shared by the streaming strategies.
///
/// Each failure consumes one attempt and yields the backoff delay; once the
/// budget is spent, `next_delay` returns None and the caller transitions to
/// `ConnectionState::Lost`. A successful (re)connection restores the budget.
#[derive(Debug)]
pub struct ReconnectPolicy {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
            attempts: 0,
        }
    }

    /// Register a failure; the delay before the next attempt, or None when
    /// the attempt budget is exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        let delay = reconnect_delay(self.base, self.attempts, self.cap);
        self.attempts += 1;
        Some(delay)
    }

    /// Attempts consumed so far
    pub fn attempt(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// Observable status shared by every strategy, regardless of transport
#[derive(Debug, Clone, Default)]
pub struct StrategyStatus {
    pub is_loading: bool,
    pub is_connected: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub current_interval: Option<Duration>,
    pub connection: ConnectionState,
}

/// Cheap handle to a running strategy's status
#[derive(Clone, Default)]
pub struct StatusHandle {
    inner: Arc<RwLock<StrategyStatus>>,
}

impl StatusHandle {
    pub async fn snapshot(&self) -> StrategyStatus {
        self.inner.read().await.clone()
    }

    pub(crate) async fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut StrategyStatus),
    {
        f(&mut *self.inner.write().await);
    }
}

/// Tuning knobs shared by the strategies, lifted out of the full Config
#[derive(Debug, Clone)]
pub struct StrategyTuning {
    pub base_interval: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub sse_url: String,
    pub ws_url: String,
}

impl StrategyTuning {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_interval: Duration::from_millis(config.base_interval_ms),
            min_interval: Duration::from_millis(config.min_interval_ms),
            max_interval: Duration::from_millis(config.max_interval_ms),
            sse_url: config.sse_url.clone(),
            ws_url: config.ws_url.clone(),
        }
    }
}

/// Everything a strategy needs, injected rather than reached for globally
#[derive(Clone)]
pub struct StrategyContext {
    pub store: ExchangeStore,
    pub fetcher: Arc<dyn FeedFetcher>,
    pub persister: MetricsPersister,
    pub tuning: StrategyTuning,
}

/// A live strategy task plus the means to observe and stop it
pub struct RunningStrategy {
    method: RealTimeMethod,
    status: StatusHandle,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RunningStrategy {
    pub fn method(&self) -> RealTimeMethod {
        self.method
    }

    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Signal shutdown and wait for the task to release its timers and
    /// transport. Strategy loops observe the signal at every suspension
    /// point, so this resolves promptly.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Owns at most one live strategy per process.
///
/// Switching methods (or restarting after a capability change) always tears
/// the previous strategy down first, so a replaced strategy can never keep
/// mutating the store from a leaked timer.
pub struct StrategyFactory {
    ctx: StrategyContext,
    live: Option<RunningStrategy>,
}

impl StrategyFactory {
    pub fn new(ctx: StrategyContext) -> Self {
        Self { ctx, live: None }
    }

    pub fn live(&self) -> Option<&RunningStrategy> {
        self.live.as_ref()
    }

    /// Stop whatever is running and start the requested method
    pub async fn switch(&mut self, method: RealTimeMethod) -> StatusHandle {
        if let Some(previous) = self.live.take() {
            previous.stop().await;
        }

        let status = StatusHandle::default();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = self.ctx.clone();
        let task_status = status.clone();

        let task = match method {
            RealTimeMethod::Polling => {
                tokio::spawn(poller::run(ctx, task_status, shutdown_rx))
            }
            RealTimeMethod::AdaptivePolling => {
                tokio::spawn(adaptive::run(ctx, task_status, shutdown_rx))
            }
            RealTimeMethod::Sse => tokio::spawn(sse::run(ctx, task_status, shutdown_rx)),
            RealTimeMethod::WebSocket => {
                tokio::spawn(websocket::run(ctx, task_status, shutdown_rx))
            }
        };

        tracing::info!("Started {} update strategy", method);
        self.live = Some(RunningStrategy {
            method,
            status: status.clone(),
            shutdown: shutdown_tx,
            task,
        });
        status
    }

    /// Re-spawn the current method, e.g. after the wallet capability changed
    pub async fn restart(&mut self) -> Option<StatusHandle> {
        let method = self.live.as_ref()?.method();
        Some(self.switch(method).await)
    }

    pub async fn stop(&mut self) {
        if let Some(live) = self.live.take() {
            live.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parsing_accepts_known_aliases() {
        assert_eq!(
            "optimized-polling".parse::<RealTimeMethod>().unwrap(),
            RealTimeMethod::AdaptivePolling
        );
        assert_eq!("ws".parse::<RealTimeMethod>().unwrap(), RealTimeMethod::WebSocket);
        assert!("carrier-pigeon".parse::<RealTimeMethod>().is_err());
    }

    #[test]
    fn reconnect_delay_doubles_until_the_cap() {
        let base = Duration::from_secs(3);
        let cap = Duration::from_secs(30);

        assert_eq!(reconnect_delay(base, 0, cap), Duration::from_secs(3));
        assert_eq!(reconnect_delay(base, 1, cap), Duration::from_secs(6));
        assert_eq!(reconnect_delay(base, 2, cap), Duration::from_secs(12));
        assert_eq!(reconnect_delay(base, 3, cap), Duration::from_secs(24));
        assert_eq!(reconnect_delay(base, 4, cap), cap);
        assert_eq!(reconnect_delay(base, 30, cap), cap);
    }

    #[test]
    fn exhausted_reconnect_budget_is_terminal() {
        let mut policy =
            ReconnectPolicy::new(Duration::from_secs(3), Duration::from_secs(30), 10);

        // Ten failures each yield a delay and consume one attempt.
        for n in 1..=10u32 {
            assert!(policy.next_delay().is_some());
            assert_eq!(policy.attempt(), n);
        }

        // The eleventh failure gets no delay: nothing further is scheduled.
        assert_eq!(policy.next_delay(), None);
        assert_eq!(policy.next_delay(), None);
        assert_eq!(policy.attempt(), 10);
    }

    #[test]
    fn reconnect_delays_follow_the_capped_doubling() {
        let mut policy =
            ReconnectPolicy::new(Duration::from_secs(3), Duration::from_secs(30), 10);

        assert_eq!(policy.next_delay(), Some(Duration::from_secs(3)));
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(6)));
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(12)));
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(24)));
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(30)));
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn successful_connection_restores_the_budget() {
        let mut policy =
            ReconnectPolicy::new(Duration::from_secs(1), Duration::from_secs(30), 5);

        for _ in 0..5 {
            policy.next_delay();
        }
        assert_eq!(policy.next_delay(), None);

        policy.reset();
        assert_eq!(policy.attempt(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn lost_is_the_only_terminal_state() {
        assert!(ConnectionState::Lost.is_terminal());
        assert!(!ConnectionState::Reconnecting(9).is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
        assert!(!ConnectionState::Idle.is_terminal());
    }
}
