pub mod access;
pub mod aggregation;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod fetcher;
pub mod onboarding;
pub mod persister;
pub mod realtime;
pub mod store;
pub mod types;

pub use access::{evaluate, WalletAccess};
pub use cli::Cli;
pub use config::Config;
pub use database::{init_database, DbPool};
pub use error::DashboardError;
pub use fetcher::{FeedFetcher, HttpFeedFetcher};
pub use onboarding::run_onboarding_checks;
pub use persister::MetricsPersister;
pub use realtime::{RealTimeMethod, StrategyContext, StrategyFactory, StrategyTuning};
pub use store::ExchangeStore;
pub use types::Feed;
