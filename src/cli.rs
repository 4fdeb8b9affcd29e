use crate::access;
use crate::aggregation;
use crate::config::Config;
use crate::error::DashboardError;
use crate::persister::MetricsPersister;
use crate::realtime::{ConnectionState, RealTimeMethod, StrategyFactory};
use crate::store::ExchangeStore;
use crate::types::Feed;
use anyhow::Result;
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::{DefaultEditor, Result as RustylineResult};

/// CLI REPL for driving the dashboard core
pub struct Cli {
    editor: DefaultEditor,
    config: Config,
    store: ExchangeStore,
    persister: MetricsPersister,
    factory: StrategyFactory,
}

impl Cli {
    pub fn new(
        config: Config,
        store: ExchangeStore,
        persister: MetricsPersister,
        factory: StrategyFactory,
    ) -> RustylineResult<Self> {
        let editor = DefaultEditor::new()?;
        Ok(Self {
            editor,
            config,
            store,
            persister,
            factory,
        })
    }

    /// Run the interactive REPL loop
    pub async fn run(&mut self) -> Result<()> {
        self.print_welcome();

        loop {
            let readline = self
                .editor
                .readline(&format!("{} ", "dashboard>".cyan().bold()));

            match readline {
                Ok(line) => {
                    let line = line.trim();

                    if line.is_empty() {
                        continue;
                    }

                    let _ = self.editor.add_history_entry(line);

                    if !self.process_command(line).await {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("{}  Use {} to exit", "^C".yellow(), "/exit".cyan());
                }
                Err(ReadlineError::Eof) => {
                    println!("Exiting...");
                    break;
                }
                Err(err) => {
                    eprintln!("Error: {:?}", err);
                    break;
                }
            }
        }

        self.factory.stop().await;
        Ok(())
    }

    /// Returns false when the REPL should exit
    async fn process_command(&mut self, line: &str) -> bool {
        let mut parts = line.split_whitespace();
        let cmd = parts.next().unwrap_or_default();
        let arg = parts.next();

        match cmd {
            "/help" => self.cmd_help(),
            "/connect" => self.cmd_connect(arg).await,
            "/disconnect" => self.cmd_disconnect().await,
            "/access" => self.cmd_access().await,
            "/feed" => self.cmd_feed(arg).await,
            "/exchange" => self.cmd_exchange(arg).await,
            "/method" => self.cmd_method(arg).await,
            "/status" => self.cmd_status().await,
            "/data" => self.cmd_data().await,
            "/overview" => self.cmd_overview().await,
            "/changes" => self.cmd_changes().await,
            "/exit" | "/quit" => {
                println!("Shutting down...");
                return false;
            }
            _ => {
                println!(
                    "{} Unknown command. Type {} for help.",
                    "⚠".yellow(),
                    "/help".cyan()
                );
            }
        }

        true
    }

    fn print_welcome(&self) {
        println!();
        println!("{}", "=".repeat(60).bright_cyan());
        println!(
            "{}",
            "  Market-Making Dashboard - Ready".bright_cyan().bold()
        );
        println!("{}", "=".repeat(60).bright_cyan());
        println!();
        println!("Type {} for available commands.", "/help".cyan());
        println!(
            "Connect a wallet with {} to start receiving data.",
            "/connect <address>".cyan()
        );
        println!();
    }

    fn cmd_help(&self) {
        println!();
        println!("{}", "Available Commands:".green().bold());
        println!();
        println!("{}", "Session Commands:".yellow());
        println!("  {}  - Connect a wallet address", "/connect <address>".cyan());
        println!("  {}  - Disconnect the current wallet", "/disconnect".cyan());
        println!("  {}  - Show the evaluated feed access", "/access".cyan());
        println!();
        println!("{}", "View Commands:".yellow());
        println!("  {}  - Select the active feed", "/feed <kom|bba>".cyan());
        println!("  {}  - Select one exchange within the feed", "/exchange <name>".cyan());
        println!("  {}  - Current snapshots of the selected feed", "/data".cyan());
        println!("  {}  - Cross-exchange aggregate of the feed", "/overview".cyan());
        println!("  {}  - 24h deltas for the selected exchange", "/changes".cyan());
        println!();
        println!("{}", "Strategy Commands:".yellow());
        println!(
            "  {}  - Switch the update transport",
            "/method <polling|adaptive|sse|websocket>".cyan()
        );
        println!("  {}  - Live strategy status", "/status".cyan());
        println!("  {}  - Exit", "/exit".cyan());
        println!();
    }

    async fn cmd_connect(&mut self, arg: Option<&str>) {
        let Some(address) = arg else {
            println!("Usage: {}", "/connect <address>".cyan());
            return;
        };

        let evaluated = access::evaluate(Some(address), &self.config);
        let granted = evaluated.accessible_feeds.clone();
        self.store.set_wallet_access(evaluated).await;

        println!();
        if granted.is_empty() {
            let err = DashboardError::AccessDenied {
                wallet: address.to_string(),
            };
            println!("{} {}", "⚠".yellow(), err.to_string().yellow());
        } else {
            let names: Vec<&str> = granted.iter().map(Feed::as_str).collect();
            println!(
                "{} Connected {} with access to: {}",
                "✓".green(),
                address.cyan(),
                names.join(", ").green()
            );
        }
        println!();

        // The streaming strategies advertise the capability at subscribe
        // time, so a changed wallet warrants a fresh subscription.
        if self.factory.live().is_some() {
            self.factory.restart().await;
        } else {
            self.factory.switch(self.config.method).await;
        }
    }

    async fn cmd_disconnect(&mut self) {
        self.store
            .set_wallet_access(access::evaluate(None, &self.config))
            .await;
        self.factory.stop().await;
        println!();
        println!("{}", "Wallet disconnected - all feed data cleared.".yellow());
        println!();
    }

    async fn cmd_access(&self) {
        let access = self.store.wallet_access().await;
        println!();
        println!("{}", "Wallet Access:".green().bold());
        match &access.current_wallet {
            Some(wallet) => println!("  Wallet: {}", wallet.cyan()),
            None => println!("  Wallet: {}", "not connected".yellow()),
        }
        println!("  KOM feed: {}", yes_no(access.has_kom_access));
        println!("  BBA feed: {}", yes_no(access.has_bba_access));
        println!();
    }

    async fn cmd_feed(&self, arg: Option<&str>) {
        let Some(feed) = arg.and_then(|a| a.parse::<Feed>().ok()) else {
            println!("Usage: {}", "/feed <kom|bba>".cyan());
            return;
        };

        if self.store.set_selected_feed(Some(feed)).await {
            println!("Selected feed: {}", feed.as_str().green());
        } else {
            println!(
                "{} Your wallet has no access to the {} feed.",
                "⚠".yellow(),
                feed
            );
        }
    }

    async fn cmd_exchange(&self, arg: Option<&str>) {
        let Some(exchange) = arg else {
            println!("Usage: {}", "/exchange <name>".cyan());
            return;
        };
        self.store
            .set_selected_exchange(Some(exchange.to_string()))
            .await;
        println!("Selected exchange: {}", exchange.green());
    }

    async fn cmd_method(&mut self, arg: Option<&str>) {
        let Some(method) = arg.and_then(|a| a.parse::<RealTimeMethod>().ok()) else {
            println!(
                "Usage: {}",
                "/method <polling|adaptive|sse|websocket>".cyan()
            );
            return;
        };

        self.factory.switch(method).await;
        println!("Update strategy: {}", method.to_string().green());
    }

    async fn cmd_status(&self) {
        println!();
        let Some(live) = self.factory.live() else {
            println!("{}", "No update strategy running.".yellow());
            println!();
            return;
        };

        let status = live.status().snapshot().await;
        println!("{}", "Strategy Status:".green().bold());
        println!("  Method: {}", live.method().to_string().cyan());
        println!(
            "  Connection: {}",
            match status.connection {
                ConnectionState::Idle => "idle".yellow().to_string(),
                ConnectionState::Connecting => "connecting".yellow().to_string(),
                ConnectionState::Connected => "connected".green().to_string(),
                ConnectionState::Reconnecting(n) =>
                    format!("reconnecting (attempt {n})").yellow().to_string(),
                ConnectionState::Lost => "lost".red().bold().to_string(),
            }
        );
        if let Some(interval) = status.current_interval {
            println!("  Interval: {:?}", interval);
        }
        match status.last_update {
            Some(at) => println!("  Last update: {}", at.format("%H:%M:%S UTC")),
            None => println!("  Last update: {}", "never".yellow()),
        }
        if let Some(error) = status.error {
            println!("  Last error: {}", error.red());
        }
        println!();
    }

    async fn cmd_data(&self) {
        println!();
        let snapshots = self.store.current_snapshots().await;
        if snapshots.is_empty() {
            println!("{}", "No data for the selected feed yet.".yellow());
            println!();
            return;
        }

        println!("{} ({} exchanges)", "Feed Data:".green().bold(), snapshots.len());
        for s in snapshots {
            println!(
                "  {} | {} | price {:.6} | vol {:.2} | balance ${:.2}",
                s.exchange.cyan(),
                s.pair.yellow(),
                s.internal_pricing,
                s.generated_volume,
                s.balance_usdt
            );
        }
        println!();
    }

    async fn cmd_overview(&self) {
        println!();
        let Some(data) = self.store.overview().await else {
            println!("{}", "No data to aggregate yet.".yellow());
            println!();
            return;
        };

        println!(
            "{} ({} exchanges)",
            "Overview:".green().bold(),
            data.exchange_count
        );
        println!("  Exchanges: {}", data.exchanges.join(", ").cyan());
        println!("  Total USDT balance: ${:.2}", data.total_usdt_balance);
        println!("  Total token balance: {:.2}", data.total_token_balance);
        println!("  Total generated volume: {:.2}", data.total_generated_volume);
        println!("  Total estimated fee: ${:.2}", data.total_estimated_fee);
        println!("  Avg price: {:.6}", data.avg_internal_pricing);
        println!("  Avg spread: {:.4}", data.avg_spread);
        println!(
            "  Avg MM depth +2%/-2%: {:.2} / {:.2}",
            data.avg_mm_depth_plus_2, data.avg_mm_depth_minus_2
        );
        println!(
            "  Avg organic depth +2%/-2%: {:.2} / {:.2}",
            data.avg_organic_depth_plus_2, data.avg_organic_depth_minus_2
        );
        println!();
    }

    async fn cmd_changes(&self) {
        println!();
        let Some(snapshot) = self.store.selected_snapshot().await else {
            println!("{}", "No exchange selected (or no data yet).".yellow());
            println!();
            return;
        };

        let rows = match self
            .persister
            .history(&snapshot.exchange, &snapshot.pair, self.config.history_hours)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                eprintln!("{} {}", "Error reading history:".red(), e);
                return;
            }
        };

        match aggregation::percentage_changes(&rows) {
            Some(changes) => {
                println!(
                    "{} {} / {}",
                    "24h Changes:".green().bold(),
                    snapshot.exchange.cyan(),
                    snapshot.pair.yellow()
                );
                println!("  Price: {}", signed_pct(changes.price_change));
                println!("  Volume: {}", signed_pct(changes.volume_change));
                println!("  MM depth +2%: {}", signed_pct(changes.mm_depth_plus_change));
                println!("  MM depth -2%: {}", signed_pct(changes.mm_depth_minus_change));
                println!(
                    "  Organic depth +2%: {}",
                    signed_pct(changes.organic_depth_plus_change)
                );
                println!(
                    "  Organic depth -2%: {}",
                    signed_pct(changes.organic_depth_minus_change)
                );
            }
            None => println!(
                "{}",
                "Not enough history yet - need at least two samples in the window.".yellow()
            ),
        }
        println!();
    }
}

fn yes_no(granted: bool) -> ColoredString {
    if granted {
        "granted".green()
    } else {
        "denied".red()
    }
}

fn signed_pct(value: f64) -> ColoredString {
    let text = format!("{value:+.2}%");
    if value >= 0.0 {
        text.green()
    } else {
        text.red()
    }
}
