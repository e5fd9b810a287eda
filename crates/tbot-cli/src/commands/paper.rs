//! `tbot paper-run`: the full stack against the in-process paper broker.
//!
//! # Design
//!
//! The gateway, bots and recorders are the production ones; only the
//! transport is simulated. The paper broker never moves prices by itself, so
//! this command drives each symbol's quote from the broker's book:
//!
//! | held position | quote driven to               | effect                    |
//! |---------------|-------------------------------|---------------------------|
//! | flat          | `base`                        | the bot's entry fills     |
//! | long          | the resting take-profit limit | the take-profit fills     |
//!
//! The stop-loss leg never triggers because the quote never drops below the
//! entry. The run ends when every bot has completed `cycles` round trips,
//! on Ctrl-C, or when the timeout expires.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use parking_lot::Mutex;
use tbot_bot::{
    BaseBot, BotSettings, DollarValueWithRisk, ManagedBot, NasdaqRegularHours, NotCloseToDailyHigh,
    Quantity, RoundTripBot, RoundTripStats, StartBots,
};
use tbot_broker_paper::{PaperBroker, PaperSettings, PaperTransport, DEFAULT_ACCOUNT};
use tbot_config::{resolve_secrets, AppConfig, BotConfig};
use tbot_gateway::{BrokerGateway, ConnectionHandler, Contract, OrderStatus, OrderType, Side};
use tbot_recorder::{MarketRecorder, RecorderSettings, CHANNEL_CAPACITY};
use tracing::{error, info, warn};

const QUOTE_STEP: Duration = Duration::from_millis(25);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PaperRunArgs {
    pub config_paths: Vec<String>,
    pub fill_price: Option<f64>,
    pub cycles: usize,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Interrupted,
    TimedOut,
}

impl RunOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Interrupted => "interrupted",
            RunOutcome::TimedOut => "timed_out",
        }
    }
}

pub struct BotReport {
    pub name: String,
    pub cycles: usize,
    pub realized_pnl: f64,
}

pub struct RecordingReport {
    pub path: PathBuf,
    pub lines: u64,
}

pub struct PaperRunSummary {
    pub config_hash: String,
    pub outcome: RunOutcome,
    pub bots: Vec<BotReport>,
    pub recordings: Vec<RecordingReport>,
}

// ---------------------------------------------------------------------------
// Connection observer
// ---------------------------------------------------------------------------

/// Logs connection events. Broker messages are also recorded in every open
/// market log.
#[derive(Default)]
struct CliConnection {
    recorders: Mutex<Vec<Arc<MarketRecorder>>>,
}

impl CliConnection {
    fn attach(&self, recorder: Arc<MarketRecorder>) {
        self.recorders.lock().push(recorder);
    }
}

impl ConnectionHandler for CliConnection {
    fn connected(&self) {
        info!("gateway connected");
    }

    fn disconnected(&self) {
        info!("gateway disconnected");
    }

    fn account_list(&self, accounts: &[String]) {
        info!(accounts = accounts.len(), "managed accounts received");
    }

    fn error(&self, error: &str) {
        error!(%error, "transport error");
    }

    fn message(&self, id: i32, code: i32, message: &str) {
        warn!(id, code, %message, "broker message");
        for recorder in self.recorders.lock().iter() {
            recorder.error(id, code, message);
        }
    }

    fn show(&self, text: &str) {
        info!(%text, "broker notice");
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

struct RunningBot {
    symbol: String,
    bot: Arc<BaseBot<RoundTripBot>>,
    stats: Arc<RoundTripStats>,
}

fn contract_for(cfg: &BotConfig) -> Contract {
    let contract = Contract::stock(cfg.symbol.as_str(), cfg.exchange.as_str(), cfg.currency.as_str());
    match &cfg.primary_exchange {
        Some(primary) => contract.with_primary_exchange(primary.as_str()),
        None => contract,
    }
}

fn build_bot(cfg: &BotConfig, cycles: usize) -> RunningBot {
    let quantity = match cfg.quantity {
        Some(q) => Quantity::Fixed(q),
        None => Quantity::Sized(Box::new(DollarValueWithRisk::new(
            cfg.max_dollar_amount,
            cfg.max_risk_dollar_amount,
        ))),
    };

    let mut rt = RoundTripBot::new(quantity, cfg.profit_target, cfg.stop_distance).with_max_cycles(cycles);
    if cfg.enforce_regular_hours {
        rt = rt.with_filter(Box::new(NasdaqRegularHours::new(cfg.end_offset_minutes)));
    }
    if let Some(delta) = cfg.daily_high_delta {
        rt = rt.with_filter(Box::new(NotCloseToDailyHigh::new(delta)));
    }
    let stats = rt.stats();

    let mut settings = BotSettings::new(format!("{}-rt", cfg.symbol), contract_for(cfg));
    settings.min_tick = cfg.min_tick;
    settings.tick_interval = Duration::from_millis(cfg.tick_interval_ms);

    RunningBot {
        symbol: cfg.symbol.clone(),
        bot: Arc::new(BaseBot::new(settings, rt)),
        stats,
    }
}

fn recorder_settings(app: &AppConfig) -> RecorderSettings {
    RecorderSettings {
        dir: PathBuf::from(&app.recorder.dir),
        deep_book: app.recorder.deep_book,
        depth_exchange: app.recorder.depth_exchange.clone(),
        channel_capacity: CHANNEL_CAPACITY,
    }
}

async fn wait_connected(gateway: &BrokerGateway) -> Result<()> {
    let deadline = tokio::time::Instant::now() + CONNECT_TIMEOUT;
    while !gateway.is_connected() {
        if tokio::time::Instant::now() >= deadline {
            bail!("paper gateway did not become ready within {CONNECT_TIMEOUT:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

/// Highest working sell limit for `symbol`: the take-profit leg.
fn take_profit_price(broker: &PaperBroker, symbol: &str) -> Option<f64> {
    broker
        .orders()
        .iter()
        .filter(|o| o.contract.symbol == symbol)
        .filter(|o| matches!(o.status, OrderStatus::PreSubmitted | OrderStatus::Submitted))
        .filter(|o| o.order.side == Side::Sell && o.order.order_type == OrderType::Limit)
        .filter_map(|o| o.order.limit_price)
        .reduce(f64::max)
}

/// Moves each symbol's quote to where its held position needs it. Targets
/// are read under the book lock and applied after it is released.
fn drive_quotes(transport: &PaperTransport, bots: &[RunningBot], base: f64, driven: &mut HashMap<String, f64>) {
    let targets: Vec<(&str, Option<f64>)> = transport.with_broker(|b| {
        let positions = b.positions();
        bots.iter()
            .map(|rb| {
                let held = positions.get(&rb.symbol).copied().unwrap_or(0);
                let quote = if held > 0 {
                    take_profit_price(b, &rb.symbol)
                } else {
                    Some(base)
                };
                (rb.symbol.as_str(), quote)
            })
            .collect()
    });

    for (symbol, quote) in targets {
        // Long without exit legs yet: hold the quote.
        let Some(quote) = quote else { continue };
        if driven.get(symbol) != Some(&quote) {
            driven.insert(symbol.to_string(), quote);
            transport.set_quote(symbol, quote);
        }
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

pub async fn run(args: PaperRunArgs) -> Result<PaperRunSummary> {
    if args.cycles == 0 {
        bail!("--cycles must be at least 1");
    }

    let (loaded, app) = super::load_app(&args.config_paths)?;
    info!(config_hash = %loaded.config_hash, bots = app.bots.len(), "config loaded");
    if app.bots.is_empty() {
        bail!("paper-run: no bots configured (add entries under `bots:`)");
    }

    let base = args
        .fill_price
        .or(app.paper.fill_price)
        .ok_or_else(|| anyhow!("paper-run needs a starting price: set paper.fill_price or pass --fill-price"))?;
    if base <= 0.0 {
        bail!("--fill-price must be positive");
    }

    let secrets = resolve_secrets(&app, false, |k| std::env::var(k).ok())?;
    let transport = Arc::new(PaperTransport::new(PaperSettings {
        account: secrets.account.clone().unwrap_or_else(|| DEFAULT_ACCOUNT.to_string()),
        default_price: Some(base),
        commission_per_share: app.paper.commission_per_share,
        ..PaperSettings::default()
    }));

    let connection = Arc::new(CliConnection::default());
    let gateway = BrokerGateway::new(transport.clone(), connection.clone());
    gateway
        .connect(&app.connection.host, app.connection.port, app.connection.client_id)
        .context("paper connect failed")?;
    wait_connected(&gateway).await?;

    let bots: Vec<RunningBot> = app.bots.iter().map(|cfg| build_bot(cfg, args.cycles)).collect();

    let mut recorders = Vec::new();
    if app.recorder.enabled {
        for rb in &bots {
            let recorder = Arc::new(MarketRecorder::new(
                rb.bot.contract().clone(),
                recorder_settings(&app),
            ));
            recorder
                .start(&gateway)
                .with_context(|| format!("recorder for {} failed to start", rb.symbol))?;
            connection.attach(Arc::clone(&recorder));
            recorders.push(recorder);
        }
    }

    let start = StartBots::new(
        bots.iter()
            .map(|rb| Arc::clone(&rb.bot) as Arc<dyn ManagedBot>)
            .collect(),
    );
    start.execute(&gateway).context("bots failed to start")?;

    let outcome = drive(&transport, &bots, base, args.cycles, args.timeout).await;
    info!(outcome = outcome.as_str(), "paper run finished");

    // Bot and recorder shutdown join their threads.
    let recordings = tokio::task::block_in_place(|| {
        start.shutdown();
        if outcome != RunOutcome::Completed {
            gateway.cancel_all_orders();
        }
        let recordings: Vec<RecordingReport> = recorders
            .iter()
            .filter_map(|r| {
                let path = r.path()?;
                let lines = r.stop(&gateway)?;
                Some(RecordingReport { path, lines })
            })
            .collect();
        gateway.disconnect();
        recordings
    });

    let reports = bots
        .iter()
        .map(|rb| BotReport {
            name: rb.bot.name().to_string(),
            cycles: rb.stats.cycles(),
            realized_pnl: rb.stats.realized_pnl(),
        })
        .collect();

    Ok(PaperRunSummary {
        config_hash: loaded.config_hash,
        outcome,
        bots: reports,
        recordings,
    })
}

async fn drive(
    transport: &PaperTransport,
    bots: &[RunningBot],
    base: f64,
    cycles: usize,
    timeout: Duration,
) -> RunOutcome {
    let deadline = tokio::time::sleep(timeout);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(deadline);
    tokio::pin!(ctrl_c);

    let mut driven = HashMap::new();
    let mut step = tokio::time::interval(QUOTE_STEP);
    loop {
        tokio::select! {
            _ = step.tick() => {}
            _ = &mut ctrl_c => {
                warn!("interrupted; shutting down");
                return RunOutcome::Interrupted;
            }
            _ = &mut deadline => {
                warn!(?timeout, "round trips did not complete in time");
                return RunOutcome::TimedOut;
            }
        }

        if bots.iter().all(|rb| rb.stats.cycles() >= cycles) {
            return RunOutcome::Completed;
        }
        drive_quotes(transport, bots, base, &mut driven);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bot_config(yaml: &str) -> BotConfig {
        let loaded = tbot_config::load_layered_yaml_from_strings(&[yaml]).unwrap();
        let mut app = loaded.app().unwrap();
        app.bots.remove(0)
    }

    #[test]
    fn contract_carries_primary_exchange() {
        let cfg = bot_config("bots:\n  - symbol: \"MSFT\"\n    primary_exchange: \"NASDAQ\"\n");
        let c = contract_for(&cfg);
        assert_eq!(c.symbol, "MSFT");
        assert_eq!(c.exchange, "SMART");
        assert_eq!(c.primary_exchange.as_deref(), Some("NASDAQ"));
    }

    #[test]
    fn bot_settings_follow_config() {
        let cfg = bot_config(
            "bots:\n  - symbol: \"AAPL\"\n    quantity: 3\n    min_tick: 0.05\n    tick_interval_ms: 20\n",
        );
        let rb = build_bot(&cfg, 2);
        assert_eq!(rb.bot.name(), "AAPL-rt");
        assert_eq!(rb.stats.cycles(), 0);
        assert_eq!(rb.bot.contract().symbol, "AAPL");
    }

    #[test]
    fn quotes_follow_held_position() {
        let transport = PaperTransport::new(PaperSettings {
            default_price: Some(10.0),
            ..PaperSettings::default()
        });
        let bots = vec![build_bot(&bot_config("bots:\n  - symbol: \"AAPL\"\n"), 1)];
        let mut driven = HashMap::new();

        drive_quotes(&transport, &bots, 10.0, &mut driven);
        assert_eq!(transport.with_broker(|b| b.quote("AAPL")), Some(10.0));
        assert_eq!(driven.get("AAPL"), Some(&10.0));
    }

    #[test]
    fn outcome_names() {
        assert_eq!(RunOutcome::Completed.as_str(), "completed");
        assert_eq!(RunOutcome::TimedOut.as_str(), "timed_out");
    }
}
