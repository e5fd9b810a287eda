//! Bot runtime: wires a [`Bot`] to the gateway through an [`OrderLifecycle`].
//!
//! # Threads
//!
//! - The gateway's reader thread delivers order statuses to the bot's four
//!   role handlers; each runs the lifecycle pipeline and the matching hook.
//! - The bot's own worker thread calls [`Bot::on_start`] once, then
//!   [`Bot::on_tick`] every tick interval until [`BaseBot::shutdown`].
//!
//! Both paths lock the bot core (lifecycle + bot). Hooks never touch the
//! gateway directly: they queue [`BotCommand`]s on their [`BotContext`], and
//! the runtime sends them once the core lock is released. The core lock is
//! therefore never held while a gateway lock is being acquired.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tbot_gateway::{
    BrokerGateway, Contract, Order, OrderHandler, OrderStatus, OrderStatusUpdate,
    TopMktDataHandler,
};
use tracing::{debug, info, warn};

use crate::error::{BotError, LifecycleError};
use crate::lifecycle::{BotState, Hook, OrderLifecycle, OrderRole, FILL_EPSILON};
use crate::market::{MarketData, MarketFeed};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Bot trait + context
// ---------------------------------------------------------------------------

/// Strategy-side hooks. Every method defaults to a no-op.
///
/// `open_*` hooks fire for the open-position role; `close_*` hooks fire for
/// the close, stop-loss and market-on-close roles, with the role passed in.
pub trait Bot: Send + 'static {
    fn on_start(&mut self, _ctx: &mut BotContext<'_>) {}
    fn on_tick(&mut self, _ctx: &mut BotContext<'_>) {}

    fn open_position_submitted(&mut self, _ctx: &mut BotContext<'_>) {}
    fn open_position_filled(&mut self, _ctx: &mut BotContext<'_>, _avg_fill_price: f64) {}
    fn open_position_cancelled(&mut self, _ctx: &mut BotContext<'_>) {}

    fn close_position_submitted(&mut self, _ctx: &mut BotContext<'_>, _role: OrderRole) {}
    fn close_position_filled(
        &mut self,
        _ctx: &mut BotContext<'_>,
        _role: OrderRole,
        _avg_fill_price: f64,
        _realized_pnl: Option<f64>,
    ) {
    }
    fn close_position_cancelled(&mut self, _ctx: &mut BotContext<'_>, _role: OrderRole) {}
}

#[derive(Clone, Debug, PartialEq)]
pub enum BotCommand {
    /// `replaces` is the id of the order that played `role` before, when
    /// this placement hands the role to a different order.
    Place {
        role: OrderRole,
        order: Order,
        replaces: Option<i32>,
    },
    Cancel { role: OrderRole },
}

/// What a hook sees: the lifecycle, the instrument, a market snapshot, and
/// a queue for outbound orders.
pub struct BotContext<'a> {
    lifecycle: &'a mut OrderLifecycle,
    contract: &'a Contract,
    market: MarketData,
    commands: Vec<BotCommand>,
}

impl<'a> BotContext<'a> {
    pub fn new(lifecycle: &'a mut OrderLifecycle, contract: &'a Contract, market: MarketData) -> Self {
        Self {
            lifecycle,
            contract,
            market,
            commands: Vec::new(),
        }
    }

    pub fn lifecycle(&self) -> &OrderLifecycle {
        self.lifecycle
    }

    pub fn bot_state(&self) -> Result<BotState, LifecycleError> {
        self.lifecycle.bot_state()
    }

    pub fn position(&self) -> i64 {
        self.lifecycle.position()
    }

    pub fn market(&self) -> &MarketData {
        &self.market
    }

    pub fn contract(&self) -> &Contract {
        self.contract
    }

    /// Queues `order` for `role`. An order with `order_id == 0` is new; a set
    /// id amends that order. The lifecycle knows the order immediately.
    pub fn place_order(&mut self, role: OrderRole, order: Order) {
        let replaces = self
            .lifecycle
            .order(role)
            .map(|previous| previous.order_id)
            .filter(|id| *id != 0 && *id != order.order_id);
        self.lifecycle.record_order(role, order.clone());
        self.commands.push(BotCommand::Place {
            role,
            order,
            replaces,
        });
    }

    /// Queues a cancel of the order currently playing `role`.
    pub fn cancel_order(&mut self, role: OrderRole) {
        self.commands.push(BotCommand::Cancel { role });
    }

    pub fn into_commands(self) -> Vec<BotCommand> {
        self.commands
    }
}

fn run_hook<B: Bot>(bot: &mut B, ctx: &mut BotContext<'_>, role: OrderRole, hook: &Hook) {
    match (role, hook) {
        (OrderRole::OpenPosition, Hook::Submitted) => bot.open_position_submitted(ctx),
        (OrderRole::OpenPosition, Hook::Filled { avg_fill_price, .. }) => {
            bot.open_position_filled(ctx, *avg_fill_price)
        }
        (OrderRole::OpenPosition, Hook::Cancelled) => bot.open_position_cancelled(ctx),
        (role, Hook::Submitted) => bot.close_position_submitted(ctx, role),
        (
            role,
            Hook::Filled {
                avg_fill_price,
                realized_pnl,
            },
        ) => bot.close_position_filled(ctx, role, *avg_fill_price, *realized_pnl),
        (role, Hook::Cancelled) => bot.close_position_cancelled(ctx, role),
    }
}

// ---------------------------------------------------------------------------
// BaseBot
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct BotSettings {
    pub name: String,
    pub contract: Contract,
    /// Overrides the gateway's tick for this symbol when set.
    pub min_tick: Option<f64>,
    pub tick_interval: Duration,
}

impl BotSettings {
    pub fn new(name: impl Into<String>, contract: Contract) -> Self {
        Self {
            name: name.into(),
            contract,
            min_tick: None,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

struct Core<B> {
    bot: B,
    lifecycle: OrderLifecycle,
}

struct Shared<B: Bot> {
    settings: BotSettings,
    core: Mutex<Core<B>>,
    feed: MarketFeed,
    feed_handler: Arc<dyn TopMktDataHandler>,
    gateway: Mutex<Option<Arc<BrokerGateway>>>,
    handlers: [Arc<dyn OrderHandler>; 4],
    stop: AtomicBool,
}

/// Routes one role's order statuses into the owning bot.
struct RoleOrderHandler<B: Bot> {
    role: OrderRole,
    shared: Weak<Shared<B>>,
}

impl<B: Bot> OrderHandler for RoleOrderHandler<B> {
    fn order_status(&self, update: &OrderStatusUpdate) {
        match self.shared.upgrade() {
            Some(shared) => shared.on_order_status(self.role, update),
            None => debug!(role = %self.role, "status for a dropped bot ignored"),
        }
    }

    fn handle(&self, code: i32, message: &str) {
        if let Some(shared) = self.shared.upgrade() {
            warn!(bot = %shared.settings.name, role = %self.role, code, message, "order message");
        }
    }
}

impl<B: Bot> Shared<B> {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn on_order_status(&self, role: OrderRole, update: &OrderStatusUpdate) {
        info!(
            bot = %self.name(),
            %role,
            order_id = update.order_id,
            status = %update.status,
            filled = update.filled,
            remaining = update.remaining,
            avg_fill_price = update.avg_fill_price,
            why_held = %update.why_held,
            "order status"
        );

        let commands = {
            let mut core = self.core.lock();
            let Core { bot, lifecycle } = &mut *core;
            match lifecycle.apply(role, update) {
                Some(step) => {
                    let mut ctx =
                        BotContext::new(&mut *lifecycle, &self.settings.contract, self.feed.snapshot());
                    if let Some(hook) = &step.hook {
                        run_hook(bot, &mut ctx, role, hook);
                    }
                    let commands = ctx.into_commands();
                    lifecycle.commit(&step);
                    commands
                }
                None => Vec::new(),
            }
        };

        // A finished order has nothing more to say; a late or replayed status
        // for it must not reach a role that has moved on to another order.
        if is_final(update) {
            self.release_order(role, update.order_id);
        }
        self.execute(commands);
    }

    fn release_order(&self, role: OrderRole, order_id: i32) {
        let Some(gateway) = self.gateway.lock().clone() else {
            return;
        };
        if gateway.release_order(order_id) {
            debug!(bot = %self.name(), %role, order_id, "order routing released");
        }
    }

    fn run_with_context(&self, f: impl FnOnce(&mut B, &mut BotContext<'_>)) {
        let commands = {
            let mut core = self.core.lock();
            let Core { bot, lifecycle } = &mut *core;
            let mut ctx = BotContext::new(lifecycle, &self.settings.contract, self.feed.snapshot());
            f(bot, &mut ctx);
            ctx.into_commands()
        };
        self.execute(commands);
    }

    fn execute(&self, commands: Vec<BotCommand>) {
        if commands.is_empty() {
            return;
        }
        let Some(gateway) = self.gateway.lock().clone() else {
            warn!(bot = %self.name(), dropped = commands.len(), "bot not initialized; commands dropped");
            return;
        };

        for command in commands {
            match command {
                BotCommand::Place {
                    role,
                    mut order,
                    replaces,
                } => {
                    let handler = Arc::clone(&self.handlers[role.index()]);
                    match gateway.place_or_modify_order(&self.settings.contract, &mut order, handler) {
                        Some(order_id) => {
                            info!(bot = %self.name(), %role, order_id, ?replaces, "order placed");
                            self.core.lock().lifecycle.record_order(role, order);
                            if let Some(previous) = replaces.filter(|id| *id != order_id) {
                                self.release_order(role, previous);
                            }
                        }
                        None => warn!(bot = %self.name(), %role, "order not placed"),
                    }
                }
                BotCommand::Cancel { role } => {
                    let order_id = self
                        .core
                        .lock()
                        .lifecycle
                        .order(role)
                        .map(|o| o.order_id)
                        .filter(|id| *id != 0);
                    match order_id {
                        Some(order_id) => gateway.cancel_order(order_id),
                        None => debug!(bot = %self.name(), %role, "no placed order to cancel"),
                    }
                }
            }
        }
    }
}

/// Filled with nothing remaining, or cancelled.
fn is_final(update: &OrderStatusUpdate) -> bool {
    match update.status.normalized() {
        OrderStatus::Filled => update.remaining < FILL_EPSILON,
        OrderStatus::Cancelled => true,
        _ => false,
    }
}

fn worker_loop<B: Bot>(shared: Arc<Shared<B>>) {
    info!(bot = %shared.name(), "bot started");
    shared.run_with_context(|bot, ctx| bot.on_start(ctx));
    while !shared.stop.load(Ordering::SeqCst) {
        thread::park_timeout(shared.settings.tick_interval);
        if shared.stop.load(Ordering::SeqCst) {
            break;
        }
        shared.run_with_context(|bot, ctx| bot.on_tick(ctx));
    }
    info!(bot = %shared.name(), "bot stopped");
}

pub struct BaseBot<B: Bot> {
    shared: Arc<Shared<B>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<B: Bot> BaseBot<B> {
    pub fn new(settings: BotSettings, bot: B) -> Self {
        let feed = MarketFeed::new();
        let shared = Arc::new_cyclic(|weak: &Weak<Shared<B>>| Shared {
            settings,
            core: Mutex::new(Core {
                bot,
                lifecycle: OrderLifecycle::new(),
            }),
            feed_handler: Arc::new(feed.clone()),
            feed,
            gateway: Mutex::new(None),
            handlers: OrderRole::ALL.map(|role| {
                Arc::new(RoleOrderHandler {
                    role,
                    shared: weak.clone(),
                }) as Arc<dyn OrderHandler>
            }),
            stop: AtomicBool::new(false),
        });
        Self {
            shared,
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn contract(&self) -> &Contract {
        &self.shared.settings.contract
    }

    /// Binds the bot to `gateway` and subscribes top-of-book data.
    pub fn init(&self, gateway: &Arc<BrokerGateway>) {
        *self.shared.gateway.lock() = Some(Arc::clone(gateway));
        let contract = &self.shared.settings.contract;
        if let Some(tick) = self.shared.settings.min_tick {
            gateway.set_min_tick(&contract.symbol, tick);
        }
        gateway.request_top_mkt_data(contract, "", false, Arc::clone(&self.shared.feed_handler));
        info!(bot = %self.name(), symbol = %contract.symbol, "bot initialized");
    }

    pub fn start(&self) -> Result<(), BotError> {
        if self.shared.gateway.lock().is_none() {
            return Err(BotError::NotInitialized {
                bot: self.name().to_string(),
            });
        }
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(BotError::AlreadyStarted {
                bot: self.name().to_string(),
            });
        }
        self.shared.stop.store(false, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("bot-{}", self.name()))
            .spawn(move || worker_loop(shared))
            .map_err(|e| BotError::WorkerSpawn {
                bot: self.name().to_string(),
                reason: e.to_string(),
            })?;
        *worker = Some(handle);
        Ok(())
    }

    /// Stops the worker thread. Live orders are left untouched.
    pub fn shutdown(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            handle.thread().unpark();
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!(bot = %self.name(), "bot worker panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Runs one `on_tick` pass on the calling thread.
    pub fn tick(&self) {
        self.shared.run_with_context(|bot, ctx| bot.on_tick(ctx));
    }

    pub fn bot_state(&self) -> Result<BotState, LifecycleError> {
        self.shared.core.lock().lifecycle.bot_state()
    }

    pub fn lifecycle(&self) -> OrderLifecycle {
        self.shared.core.lock().lifecycle.clone()
    }

    pub fn market(&self) -> MarketData {
        self.shared.feed.snapshot()
    }

    pub fn with_bot<R>(&self, f: impl FnOnce(&B) -> R) -> R {
        f(&self.shared.core.lock().bot)
    }

    /// The handler receiving statuses for `role`'s orders.
    pub fn order_handler(&self, role: OrderRole) -> Arc<dyn OrderHandler> {
        Arc::clone(&self.shared.handlers[role.index()])
    }
}

impl<B: Bot> Drop for BaseBot<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// ManagedBot + StartBots
// ---------------------------------------------------------------------------

/// Object-safe view of a bot for process-level orchestration.
pub trait ManagedBot: Send + Sync {
    fn name(&self) -> &str;
    fn init(&self, gateway: &Arc<BrokerGateway>);
    fn start(&self) -> Result<(), BotError>;
    fn shutdown(&self);
}

impl<B: Bot> ManagedBot for BaseBot<B> {
    fn name(&self) -> &str {
        BaseBot::name(self)
    }

    fn init(&self, gateway: &Arc<BrokerGateway>) {
        BaseBot::init(self, gateway)
    }

    fn start(&self) -> Result<(), BotError> {
        BaseBot::start(self)
    }

    fn shutdown(&self) {
        BaseBot::shutdown(self)
    }
}

/// Initializes every bot against the gateway, then starts it, in order.
pub struct StartBots {
    bots: Vec<Arc<dyn ManagedBot>>,
}

impl StartBots {
    pub fn new(bots: Vec<Arc<dyn ManagedBot>>) -> Self {
        Self { bots }
    }

    pub fn bots(&self) -> &[Arc<dyn ManagedBot>] {
        &self.bots
    }

    /// Stops at the first bot that fails to start; earlier bots keep running.
    pub fn execute(&self, gateway: &Arc<BrokerGateway>) -> Result<(), BotError> {
        for bot in &self.bots {
            bot.init(gateway);
            bot.start()?;
        }
        info!(bots = self.bots.len(), "bots started");
        Ok(())
    }

    pub fn shutdown(&self) {
        for bot in self.bots.iter().rev() {
            bot.shutdown();
        }
    }
}
