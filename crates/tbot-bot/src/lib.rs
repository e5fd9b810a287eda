//! tbot-bot: trading bots on top of the broker gateway.
//!
//! A bot owns four order roles (open, close, stop-loss, market-on-close) and
//! an [`OrderLifecycle`] that turns the broker's order statuses into position
//! changes and strategy hooks. [`BaseBot`] runs a [`Bot`] on its own worker
//! thread; [`StartBots`] brings a set of bots up against one gateway.

pub mod bot;
pub mod error;
pub mod filter;
pub mod lifecycle;
pub mod market;
pub mod round_trip;
pub mod sizing;

pub use bot::{
    BaseBot, Bot, BotCommand, BotContext, BotSettings, ManagedBot, StartBots,
    DEFAULT_TICK_INTERVAL,
};
pub use error::{BotError, LifecycleError};
pub use filter::{all_active, NasdaqRegularHours, NotCloseToDailyHigh, TradingFilter};
pub use lifecycle::{
    bot_state, realized_pnl, BotState, Hook, OrderLifecycle, OrderRole, Step, FILL_EPSILON,
};
pub use market::{MarketData, MarketFeed};
pub use round_trip::{Quantity, RoundTripBot, RoundTripStats};
pub use sizing::{DollarValueWithRisk, PositionSizeStrategy};
