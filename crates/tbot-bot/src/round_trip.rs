//! Round-trip bot: buy, then exit at a profit target or a stop.
//!
//! One cycle:
//!
//! 1. Ready to open, filters pass, last price known → limit buy at the entry
//!    price, sized by the position-size strategy (or a fixed quantity).
//! 2. Open filled → limit sell at `fill + profit_target` and a stop sell at
//!    `fill − stop_distance`.
//! 3. Either exit filled → cancel the other one; the cycle is complete.
//!
//! Completed cycles and realized P&L are published through [`RoundTripStats`]
//! so an outer process can watch progress without locking the bot.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tbot_gateway::{Order, Side};
use tracing::{info, warn};

use crate::bot::{Bot, BotContext};
use crate::filter::{all_active, TradingFilter};
use crate::lifecycle::{BotState, OrderRole};
use crate::sizing::PositionSizeStrategy;

#[derive(Default, Debug)]
pub struct RoundTripStats {
    cycles: AtomicUsize,
    /// Realized P&L in cents.
    pnl_cents: AtomicI64,
}

impl RoundTripStats {
    pub fn cycles(&self) -> usize {
        self.cycles.load(Ordering::SeqCst)
    }

    pub fn realized_pnl(&self) -> f64 {
        self.pnl_cents.load(Ordering::SeqCst) as f64 / 100.0
    }

    fn record(&self, pnl: Option<f64>) {
        if let Some(pnl) = pnl {
            self.pnl_cents
                .fetch_add((pnl * 100.0).round() as i64, Ordering::SeqCst);
        }
        self.cycles.fetch_add(1, Ordering::SeqCst);
    }
}

pub enum Quantity {
    Fixed(i64),
    Sized(Box<dyn PositionSizeStrategy>),
}

pub struct RoundTripBot {
    quantity: Quantity,
    profit_target: f64,
    stop_distance: f64,
    filters: Vec<Box<dyn TradingFilter>>,
    max_cycles: Option<usize>,
    in_flight: bool,
    stats: Arc<RoundTripStats>,
}

impl RoundTripBot {
    pub fn new(quantity: Quantity, profit_target: f64, stop_distance: f64) -> Self {
        Self {
            quantity,
            profit_target,
            stop_distance,
            filters: Vec::new(),
            max_cycles: None,
            in_flight: false,
            stats: Arc::new(RoundTripStats::default()),
        }
    }

    pub fn with_filter(mut self, filter: Box<dyn TradingFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_max_cycles(mut self, max_cycles: usize) -> Self {
        self.max_cycles = Some(max_cycles);
        self
    }

    pub fn stats(&self) -> Arc<RoundTripStats> {
        Arc::clone(&self.stats)
    }

    fn done(&self) -> bool {
        self.max_cycles
            .map(|max| self.stats.cycles() >= max)
            .unwrap_or(false)
    }

    fn size(&self, entry: f64) -> i64 {
        match &self.quantity {
            Quantity::Fixed(q) => *q,
            Quantity::Sized(s) => s.position_size(entry, self.stop_distance),
        }
    }
}

impl Bot for RoundTripBot {
    fn on_tick(&mut self, ctx: &mut BotContext<'_>) {
        if self.in_flight || self.done() {
            return;
        }
        match ctx.bot_state() {
            Ok(BotState::ReadyToOpen) => {}
            Ok(_) => return,
            Err(e) => {
                warn!(error = %e, "bot halted");
                self.max_cycles = Some(0);
                return;
            }
        }
        let market = *ctx.market();
        if !market.has_last() || !all_active(&self.filters, Utc::now(), &market) {
            return;
        }

        let entry = market.entry_price();
        let qty = self.size(entry);
        info!(symbol = %ctx.contract().symbol, entry, qty, "opening position");
        ctx.place_order(OrderRole::OpenPosition, Order::limit(Side::Buy, qty, entry));
        self.in_flight = true;
    }

    fn open_position_filled(&mut self, ctx: &mut BotContext<'_>, avg_fill_price: f64) {
        let qty = ctx
            .lifecycle()
            .order(OrderRole::OpenPosition)
            .map(|o| o.total_quantity)
            .unwrap_or_else(|| ctx.position());
        ctx.place_order(
            OrderRole::ClosePosition,
            Order::limit(Side::Sell, qty, avg_fill_price + self.profit_target),
        );
        ctx.place_order(
            OrderRole::StopLoss,
            Order::stop(Side::Sell, qty, avg_fill_price - self.stop_distance),
        );
    }

    fn open_position_cancelled(&mut self, _ctx: &mut BotContext<'_>) {
        self.in_flight = false;
    }

    fn close_position_filled(
        &mut self,
        ctx: &mut BotContext<'_>,
        role: OrderRole,
        _avg_fill_price: f64,
        realized_pnl: Option<f64>,
    ) {
        let other = match role {
            OrderRole::ClosePosition => Some(OrderRole::StopLoss),
            OrderRole::StopLoss => Some(OrderRole::ClosePosition),
            _ => None,
        };
        if let Some(other) = other {
            ctx.cancel_order(other);
        }
        self.stats.record(realized_pnl);
        self.in_flight = false;
        info!(
            cycles = self.stats.cycles(),
            total_pnl = self.stats.realized_pnl(),
            "round trip complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::BotCommand;
    use crate::lifecycle::OrderLifecycle;
    use crate::market::MarketData;
    use tbot_gateway::{Contract, OrderStatus, OrderStatusUpdate, OrderType};

    fn market(last: f64) -> MarketData {
        MarketData {
            last,
            ..MarketData::default()
        }
    }

    #[test]
    fn opens_once_when_ready() {
        let mut bot = RoundTripBot::new(Quantity::Fixed(10), 1.0, 0.5);
        let mut lc = OrderLifecycle::new();
        let contract = Contract::smart_stock("AAPL");

        let mut ctx = BotContext::new(&mut lc, &contract, market(100.0));
        bot.on_tick(&mut ctx);
        bot.on_tick(&mut ctx);
        let commands = ctx.into_commands();

        assert_eq!(commands.len(), 1);
        match &commands[0] {
            BotCommand::Place { role, order, .. } => {
                assert_eq!(*role, OrderRole::OpenPosition);
                assert_eq!(order.limit_price, Some(100.0));
                assert_eq!(order.total_quantity, 10);
            }
            other => panic!("expected a place, got {other:?}"),
        }
    }

    #[test]
    fn waits_for_a_price() {
        let mut bot = RoundTripBot::new(Quantity::Fixed(10), 1.0, 0.5);
        let mut lc = OrderLifecycle::new();
        let contract = Contract::smart_stock("AAPL");
        let mut ctx = BotContext::new(&mut lc, &contract, MarketData::default());
        bot.on_tick(&mut ctx);
        assert!(ctx.into_commands().is_empty());
    }

    #[test]
    fn open_fill_brackets_the_position() {
        let mut bot = RoundTripBot::new(Quantity::Fixed(10), 1.0, 0.5);
        let mut lc = OrderLifecycle::new();
        lc.record_order(OrderRole::OpenPosition, Order::limit(Side::Buy, 10, 100.0));
        let contract = Contract::smart_stock("AAPL");

        let mut ctx = BotContext::new(&mut lc, &contract, market(100.0));
        bot.open_position_filled(&mut ctx, 100.0);
        let commands = ctx.into_commands();

        let types: Vec<(OrderRole, OrderType)> = commands
            .iter()
            .filter_map(|c| match c {
                BotCommand::Place { role, order, .. } => Some((*role, order.order_type)),
                _ => None,
            })
            .collect();
        assert_eq!(
            types,
            vec![
                (OrderRole::ClosePosition, OrderType::Limit),
                (OrderRole::StopLoss, OrderType::Stop)
            ]
        );
    }

    #[test]
    fn exit_fill_cancels_the_other_leg_and_counts_the_cycle() {
        let mut bot = RoundTripBot::new(Quantity::Fixed(10), 1.0, 0.5).with_max_cycles(1);
        let stats = bot.stats();
        let mut lc = OrderLifecycle::new();
        lc.on_status(
            OrderRole::OpenPosition,
            &OrderStatusUpdate::new(1, OrderStatus::Filled, 10.0, 0.0, 100.0),
            |_, _, _| {},
        );
        let contract = Contract::smart_stock("AAPL");

        let mut ctx = BotContext::new(&mut lc, &contract, market(101.0));
        bot.close_position_filled(&mut ctx, OrderRole::ClosePosition, 101.0, Some(10.0));
        assert_eq!(
            ctx.into_commands(),
            vec![BotCommand::Cancel {
                role: OrderRole::StopLoss
            }]
        );
        assert_eq!(stats.cycles(), 1);
        assert_eq!(stats.realized_pnl(), 10.0);
        assert!(bot.done());
    }
}
