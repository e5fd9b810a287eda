//! Order lifecycle state machine.
//!
//! # Design
//!
//! One [`OrderLifecycle`] per bot. It tracks up to four orders, one per
//! [`OrderRole`], and the position they produce. Every order-status callback
//! goes through the same two-phase pipeline, for every role:
//!
//! 1. [`OrderLifecycle::apply`]: normalize `ApiCancelled` → `Cancelled`,
//!    drop the update if the status equals the role's stored status, apply a
//!    completed fill to the position, and name the hook to run.
//! 2. the caller runs the hook (bot code) against the half-updated machine;
//!    the fill is visible, the new status is not yet stored.
//! 3. [`OrderLifecycle::commit`]: store the status if it is one of
//!    {Filled, Cancelled, PreSubmitted, Submitted}.
//!
//! [`OrderLifecycle::on_status`] runs all three steps with a closure hook.
//!
//! # Bot state
//!
//! | open status              | position | [`BotState`]      |
//! |--------------------------|----------|-------------------|
//! | unset                    | any      | `ReadyToOpen`     |
//! | PendingSubmit            | any      | `Pending`         |
//! | PreSubmitted / Submitted | any      | `OpeningPosition` |
//! | Cancelled                | any      | `ReadyToOpen`     |
//! | Filled                   | > 0      | `ProfitWaiting`   |
//! | Filled                   | == 0     | `ReadyToOpen`     |
//! | anything else            |          | [`LifecycleError`] |
//!
//! Position counts lots held: an open fill adds, every other role's fill
//! subtracts, whatever the side.

use std::fmt;

use tbot_gateway::{Order, OrderStatus, OrderStatusUpdate, Side};
use tracing::{debug, error, info};

use crate::error::LifecycleError;

/// Remaining quantity below which a `Filled` status counts as complete.
pub const FILL_EPSILON: f64 = 0.01;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BotState {
    ReadyToOpen,
    Pending,
    OpeningPosition,
    ProfitWaiting,
}

impl BotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotState::ReadyToOpen => "READY_TO_OPEN",
            BotState::Pending => "PENDING",
            BotState::OpeningPosition => "OPENING_POSITION",
            BotState::ProfitWaiting => "PROFIT_WAITING",
        }
    }
}

impl fmt::Display for BotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derives the bot state from the open order's stored status and the
/// position. `close_status` only feeds the error report.
pub fn bot_state(
    open_status: Option<OrderStatus>,
    close_status: Option<OrderStatus>,
    position: i64,
) -> Result<BotState, LifecycleError> {
    match open_status {
        None => Ok(BotState::ReadyToOpen),
        Some(OrderStatus::PendingSubmit) => Ok(BotState::Pending),
        Some(OrderStatus::PreSubmitted | OrderStatus::Submitted) => Ok(BotState::OpeningPosition),
        Some(OrderStatus::Cancelled) => Ok(BotState::ReadyToOpen),
        Some(OrderStatus::Filled) if position > 0 => Ok(BotState::ProfitWaiting),
        Some(OrderStatus::Filled) if position == 0 => Ok(BotState::ReadyToOpen),
        _ => Err(LifecycleError::UnsupportedStateCombination {
            open_status,
            close_status,
            position,
        }),
    }
}

/// `(close − open) × qty` for a long open; negated when the open was a sell.
pub fn realized_pnl(open_side: Side, open_avg: f64, close_avg: f64, qty: i64) -> f64 {
    let long = qty as f64 * (close_avg - open_avg);
    match open_side {
        Side::Buy => long,
        Side::Sell => -long,
    }
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OrderRole {
    OpenPosition,
    ClosePosition,
    StopLoss,
    MarketOnClose,
}

impl OrderRole {
    pub const ALL: [OrderRole; 4] = [
        OrderRole::OpenPosition,
        OrderRole::ClosePosition,
        OrderRole::StopLoss,
        OrderRole::MarketOnClose,
    ];

    pub fn index(self) -> usize {
        match self {
            OrderRole::OpenPosition => 0,
            OrderRole::ClosePosition => 1,
            OrderRole::StopLoss => 2,
            OrderRole::MarketOnClose => 3,
        }
    }

    /// +1 when a fill of this role adds to the position, −1 when it reduces it.
    pub fn direction(self) -> i64 {
        match self {
            OrderRole::OpenPosition => 1,
            _ => -1,
        }
    }

    pub fn closes_position(self) -> bool {
        self != OrderRole::OpenPosition
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderRole::OpenPosition => "open",
            OrderRole::ClosePosition => "close",
            OrderRole::StopLoss => "stop_loss",
            OrderRole::MarketOnClose => "moc",
        }
    }
}

impl fmt::Display for OrderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the bot should be told about a status change.
#[derive(Clone, Debug, PartialEq)]
pub enum Hook {
    Submitted,
    Filled {
        avg_fill_price: f64,
        /// Close-side roles only, and only when the open order is known.
        realized_pnl: Option<f64>,
    },
    Cancelled,
}

/// An applied-but-uncommitted status change.
#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    pub role: OrderRole,
    pub status: OrderStatus,
    pub hook: Option<Hook>,
}

#[derive(Clone, Debug, Default)]
struct RoleTracker {
    status: Option<OrderStatus>,
    order: Option<Order>,
}

// ---------------------------------------------------------------------------
// OrderLifecycle
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct OrderLifecycle {
    roles: [RoleTracker; 4],
    position: i64,
    open_avg_fill_price: f64,
    close_avg_fill_price: f64,
}

impl OrderLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn open_avg_fill_price(&self) -> f64 {
        self.open_avg_fill_price
    }

    pub fn close_avg_fill_price(&self) -> f64 {
        self.close_avg_fill_price
    }

    /// Stored (last persisted) status of `role`.
    pub fn status(&self, role: OrderRole) -> Option<OrderStatus> {
        self.roles[role.index()].status
    }

    pub fn order(&self, role: OrderRole) -> Option<&Order> {
        self.roles[role.index()].order.as_ref()
    }

    /// The order currently playing `role`. Replaces the previous one; the
    /// stored status is kept so a late duplicate is still recognized.
    pub fn record_order(&mut self, role: OrderRole, order: Order) {
        self.roles[role.index()].order = Some(order);
    }

    pub fn bot_state(&self) -> Result<BotState, LifecycleError> {
        let state = bot_state(
            self.status(OrderRole::OpenPosition),
            self.status(OrderRole::ClosePosition),
            self.position,
        );
        if let Err(e) = &state {
            error!(error = %e, "bot state inconsistent; halt");
        }
        state
    }

    /// Steps 1–5 of the pipeline. `None` when the update is a duplicate.
    pub fn apply(&mut self, role: OrderRole, update: &OrderStatusUpdate) -> Option<Step> {
        let status = update.status.normalized();
        if self.status(role) == Some(status) {
            debug!(%role, %status, order_id = update.order_id, "duplicate status ignored");
            return None;
        }

        let hook = match status {
            OrderStatus::Submitted => Some(Hook::Submitted),
            OrderStatus::Filled if update.remaining < FILL_EPSILON => {
                Some(self.apply_fill(role, update))
            }
            OrderStatus::Cancelled => Some(Hook::Cancelled),
            _ => None,
        };

        Some(Step { role, status, hook })
    }

    /// Step 6: store the status if it is persistable.
    pub fn commit(&mut self, step: &Step) {
        if step.status.is_persistable() {
            self.roles[step.role.index()].status = Some(step.status);
        }
    }

    /// Apply, run `hook` (if any), commit. Returns the hook that ran.
    pub fn on_status(
        &mut self,
        role: OrderRole,
        update: &OrderStatusUpdate,
        mut hook: impl FnMut(&mut OrderLifecycle, OrderRole, &Hook),
    ) -> Option<Hook> {
        let step = self.apply(role, update)?;
        if let Some(h) = &step.hook {
            hook(self, role, h);
        }
        self.commit(&step);
        step.hook
    }

    fn apply_fill(&mut self, role: OrderRole, update: &OrderStatusUpdate) -> Hook {
        let lots = update.filled.round() as i64;
        self.position += role.direction() * lots;

        if !role.closes_position() {
            self.open_avg_fill_price = update.avg_fill_price;
            info!(
                %role,
                order_id = update.order_id,
                lots,
                avg_fill_price = update.avg_fill_price,
                position = self.position,
                "position opened"
            );
            return Hook::Filled {
                avg_fill_price: update.avg_fill_price,
                realized_pnl: None,
            };
        }

        self.close_avg_fill_price = update.avg_fill_price;
        let pnl = self.order(OrderRole::OpenPosition).map(|open| {
            realized_pnl(
                open.side,
                self.open_avg_fill_price,
                self.close_avg_fill_price,
                open.total_quantity,
            )
        });
        match pnl {
            Some(pnl) => info!(
                %role,
                order_id = update.order_id,
                lots,
                avg_fill_price = update.avg_fill_price,
                position = self.position,
                "P&L {pnl:.2}"
            ),
            None => info!(
                %role,
                order_id = update.order_id,
                lots,
                avg_fill_price = update.avg_fill_price,
                position = self.position,
                "position closed; open order unknown, P&L not computed"
            ),
        }
        Hook::Filled {
            avg_fill_price: update.avg_fill_price,
            realized_pnl: pnl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(id: i32, s: OrderStatus, filled: f64, remaining: f64, avg: f64) -> OrderStatusUpdate {
        OrderStatusUpdate::new(id, s, filled, remaining, avg)
    }

    // --- bot_state table ---------------------------------------------------

    #[test]
    fn state_table_is_total_over_known_rows() {
        use OrderStatus::*;
        assert_eq!(bot_state(None, None, 5), Ok(BotState::ReadyToOpen));
        assert_eq!(bot_state(Some(PendingSubmit), None, 0), Ok(BotState::Pending));
        assert_eq!(bot_state(Some(PreSubmitted), None, 0), Ok(BotState::OpeningPosition));
        assert_eq!(bot_state(Some(Submitted), None, 3), Ok(BotState::OpeningPosition));
        assert_eq!(bot_state(Some(Cancelled), None, 0), Ok(BotState::ReadyToOpen));
        assert_eq!(bot_state(Some(Filled), None, 10), Ok(BotState::ProfitWaiting));
        assert_eq!(bot_state(Some(Filled), Some(Filled), 0), Ok(BotState::ReadyToOpen));
    }

    #[test]
    fn filled_with_negative_position_is_an_error() {
        let err = bot_state(Some(OrderStatus::Filled), Some(OrderStatus::Filled), -10).unwrap_err();
        assert_eq!(
            err,
            LifecycleError::UnsupportedStateCombination {
                open_status: Some(OrderStatus::Filled),
                close_status: Some(OrderStatus::Filled),
                position: -10,
            }
        );
    }

    #[test]
    fn unlisted_open_statuses_are_errors() {
        for s in [OrderStatus::Inactive, OrderStatus::Unknown, OrderStatus::ApiPending] {
            assert!(bot_state(Some(s), None, 0).is_err(), "{s} must not map to a state");
        }
    }

    // --- P&L ---------------------------------------------------------------

    #[test]
    fn pnl_sign_follows_open_side() {
        assert!((realized_pnl(Side::Buy, 100.0, 105.0, 10) - 50.0).abs() < 1e-9);
        assert!((realized_pnl(Side::Sell, 100.0, 105.0, 10) + 50.0).abs() < 1e-9);
    }

    // --- pipeline ----------------------------------------------------------

    #[test]
    fn duplicate_status_runs_the_hook_once() {
        let mut lc = OrderLifecycle::new();
        let mut hooks = Vec::new();
        let upd = status(1, OrderStatus::Submitted, 0.0, 10.0, 0.0);

        lc.on_status(OrderRole::OpenPosition, &upd, |_, _, h| hooks.push(h.clone()));
        lc.on_status(OrderRole::OpenPosition, &upd, |_, _, h| hooks.push(h.clone()));

        assert_eq!(hooks, vec![Hook::Submitted]);
    }

    #[test]
    fn api_cancelled_is_stored_as_cancelled_and_deduped_against_it() {
        let mut lc = OrderLifecycle::new();
        let mut hooks = 0;
        lc.on_status(
            OrderRole::StopLoss,
            &status(3, OrderStatus::ApiCancelled, 0.0, 10.0, 0.0),
            |_, _, _| hooks += 1,
        );
        lc.on_status(
            OrderRole::StopLoss,
            &status(3, OrderStatus::Cancelled, 0.0, 10.0, 0.0),
            |_, _, _| hooks += 1,
        );

        assert_eq!(lc.status(OrderRole::StopLoss), Some(OrderStatus::Cancelled));
        assert_eq!(hooks, 1);
    }

    #[test]
    fn partial_fill_moves_nothing() {
        let mut lc = OrderLifecycle::new();
        let hook = lc.on_status(
            OrderRole::OpenPosition,
            &status(1, OrderStatus::Filled, 4.0, 6.0, 100.0),
            |_, _, _| {},
        );
        assert_eq!(hook, None);
        assert_eq!(lc.position(), 0);
        // The broker reports partial fills as Submitted; a Filled carrying a
        // remainder is stored like any other Filled.
        assert_eq!(lc.status(OrderRole::OpenPosition), Some(OrderStatus::Filled));
    }

    #[test]
    fn non_persistable_statuses_are_not_stored() {
        let mut lc = OrderLifecycle::new();
        lc.on_status(
            OrderRole::OpenPosition,
            &status(1, OrderStatus::PreSubmitted, 0.0, 10.0, 0.0),
            |_, _, _| {},
        );
        lc.on_status(
            OrderRole::OpenPosition,
            &status(1, OrderStatus::PendingCancel, 0.0, 10.0, 0.0),
            |_, _, _| {},
        );
        assert_eq!(lc.status(OrderRole::OpenPosition), Some(OrderStatus::PreSubmitted));
    }

    #[test]
    fn full_round_trip_reports_pnl_and_returns_to_ready() {
        let mut lc = OrderLifecycle::new();
        lc.record_order(OrderRole::OpenPosition, Order::limit(Side::Buy, 10, 100.0));

        for s in [OrderStatus::PreSubmitted, OrderStatus::Submitted] {
            lc.on_status(OrderRole::OpenPosition, &status(1, s, 0.0, 10.0, 0.0), |_, _, _| {});
        }
        assert_eq!(lc.bot_state(), Ok(BotState::OpeningPosition));

        lc.on_status(
            OrderRole::OpenPosition,
            &status(1, OrderStatus::Filled, 10.0, 0.0, 100.0),
            |_, _, _| {},
        );
        assert_eq!(lc.position(), 10);
        assert_eq!(lc.bot_state(), Ok(BotState::ProfitWaiting));

        let hook = lc.on_status(
            OrderRole::ClosePosition,
            &status(2, OrderStatus::Filled, 10.0, 0.0, 105.0),
            |_, _, _| {},
        );
        match hook {
            Some(Hook::Filled {
                avg_fill_price,
                realized_pnl: Some(pnl),
            }) => {
                assert_eq!(avg_fill_price, 105.0);
                assert!((pnl - 50.0).abs() < 1e-9);
            }
            other => panic!("expected a close fill, got {other:?}"),
        }
        assert_eq!(lc.position(), 0);
        assert_eq!(lc.bot_state(), Ok(BotState::ReadyToOpen));
    }

    #[test]
    fn hook_sees_fill_before_status_is_stored() {
        let mut lc = OrderLifecycle::new();
        lc.on_status(
            OrderRole::OpenPosition,
            &status(1, OrderStatus::Submitted, 0.0, 5.0, 0.0),
            |_, _, _| {},
        );

        let mut seen = None;
        lc.on_status(
            OrderRole::OpenPosition,
            &status(1, OrderStatus::Filled, 5.0, 0.0, 20.0),
            |lc, _, _| seen = Some((lc.position(), lc.status(OrderRole::OpenPosition))),
        );

        assert_eq!(seen, Some((5, Some(OrderStatus::Submitted))));
        assert_eq!(lc.status(OrderRole::OpenPosition), Some(OrderStatus::Filled));
    }

    #[test]
    fn sell_open_still_counts_held_lots() {
        let mut lc = OrderLifecycle::new();
        lc.record_order(OrderRole::OpenPosition, Order::limit(Side::Sell, 10, 100.0));
        lc.on_status(
            OrderRole::OpenPosition,
            &status(1, OrderStatus::Filled, 10.0, 0.0, 100.0),
            |_, _, _| {},
        );
        assert_eq!(lc.position(), 10);

        let hook = lc.on_status(
            OrderRole::StopLoss,
            &status(2, OrderStatus::Filled, 10.0, 0.0, 105.0),
            |_, _, _| {},
        );
        assert_eq!(
            hook,
            Some(Hook::Filled {
                avg_fill_price: 105.0,
                realized_pnl: Some(-50.0),
            })
        );
        assert_eq!(lc.position(), 0);
    }

    #[test]
    fn fractional_fills_round_to_the_nearest_lot() {
        let mut lc = OrderLifecycle::new();
        lc.on_status(
            OrderRole::OpenPosition,
            &status(1, OrderStatus::Filled, 9.6, 0.004, 10.0),
            |_, _, _| {},
        );
        assert_eq!(lc.position(), 10);
    }
}
