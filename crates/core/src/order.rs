use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::currency::CurrencyPair;
use crate::error::CoreError;
use crate::instrument::FloatTraits;

/// What the user wants to do. Short-covering actions are remapped to their
/// plain counterparts before submission (venue limitation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAction {
    Buy,
    BuyToCover,
    Sell,
    SellShort,
}

impl OrderAction {
    pub fn normalized(self) -> OrderAction {
        match self {
            OrderAction::Buy | OrderAction::BuyToCover => OrderAction::Buy,
            OrderAction::Sell | OrderAction::SellShort => OrderAction::Sell,
        }
    }

    pub fn is_buy(self) -> bool {
        matches!(self.normalized(), OrderAction::Buy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OrderKind {
    Limit { price: Decimal },
    Market,
}

impl OrderKind {
    pub fn limit_price(&self) -> Option<Decimal> {
        match self {
            OrderKind::Limit { price } => Some(*price),
            OrderKind::Market => None,
        }
    }
}

/// Lifecycle states. Transitions only move forward; once a terminal state is
/// reached no further executions are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderState {
    Initial,
    Submitted,
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Canceled | OrderState::Rejected | OrderState::Expired
        )
    }

    /// The forward edges of the state machine.
    pub fn can_transition_to(self, next: OrderState) -> bool {
        use OrderState::*;
        match self {
            Initial => matches!(next, Submitted),
            Submitted => matches!(next, Accepted | Canceled | Rejected),
            Accepted => matches!(next, PartiallyFilled | Filled | Canceled | Rejected | Expired),
            PartiallyFilled => matches!(next, PartiallyFilled | Filled | Canceled | Expired),
            Filled | Canceled | Rejected | Expired => false,
        }
    }
}

/// One execution (fill) against an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderExecutionInfo {
    pub price: Decimal,
    pub quantity: Decimal,
    pub commission: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl OrderExecutionInfo {
    pub fn new(
        price: Decimal,
        quantity: Decimal,
        commission: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        OrderExecutionInfo {
            price,
            quantity,
            commission,
            timestamp,
        }
    }
}

/// A user order through its lifecycle. The invariant `filled_size == Σ
/// execution quantities` is maintained by `add_execution`, which is also the
/// only path into the PartiallyFilled/Filled states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Venue-assigned id, set when the venue acknowledges submission.
    id: Option<String>,
    local_id: Uuid,
    action: OrderAction,
    kind: OrderKind,
    symbol: CurrencyPair,
    size: Decimal,
    filled: Decimal,
    avg_fill_price: Option<Decimal>,
    submitted_at: Option<DateTime<Utc>>,
    state: OrderState,
    executions: Vec<OrderExecutionInfo>,
    traits: FloatTraits,
    all_or_none: bool,
    good_till_canceled: bool,
}

impl Order {
    pub fn limit(
        action: OrderAction,
        symbol: CurrencyPair,
        price: Decimal,
        size: Decimal,
        traits: FloatTraits,
    ) -> Self {
        Order::new(action, OrderKind::Limit { price }, symbol, size, traits)
    }

    pub fn market(
        action: OrderAction,
        symbol: CurrencyPair,
        size: Decimal,
        traits: FloatTraits,
    ) -> Self {
        Order::new(action, OrderKind::Market, symbol, size, traits)
    }

    fn new(
        action: OrderAction,
        kind: OrderKind,
        symbol: CurrencyPair,
        size: Decimal,
        traits: FloatTraits,
    ) -> Self {
        Order {
            id: None,
            local_id: Uuid::new_v4(),
            action,
            kind,
            symbol,
            size,
            filled: Decimal::ZERO,
            avg_fill_price: None,
            submitted_at: None,
            state: OrderState::Initial,
            executions: Vec::new(),
            traits,
            all_or_none: false,
            good_till_canceled: false,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn local_id(&self) -> Uuid {
        self.local_id
    }

    pub fn action(&self) -> OrderAction {
        self.action
    }

    pub fn kind(&self) -> OrderKind {
        self.kind
    }

    pub fn is_limit(&self) -> bool {
        matches!(self.kind, OrderKind::Limit { .. })
    }

    pub fn symbol(&self) -> CurrencyPair {
        self.symbol
    }

    pub fn size(&self) -> Decimal {
        self.size
    }

    pub fn filled_size(&self) -> Decimal {
        self.filled
    }

    pub fn remaining(&self) -> Decimal {
        self.traits.round_size(self.size - self.filled)
    }

    pub fn avg_fill_price(&self) -> Option<Decimal> {
        self.avg_fill_price
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    pub fn executions(&self) -> &[OrderExecutionInfo] {
        &self.executions
    }

    pub fn traits(&self) -> FloatTraits {
        self.traits
    }

    pub fn all_or_none(&self) -> bool {
        self.all_or_none
    }

    pub fn good_till_canceled(&self) -> bool {
        self.good_till_canceled
    }

    pub fn set_all_or_none(&mut self, value: bool) {
        self.all_or_none = value;
    }

    pub fn set_good_till_canceled(&mut self, value: bool) {
        self.good_till_canceled = value;
    }

    pub fn is_initial(&self) -> bool {
        self.state == OrderState::Initial
    }

    pub fn is_submitted(&self) -> bool {
        self.state == OrderState::Submitted
    }

    pub fn is_filled(&self) -> bool {
        self.state == OrderState::Filled
    }

    /// Active means the order may still change: anything non-terminal.
    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Record the venue's acknowledgement of submission.
    pub fn set_submitted(&mut self, id: impl Into<String>, at: DateTime<Utc>) {
        self.id = Some(id.into());
        self.submitted_at = Some(at);
    }

    /// Move through the state machine, rejecting backward or skipped edges.
    pub fn switch_state(&mut self, next: OrderState) -> Result<(), CoreError> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Set the state directly, bypassing the transition table. Only for
    /// reconstructing orders from a venue's own reports, where the earlier
    /// states were never observed locally.
    pub fn set_state(&mut self, state: OrderState) {
        self.state = state;
    }

    /// Append an execution: updates filled size and average fill price, then
    /// advances to PartiallyFilled or Filled.
    pub fn add_execution(&mut self, info: OrderExecutionInfo) -> Result<(), CoreError> {
        if self.state.is_terminal() {
            return Err(CoreError::TerminalOrder(self.state));
        }
        let quantity = self.traits.round_size(info.quantity);
        if quantity > self.remaining() {
            return Err(CoreError::ExecutionExceedsOrder {
                quantity,
                remaining: self.remaining(),
            });
        }

        let filled_before = self.filled;
        self.filled = self.traits.round_size(self.filled + quantity);
        self.avg_fill_price = Some(match self.avg_fill_price {
            Some(avg) => (avg * filled_before + info.price * quantity) / self.filled,
            None => info.price,
        });
        self.executions.push(info);

        let next = if self.remaining().is_zero() {
            OrderState::Filled
        } else {
            OrderState::PartiallyFilled
        };
        self.switch_state(next)
    }
}
