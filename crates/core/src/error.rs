use rust_decimal::Decimal;
use thiserror::Error;

use crate::order::OrderState;

/// Failures produced by the domain model itself (book, synchronizer, order
/// state machine). Transport-level failures live in the gateway crate.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("unknown side: {0:?}")]
    InvalidSide(String),

    #[error("unrecognized delta variant: {0}")]
    UnknownDelta(String),

    #[error("unknown currency: {0:?}")]
    UnknownCurrency(String),

    #[error("unknown symbol: {0:?}")]
    UnknownSymbol(String),

    #[error("book {venue}:{symbol} has no {side} levels")]
    EmptyBook {
        venue: String,
        symbol: String,
        side: crate::side::Side,
    },

    #[error("gap in update stream: expected syncpoint {expected}, got {got}")]
    GapDetected { expected: u64, got: u64 },

    #[error("order is not active")]
    NotActive,

    #[error("illegal order state transition {from:?} -> {to:?}")]
    InvalidTransition { from: OrderState, to: OrderState },

    #[error("order in terminal state {0:?} cannot accept executions")]
    TerminalOrder(OrderState),

    #[error("execution quantity {quantity} exceeds remaining order size {remaining}")]
    ExecutionExceedsOrder {
        quantity: Decimal,
        remaining: Decimal,
    },

    #[error("size {size} is below the minimum trade size {minimum}")]
    BelowMinimumTrade { size: Decimal, minimum: Decimal },

    #[error("unsupported order type: {0}")]
    UnsupportedOrderType(String),
}
