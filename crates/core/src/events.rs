use serde::{Deserialize, Serialize};

use crate::order::{Order, OrderExecutionInfo, OrderState};

/// What happened to an order. One event is emitted per transition; there are
/// no silent state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEventKind {
    Submitted,
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderEventKind {
    /// The event kind announcing arrival in `state`, if any.
    pub fn for_state(state: OrderState) -> Option<OrderEventKind> {
        match state {
            OrderState::Initial => None,
            OrderState::Submitted => Some(OrderEventKind::Submitted),
            OrderState::Accepted => Some(OrderEventKind::Accepted),
            OrderState::PartiallyFilled => Some(OrderEventKind::PartiallyFilled),
            OrderState::Filled => Some(OrderEventKind::Filled),
            OrderState::Canceled => Some(OrderEventKind::Canceled),
            OrderState::Rejected => Some(OrderEventKind::Rejected),
            OrderState::Expired => Some(OrderEventKind::Expired),
        }
    }
}

/// An order transition, carrying a value snapshot of the order and the
/// execution that caused the transition when there was one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order: Order,
    pub kind: OrderEventKind,
    pub execution: Option<OrderExecutionInfo>,
}

impl OrderEvent {
    pub fn new(order: &Order, kind: OrderEventKind, execution: Option<OrderExecutionInfo>) -> Self {
        OrderEvent {
            order: order.clone(),
            kind,
            execution,
        }
    }
}
