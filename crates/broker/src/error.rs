use rust_decimal::Decimal;
use thiserror::Error;

use tidebook_core::CoreError;
use tidebook_gateway::TransportError;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("insufficient funds: {text}")]
    InsufficientFunds { text: String },

    #[error("size {size} is below the minimum trade size {minimum}")]
    BelowMinimumTrade { size: Decimal, minimum: Decimal },

    #[error("the order was already processed")]
    AlreadyProcessed,

    #[error("order {0} is not registered with this broker")]
    NotRegistered(String),
}
