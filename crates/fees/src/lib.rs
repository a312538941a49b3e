//! Fee estimation for object uploads.
//!
//! Fees are computed in integer base units (18 decimals) and never go
//! through floating point. The engine is pure arithmetic: callers feed it
//! the current queue contents, price parameters and balances, and get back
//! a [`FeeSnapshot`] whose [`Sufficiency`] gates the confirm action.
//!
//! # Components
//!
//! - [`Amount`] / [`FlowRate`]: fixed-point money and per-second rates
//! - [`PriceParams`]: network price parameters
//! - [`PricingProvider`]: netflow formulas, with [`NetflowPricing`] as default
//! - [`FeeEngine`]: fee breakdown and balance-sufficiency verdict

mod amount;
mod engine;
mod pricing;

pub use amount::{Amount, DECIMALS, FlowRate, RATE_SCALE};
pub use engine::{
    Balances, FeeBreakdown, FeeEngine, FeeInputs, FeeSnapshot, Payer, PaymentBalance, Sufficiency,
    check_sufficiency,
};
pub use pricing::{GasPrices, NetflowPricing, PriceParams, PricingProvider};

/// Errors produced by the fees crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeeError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("amount overflow")]
    Overflow,
}
