//! Fee breakdown and balance-sufficiency verdict.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{Amount, FlowRate, PriceParams, PricingProvider};

/// Inputs describing the upload set being priced.
#[derive(Debug, Clone, Default)]
pub struct FeeInputs {
    /// Sizes of the tasks being priced. Tasks in ERROR are left out by the caller.
    pub sizes: Vec<u64>,
    /// Simulated create-object gas; replaces the published price when known.
    pub simulated_gas: Option<Amount>,
    /// Additional download quota being purchased, in bytes. Zero for none.
    pub quota_bytes: u64,
    /// Current outflow rate of the target bucket.
    pub bucket_rate: FlowRate,
    /// Funds returned by the flow (cancel/delete). Zero for new uploads.
    pub refund: Amount,
}

/// Fee components of one snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub gas_fee: Amount,
    pub store_fee: Amount,
    pub quota_fee: Amount,
    pub settlement_fee: Amount,
    pub refund: Amount,
}

impl FeeBreakdown {
    /// Charged to the store-fee payer, net of refunds.
    pub fn store_side(&self) -> Amount {
        (self.store_fee + self.quota_fee + self.settlement_fee).saturating_sub(self.refund)
    }

    /// Everything the upload costs, net of refunds.
    pub fn total(&self) -> Amount {
        (self.gas_fee + self.store_fee + self.quota_fee + self.settlement_fee)
            .saturating_sub(self.refund)
    }
}

/// Balance of the account paying storage fees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentBalance {
    /// The bucket's payment account is the owner itself.
    SameAsOwner,
    /// A distinct payment account with its own balance.
    Separate(Amount),
}

/// Balances the sufficiency check runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    /// Owner's general balance; always pays gas.
    pub owner: Amount,
    pub payment: PaymentBalance,
}

/// Which pool fell short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payer {
    Owner,
    PaymentAccount,
}

/// Verdict gating the confirm action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sufficiency {
    /// Inputs are incomplete; confirm stays disabled without blaming the balance.
    Checking,
    Sufficient,
    Insufficient { payer: Payer, shortfall: Amount },
}

impl Sufficiency {
    pub fn is_sufficient(&self) -> bool {
        matches!(self, Sufficiency::Sufficient)
    }
}

/// Point-in-time fees over the current queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSnapshot {
    pub fees: FeeBreakdown,
    pub sufficiency: Sufficiency,
}

impl FeeSnapshot {
    /// Snapshot shown while prices or balances are still loading.
    pub fn checking() -> Self {
        Self {
            fees: FeeBreakdown::default(),
            sufficiency: Sufficiency::Checking,
        }
    }
}

/// Checks `fees` against `balances`.
///
/// When the payment account is the owner the pools are fungible and a
/// single inequality applies; otherwise gas and storage are checked
/// against their own pools independently.
pub fn check_sufficiency(fees: &FeeBreakdown, balances: &Balances) -> Sufficiency {
    match balances.payment {
        PaymentBalance::SameAsOwner => {
            let need = fees.total();
            if balances.owner >= need {
                Sufficiency::Sufficient
            } else {
                Sufficiency::Insufficient {
                    payer: Payer::Owner,
                    shortfall: need.saturating_sub(balances.owner),
                }
            }
        }
        PaymentBalance::Separate(payment) => {
            if balances.owner < fees.gas_fee {
                return Sufficiency::Insufficient {
                    payer: Payer::Owner,
                    shortfall: fees.gas_fee.saturating_sub(balances.owner),
                };
            }
            let need = fees.store_side();
            if payment < need {
                return Sufficiency::Insufficient {
                    payer: Payer::PaymentAccount,
                    shortfall: need.saturating_sub(payment),
                };
            }
            Sufficiency::Sufficient
        }
    }
}

/// Derives fee snapshots from the pricing collaborator's formulas.
#[derive(Clone)]
pub struct FeeEngine {
    pricing: Arc<dyn PricingProvider>,
}

impl FeeEngine {
    pub fn new(pricing: Arc<dyn PricingProvider>) -> Self {
        Self { pricing }
    }

    /// Computes the fee components for `inputs`.
    ///
    /// Multi-object sets add the grant-allowance and write-policy gas of the
    /// delegated sub-account; a single object is signed directly.
    pub fn estimate(&self, params: &PriceParams, inputs: &FeeInputs) -> FeeBreakdown {
        let count = inputs.sizes.len() as u128;
        let per_object = inputs.simulated_gas.unwrap_or(params.gas.create_object);
        let mut gas_fee = per_object.saturating_mul(count);
        if count > 1 {
            gas_fee += params.gas.grant_allowance + params.gas.put_policy;
        }

        let store_fee: Amount = inputs
            .sizes
            .iter()
            .map(|size| {
                self.pricing
                    .netflow_rate(*size, params)
                    .over(params.reserve_time_secs)
            })
            .sum();

        let quota_fee = if inputs.quota_bytes > 0 {
            self.pricing
                .quota_rate(inputs.quota_bytes, params)
                .over(params.reserve_time_secs)
        } else {
            Amount::ZERO
        };

        let settlement_fee = if count > 0 {
            self.pricing.settlement_fee(inputs.bucket_rate, params)
        } else {
            Amount::ZERO
        };

        let fees = FeeBreakdown {
            gas_fee,
            store_fee,
            quota_fee,
            settlement_fee,
            refund: inputs.refund,
        };
        trace!(objects = count as u64, ?fees, "fees estimated");
        fees
    }

    /// Builds a snapshot. Missing prices or balances, or `pending` inputs,
    /// yield [`Sufficiency::Checking`].
    pub fn snapshot(
        &self,
        params: Option<&PriceParams>,
        balances: Option<&Balances>,
        inputs: &FeeInputs,
        pending: bool,
    ) -> FeeSnapshot {
        let Some(params) = params else {
            return FeeSnapshot::checking();
        };
        let fees = self.estimate(params, inputs);
        let sufficiency = match balances {
            Some(balances) if !pending => check_sufficiency(&fees, balances),
            _ => Sufficiency::Checking,
        };
        FeeSnapshot { fees, sufficiency }
    }
}
