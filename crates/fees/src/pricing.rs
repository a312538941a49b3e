//! Network price parameters and netflow formulas.

use serde::{Deserialize, Serialize};

use crate::{Amount, FlowRate};

/// Six months, the mandatory minimum reservation period.
pub const DEFAULT_RESERVE_TIME_SECS: u64 = 180 * 24 * 60 * 60;

/// Per-transaction gas costs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasPrices {
    /// Create-object transaction.
    pub create_object: Amount,
    /// Gas-allowance grant to a delegated sub-account.
    pub grant_allowance: Amount,
    /// Bucket write policy for a delegated sub-account.
    pub put_policy: Amount,
}

/// Current price parameters published by the network.
///
/// Store and read prices are base units per byte per second, scaled by
/// [`RATE_SCALE`](crate::RATE_SCALE).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceParams {
    pub primary_store_price: u128,
    pub secondary_store_price: u128,
    /// Secondary replicas each object is stored on.
    pub secondary_sp_count: u32,
    pub read_price: u128,
    /// Validator tax on storage flows, in basis points.
    pub validator_tax_bps: u32,
    /// Objects smaller than this are charged as this size.
    pub min_charge_size: u64,
    /// Prepaid reservation period.
    pub reserve_time_secs: u64,
    /// Download quota granted without charge.
    pub free_quota_bytes: u64,
    /// Window covered by the settlement reserve.
    pub settlement_window_secs: u64,
    pub gas: GasPrices,
}

impl Default for PriceParams {
    fn default() -> Self {
        Self {
            primary_store_price: 870_000_000_000_000_000,
            secondary_store_price: 145_000_000_000_000_000,
            secondary_sp_count: 6,
            read_price: 40_000_000_000_000_000,
            validator_tax_bps: 100,
            min_charge_size: 128 * 1024,
            reserve_time_secs: DEFAULT_RESERVE_TIME_SECS,
            free_quota_bytes: 1024 * 1024 * 1024,
            settlement_window_secs: 7 * 24 * 60 * 60,
            gas: GasPrices {
                create_object: Amount::from_base_units(12_000_000_000_000),
                grant_allowance: Amount::from_base_units(6_000_000_000_000),
                put_policy: Amount::from_base_units(24_000_000_000_000),
            },
        }
    }
}

/// Pricing collaborator: turns resource sizes into charge rates.
///
/// `netflow_rate` must be non-decreasing in `size`; the fee engine's
/// monotonicity relies on it.
pub trait PricingProvider: Send + Sync {
    /// Storage charge rate for an object of `size` bytes.
    fn netflow_rate(&self, size: u64, params: &PriceParams) -> FlowRate;

    /// Charge rate for `quota_bytes` of purchased download quota.
    fn quota_rate(&self, quota_bytes: u64, params: &PriceParams) -> FlowRate;

    /// Reserve against price drift for a bucket currently flowing at
    /// `bucket_rate`. Independent of how many objects are uploaded.
    fn settlement_fee(&self, bucket_rate: FlowRate, params: &PriceParams) -> Amount;
}

/// Default formulas used by the storage network.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetflowPricing;

impl NetflowPricing {
    fn with_tax(rate: u128, params: &PriceParams) -> u128 {
        let tax = rate.saturating_mul(params.validator_tax_bps as u128) / 10_000;
        rate.saturating_add(tax)
    }
}

impl PricingProvider for NetflowPricing {
    fn netflow_rate(&self, size: u64, params: &PriceParams) -> FlowRate {
        let charge_size = size.max(params.min_charge_size) as u128;
        let per_byte = params.primary_store_price.saturating_add(
            params
                .secondary_store_price
                .saturating_mul(params.secondary_sp_count as u128),
        );
        FlowRate(Self::with_tax(per_byte.saturating_mul(charge_size), params))
    }

    fn quota_rate(&self, quota_bytes: u64, params: &PriceParams) -> FlowRate {
        let billable = quota_bytes.saturating_sub(params.free_quota_bytes) as u128;
        FlowRate(Self::with_tax(
            params.read_price.saturating_mul(billable),
            params,
        ))
    }

    fn settlement_fee(&self, bucket_rate: FlowRate, params: &PriceParams) -> Amount {
        bucket_rate.over(params.settlement_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_objects_charged_at_minimum() {
        let p = PriceParams::default();
        let tiny = NetflowPricing.netflow_rate(1, &p);
        let min = NetflowPricing.netflow_rate(p.min_charge_size, &p);
        assert_eq!(tiny, min);
        assert!(tiny > FlowRate::ZERO);
    }

    #[test]
    fn rate_is_non_decreasing_in_size() {
        let p = PriceParams::default();
        let mut last = FlowRate::ZERO;
        for size in [0u64, 1, 128 * 1024, 1 << 20, 10 << 20, 256 << 20] {
            let rate = NetflowPricing.netflow_rate(size, &p);
            assert!(rate >= last);
            last = rate;
        }
        assert!(
            NetflowPricing.netflow_rate(2 << 20, &p) > NetflowPricing.netflow_rate(1 << 20, &p)
        );
    }

    #[test]
    fn tax_is_applied() {
        let mut p = PriceParams::default();
        p.validator_tax_bps = 0;
        let untaxed = NetflowPricing.netflow_rate(1 << 20, &p);
        p.validator_tax_bps = 100;
        let taxed = NetflowPricing.netflow_rate(1 << 20, &p);
        assert_eq!(taxed.0, untaxed.0 + untaxed.0 / 100);
    }

    #[test]
    fn free_quota_is_not_charged() {
        let p = PriceParams::default();
        assert_eq!(NetflowPricing.quota_rate(p.free_quota_bytes, &p), FlowRate::ZERO);
        assert!(NetflowPricing.quota_rate(p.free_quota_bytes + 1, &p) > FlowRate::ZERO);
    }

    #[test]
    fn settlement_scales_with_bucket_rate() {
        let p = PriceParams::default();
        let rate = NetflowPricing.netflow_rate(1 << 30, &p);
        let fee = NetflowPricing.settlement_fee(rate, &p);
        assert_eq!(fee, rate.over(p.settlement_window_secs));
        assert_eq!(NetflowPricing.settlement_fee(FlowRate::ZERO, &p), Amount::ZERO);
    }

    #[test]
    fn max_object_fee_does_not_saturate() {
        let p = PriceParams::default();
        let rate = NetflowPricing.netflow_rate(256 << 20, &p);
        let fee = rate.over(p.reserve_time_secs);
        assert!(fee.base_units() < u128::MAX / 1_000_000);
    }
}
