//! Interest Rate Model
//!
//! Pure functions mapping pool utilization to per-second rates.
//! No state - just calculations.

use alloy_primitives::U256;
use thermae_core::constants::{SECONDS_PER_YEAR, WAD};
use thermae_core::math::{checked_add, div_fixed, mul_div, mul_fixed};
use thermae_core::{InterestRateConfig, Result};

/// Share of the pool's assets currently lent out: `borrows / (cash + borrows)`
pub fn utilization(total_borrows: U256, cash: U256) -> Result<U256> {
    if total_borrows.is_zero() {
        return Ok(U256::ZERO);
    }
    let assets = checked_add(cash, total_borrows)?;
    Ok(div_fixed(total_borrows, assets)?.min(WAD))
}

/// Borrow rate per second on the kinked curve
///
/// Below the kink the rate climbs along `slope1`; past it along `slope2`,
/// starting from `base_rate + slope1` so the curve is continuous.
pub fn borrow_rate_per_second(utilization: U256, config: &InterestRateConfig) -> Result<U256> {
    let optimal = config.optimal_utilization;
    if utilization <= optimal {
        let climb = mul_div(config.slope1, utilization, optimal)?;
        return checked_add(config.base_rate, climb);
    }

    let excess = utilization - optimal;
    let climb = mul_div(config.slope2, excess, WAD.saturating_sub(optimal))?;
    checked_add(checked_add(config.base_rate, config.slope1)?, climb)
}

/// Deposit rate per second: what borrowers pay, spread over all deposits,
/// minus the reserve factor
pub fn deposit_rate_per_second(
    utilization: U256,
    borrow_rate: U256,
    reserve_factor: U256,
) -> Result<U256> {
    let gross = mul_fixed(borrow_rate, utilization)?;
    mul_fixed(gross, WAD.saturating_sub(reserve_factor))
}

/// Per-second rate expressed per year, for reporting
pub fn annualize(rate_per_second: U256) -> U256 {
    rate_per_second.saturating_mul(U256::from(SECONDS_PER_YEAR))
}

pub fn annual_borrow_rate(utilization: U256, config: &InterestRateConfig) -> Result<U256> {
    Ok(annualize(borrow_rate_per_second(utilization, config)?))
}

pub fn annual_deposit_rate(
    utilization: U256,
    config: &InterestRateConfig,
    reserve_factor: U256,
) -> Result<U256> {
    let borrow_rate = borrow_rate_per_second(utilization, config)?;
    Ok(annualize(deposit_rate_per_second(
        utilization,
        borrow_rate,
        reserve_factor,
    )?))
}
