//! Fixed-point arithmetic
//!
//! 18-decimal fixed point over 256-bit unsigned integers. Every operation is
//! checked: intermediate overflow is reported as [`LendingError::ArithmeticOverflow`]
//! and a zero divisor as [`LendingError::DivisionByZero`]. Products and
//! quotients truncate toward zero.

use alloy_primitives::U256;

use crate::constants::{WAD, WAD_DECIMALS};
use crate::{LendingError, Result};

/// `n` whole units in fixed point
pub fn wad(n: u64) -> U256 {
    U256::from(n) * WAD
}

/// `a * b / 1e18`
pub fn mul_fixed(a: U256, b: U256) -> Result<U256> {
    mul_div(a, b, WAD)
}

/// `a * 1e18 / b`
pub fn div_fixed(a: U256, b: U256) -> Result<U256> {
    mul_div(a, WAD, b)
}

/// `a * b / c`
pub fn mul_div(a: U256, b: U256, c: U256) -> Result<U256> {
    if c.is_zero() {
        return Err(LendingError::DivisionByZero);
    }
    let product = a.checked_mul(b).ok_or(LendingError::ArithmeticOverflow)?;
    Ok(product / c)
}

/// `a * b / c`, rounded up
pub fn mul_div_up(a: U256, b: U256, c: U256) -> Result<U256> {
    if c.is_zero() {
        return Err(LendingError::DivisionByZero);
    }
    let product = a.checked_mul(b).ok_or(LendingError::ArithmeticOverflow)?;
    let quotient = product / c;
    if (product % c).is_zero() {
        Ok(quotient)
    } else {
        checked_add(quotient, U256::from(1u64))
    }
}

pub fn checked_add(a: U256, b: U256) -> Result<U256> {
    a.checked_add(b).ok_or(LendingError::ArithmeticOverflow)
}

pub fn checked_sub(a: U256, b: U256) -> Result<U256> {
    a.checked_sub(b).ok_or(LendingError::ArithmeticOverflow)
}

/// Growth factor of a per-second rate over `dt` seconds: `1e18 + rate * dt`
pub fn compound_linear(rate_per_second: U256, dt: u64) -> Result<U256> {
    let growth = rate_per_second
        .checked_mul(U256::from(dt))
        .ok_or(LendingError::ArithmeticOverflow)?;
    checked_add(WAD, growth)
}

/// `10^decimals`
pub fn pow10(decimals: u8) -> Result<U256> {
    let ten = U256::from(10u64);
    let mut result = U256::from(1u64);
    for _ in 0..decimals {
        result = result.checked_mul(ten).ok_or(LendingError::ArithmeticOverflow)?;
    }
    Ok(result)
}

/// Value of `amount` token units (with `decimals`) at an 18-decimal `price`
pub fn to_value(amount: U256, price: U256, decimals: u8) -> Result<U256> {
    mul_div(amount, price, pow10(decimals)?)
}

/// Token units worth `value` at `price`; inverse of [`to_value`]
pub fn from_value(value: U256, price: U256, decimals: u8) -> Result<U256> {
    mul_div(value, pow10(decimals)?, price)
}

/// Parse a decimal string such as `"0.75"` or `"12"` into fixed point.
///
/// At most 18 fractional digits are accepted.
pub fn parse_fraction(input: &str) -> Result<U256> {
    let input = input.trim();
    let (whole, frac) = match input.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (input, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(LendingError::invalid_config(format!(
            "'{}' is not a decimal number",
            input
        )));
    }
    if frac.len() > WAD_DECIMALS as usize {
        return Err(LendingError::invalid_config(format!(
            "'{}' has more than {} decimals",
            input, WAD_DECIMALS
        )));
    }

    let whole = parse_digits(whole, input)?;
    let scale = pow10(WAD_DECIMALS - frac.len() as u8)?;
    let frac = parse_digits(frac, input)?
        .checked_mul(scale)
        .ok_or(LendingError::ArithmeticOverflow)?;

    let whole = whole.checked_mul(WAD).ok_or(LendingError::ArithmeticOverflow)?;
    checked_add(whole, frac)
}

fn parse_digits(digits: &str, input: &str) -> Result<U256> {
    let ten = U256::from(10u64);
    digits.chars().try_fold(U256::ZERO, |acc, c| {
        let digit = c.to_digit(10).ok_or_else(|| {
            LendingError::invalid_config(format!("'{}' is not a decimal number", input))
        })?;
        acc.checked_mul(ten)
            .and_then(|v| v.checked_add(U256::from(digit)))
            .ok_or(LendingError::ArithmeticOverflow)
    })
}

/// Render fixed point as a decimal string, trimming trailing zeros
pub fn format_fraction(value: U256) -> String {
    let whole = value / WAD;
    let frac = value % WAD;
    if frac.is_zero() {
        return whole.to_string();
    }
    let digits = frac.to_string();
    let padded = format!(
        "{}{}",
        "0".repeat(WAD_DECIMALS as usize - digits.len()),
        digits
    );
    format!("{}.{}", whole, padded.trim_end_matches('0'))
}

/// Serde adapter storing fixed-point fractions as decimal strings
pub mod fraction {
    use alloy_primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_fraction(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_fraction(&raw).map_err(serde::de::Error::custom)
    }
}
