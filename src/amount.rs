//! Fixed-point token amounts.
//!
//! On-chain figures are integers in base units. All comparisons and balance
//! math stay in `u128`; conversion to `f64` happens only for final display.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Largest scale accepted by the conversions below.
const MAX_DECIMALS: u8 = 38;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("Amount cannot be empty")]
    Empty,
    #[error("Amount cannot be negative")]
    Negative,
    #[error("Invalid amount '{0}'")]
    Invalid(String),
    #[error("Amount has more than {decimals} decimal places")]
    TooPrecise { decimals: u8 },
    #[error("Amount is too large")]
    Overflow,
    #[error("Unsupported decimals {0}")]
    UnsupportedDecimals(u8),
}

/// An amount in base units together with its scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenAmount {
    base_units: u128,
    decimals: u8,
}

impl TokenAmount {
    pub fn from_base_units(base_units: u128, decimals: u8) -> Self {
        Self {
            base_units,
            decimals,
        }
    }

    /// Parse a display string such as `"12.5"`.
    pub fn parse(display: &str, decimals: u8) -> Result<Self, AmountError> {
        Ok(Self {
            base_units: parse_units(display, decimals)?,
            decimals,
        })
    }

    pub fn base_units(&self) -> u128 {
        self.base_units
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn is_zero(&self) -> bool {
        self.base_units == 0
    }

    /// Lossy display value. Never use this for comparisons.
    pub fn to_f64(&self) -> f64 {
        self.base_units as f64 / 10f64.powi(i32::from(self.decimals))
    }
}

/// Only amounts at the same scale are comparable.
impl PartialOrd for TokenAmount {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        (self.decimals == other.decimals).then(|| self.base_units.cmp(&other.base_units))
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_units(self.base_units, self.decimals))
    }
}

fn scale(decimals: u8) -> Result<u128, AmountError> {
    if decimals > MAX_DECIMALS {
        return Err(AmountError::UnsupportedDecimals(decimals));
    }
    Ok(10u128.pow(u32::from(decimals)))
}

/// Convert a display-unit string to base units, exactly.
///
/// `parse_units("12.5", 6) == Ok(12_500_000)`. Digits beyond `decimals`
/// are rejected rather than rounded.
pub fn parse_units(display: &str, decimals: u8) -> Result<u128, AmountError> {
    let factor = scale(decimals)?;
    let s = display.trim();
    if s.is_empty() {
        return Err(AmountError::Empty);
    }
    if s.starts_with('-') {
        return Err(AmountError::Negative);
    }
    let s = s.strip_prefix('+').unwrap_or(s);

    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(AmountError::Invalid(display.to_string()));
    }
    let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) {
        return Err(AmountError::Invalid(display.to_string()));
    }

    let frac_trimmed = frac_part.trim_end_matches('0');
    if frac_trimmed.len() > usize::from(decimals) {
        return Err(AmountError::TooPrecise { decimals });
    }

    let whole: u128 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().map_err(|_| AmountError::Overflow)?
    };

    let mut fraction: u128 = 0;
    for b in frac_trimmed.bytes() {
        fraction = fraction * 10 + u128::from(b - b'0');
    }
    let pad = u32::from(decimals) - frac_trimmed.len() as u32;
    fraction *= 10u128.pow(pad);

    whole
        .checked_mul(factor)
        .and_then(|w| w.checked_add(fraction))
        .ok_or(AmountError::Overflow)
}

/// Render base units as a display string with trailing zeros removed.
///
/// `format_units(12_500_000, 6) == "12.5"`.
pub fn format_units(base_units: u128, decimals: u8) -> String {
    let Ok(factor) = scale(decimals) else {
        return base_units.to_string();
    };
    let whole = base_units / factor;
    let fraction = base_units % factor;
    if fraction == 0 {
        return whole.to_string();
    }
    let digits = format!("{:0width$}", fraction, width = usize::from(decimals));
    format!("{whole}.{}", digits.trim_end_matches('0'))
}
