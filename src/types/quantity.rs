// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes resource quantities compared by value rather than by spelling.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A parsed quantity such as `"500m"`, `"4"` or `"8Gi"`.
///
/// The original spelling is kept for round-tripping to the API server; equality
/// and ordering use the value in thousandths of a unit, so `"1"` == `"1000m"`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Quantity {
    raw: String,
    milli: i128,
}

impl Quantity {
    /// Value in thousandths of the base unit (millicores, millibytes, ...)
    pub fn milli(&self) -> i128 {
        self.milli
    }

    /// Value in base units as a float, for pricing
    pub fn as_units(&self) -> f64 {
        self.milli as f64 / 1000.0
    }

    pub fn is_negative(&self) -> bool {
        self.milli < 0
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Build a quantity from thousandths of a unit, spelled in the shortest exact form
    pub fn from_milli(milli: i128) -> Self {
        let raw = if milli % 1000 == 0 {
            (milli / 1000).to_string()
        } else {
            format!("{}m", milli)
        };
        Self { raw, milli }
    }
}

impl Default for Quantity {
    fn default() -> Self {
        Self::from_milli(0)
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.milli == other.milli
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.milli.cmp(&other.milli)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Quantity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let milli = parse_milli(s.trim())?;
        Ok(Self {
            raw: s.trim().to_string(),
            milli,
        })
    }
}

impl TryFrom<String> for Quantity {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Quantity> for String {
    fn from(q: Quantity) -> Self {
        q.raw
    }
}

/// Multiplier for a suffix as a (numerator, denominator) pair
fn suffix_ratio(suffix: &str) -> Option<(i128, i128)> {
    let ratio = match suffix {
        "" => (1, 1),
        "n" => (1, 1_000_000_000),
        "u" => (1, 1_000_000),
        "m" => (1, 1_000),
        "k" => (1_000, 1),
        "M" => (1_000_000, 1),
        "G" => (1_000_000_000, 1),
        "T" => (1_000_000_000_000, 1),
        "P" => (1_000_000_000_000_000, 1),
        "E" => (1_000_000_000_000_000_000, 1),
        "Ki" => (1 << 10, 1),
        "Mi" => (1 << 20, 1),
        "Gi" => (1 << 30, 1),
        "Ti" => (1 << 40, 1),
        "Pi" => (1 << 50, 1),
        "Ei" => (1 << 60, 1),
        _ => {
            let exp = suffix.strip_prefix(['e', 'E'])?;
            let exp: i32 = exp.parse().ok()?;
            if exp.abs() > 18 {
                return None;
            }
            let pow = 10i128.pow(exp.unsigned_abs());
            if exp >= 0 {
                (pow, 1)
            } else {
                (1, pow)
            }
        }
    };
    Some(ratio)
}

fn parse_milli(s: &str) -> Result<i128, String> {
    if s.is_empty() {
        return Err("empty quantity".to_string());
    }

    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);

    let (negative, digits) = match number.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, number.strip_prefix('+').unwrap_or(number)),
    };

    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(format!("invalid quantity '{}': missing number", s));
    }
    if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
        return Err(format!("invalid quantity '{}': malformed number", s));
    }

    let (mul, div) =
        suffix_ratio(suffix).ok_or_else(|| format!("invalid quantity '{}': unknown suffix", s))?;

    let overflow = || format!("invalid quantity '{}': out of range", s);
    let mantissa: i128 = format!("{}{}", int_part, frac_part)
        .parse::<i128>()
        .map_err(|_| overflow())?;
    let scale = 10i128
        .checked_pow(frac_part.len() as u32)
        .ok_or_else(overflow)?;

    let numerator = mantissa
        .checked_mul(mul)
        .and_then(|v| v.checked_mul(1000))
        .ok_or_else(overflow)?;
    let denominator = scale.checked_mul(div).ok_or_else(overflow)?;

    // Sub-milli precision rounds up, matching the API server's canonicalization
    let milli = numerator
        .checked_add(denominator - 1)
        .ok_or_else(overflow)?
        / denominator;
    Ok(if negative { -milli } else { milli })
}
