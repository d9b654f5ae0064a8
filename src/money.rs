use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Fixed-point money in minor units (hundredths).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct Cents(pub i64);

impl Cents {
    pub const ZERO: Cents = Cents(0);

    pub const fn get(self) -> i64 {
        self.0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for Cents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseCentsError {
    Empty,
    Malformed,
    TooPrecise,
    Overflow,
}

impl fmt::Display for ParseCentsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseCentsError::Empty => f.write_str("amount is empty"),
            ParseCentsError::Malformed => f.write_str("amount is not a number"),
            ParseCentsError::TooPrecise => f.write_str("amount has more than two decimals"),
            ParseCentsError::Overflow => f.write_str("amount is too large"),
        }
    }
}

impl FromStr for Cents {
    type Err = ParseCentsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseCentsError::Empty);
        }
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(ParseCentsError::Malformed);
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(ParseCentsError::Malformed);
        }
        if frac.len() > 2 {
            return Err(ParseCentsError::TooPrecise);
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| ParseCentsError::Overflow)?
        };
        let frac: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| ParseCentsError::Malformed)? * 10,
            _ => frac.parse().map_err(|_| ParseCentsError::Malformed)?,
        };
        let value = whole
            .checked_mul(100)
            .and_then(|v| v.checked_add(frac))
            .ok_or(ParseCentsError::Overflow)?;
        Ok(Cents(if negative { -value } else { value }))
    }
}

/// An amount as it arrives in a request body: `"4.50"` or `4.5`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum AmountInput {
    Text(String),
    Number(serde_json::Number),
}

impl AmountInput {
    /// Parses a non-negative amount. Blank text means "no amount".
    pub(crate) fn to_cents(&self, field: &str) -> Result<Option<Cents>, AppError> {
        let raw = match self {
            AmountInput::Text(s) if s.trim().is_empty() => return Ok(None),
            AmountInput::Text(s) => s.trim().to_owned(),
            AmountInput::Number(n) => n.to_string(),
        };
        let cents = raw
            .parse::<Cents>()
            .map_err(|e| AppError::invalid(format!("invalid {field}: {e}")))?;
        if cents.is_negative() {
            return Err(AppError::invalid(format!("{field} cannot be negative")));
        }
        Ok(Some(cents))
    }
}

pub(crate) fn parse_optional_amount(
    input: Option<&AmountInput>,
    field: &str,
) -> Result<Option<Cents>, AppError> {
    match input {
        Some(amount) => amount.to_cents(field),
        None => Ok(None),
    }
}
