//! Countdown text such as `-1:05` or `1:02:03`.

use crate::error::{ReplayError, Result};

const MULTIPLIERS: [i64; 3] = [1000, 60, 60];

/// Parse a `[-]?([H]:)?[M]:[S]` countdown into signed milliseconds.
///
/// Both ASCII `-` and U+2212 are accepted as the sign. An empty string is 0.
pub fn parse_timestamp_text(text: &str) -> Result<i64> {
    let text = text.trim();
    let (negative, body) = match text.strip_prefix('-').or_else(|| text.strip_prefix('−')) {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    if body.is_empty() {
        return Ok(0);
    }

    let groups = body
        .split(':')
        .map(|group| {
            group
                .trim()
                .parse::<i64>()
                .map_err(|_| ReplayError::parse(format!("Invalid timestamp text: {text:?}")))
        })
        .collect::<Result<Vec<_>>>()?;
    if groups.len() > MULTIPLIERS.len() {
        return Err(ReplayError::parse(format!(
            "Too many timestamp parts: {text:?}"
        )));
    }

    let overflow = || ReplayError::parse(format!("Timestamp out of range: {text:?}"));
    let mut multiplier: i64 = 1;
    let mut result: i64 = 0;
    for (value, step) in groups.iter().rev().zip(MULTIPLIERS) {
        multiplier *= step;
        result = multiplier
            .checked_mul(*value)
            .and_then(|ms| result.checked_add(ms))
            .ok_or_else(overflow)?;
    }
    Ok(if negative { -result } else { result })
}
