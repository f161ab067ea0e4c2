// src/trigger/interval.rs

//! Interval mini-language for periodic triggers.
//!
//! A trigger reference is free-form text. The first `UNIT:INTEGER` token in
//! it configures the period, e.g. `"check disk every S:30"` fires every 30
//! seconds. Units: `MS`, `S`, `M`, `H`, `D` (case-insensitive). No token means
//! the trigger is purely event driven.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::errors::{Result, TreeError};

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"([A-Za-z]+):(\d+)").expect("static interval regex"))
}

fn unit_millis(unit: &str) -> Option<u64> {
    match unit {
        "MS" => Some(1),
        "S" => Some(1_000),
        "M" => Some(60_000),
        "H" => Some(3_600_000),
        "D" => Some(86_400_000),
        _ => None,
    }
}

/// Parse the period out of a trigger reference string.
///
/// Returns `Ok(None)` when the string carries no `UNIT:INTEGER` token or the
/// period is zero. A token whose unit is not one of the known units is a
/// configuration error.
pub fn parse_interval(reference: &str) -> Result<Option<Duration>> {
    let Some(caps) = token_regex().captures(reference) else {
        return Ok(None);
    };

    let unit = caps[1].to_uppercase();
    let digits = &caps[2];

    let err = |reason: String| TreeError::Interval {
        reference: reference.to_string(),
        reason,
    };

    let multiplier = unit_millis(&unit).ok_or_else(|| {
        err(format!(
            "unsupported interval unit '{unit}'; expected MS, S, M, H or D"
        ))
    })?;

    let value: u64 = digits
        .parse()
        .map_err(|e| err(format!("invalid interval number '{digits}': {e}")))?;

    let millis = value
        .checked_mul(multiplier)
        .ok_or_else(|| err(format!("interval {unit}:{value} overflows")))?;

    if millis == 0 {
        return Ok(None);
    }
    Ok(Some(Duration::from_millis(millis)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(s: &str) -> Option<u128> {
        parse_interval(s).unwrap().map(|d| d.as_millis())
    }

    #[test]
    fn known_units_scale() {
        assert_eq!(ms("S:1"), Some(1_000));
        assert_eq!(ms("H:2"), Some(7_200_000));
        assert_eq!(ms("D:1"), Some(86_400_000));
        assert_eq!(ms("MS:50"), Some(50));
        assert_eq!(ms("m:3"), Some(180_000));
    }

    #[test]
    fn first_token_wins_inside_free_text() {
        assert_eq!(ms("poll S:5 or else H:1"), Some(5_000));
    }

    #[test]
    fn no_token_means_event_driven() {
        assert_eq!(ms(""), None);
        assert_eq!(ms("LogicalChanged"), None);
        assert_eq!(ms("S:0"), None);
    }

    #[test]
    fn unknown_unit_is_config_error() {
        let err = parse_interval("W:3").unwrap_err();
        assert!(matches!(err, TreeError::Interval { .. }));
    }

    #[test]
    fn overflow_is_reported() {
        assert!(parse_interval("D:99999999999999999").is_err());
    }
}
