//! Parsers for the environmental commands: fans and temperature sensors.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ParseFailure, ParseFailureReason};
use crate::snapshot::{FanStatus, TemperatureReading};

use super::{Parsed, capture_f64, guard};

fn re(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(err) => panic!("invalid parser regex {pattern:?}: {err}"),
    }
}

static FAN_ROW: Lazy<Regex> =
    Lazy::new(|| re(r"(?im)^\s*fan\s*(\d+)\s*(?:state)?\s*:\s*(\w+)"));
static FAN_MARKER: Lazy<Regex> = Lazy::new(|| re(r"(?i)\bfan\b"));

/// Parses `display fan`.
pub fn parse_fan(raw: &str) -> Result<Parsed<Vec<FanStatus>>, ParseFailure> {
    guard(raw)?;
    let mut fans = Vec::new();
    let mut warnings = Vec::new();
    for caps in FAN_ROW.captures_iter(raw) {
        let Some(id) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) else {
            continue;
        };
        let state = caps
            .get(2)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let operational =
            state.eq_ignore_ascii_case("normal") || state.eq_ignore_ascii_case("ok");
        if fans.iter().any(|f: &FanStatus| f.id == id) {
            warnings.push(format!("duplicate row for fan {id}, later row wins"));
            fans.retain(|f: &FanStatus| f.id != id);
        }
        fans.push(FanStatus {
            id,
            operational,
            state,
        });
    }
    if fans.is_empty() && !FAN_MARKER.is_match(raw) {
        return Err(ParseFailure::new(
            ParseFailureReason::UnrecognizedFormat,
            raw,
        ));
    }
    Ok(Parsed::with_warnings(fans, warnings))
}

/// A sensor table row: label text followed by three or four numeric columns
/// (current, [lower,] warning, alarm).
static SENSOR_ROW: Lazy<Regex> = Lazy::new(|| {
    re(r"(?m)^\s*(\S.*?)\s+(-?\d+(?:\.\d+)?)\s+(-?\d+(?:\.\d+)?)\s+(-?\d+(?:\.\d+)?)(?:\s+(-?\d+(?:\.\d+)?))?\s*$")
});
/// Fallback for builds that print one overall figure.
static TEMP_SINGLE: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)temp(?:erature)?\s*:\s*(-?\d+(?:\.\d+)?)"));
static TEMP_MARKER: Lazy<Regex> = Lazy::new(|| re(r"(?i)\btemp(?:erature)?\b"));

/// Parses `display environment`.
pub fn parse_environment(raw: &str) -> Result<Parsed<Vec<TemperatureReading>>, ParseFailure> {
    guard(raw)?;
    let mut readings = Vec::new();
    for caps in SENSOR_ROW.captures_iter(raw) {
        let label = match caps.get(1) {
            Some(m) => m.as_str().trim().to_string(),
            None => continue,
        };
        let mut numbers: Vec<f64> = (2usize..=5)
            .filter_map(|i| caps.get(i))
            .filter_map(|m| m.as_str().parse().ok())
            .collect();
        // Four columns means a lower limit is present between the current
        // value and the warning limit; it is not part of the data model.
        if numbers.len() == 4 {
            numbers.remove(1);
        }
        let mut numbers = numbers.into_iter();
        readings.push(TemperatureReading {
            label,
            celsius: numbers.next(),
            warning_limit: numbers.next(),
            alarm_limit: numbers.next(),
        });
    }

    if readings.is_empty()
        && let Some(celsius) = capture_f64(&TEMP_SINGLE, raw)
    {
        readings.push(TemperatureReading {
            label: "system".to_string(),
            celsius: Some(celsius),
            warning_limit: None,
            alarm_limit: None,
        });
    }

    if readings.is_empty() && !TEMP_MARKER.is_match(raw) {
        return Err(ParseFailure::new(
            ParseFailureReason::UnrecognizedFormat,
            raw,
        ));
    }
    Ok(Parsed::new(readings))
}
