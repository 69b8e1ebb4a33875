//! Parsers for the per-port tables: interface brief, PoE per-port state,
//! and the PSE power budget.
//!
//! Rows are keyed by the port-id token and the remaining cells are matched
//! by token shape, not column index, because firmware releases shuffle and
//! rename columns. A duplicated port id is a parse inconsistency: the later
//! row wins and a warning is attached.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ParseFailure, ParseFailureReason};
use crate::snapshot::{Duplex, PoeBudget, PoePort, PoePriority, Port};

use super::{PORT_TOKEN, Parsed, capture_f64, capture_u64, guard};

fn re(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(err) => panic!("invalid parser regex {pattern:?}: {err}"),
    }
}

/// Pushes `row` into `rows`, replacing (and warning about) an earlier row
/// with the same id produced by `id_of`.
fn upsert_row<T>(
    rows: &mut Vec<T>,
    warnings: &mut Vec<String>,
    id: &str,
    row: T,
    id_of: impl Fn(&T) -> &str,
) {
    if let Some(existing) = rows.iter_mut().find(|r| id_of(r) == id) {
        warnings.push(format!("duplicate row for port {id}, later row wins"));
        *existing = row;
    } else {
        rows.push(row);
    }
}

fn parse_speed_token(token: &str) -> Option<u32> {
    let token = token.trim_end_matches("(a)");
    if token.eq_ignore_ascii_case("auto") || token == "--" {
        return None;
    }
    if let Some(gig) = token
        .strip_suffix('G')
        .or_else(|| token.strip_suffix('g'))
    {
        return gig.parse::<u32>().ok().map(|v| v * 1000);
    }
    let token = token
        .strip_suffix('M')
        .or_else(|| token.strip_suffix('m'))
        .unwrap_or(token);
    token.parse().ok()
}

fn parse_duplex_token(token: &str) -> Option<Duplex> {
    match token.trim_end_matches("(a)").to_ascii_lowercase().as_str() {
        "full" => Some(Duplex::Full),
        "half" => Some(Duplex::Half),
        _ => None,
    }
}

/// Parses `display interface brief` (and the `display brief interface`
/// spelling some builds use; the output shape is the same).
pub fn parse_interface_brief(raw: &str) -> Result<Parsed<Vec<Port>>, ParseFailure> {
    guard(raw)?;
    let mut rows: Vec<Port> = Vec::new();
    let mut warnings = Vec::new();

    for line in raw.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&id, cells)) = tokens.split_first() else {
            continue;
        };
        if !PORT_TOKEN.is_match(id) {
            continue;
        }

        let mut link_up = false;
        let mut speed = None;
        let mut duplex = None;
        let mut bare_numbers: Vec<u32> = Vec::new();
        for &cell in cells {
            let lower = cell.to_ascii_lowercase();
            match lower.as_str() {
                "up" => link_up = true,
                "down" | "adm" | "stby" | "down(adm)" | "*down" => link_up = false,
                _ => {
                    if duplex.is_none()
                        && let Some(d) = parse_duplex_token(cell)
                    {
                        duplex = Some(d);
                    } else if let Ok(n) = cell.parse::<u32>() {
                        bare_numbers.push(n);
                    } else if speed.is_none()
                        && (lower.ends_with("m(a)")
                            || lower.ends_with('m')
                            || lower.ends_with("g(a)")
                            || lower.ends_with('g'))
                        && let Some(s) = parse_speed_token(cell)
                    {
                        speed = Some(s);
                    }
                }
            }
        }
        // Bare numbers are ambiguous between the speed and VLAN columns:
        // with a suffixed speed already found (or a lone number), the number
        // is the PVID; with two or more, the first is the speed.
        let vlan = match (speed, bare_numbers.len()) {
            (None, n) if n >= 2 => {
                speed = Some(bare_numbers[0]);
                bare_numbers.last().copied()
            }
            (_, n) if n >= 1 => bare_numbers.last().copied(),
            _ => None,
        };

        let port = Port {
            id: id.to_string(),
            link_up,
            speed_mbps: speed,
            duplex,
            vlan: vlan.and_then(|v| u16::try_from(v).ok()),
        };
        upsert_row(&mut rows, &mut warnings, id, port, |p| p.id.as_str());
    }

    if rows.is_empty() {
        static HEADER: Lazy<Regex> = Lazy::new(|| re(r"(?i)\binterface\b"));
        if !HEADER.is_match(raw) {
            return Err(ParseFailure::new(
                ParseFailureReason::UnrecognizedFormat,
                raw,
            ));
        }
        warnings.push("interface table contained no port rows".to_string());
    }
    Ok(Parsed::with_warnings(rows, warnings))
}

fn parse_priority_token(token: &str) -> Option<PoePriority> {
    match token.to_ascii_lowercase().as_str() {
        "critical" => Some(PoePriority::Critical),
        "high" => Some(PoePriority::High),
        "low" => Some(PoePriority::Low),
        _ => None,
    }
}

/// Parses `display poe interface`.
pub fn parse_poe_interface(raw: &str) -> Result<Parsed<Vec<PoePort>>, ParseFailure> {
    guard(raw)?;
    let mut rows: Vec<PoePort> = Vec::new();
    let mut warnings = Vec::new();

    for line in raw.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&id, cells)) = tokens.split_first() else {
            continue;
        };
        if !PORT_TOKEN.is_match(id) {
            continue;
        }

        let mut enabled = false;
        let mut delivering: Option<bool> = None;
        let mut power = None;
        let mut class = None;
        let mut priority = None;
        for &cell in cells {
            let lower = cell.to_ascii_lowercase();
            match lower.as_str() {
                "enable" | "enabled" | "on" => enabled = true,
                "disable" | "disabled" | "off" => enabled = false,
                "delivering" | "delivering-power" => delivering = Some(true),
                "searching" | "idle" | "faulty" | "detecting" => delivering = Some(false),
                "--" => {}
                _ => {
                    if priority.is_none()
                        && let Some(p) = parse_priority_token(cell)
                    {
                        priority = Some(p);
                    } else if power.is_none() && lower.contains('.') {
                        power = lower.parse::<f64>().ok();
                    } else if class.is_none()
                        && let Ok(c) = lower.parse::<u8>()
                        && c <= 8
                    {
                        class = Some(c);
                    }
                }
            }
        }
        let delivering = delivering.unwrap_or(power.is_some_and(|w| w > 0.0));

        let port = PoePort {
            id: id.to_string(),
            enabled,
            delivering,
            power_watts: power,
            class,
            priority,
        };
        upsert_row(&mut rows, &mut warnings, id, port, |p| p.id.as_str());
    }

    if rows.is_empty() {
        static HEADER: Lazy<Regex> = Lazy::new(|| re(r"(?i)\b(?:poe|interface)\b"));
        if !HEADER.is_match(raw) {
            return Err(ParseFailure::new(
                ParseFailureReason::UnrecognizedFormat,
                raw,
            ));
        }
        warnings.push("poe table contained no port rows".to_string());
    }
    Ok(Parsed::with_warnings(rows, warnings))
}

static POE_TOTAL: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)(?:maximum|total|nominal)\s+power\s*(?:\(w\))?\s*:\s*(\d+(?:\.\d+)?)")
});
static POE_USED: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)(?:consuming|used|current)\s+power\s*(?:\(w\))?\s*:\s*(\d+(?:\.\d+)?)")
});
static POE_REMAINING: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)(?:remaining|available)\s+power\s*(?:\(w\))?\s*:\s*(\d+(?:\.\d+)?)")
});
static POE_AVERAGE: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)average\s+power\s*(?:\(w\))?\s*:\s*(\d+(?:\.\d+)?)"));
static POE_PEAK: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)peak\s+power\s*(?:\(w\))?\s*:\s*(\d+(?:\.\d+)?)"));
static POE_DELIVERING: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)delivering\s+ports?\s*:\s*(\d+)"));

/// Parses `display poe power-state` (same labels as `display poe pse`).
pub fn parse_poe_budget(raw: &str) -> Result<Parsed<PoeBudget>, ParseFailure> {
    guard(raw)?;
    let budget = PoeBudget {
        total_watts: capture_f64(&POE_TOTAL, raw),
        used_watts: capture_f64(&POE_USED, raw),
        remaining_watts: capture_f64(&POE_REMAINING, raw),
        average_watts: capture_f64(&POE_AVERAGE, raw),
        peak_watts: capture_f64(&POE_PEAK, raw),
        delivering_ports: capture_u64(&POE_DELIVERING, raw).and_then(|v| u32::try_from(v).ok()),
    };
    if budget == PoeBudget::default() {
        return Err(ParseFailure::new(
            ParseFailureReason::UnrecognizedFormat,
            raw,
        ));
    }
    Ok(Parsed::new(budget))
}
