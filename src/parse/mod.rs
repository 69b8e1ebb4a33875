//! Parsers for Comware `display` command output.
//!
//! One pure function per command, each taking the raw text of that command's
//! output and returning a typed record or a [`ParseFailure`]. Parsers are
//! deliberately tolerant: field values are anchored to labels or token
//! shapes rather than column positions (firmware releases reorder columns),
//! unknown trailing lines are ignored, and missing optional fields yield
//! absent values. Only a block with no recognizable markers at all fails.

use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};

use crate::error::{ParseFailure, ParseFailureReason};

mod environment;
mod ports;
mod system;
mod tables;

pub use environment::{parse_environment, parse_fan};
pub use ports::{parse_interface_brief, parse_poe_budget, parse_poe_interface};
pub use system::{parse_cpu_usage, parse_manuinfo, parse_memory, parse_version};
pub use tables::{parse_arp_table, parse_lldp_neighbors, parse_mac_table, parse_vlan_table};

/// A successfully parsed record plus non-fatal oddities found on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<T> {
    pub value: T,
    pub warnings: Vec<String>,
}

impl<T> Parsed<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    pub(crate) fn with_warnings(value: T, warnings: Vec<String>) -> Self {
        Self { value, warnings }
    }

    /// Repackages the value, keeping the warnings.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Parsed<U> {
        Parsed {
            value: f(self.value),
            warnings: self.warnings,
        }
    }
}

/// Rejection markers a locked-down shell prints instead of data.
static REJECTED: Lazy<RegexSet> = Lazy::new(|| {
    match RegexSet::new([
        r"(?i)%\s?unrecognized\s+command",
        r"(?i)%\s?insufficient\s+privilege",
        r"(?i)%\s?permission\s+denied",
        r"(?i)%\s?wrong\s+parameter",
        r"(?i)%\s?too\s+many\s+parameters",
        r"(?i)%\s?incomplete\s+command",
    ]) {
        Ok(set) => set,
        Err(err) => panic!("invalid REJECTED regex set: {err}"),
    }
});

/// Common pre-checks shared by every parser: empty output and
/// command-rejection markers.
pub(crate) fn guard(raw: &str) -> Result<(), ParseFailure> {
    if raw.trim().is_empty() {
        return Err(ParseFailure::new(ParseFailureReason::EmptyOutput, raw));
    }
    if REJECTED.is_match(raw) {
        return Err(ParseFailure::new(ParseFailureReason::CommandRejected, raw));
    }
    Ok(())
}

pub(crate) fn capture_str(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

pub(crate) fn capture_f64(re: &Regex, text: &str) -> Option<f64> {
    capture_str(re, text).and_then(|s| s.parse().ok())
}

pub(crate) fn capture_u64(re: &Regex, text: &str) -> Option<u64> {
    capture_str(re, text).and_then(|s| s.parse().ok())
}

/// Clamps a raw percentage into 0..=100; the bool reports whether clamping
/// happened (a suspect reading, not a rejection).
pub(crate) fn clamp_percent(raw: f64) -> (f64, bool) {
    if (0.0..=100.0).contains(&raw) {
        (raw, false)
    } else {
        (raw.clamp(0.0, 100.0), true)
    }
}

/// A vendor-format port id token such as `GE1/0/3` or `GigabitEthernet1/0/3`.
pub(crate) static PORT_TOKEN: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(
        r"^(?:Ten-GigabitEthernet|GigabitEthernet|FastEthernet|Ethernet|XGE|GE|FE|Eth)\d+(?:/\d+){1,2}$",
    ) {
        Ok(re) => re,
        Err(err) => panic!("invalid PORT_TOKEN regex: {err}"),
    }
});

/// Canonicalizes the long interface-name spellings to the abbreviated form
/// used in port-keyed tables (`GigabitEthernet1/0/5` → `GE1/0/5`).
pub fn normalize_port_id(id: &str) -> String {
    let id = id.trim();
    for (long, short) in [
        ("Ten-GigabitEthernet", "XGE"),
        ("GigabitEthernet", "GE"),
        ("FastEthernet", "FE"),
        ("Ethernet", "Eth"),
    ] {
        if let Some(rest) = id.strip_prefix(long) {
            return format!("{short}{rest}");
        }
    }
    id.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_flags_empty_output() {
        let err = guard("   \r\n ").expect_err("empty should fail");
        assert_eq!(err.reason, ParseFailureReason::EmptyOutput);
    }

    #[test]
    fn guard_flags_rejection_markers() {
        let err = guard(" % Unrecognized command found at '^' position.")
            .expect_err("rejection should fail");
        assert_eq!(err.reason, ParseFailureReason::CommandRejected);
    }

    #[test]
    fn clamp_percent_reports_suspect_values() {
        assert_eq!(clamp_percent(42.0), (42.0, false));
        assert_eq!(clamp_percent(140.0), (100.0, true));
        assert_eq!(clamp_percent(-3.0), (0.0, true));
    }

    #[test]
    fn port_token_matches_expected_spellings() {
        for token in ["GE1/0/3", "XGE1/0/1", "GigabitEthernet1/0/24", "Eth1/0/2"] {
            assert!(PORT_TOKEN.is_match(token), "should match {token}");
        }
        for token in ["Vlan1", "GE", "display", "1/0/3"] {
            assert!(!PORT_TOKEN.is_match(token), "should not match {token}");
        }
    }

    #[test]
    fn normalize_port_id_shortens_long_names() {
        assert_eq!(normalize_port_id("GigabitEthernet1/0/5"), "GE1/0/5");
        assert_eq!(normalize_port_id("Ten-GigabitEthernet1/0/1"), "XGE1/0/1");
        assert_eq!(normalize_port_id("GE1/0/7"), "GE1/0/7");
    }
}
