//! Parsers for the system-level commands: version, manufacturing info,
//! CPU, and memory.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ParseFailure, ParseFailureReason};
use crate::snapshot::{CpuStats, DeviceIdentity, MemoryStats, VersionInfo};

use super::{Parsed, capture_f64, capture_str, capture_u64, clamp_percent, guard};

fn re(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(err) => panic!("invalid parser regex {pattern:?}: {err}"),
    }
}

static UPTIME: Lazy<Regex> = Lazy::new(|| re(r"(?i)uptime is\s+(.+)"));
static SOFTWARE: Lazy<Regex> = Lazy::new(|| re(r"(?i)software,?\s+version\s+(.+)"));
static HARDWARE: Lazy<Regex> = Lazy::new(|| re(r"(?i)hardware\s+version\s+(?:is\s+)?(\S+)"));
static BOOTROM: Lazy<Regex> = Lazy::new(|| re(r"(?i)boot(?:rom)?\s+version\s+(?:is\s+)?(\S+)"));

/// Parses `display version`.
pub fn parse_version(raw: &str) -> Result<Parsed<VersionInfo>, ParseFailure> {
    guard(raw)?;
    let info = VersionInfo {
        uptime: capture_str(&UPTIME, raw),
        software_version: capture_str(&SOFTWARE, raw),
        hardware_version: capture_str(&HARDWARE, raw),
        bootrom_version: capture_str(&BOOTROM, raw),
    };
    if info == VersionInfo::default() {
        return Err(ParseFailure::new(
            ParseFailureReason::UnrecognizedFormat,
            raw,
        ));
    }
    Ok(Parsed::new(info))
}

static DEVICE_NAME: Lazy<Regex> = Lazy::new(|| re(r"(?im)^\s*DEVICE_NAME\s*:\s*(.+)$"));
static SERIAL: Lazy<Regex> = Lazy::new(|| re(r"(?im)^\s*DEVICE_SERIAL_NUMBER\s*:\s*(.+)$"));
static MAC: Lazy<Regex> = Lazy::new(|| re(r"(?im)^\s*MAC_ADDRESS\s*:\s*(.+)$"));
static MANUFACTURED: Lazy<Regex> = Lazy::new(|| re(r"(?im)^\s*MANUFACTURING_DATE\s*:\s*(.+)$"));
static VENDOR: Lazy<Regex> = Lazy::new(|| re(r"(?im)^\s*VENDOR_NAME\s*:\s*(.+)$"));

/// Parses `display device manuinfo`.
pub fn parse_manuinfo(raw: &str) -> Result<Parsed<DeviceIdentity>, ParseFailure> {
    guard(raw)?;
    let identity = DeviceIdentity {
        model: capture_str(&DEVICE_NAME, raw),
        serial_number: capture_str(&SERIAL, raw),
        mac_address: capture_str(&MAC, raw),
        manufacturing_date: capture_str(&MANUFACTURED, raw),
        vendor: capture_str(&VENDOR, raw),
    };
    if identity == DeviceIdentity::default() {
        return Err(ParseFailure::new(
            ParseFailureReason::UnrecognizedFormat,
            raw,
        ));
    }
    Ok(Parsed::new(identity))
}

static CPU_5SEC: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)(\d+(?:\.\d+)?)\s*%\s+in\s+last\s+5\s+seconds"));
static CPU_1MIN: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)(\d+(?:\.\d+)?)\s*%\s+in\s+last\s+1\s+minute"));
static CPU_5MIN: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)(\d+(?:\.\d+)?)\s*%\s+in\s+last\s+5\s+minutes"));
/// Fallback for builds that print a single overall figure.
static CPU_OVERALL: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)cpu\s+(?:usage|utilization)\s*:\s*(\d+(?:\.\d+)?)\s*%"));

/// Parses `display cpu-usage`.
pub fn parse_cpu_usage(raw: &str) -> Result<Parsed<CpuStats>, ParseFailure> {
    guard(raw)?;
    let mut suspect = false;
    let mut take = |re: &Regex| {
        capture_f64(re, raw).map(|v| {
            let (clamped, out_of_range) = clamp_percent(v);
            suspect |= out_of_range;
            clamped
        })
    };
    let mut stats = CpuStats {
        five_sec_percent: take(&CPU_5SEC),
        one_min_percent: take(&CPU_1MIN),
        five_min_percent: take(&CPU_5MIN),
        suspect: false,
    };
    if stats.five_sec_percent.is_none() {
        stats.five_sec_percent = take(&CPU_OVERALL);
    }
    stats.suspect = suspect;

    if stats.five_sec_percent.is_none()
        && stats.one_min_percent.is_none()
        && stats.five_min_percent.is_none()
    {
        return Err(ParseFailure::new(
            ParseFailureReason::UnrecognizedFormat,
            raw,
        ));
    }
    let mut parsed = Parsed::new(stats);
    if suspect {
        parsed
            .warnings
            .push("cpu reading outside 0..=100, clamped".to_string());
    }
    Ok(parsed)
}

static MEM_TOTAL: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)total\s+memory\s*\(bytes\)\s*:\s*(\d+)"));
static MEM_TOTAL_PLAIN: Lazy<Regex> = Lazy::new(|| re(r"(?im)^\s*total\s*:\s*(\d+)"));
static MEM_USED: Lazy<Regex> = Lazy::new(|| re(r"(?i)used\s+memory\s*\(bytes\)\s*:\s*(\d+)"));
static MEM_USED_PLAIN: Lazy<Regex> = Lazy::new(|| re(r"(?im)^\s*used\s*:\s*(\d+)"));
static MEM_FREE: Lazy<Regex> = Lazy::new(|| re(r"(?i)free\s+memory\s*\(bytes\)\s*:\s*(\d+)"));
static MEM_FREE_PLAIN: Lazy<Regex> = Lazy::new(|| re(r"(?im)^\s*free\s*:\s*(\d+)"));
static MEM_RATE: Lazy<Regex> = Lazy::new(|| re(r"(?i)used\s+rate\s*:\s*(\d+(?:\.\d+)?)\s*%"));
static MEM_RATE_PLAIN: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)(\d+(?:\.\d+)?)\s*%\s*(?:used|usage)"));

/// Parses `display memory`.
///
/// Firmware that omits the free figure gets it derived by subtraction. When
/// all three figures are printed and used + free disagrees with total beyond
/// rounding tolerance, the record is flagged suspect instead of rejected.
pub fn parse_memory(raw: &str) -> Result<Parsed<MemoryStats>, ParseFailure> {
    guard(raw)?;
    let total = capture_u64(&MEM_TOTAL, raw).or_else(|| capture_u64(&MEM_TOTAL_PLAIN, raw));
    let used = capture_u64(&MEM_USED, raw).or_else(|| capture_u64(&MEM_USED_PLAIN, raw));
    let mut free = capture_u64(&MEM_FREE, raw).or_else(|| capture_u64(&MEM_FREE_PLAIN, raw));
    let mut percent = capture_f64(&MEM_RATE, raw).or_else(|| capture_f64(&MEM_RATE_PLAIN, raw));

    let mut warnings = Vec::new();
    let mut suspect = false;

    if let (Some(total), Some(used), Some(free)) = (total, used, free) {
        let tolerance = (total / 100).max(4096);
        if (used + free).abs_diff(total) > tolerance {
            suspect = true;
            warnings.push(format!(
                "used ({used}) + free ({free}) deviates from total ({total})"
            ));
        }
    } else if let (Some(total), Some(used), None) = (total, used, free) {
        free = Some(total.saturating_sub(used));
    }

    if percent.is_none()
        && let (Some(total), Some(used)) = (total, used)
        && total > 0
    {
        percent = Some((used as f64 / total as f64) * 100.0);
    }
    if let Some(raw_percent) = percent {
        let (clamped, out_of_range) = clamp_percent(raw_percent);
        percent = Some(clamped);
        if out_of_range {
            suspect = true;
            warnings.push("memory usage percentage outside 0..=100, clamped".to_string());
        }
    }

    let stats = MemoryStats {
        total_bytes: total,
        used_bytes: used,
        free_bytes: free,
        used_percent: percent,
        suspect,
    };
    if stats.total_bytes.is_none()
        && stats.used_bytes.is_none()
        && stats.free_bytes.is_none()
        && stats.used_percent.is_none()
    {
        return Err(ParseFailure::new(
            ParseFailureReason::UnrecognizedFormat,
            raw,
        ));
    }
    Ok(Parsed::with_warnings(stats, warnings))
}
