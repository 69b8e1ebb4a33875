//! Parsers for the counted tables: MAC addresses, ARP entries, VLANs, and
//! LLDP neighbors.
//!
//! Only the aggregate counts are contractual; individual rows are kept as
//! optional detail. When the device prints a trailer count ("N mac
//! address(es) found") it is preferred over counting rows, with a warning
//! when the two disagree.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ParseFailure, ParseFailureReason};
use crate::snapshot::{ArpEntry, ArpTable, LldpNeighbor, MacEntry, MacTable, VlanTable};

use super::{PORT_TOKEN, Parsed, guard};

fn re(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(err) => panic!("invalid parser regex {pattern:?}: {err}"),
    }
}

static MAC_ROW: Lazy<Regex> = Lazy::new(|| {
    re(r"(?im)^\s*([0-9a-f]{4}[-.][0-9a-f]{4}[-.][0-9a-f]{4})\s+(\d+)\s+(\S+)\s+(\S+)")
});
static MAC_TRAILER: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)(\d+)\s+mac\s+address(?:\(es\))?\s+found"));
static MAC_MARKER: Lazy<Regex> = Lazy::new(|| re(r"(?i)\bmac\b"));

/// Parses `display mac-address`.
pub fn parse_mac_table(raw: &str) -> Result<Parsed<MacTable>, ParseFailure> {
    guard(raw)?;
    let entries: Vec<MacEntry> = MAC_ROW
        .captures_iter(raw)
        .map(|caps| MacEntry {
            mac: caps[1].to_string(),
            vlan: caps[2].parse().ok(),
            state: Some(caps[3].to_string()),
            port: Some(caps[4].to_string()),
        })
        .collect();
    let trailer = MAC_TRAILER
        .captures(raw)
        .and_then(|caps| caps[1].parse::<u32>().ok());

    if entries.is_empty() && trailer.is_none() && !MAC_MARKER.is_match(raw) {
        return Err(ParseFailure::new(
            ParseFailureReason::UnrecognizedFormat,
            raw,
        ));
    }

    let mut warnings = Vec::new();
    let count = match trailer {
        Some(reported) => {
            if reported as usize != entries.len() && !entries.is_empty() {
                warnings.push(format!(
                    "device reports {reported} entries but {} rows parsed",
                    entries.len()
                ));
            }
            reported
        }
        None => entries.len() as u32,
    };
    Ok(Parsed::with_warnings(MacTable { count, entries }, warnings))
}

static ARP_ROW: Lazy<Regex> = Lazy::new(|| {
    re(r"(?im)^\s*(\d{1,3}(?:\.\d{1,3}){3})\s+([0-9a-f]{4}[-.][0-9a-f]{4}[-.][0-9a-f]{4})(?:\s+(\d+))?(?:\s+(\S+))?")
});
static ARP_TRAILER: Lazy<Regex> = Lazy::new(|| re(r"(?i)(\d+)\s+entr(?:y|ies)\s+found"));
static ARP_MARKER: Lazy<Regex> = Lazy::new(|| re(r"(?i)\barp\b|\bip\s+address\b"));

/// Parses `display arp`.
pub fn parse_arp_table(raw: &str) -> Result<Parsed<ArpTable>, ParseFailure> {
    guard(raw)?;
    let entries: Vec<ArpEntry> = ARP_ROW
        .captures_iter(raw)
        .map(|caps| ArpEntry {
            ip: caps[1].to_string(),
            mac: caps[2].to_string(),
            vlan: caps.get(3).and_then(|m| m.as_str().parse().ok()),
            interface: caps.get(4).map(|m| m.as_str().to_string()),
        })
        .collect();
    let trailer = ARP_TRAILER
        .captures(raw)
        .and_then(|caps| caps[1].parse::<u32>().ok());

    if entries.is_empty() && trailer.is_none() && !ARP_MARKER.is_match(raw) {
        return Err(ParseFailure::new(
            ParseFailureReason::UnrecognizedFormat,
            raw,
        ));
    }

    let mut warnings = Vec::new();
    let count = match trailer {
        Some(reported) => {
            if reported as usize != entries.len() && !entries.is_empty() {
                warnings.push(format!(
                    "device reports {reported} entries but {} rows parsed",
                    entries.len()
                ));
            }
            reported
        }
        None => entries.len() as u32,
    };
    Ok(Parsed::with_warnings(ArpTable { count, entries }, warnings))
}

static VLAN_ROW: Lazy<Regex> = Lazy::new(|| re(r"(?im)^\s*vlan(?:\s+id\s*:\s*|\s+)(\d+)\b"));
static VLAN_MARKER: Lazy<Regex> = Lazy::new(|| re(r"(?i)\bvlan\b"));

/// Parses `display vlan all`.
pub fn parse_vlan_table(raw: &str) -> Result<Parsed<VlanTable>, ParseFailure> {
    guard(raw)?;
    let mut ids: Vec<u16> = Vec::new();
    let mut warnings = Vec::new();
    for caps in VLAN_ROW.captures_iter(raw) {
        let Ok(id) = caps[1].parse::<u16>() else {
            continue;
        };
        if ids.contains(&id) {
            warnings.push(format!("duplicate block for VLAN {id}"));
        } else {
            ids.push(id);
        }
    }
    if ids.is_empty() && !VLAN_MARKER.is_match(raw) {
        return Err(ParseFailure::new(
            ParseFailureReason::UnrecognizedFormat,
            raw,
        ));
    }
    let table = VlanTable {
        count: ids.len() as u32,
        ids,
    };
    Ok(Parsed::with_warnings(table, warnings))
}

static LLDP_MARKER: Lazy<Regex> = Lazy::new(|| re(r"(?i)\blldp\b|\bneighbor\b"));

/// Parses `display lldp neighbor-information brief`.
pub fn parse_lldp_neighbors(raw: &str) -> Result<Parsed<Vec<LldpNeighbor>>, ParseFailure> {
    guard(raw)?;
    let mut neighbors = Vec::new();
    for line in raw.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&local, rest)) = tokens.split_first() else {
            continue;
        };
        if !PORT_TOKEN.is_match(local) || rest.len() < 2 {
            continue;
        }
        neighbors.push(LldpNeighbor {
            local_port: local.to_string(),
            neighbor_device: rest[0].to_string(),
            neighbor_port: rest[1].to_string(),
        });
    }
    if neighbors.is_empty() && !LLDP_MARKER.is_match(raw) {
        return Err(ParseFailure::new(
            ParseFailureReason::UnrecognizedFormat,
            raw,
        ));
    }
    Ok(Parsed::new(neighbors))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC_OUTPUT: &str = "\
MAC ADDR        VLAN ID  STATE     PORT INDEX                AGING TIME(s)
3863-bbc1-0001  1        Learned   GigabitEthernet1/0/5      AGING
3863-bbc1-0002  1        Learned   GigabitEthernet1/0/7      AGING

  ---  2 mac address(es) found  ---";

    #[test]
    fn mac_rows_and_trailer_agree() {
        let parsed = parse_mac_table(MAC_OUTPUT).expect("parse");
        assert_eq!(parsed.value.count, 2);
        assert_eq!(parsed.value.entries.len(), 2);
        assert!(parsed.warnings.is_empty());
        assert_eq!(parsed.value.entries[0].mac, "3863-bbc1-0001");
        assert_eq!(
            parsed.value.entries[0].port.as_deref(),
            Some("GigabitEthernet1/0/5")
        );
    }

    #[test]
    fn mac_trailer_wins_over_row_count_with_warning() {
        let raw = "\
MAC ADDR        VLAN ID  STATE     PORT INDEX
3863-bbc1-0001  1        Learned   GigabitEthernet1/0/5
  ---  5 mac address(es) found  ---";
        let parsed = parse_mac_table(raw).expect("parse");
        assert_eq!(parsed.value.count, 5);
        assert_eq!(parsed.warnings.len(), 1);
    }

    #[test]
    fn empty_mac_table_counts_zero() {
        let raw = "MAC ADDR  VLAN ID  STATE  PORT INDEX\n  ---  0 mac address(es) found  ---";
        let parsed = parse_mac_table(raw).expect("parse");
        assert_eq!(parsed.value.count, 0);
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn arp_rows_parse() {
        let raw = "\
  Type: S-Static   D-Dynamic
  IP Address      MAC Address     VLAN ID  Interface                Aging Type
  192.168.1.10    3863-bbc1-0002  1        GE1/0/5                  18     D
  192.168.1.44    0016-eca3-0f21  1        GE1/0/9                  11     D
---   2 entries found   ---";
        let parsed = parse_arp_table(raw).expect("parse");
        assert_eq!(parsed.value.count, 2);
        assert_eq!(parsed.value.entries[0].ip, "192.168.1.10");
        assert_eq!(parsed.value.entries[0].mac, "3863-bbc1-0002");
        assert_eq!(parsed.value.entries[0].vlan, Some(1));
        assert_eq!(parsed.value.entries[0].interface.as_deref(), Some("GE1/0/5"));
    }

    #[test]
    fn vlan_blocks_count_unique_ids() {
        let raw = "\
 VLAN ID: 1
 VLAN Type: static
 Route Interface: configured
 VLAN ID: 10
 VLAN Type: static
 VLAN ID: 10";
        let parsed = parse_vlan_table(raw).expect("parse");
        assert_eq!(parsed.value.count, 2);
        assert_eq!(parsed.value.ids, vec![1, 10]);
        assert_eq!(parsed.warnings.len(), 1);
    }

    #[test]
    fn vlan_inline_form_parses() {
        let raw = "VLAN 1: default\nVLAN 20: cameras";
        let parsed = parse_vlan_table(raw).expect("parse");
        assert_eq!(parsed.value.ids, vec![1, 20]);
    }

    #[test]
    fn lldp_rows_parse() {
        let raw = "\
LLDP neighbor-information of port 1[GE1/0/1]:
Local Port   System Name   Port ID
GE1/0/1      core-sw       GE0/0/24
GE1/0/2      ap-office     eth0";
        let neighbors = parse_lldp_neighbors(raw).expect("parse").value;
        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].local_port, "GE1/0/1");
        assert_eq!(neighbors[0].neighbor_device, "core-sw");
        assert_eq!(neighbors[0].neighbor_port, "GE0/0/24");
    }

    #[test]
    fn counted_tables_fail_on_garbage_and_empty() {
        let parsers: [fn(&str) -> Result<(), ParseFailure>; 4] = [
            |raw| parse_mac_table(raw).map(|_| ()),
            |raw| parse_arp_table(raw).map(|_| ()),
            |raw| parse_vlan_table(raw).map(|_| ()),
            |raw| parse_lldp_neighbors(raw).map(|_| ()),
        ];
        for parse in parsers {
            assert_eq!(
                parse("").unwrap_err().reason,
                ParseFailureReason::EmptyOutput
            );
            assert_eq!(
                parse("xyzzy plugh").unwrap_err().reason,
                ParseFailureReason::UnrecognizedFormat
            );
        }
    }

    #[test]
    fn rejected_output_is_command_rejected() {
        let raw = " % Unrecognized command found at '^' position.";
        assert_eq!(
            parse_mac_table(raw).unwrap_err().reason,
            ParseFailureReason::CommandRejected
        );
    }
}
