//! The diagnostic command battery.
//!
//! A fixed, ordered list of `display` commands run once per poll cycle, each
//! bound to its parser and to the snapshot field it feeds. The order is part
//! of the contract: identity first, then the gauges, then the large tables,
//! so a cycle that hits its deadline degrades the cheap-to-refresh fields
//! last.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ParseFailure;
use crate::parse::{
    Parsed, parse_arp_table, parse_cpu_usage, parse_environment, parse_fan,
    parse_interface_brief, parse_lldp_neighbors, parse_mac_table, parse_manuinfo, parse_memory,
    parse_poe_budget, parse_poe_interface, parse_version, parse_vlan_table,
};
use crate::snapshot::{
    ArpTable, CpuStats, DeviceIdentity, FanStatus, LldpNeighbor, MacTable, MemoryStats, PoeBudget,
    PoePort, Port, TemperatureReading, VersionInfo, VlanTable,
};

/// Identifies one catalog command and the snapshot field it feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Version,
    ManuInfo,
    CpuUsage,
    Memory,
    InterfaceBrief,
    PoeInterface,
    PoeBudget,
    Fan,
    Environment,
    MacTable,
    VlanTable,
    ArpTable,
    LldpNeighbors,
}

/// The CLI text issued for a command kind.
pub const fn command_text(kind: CommandKind) -> &'static str {
    match kind {
        CommandKind::Version => "display version",
        CommandKind::ManuInfo => "display device manuinfo",
        CommandKind::CpuUsage => "display cpu-usage",
        CommandKind::Memory => "display memory",
        CommandKind::InterfaceBrief => "display interface brief",
        CommandKind::PoeInterface => "display poe interface",
        CommandKind::PoeBudget => "display poe power-state",
        CommandKind::Fan => "display fan",
        CommandKind::Environment => "display environment",
        CommandKind::MacTable => "display mac-address",
        CommandKind::VlanTable => "display vlan all",
        CommandKind::ArpTable => "display arp",
        CommandKind::LldpNeighbors => "display lldp neighbor-information brief",
    }
}

/// One entry of the battery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub kind: CommandKind,
    pub command: &'static str,
    /// Whether the command is hidden behind the vendor shell unlock. The
    /// restricted menu shell still answers `display version`.
    pub needs_extended: bool,
}

impl CatalogEntry {
    const fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            command: command_text(kind),
            needs_extended: !matches!(kind, CommandKind::Version),
        }
    }
}

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry::new(CommandKind::Version),
    CatalogEntry::new(CommandKind::ManuInfo),
    CatalogEntry::new(CommandKind::CpuUsage),
    CatalogEntry::new(CommandKind::Memory),
    CatalogEntry::new(CommandKind::InterfaceBrief),
    CatalogEntry::new(CommandKind::PoeInterface),
    CatalogEntry::new(CommandKind::PoeBudget),
    CatalogEntry::new(CommandKind::Fan),
    CatalogEntry::new(CommandKind::Environment),
    CatalogEntry::new(CommandKind::MacTable),
    CatalogEntry::new(CommandKind::VlanTable),
    CatalogEntry::new(CommandKind::ArpTable),
    CatalogEntry::new(CommandKind::LldpNeighbors),
];

/// The fixed command battery, in execution order.
pub fn catalog() -> &'static [CatalogEntry] {
    CATALOG
}

/// A typed record produced by one catalog command.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Version(VersionInfo),
    Identity(DeviceIdentity),
    Cpu(CpuStats),
    Memory(MemoryStats),
    Ports(Vec<Port>),
    PoePorts(Vec<PoePort>),
    PoeBudget(PoeBudget),
    Fans(Vec<FanStatus>),
    Temperatures(Vec<TemperatureReading>),
    MacTable(MacTable),
    VlanTable(VlanTable),
    ArpTable(ArpTable),
    LldpNeighbors(Vec<LldpNeighbor>),
}

/// Runs the parser bound to `kind` over one command's raw output.
pub fn parse_output(kind: CommandKind, raw: &str) -> Result<Parsed<Record>, ParseFailure> {
    match kind {
        CommandKind::Version => parse_version(raw).map(|p| p.map(Record::Version)),
        CommandKind::ManuInfo => parse_manuinfo(raw).map(|p| p.map(Record::Identity)),
        CommandKind::CpuUsage => parse_cpu_usage(raw).map(|p| p.map(Record::Cpu)),
        CommandKind::Memory => parse_memory(raw).map(|p| p.map(Record::Memory)),
        CommandKind::InterfaceBrief => parse_interface_brief(raw).map(|p| p.map(Record::Ports)),
        CommandKind::PoeInterface => parse_poe_interface(raw).map(|p| p.map(Record::PoePorts)),
        CommandKind::PoeBudget => parse_poe_budget(raw).map(|p| p.map(Record::PoeBudget)),
        CommandKind::Fan => parse_fan(raw).map(|p| p.map(Record::Fans)),
        CommandKind::Environment => parse_environment(raw).map(|p| p.map(Record::Temperatures)),
        CommandKind::MacTable => parse_mac_table(raw).map(|p| p.map(Record::MacTable)),
        CommandKind::VlanTable => parse_vlan_table(raw).map(|p| p.map(Record::VlanTable)),
        CommandKind::ArpTable => parse_arp_table(raw).map(|p| p.map(Record::ArpTable)),
        CommandKind::LldpNeighbors => {
            parse_lldp_neighbors(raw).map(|p| p.map(Record::LldpNeighbors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_ordered_and_complete() {
        let kinds: Vec<CommandKind> = CATALOG.iter().map(|e| e.kind).collect();
        assert_eq!(kinds.len(), 13);
        assert_eq!(kinds[0], CommandKind::Version);
        assert_eq!(kinds[1], CommandKind::ManuInfo);
        // No duplicates.
        for (i, kind) in kinds.iter().enumerate() {
            assert!(!kinds[i + 1..].contains(kind));
        }
    }

    #[test]
    fn entries_carry_their_command_text() {
        for entry in catalog() {
            assert_eq!(entry.command, command_text(entry.kind));
            assert!(entry.command.starts_with("display "));
        }
    }

    #[test]
    fn only_version_is_answered_by_the_restricted_shell() {
        let restricted: Vec<&str> = catalog()
            .iter()
            .filter(|e| !e.needs_extended)
            .map(|e| e.command)
            .collect();
        assert_eq!(restricted, ["display version"]);
    }

    #[test]
    fn dispatch_routes_to_matching_parser() {
        let parsed = parse_output(CommandKind::CpuUsage, "CPU usage: 12% in last 5 seconds")
            .expect("cpu parse");
        assert!(matches!(parsed.value, Record::Cpu(_)));

        let parsed = parse_output(CommandKind::Memory, "Total: 100\nUsed: 40").expect("mem parse");
        match parsed.value {
            Record::Memory(stats) => assert_eq!(stats.free_bytes, Some(60)),
            other => panic!("unexpected record: {other:?}"),
        }
    }

    #[test]
    fn dispatch_preserves_parse_failures() {
        for entry in catalog() {
            assert!(parse_output(entry.kind, "").is_err(), "{}", entry.command);
        }
    }
}
