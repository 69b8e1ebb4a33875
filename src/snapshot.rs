//! Typed device state and snapshot assembly.
//!
//! Every record a parser can produce lives here, together with
//! [`DeviceSnapshot`] (the per-cycle aggregate) and [`SnapshotAssembler`]
//! (the merge-with-carry-over step). Records derive serde and schemars so a
//! consumer can export snapshots without any mapping layer.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::catalog::{self, CommandKind, Record};
use crate::error::SwitchError;
use crate::parse::{Parsed, normalize_port_id};

/// A snapshot field value plus its freshness.
///
/// `stale` means the source command failed this cycle and the value is
/// carried over from the last cycle that produced one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Observed<T> {
    pub value: T,
    pub stale: bool,
}

impl<T> Observed<T> {
    pub fn fresh(value: T) -> Self {
        Self {
            value,
            stale: false,
        }
    }
}

/// Versions and uptime from `display version`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct VersionInfo {
    pub uptime: Option<String>,
    pub software_version: Option<String>,
    pub hardware_version: Option<String>,
    pub bootrom_version: Option<String>,
}

/// Manufacturing identity from `display device manuinfo`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct DeviceIdentity {
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub mac_address: Option<String>,
    pub manufacturing_date: Option<String>,
    pub vendor: Option<String>,
}

/// CPU utilization over the firmware's three reporting windows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct CpuStats {
    pub five_sec_percent: Option<f64>,
    pub one_min_percent: Option<f64>,
    pub five_min_percent: Option<f64>,
    /// Set when a raw reading fell outside 0..=100 and was clamped.
    pub suspect: bool,
}

/// Memory accounting from `display memory`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct MemoryStats {
    pub total_bytes: Option<u64>,
    pub used_bytes: Option<u64>,
    pub free_bytes: Option<u64>,
    pub used_percent: Option<f64>,
    /// Set when used + free disagrees with total beyond rounding tolerance,
    /// or a percentage was clamped.
    pub suspect: bool,
}

/// One temperature sensor row from `display environment`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TemperatureReading {
    pub label: String,
    pub celsius: Option<f64>,
    pub warning_limit: Option<f64>,
    pub alarm_limit: Option<f64>,
}

/// One fan from `display fan`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FanStatus {
    pub id: u32,
    pub operational: bool,
    /// Raw state word as printed by the device (`Normal`, `Fault`, ...).
    pub state: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Duplex {
    Full,
    Half,
}

/// One physical port row from the interface-brief table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Port {
    /// Vendor-format id, e.g. `GE1/0/3`.
    pub id: String,
    pub link_up: bool,
    /// Negotiated speed in Mb/s; absent on down ports (`--` / `auto`).
    pub speed_mbps: Option<u32>,
    pub duplex: Option<Duplex>,
    pub vlan: Option<u16>,
}

/// Port counts derived from the interface-brief rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct PortTotals {
    pub total: u32,
    pub up: u32,
    pub down: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PoePriority {
    Critical,
    High,
    Low,
}

/// Per-port PoE state from `display poe interface`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PoePort {
    pub id: String,
    pub enabled: bool,
    pub delivering: bool,
    pub power_watts: Option<f64>,
    /// IEEE 802.3af/at class, 0..=8.
    pub class: Option<u8>,
    pub priority: Option<PoePriority>,
}

/// PSE power budget from `display poe power-state`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct PoeBudget {
    pub total_watts: Option<f64>,
    pub used_watts: Option<f64>,
    pub remaining_watts: Option<f64>,
    pub average_watts: Option<f64>,
    pub peak_watts: Option<f64>,
    /// Ports currently delivering power. Filled from the per-port table when
    /// the PSE output does not label it.
    pub delivering_ports: Option<u32>,
}

/// One learned MAC row. Rows are optional detail; the count is the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MacEntry {
    pub mac: String,
    pub vlan: Option<u16>,
    pub state: Option<String>,
    pub port: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct MacTable {
    pub count: u32,
    pub entries: Vec<MacEntry>,
}

/// One ARP row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArpEntry {
    pub ip: String,
    pub mac: String,
    pub vlan: Option<u16>,
    pub interface: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ArpTable {
    pub count: u32,
    pub entries: Vec<ArpEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct VlanTable {
    pub count: u32,
    pub ids: Vec<u16>,
}

/// One LLDP neighbor row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LldpNeighbor {
    pub local_port: String,
    pub neighbor_device: String,
    pub neighbor_port: String,
}

/// A device attached behind a port, joined from the MAC and ARP tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AttachedDevice {
    pub mac: String,
    pub ip: Option<String>,
    pub vlan: Option<u16>,
}

/// Port id → attached devices.
pub type PortDeviceMap = BTreeMap<String, Vec<AttachedDevice>>;

/// One cycle's view of the whole switch.
///
/// Fields are `None` until their source command has succeeded at least once;
/// after that they are fresh or stale per [`Observed`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct DeviceSnapshot {
    /// Monotonic cycle counter, starting at 1.
    pub cycle: u64,

    pub version: Option<Observed<VersionInfo>>,
    pub identity: Option<Observed<DeviceIdentity>>,
    pub cpu: Option<Observed<CpuStats>>,
    pub memory: Option<Observed<MemoryStats>>,
    pub ports: Option<Observed<Vec<Port>>>,
    pub poe_ports: Option<Observed<Vec<PoePort>>>,
    pub poe_budget: Option<Observed<PoeBudget>>,
    pub fans: Option<Observed<Vec<FanStatus>>>,
    pub temperatures: Option<Observed<Vec<TemperatureReading>>>,
    pub mac_table: Option<Observed<MacTable>>,
    pub vlan_table: Option<Observed<VlanTable>>,
    pub arp_table: Option<Observed<ArpTable>>,
    pub lldp_neighbors: Option<Observed<Vec<LldpNeighbor>>>,

    /// Derived from `ports`.
    pub port_totals: Option<Observed<PortTotals>>,
    /// Derived by joining `mac_table` against `arp_table`.
    pub port_devices: Option<Observed<PortDeviceMap>>,
    /// Cumulative PoE energy per port in kWh, integrated by the coordinator.
    pub poe_energy_kwh: BTreeMap<String, f64>,

    /// Parse warnings and degradation notes collected this cycle.
    pub warnings: Vec<String>,
}

/// Result of running one catalog command through its parser.
pub struct CommandOutcome {
    pub kind: CommandKind,
    pub result: Result<Parsed<Record>, SwitchError>,
}

/// Merges per-command outcomes into snapshots, carrying last-known-good
/// values for commands that failed.
///
/// Owns the previous snapshot exclusively; it is replaced atomically when a
/// cycle's snapshot is assembled.
pub struct SnapshotAssembler {
    previous: Option<DeviceSnapshot>,
    cycle: u64,
}

impl SnapshotAssembler {
    pub fn new() -> Self {
        Self {
            previous: None,
            cycle: 0,
        }
    }

    /// Last assembled snapshot, if any.
    pub fn previous(&self) -> Option<&DeviceSnapshot> {
        self.previous.as_ref()
    }

    /// Builds the snapshot for one cycle.
    ///
    /// A successful parse replaces the field and clears its stale flag; a
    /// failure carries the previous value over with `stale = true`, or leaves
    /// the field absent when there has never been a value. Multi-row records
    /// apply all-or-nothing because each parser returns its full table or a
    /// failure.
    pub fn assemble(&mut self, outcomes: Vec<CommandOutcome>) -> DeviceSnapshot {
        self.cycle += 1;
        let prev = self.previous.take();
        let mut next = DeviceSnapshot {
            cycle: self.cycle,
            ..DeviceSnapshot::default()
        };
        if let Some(p) = &prev {
            next.poe_energy_kwh = p.poe_energy_kwh.clone();
        }

        for outcome in outcomes {
            let command = catalog::command_text(outcome.kind);
            match outcome.result {
                Ok(parsed) => {
                    for warning in &parsed.warnings {
                        next.warnings.push(format!("{command}: {warning}"));
                    }
                    apply_record(&mut next, parsed.value);
                }
                Err(err) => {
                    next.warnings.push(format!("{command}: {err}"));
                    carry_field(&mut next, prev.as_ref(), outcome.kind);
                }
            }
        }

        derive_aggregates(&mut next);

        self.previous = Some(next.clone());
        next
    }
}

impl Default for SnapshotAssembler {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_record(next: &mut DeviceSnapshot, record: Record) {
    match record {
        Record::Version(v) => next.version = Some(Observed::fresh(v)),
        Record::Identity(v) => next.identity = Some(Observed::fresh(v)),
        Record::Cpu(v) => next.cpu = Some(Observed::fresh(v)),
        Record::Memory(v) => next.memory = Some(Observed::fresh(v)),
        Record::Ports(v) => next.ports = Some(Observed::fresh(v)),
        Record::PoePorts(v) => next.poe_ports = Some(Observed::fresh(v)),
        Record::PoeBudget(v) => next.poe_budget = Some(Observed::fresh(v)),
        Record::Fans(v) => next.fans = Some(Observed::fresh(v)),
        Record::Temperatures(v) => next.temperatures = Some(Observed::fresh(v)),
        Record::MacTable(v) => next.mac_table = Some(Observed::fresh(v)),
        Record::VlanTable(v) => next.vlan_table = Some(Observed::fresh(v)),
        Record::ArpTable(v) => next.arp_table = Some(Observed::fresh(v)),
        Record::LldpNeighbors(v) => next.lldp_neighbors = Some(Observed::fresh(v)),
    }
}

fn carried<T: Clone>(prev: Option<&Observed<T>>) -> Option<Observed<T>> {
    prev.map(|o| Observed {
        value: o.value.clone(),
        stale: true,
    })
}

fn carry_field(next: &mut DeviceSnapshot, prev: Option<&DeviceSnapshot>, kind: CommandKind) {
    match kind {
        CommandKind::Version => {
            next.version = carried(prev.and_then(|p| p.version.as_ref()));
        }
        CommandKind::ManuInfo => {
            next.identity = carried(prev.and_then(|p| p.identity.as_ref()));
        }
        CommandKind::CpuUsage => next.cpu = carried(prev.and_then(|p| p.cpu.as_ref())),
        CommandKind::Memory => next.memory = carried(prev.and_then(|p| p.memory.as_ref())),
        CommandKind::InterfaceBrief => {
            next.ports = carried(prev.and_then(|p| p.ports.as_ref()));
        }
        CommandKind::PoeInterface => {
            next.poe_ports = carried(prev.and_then(|p| p.poe_ports.as_ref()));
        }
        CommandKind::PoeBudget => {
            next.poe_budget = carried(prev.and_then(|p| p.poe_budget.as_ref()));
        }
        CommandKind::Fan => next.fans = carried(prev.and_then(|p| p.fans.as_ref())),
        CommandKind::Environment => {
            next.temperatures = carried(prev.and_then(|p| p.temperatures.as_ref()));
        }
        CommandKind::MacTable => {
            next.mac_table = carried(prev.and_then(|p| p.mac_table.as_ref()));
        }
        CommandKind::VlanTable => {
            next.vlan_table = carried(prev.and_then(|p| p.vlan_table.as_ref()));
        }
        CommandKind::ArpTable => {
            next.arp_table = carried(prev.and_then(|p| p.arp_table.as_ref()));
        }
        CommandKind::LldpNeighbors => {
            next.lldp_neighbors = carried(prev.and_then(|p| p.lldp_neighbors.as_ref()));
        }
    }
}

/// Fills the aggregates computed from the parsed tables. A derived value is
/// stale when any table it was computed from is stale.
fn derive_aggregates(next: &mut DeviceSnapshot) {
    next.port_totals = next.ports.as_ref().map(|ports| {
        let up = ports.value.iter().filter(|p| p.link_up).count() as u32;
        let total = ports.value.len() as u32;
        Observed {
            value: PortTotals {
                total,
                up,
                down: total - up,
            },
            stale: ports.stale,
        }
    });

    if let Some(budget) = &mut next.poe_budget
        && budget.value.delivering_ports.is_none()
        && let Some(poe) = &next.poe_ports
    {
        budget.value.delivering_ports =
            Some(poe.value.iter().filter(|p| p.delivering).count() as u32);
    }

    next.port_devices = next.mac_table.as_ref().map(|mac| {
        let mut ip_by_mac: BTreeMap<String, &ArpEntry> = BTreeMap::new();
        let mut arp_stale = false;
        if let Some(arp) = &next.arp_table {
            arp_stale = arp.stale;
            for entry in &arp.value.entries {
                ip_by_mac.insert(entry.mac.to_ascii_lowercase(), entry);
            }
        }
        let mut map: PortDeviceMap = BTreeMap::new();
        for entry in &mac.value.entries {
            let Some(port) = &entry.port else { continue };
            let key = entry.mac.to_ascii_lowercase();
            map.entry(normalize_port_id(port)).or_default().push(
                AttachedDevice {
                    mac: entry.mac.clone(),
                    ip: ip_by_mac.get(&key).map(|a| a.ip.clone()),
                    vlan: entry.vlan,
                },
            );
        }
        Observed {
            value: map,
            stale: mac.stale || arp_stale,
        }
    });
}
