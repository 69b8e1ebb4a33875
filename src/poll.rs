//! The polling coordinator.
//!
//! One coordinator task per monitored switch runs the command battery on a
//! fixed interval, feeds the results through the [`SnapshotAssembler`], and
//! publishes each cycle's [`DeviceSnapshot`] plus a connectivity flag on a
//! `tokio::sync::watch` channel. Cycles never overlap: the cycle runs inline
//! in the coordinator task and ticks that fire while one is in progress are
//! skipped.
//!
//! # Main Components
//!
//! - [`PollingCoordinator`] - The per-device worker; spawn one per switch
//! - [`PollHandle`] - Consumer side: snapshot updates + shutdown
//! - [`poll_once`] - One-shot connect/poll/disconnect convenience

use std::collections::BTreeMap;

use log::{debug, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::catalog::{catalog, parse_output};
use crate::config::MonitorConfig;
use crate::error::SwitchError;
use crate::session::SessionController;
use crate::snapshot::{CommandOutcome, DeviceSnapshot, SnapshotAssembler};

/// What consumers receive after every completed cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PollUpdate {
    /// The latest snapshot; `None` until the first cycle completes.
    pub snapshot: Option<DeviceSnapshot>,
    /// False once the consecutive-failure threshold is crossed. Flips back
    /// on the first successful exchange.
    pub available: bool,
    /// Completed (not skipped) cycles since the coordinator started.
    pub cycles_completed: u64,
}

impl Default for PollUpdate {
    fn default() -> Self {
        Self {
            snapshot: None,
            // Not yet proven unreachable.
            available: true,
            cycles_completed: 0,
        }
    }
}

/// Consumer handle to a running coordinator.
pub struct PollHandle {
    updates: watch::Receiver<PollUpdate>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// A receiver of per-cycle updates. Cheap to clone further.
    pub fn updates(&self) -> watch::Receiver<PollUpdate> {
        self.updates.clone()
    }

    /// Stops polling and waits for the worker to finish.
    ///
    /// A cycle in flight is abandoned and publishes nothing. Dropping the
    /// handle without calling this also stops the worker, just without
    /// waiting for it.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

struct CycleReport {
    outcomes: Vec<CommandOutcome>,
    /// Whether the device answered anything at all this cycle.
    io_success: bool,
    auth_failed: bool,
}

/// Integrates per-port PoE power into cumulative energy between cycles.
///
/// Trapezoidal: each interval is charged at the mean of the previous and
/// current reading. Only fresh readings advance the integration; a stale
/// carry-over leaves the previous reading in place and the eventual fresh
/// one spans the gap.
#[derive(Default)]
struct EnergyTracker {
    last: Option<(Instant, BTreeMap<String, f64>)>,
    accumulated_kwh: BTreeMap<String, f64>,
}

impl EnergyTracker {
    fn update(&mut self, now: Instant, snapshot: &mut DeviceSnapshot) {
        if let Some(poe) = &snapshot.poe_ports
            && !poe.stale
        {
            let current: BTreeMap<String, f64> = poe
                .value
                .iter()
                .filter_map(|p| p.power_watts.map(|w| (p.id.clone(), w)))
                .collect();
            for id in current.keys() {
                self.accumulated_kwh.entry(id.clone()).or_insert(0.0);
            }
            if let Some((last_at, last_power)) = &self.last {
                let hours = now.duration_since(*last_at).as_secs_f64() / 3600.0;
                for (id, watts) in &current {
                    let previous = last_power.get(id).copied().unwrap_or(*watts);
                    let mean = (previous + watts) / 2.0;
                    if let Some(slot) = self.accumulated_kwh.get_mut(id) {
                        *slot += mean * hours / 1000.0;
                    }
                }
            }
            self.last = Some((now, current));
        }
        snapshot.poe_energy_kwh = self.accumulated_kwh.clone();
    }
}

/// The per-device polling worker.
///
/// Owns the session, the assembler, and all carry-over state. Nothing is
/// shared across devices; spawn one coordinator per switch.
pub struct PollingCoordinator {
    config: MonitorConfig,
    session: SessionController,
    assembler: SnapshotAssembler,
    energy: EnergyTracker,
    consecutive_failures: u32,
    cycles: u64,
    updates: watch::Sender<PollUpdate>,
    stop: watch::Receiver<bool>,
}

impl PollingCoordinator {
    fn new(
        config: MonitorConfig,
        updates: watch::Sender<PollUpdate>,
        stop: watch::Receiver<bool>,
    ) -> Result<Self, SwitchError> {
        let session = SessionController::new(config.clone())?;
        Ok(Self {
            config,
            session,
            assembler: SnapshotAssembler::new(),
            energy: EnergyTracker::default(),
            consecutive_failures: 0,
            cycles: 0,
            updates,
            stop,
        })
    }

    /// Starts polling on the current tokio runtime.
    ///
    /// The first cycle runs immediately; subsequent cycles follow the
    /// configured interval.
    pub fn spawn(config: MonitorConfig) -> Result<PollHandle, SwitchError> {
        let (update_tx, update_rx) = watch::channel(PollUpdate::default());
        let (stop_tx, stop_rx) = watch::channel(false);
        let coordinator = Self::new(config, update_tx, stop_rx)?;
        let task = tokio::spawn(coordinator.run());
        Ok(PollHandle {
            updates: update_rx,
            stop: stop_tx,
            task,
        })
    }

    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        // A tick that fires while a cycle is still running is skipped, never
        // queued: cycles must not overlap.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(
            "{} polling every {:?}",
            self.config.host, self.config.poll_interval
        );

        loop {
            let mut stop = self.stop.clone();
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stopped(&mut stop) => break,
            }

            let mut stop = self.stop.clone();
            let report = tokio::select! {
                report = self.run_cycle() => report,
                _ = stopped(&mut stop) => break,
            };
            if *self.stop.borrow() {
                // Shutdown raced the end of the cycle; publish nothing.
                break;
            }
            let auth_failed = report.auth_failed;
            self.finish_cycle(report);

            if auth_failed {
                debug!(
                    "{} backing off {:?} after authentication failure",
                    self.config.host, self.config.auth_retry_backoff
                );
                let mut stop = self.stop.clone();
                tokio::select! {
                    _ = tokio::time::sleep(self.config.auth_retry_backoff) => {}
                    _ = stopped(&mut stop) => break,
                }
            }
        }

        self.session.disconnect();
        debug!("{} polling stopped", self.config.host);
    }

    async fn run_cycle(&mut self) -> CycleReport {
        let deadline = Instant::now() + self.config.cycle_deadline;

        if !self.session.is_ready() {
            if let Err(err) = self.session.connect().await {
                let auth_failed = matches!(err, SwitchError::AuthenticationFailed);
                warn!("{} reconnect failed: {err}", self.config.host);
                let outcomes = catalog()
                    .iter()
                    .map(|entry| CommandOutcome {
                        kind: entry.kind,
                        result: Err(SwitchError::SessionClosed),
                    })
                    .collect();
                return CycleReport {
                    outcomes,
                    io_success: false,
                    auth_failed,
                };
            }
        }

        let (outcomes, io_success) =
            run_catalog(&mut self.session, &self.config, deadline).await;
        CycleReport {
            outcomes,
            io_success,
            auth_failed: false,
        }
    }

    fn finish_cycle(&mut self, report: CycleReport) {
        if report.io_success {
            if self.consecutive_failures >= self.config.failure_threshold {
                debug!("{} reachable again", self.config.host);
            }
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            if self.consecutive_failures == self.config.failure_threshold {
                warn!(
                    "{} unreachable for {} consecutive cycles, reporting unavailable",
                    self.config.host, self.consecutive_failures
                );
            }
        }

        let mut snapshot = self.assembler.assemble(report.outcomes);
        self.energy.update(Instant::now(), &mut snapshot);
        self.cycles += 1;

        self.updates.send_replace(PollUpdate {
            snapshot: Some(snapshot),
            available: self.consecutive_failures < self.config.failure_threshold,
            cycles_completed: self.cycles,
        });
    }
}

/// Resolves when the stop flag flips, or when every handle is gone.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Runs the full battery against a ready session. One outcome per entry,
/// always: commands past the deadline or a dead connection report their
/// failure instead of being silently skipped, so carry-over sees them.
async fn run_catalog(
    session: &mut SessionController,
    config: &MonitorConfig,
    deadline: Instant,
) -> (Vec<CommandOutcome>, bool) {
    let mut outcomes = Vec::with_capacity(catalog().len());
    let mut io_success = false;

    for entry in catalog() {
        if Instant::now() >= deadline {
            debug!("cycle deadline reached, abandoning '{}'", entry.command);
            outcomes.push(CommandOutcome {
                kind: entry.kind,
                result: Err(SwitchError::CycleTimeout),
            });
            continue;
        }
        if !session.is_ready() {
            outcomes.push(CommandOutcome {
                kind: entry.kind,
                result: Err(SwitchError::SessionClosed),
            });
            continue;
        }

        let command_deadline = deadline.min(Instant::now() + config.command_timeout);
        let result = match session.run_command_until(entry.command, command_deadline).await {
            Ok(raw) => {
                io_success = true;
                parse_output(entry.kind, &raw).map_err(|failure| {
                    warn!("'{}' parse failure: {failure}", entry.command);
                    SwitchError::Parse {
                        command: entry.command.to_string(),
                        failure,
                    }
                })
            }
            Err(err) => {
                if err.is_connection_loss() {
                    warn!("'{}' failed: {err}; abandoning rest of cycle", entry.command);
                } else {
                    // The device answered, it just refused the command.
                    io_success = true;
                    if entry.needs_extended && !session.extended_mode() {
                        debug!(
                            "'{}' rejected; shell unlock was never confirmed",
                            entry.command
                        );
                    } else {
                        debug!("'{}' rejected: {err}", entry.command);
                    }
                }
                Err(err)
            }
        };
        outcomes.push(CommandOutcome {
            kind: entry.kind,
            result,
        });
    }

    (outcomes, io_success)
}

/// Connects, runs one full cycle, disconnects, and returns the snapshot.
///
/// Useful for connection tests and one-shot exports; the returned snapshot
/// has no carry-over history, so failed commands simply come back absent.
pub async fn poll_once(config: &MonitorConfig) -> Result<DeviceSnapshot, SwitchError> {
    let mut session = SessionController::new(config.clone())?;
    session.connect().await?;
    let deadline = Instant::now() + config.cycle_deadline;
    let (outcomes, _) = run_catalog(&mut session, config, deadline).await;
    session.disconnect();
    let mut assembler = SnapshotAssembler::new();
    Ok(assembler.assemble(outcomes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CommandKind, Record};
    use crate::parse::Parsed;
    use crate::snapshot::{Observed, PoePort, PoePriority};
    use std::time::Duration;

    fn poe_port(id: &str, watts: f64) -> PoePort {
        PoePort {
            id: id.to_string(),
            enabled: true,
            delivering: watts > 0.0,
            power_watts: Some(watts),
            class: Some(2),
            priority: Some(PoePriority::Low),
        }
    }

    fn snapshot_with_poe(ports: Vec<PoePort>, stale: bool) -> DeviceSnapshot {
        DeviceSnapshot {
            poe_ports: Some(Observed {
                value: ports,
                stale,
            }),
            ..DeviceSnapshot::default()
        }
    }

    #[test]
    fn energy_integrates_constant_power_trapezoidally() {
        let mut tracker = EnergyTracker::default();
        let t0 = Instant::now();

        let mut first = snapshot_with_poe(vec![poe_port("GE1/0/1", 6.0)], false);
        tracker.update(t0, &mut first);
        assert_eq!(first.poe_energy_kwh.get("GE1/0/1"), Some(&0.0));

        let mut second = snapshot_with_poe(vec![poe_port("GE1/0/1", 6.0)], false);
        tracker.update(t0 + Duration::from_secs(3600), &mut second);
        let kwh = second.poe_energy_kwh["GE1/0/1"];
        assert!((kwh - 0.006).abs() < 1e-9, "got {kwh}");
    }

    #[test]
    fn energy_averages_changing_power() {
        let mut tracker = EnergyTracker::default();
        let t0 = Instant::now();
        let mut first = snapshot_with_poe(vec![poe_port("GE1/0/1", 4.0)], false);
        tracker.update(t0, &mut first);
        let mut second = snapshot_with_poe(vec![poe_port("GE1/0/1", 8.0)], false);
        tracker.update(t0 + Duration::from_secs(1800), &mut second);
        // Mean 6 W for half an hour: 3 Wh.
        let kwh = second.poe_energy_kwh["GE1/0/1"];
        assert!((kwh - 0.003).abs() < 1e-9, "got {kwh}");
    }

    #[test]
    fn stale_readings_do_not_advance_integration() {
        let mut tracker = EnergyTracker::default();
        let t0 = Instant::now();
        let mut first = snapshot_with_poe(vec![poe_port("GE1/0/1", 6.0)], false);
        tracker.update(t0, &mut first);

        let mut carried = snapshot_with_poe(vec![poe_port("GE1/0/1", 6.0)], true);
        tracker.update(t0 + Duration::from_secs(1800), &mut carried);
        assert_eq!(carried.poe_energy_kwh["GE1/0/1"], 0.0);

        // The next fresh reading spans the whole gap.
        let mut fresh = snapshot_with_poe(vec![poe_port("GE1/0/1", 6.0)], false);
        tracker.update(t0 + Duration::from_secs(3600), &mut fresh);
        let kwh = fresh.poe_energy_kwh["GE1/0/1"];
        assert!((kwh - 0.006).abs() < 1e-9, "got {kwh}");
    }

    fn test_config() -> MonitorConfig {
        let mut config = MonitorConfig::new("198.51.100.7", "admin", "secret");
        config.failure_threshold = 2;
        config
    }

    fn coordinator_for_test() -> (PollingCoordinator, watch::Receiver<PollUpdate>) {
        let (update_tx, update_rx) = watch::channel(PollUpdate::default());
        let (_stop_tx, stop_rx) = watch::channel(false);
        let coordinator = PollingCoordinator::new(test_config(), update_tx, stop_rx)
            .expect("coordinator builds");
        (coordinator, update_rx)
    }

    fn failed_report() -> CycleReport {
        CycleReport {
            outcomes: vec![CommandOutcome {
                kind: CommandKind::CpuUsage,
                result: Err(SwitchError::SessionClosed),
            }],
            io_success: false,
            auth_failed: false,
        }
    }

    fn ok_report() -> CycleReport {
        CycleReport {
            outcomes: vec![CommandOutcome {
                kind: CommandKind::CpuUsage,
                result: Ok(Parsed::new(Record::Cpu(Default::default()))),
            }],
            io_success: true,
            auth_failed: false,
        }
    }

    #[test]
    fn availability_flips_at_failure_threshold_and_recovers() {
        let (mut coordinator, updates) = coordinator_for_test();

        coordinator.finish_cycle(failed_report());
        assert!(updates.borrow().available, "one failure is not enough");

        coordinator.finish_cycle(failed_report());
        assert!(!updates.borrow().available, "threshold reached");
        assert_eq!(updates.borrow().cycles_completed, 2);

        coordinator.finish_cycle(ok_report());
        assert!(updates.borrow().available, "success resets the counter");
    }

    #[test]
    fn polling_continues_and_publishes_while_unavailable() {
        let (mut coordinator, updates) = coordinator_for_test();
        for _ in 0..5 {
            coordinator.finish_cycle(failed_report());
        }
        assert!(!updates.borrow().available);
        assert_eq!(updates.borrow().cycles_completed, 5);
    }

    #[test]
    fn default_update_has_no_snapshot() {
        let update = PollUpdate::default();
        assert!(update.snapshot.is_none());
        assert!(update.available);
        assert_eq!(update.cycles_completed, 0);
    }
}
