//! # comwatch - Comware Switch Telnet Monitor
//!
//! `comwatch` polls Comware-family switches (HP V1910 class) over their
//! Telnet CLI and turns the free-form, paginated command output into typed,
//! versioned device snapshots: CPU and memory load, temperatures and fans,
//! per-port link and PoE state, and MAC/ARP/VLAN table counts.
//!
//! ## Features
//!
//! - **Session State Machine**: Explicit connect → authenticate → unlock →
//!   ready lifecycle, including the vendor hidden-mode unlock that exposes
//!   the full `display` command set
//! - **Pagination Handling**: `--More--` prompts are answered transparently
//!   and multi-page output is reassembled into one block
//! - **Tolerant Parsing**: One pure, label-anchored parser per command,
//!   resilient to firmware column reshuffles
//! - **Graceful Degradation**: A failed command carries its previous value
//!   forward with a stale marker instead of reverting to empty
//! - **Async/Await**: Built on Tokio; one lightweight worker task per device
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use comwatch::{MonitorConfig, PollingCoordinator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MonitorConfig::new("192.168.1.2", "admin", "password");
//!     let handle = PollingCoordinator::spawn(config)?;
//!
//!     let mut updates = handle.updates();
//!     while updates.changed().await.is_ok() {
//!         let update = updates.borrow().clone();
//!         if let Some(snapshot) = &update.snapshot {
//!             println!(
//!                 "cycle {}: available={} cpu={:?}",
//!                 snapshot.cycle,
//!                 update.available,
//!                 snapshot.cpu.as_ref().map(|c| c.value.five_sec_percent),
//!             );
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`poll::PollingCoordinator`] - Per-device polling worker and publisher
//! - [`session::SessionController`] - Telnet session with state tracking
//! - [`catalog`] - The fixed diagnostic command battery
//! - [`snapshot::DeviceSnapshot`] - The per-cycle typed aggregate
//! - [`error::SwitchError`] - Error taxonomy for session and cycle failures

pub mod catalog;
pub mod config;
pub mod error;
pub mod parse;
pub mod poll;
pub mod session;
pub mod snapshot;
pub mod transport;

pub use config::{MatcherProfile, MonitorConfig};
pub use error::{ParseFailure, ParseFailureReason, SwitchError};
pub use poll::{PollHandle, PollUpdate, PollingCoordinator, poll_once};
pub use session::{SessionController, SessionState};
pub use snapshot::{DeviceSnapshot, Observed, SnapshotAssembler};
