//! Monitor configuration and CLI matcher profiles.
//!
//! The exact strings a Comware build uses for its prompts, pagination
//! markers, and failure messages vary between firmware releases, so all of
//! them live in a [`MatcherProfile`] of regex patterns rather than hardcoded
//! literals. The defaults cover the V1910/Comware 5 family; callers
//! monitoring a quirky build extend the lists instead of patching the crate.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default Telnet port.
pub const DEFAULT_PORT: u16 = 23;

/// Default poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default per-cycle deadline. Must stay below the poll interval so a slow
/// device cannot starve the schedule.
pub const DEFAULT_CYCLE_DEADLINE: Duration = Duration::from_secs(20);

/// Consecutive failed cycles before the device is reported unavailable.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Connection parameters and tuning for one monitored switch.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,

    /// Tick period of the polling coordinator.
    pub poll_interval: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Overall budget for the login and shell-unlock exchanges.
    pub handshake_timeout: Duration,
    /// Timeout for a single read from the device.
    pub read_timeout: Duration,
    /// Timeout for one command round-trip (write until prompt reappears).
    pub command_timeout: Duration,
    /// Aggregate deadline for one full poll cycle.
    pub cycle_deadline: Duration,
    /// Consecutive failed cycles before connectivity is reported down.
    pub failure_threshold: u32,
    /// Pause after an authentication rejection before the next attempt.
    pub auth_retry_backoff: Duration,

    pub matchers: MatcherProfile,
}

impl MonitorConfig {
    /// Builds a config with the default port, intervals, and matcher profile.
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: username.into(),
            password: password.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(10),
            cycle_deadline: DEFAULT_CYCLE_DEADLINE,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            auth_retry_backoff: Duration::from_secs(60),
            matchers: MatcherProfile::default(),
        }
    }
}

/// Regex patterns describing one firmware family's interactive CLI.
///
/// All pattern lists are regexes matched against the tail of the receive
/// buffer (prompts) or the full buffer (failure and pagination markers).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MatcherProfile {
    /// Username prompt patterns.
    pub login_prompts: Vec<String>,
    /// Password prompt patterns.
    pub password_prompts: Vec<String>,
    /// Command prompt patterns, e.g. `<Switch>` or `[Switch]`.
    pub command_prompts: Vec<String>,
    /// Pagination markers, e.g. `---- More ----`.
    pub pagination_markers: Vec<String>,
    /// Markers indicating the login was rejected.
    pub login_failures: Vec<String>,
    /// Markers indicating a command was rejected by the shell.
    pub privilege_denied: Vec<String>,

    /// Command that unlocks the hidden full command set.
    pub unlock_command: String,
    /// Fixed vendor password for the unlock dialogue. `512900` on most
    /// V1910 builds; firmware-specific, so overridable here.
    pub unlock_password: String,
    /// Reply sent to the unlock confirmation prompt.
    pub unlock_confirm_reply: String,
    /// Patterns of the unlock confirmation question.
    pub unlock_confirm_prompts: Vec<String>,
    /// Patterns of the unlock password prompt.
    pub unlock_password_prompts: Vec<String>,
    /// Markers confirming the extended command set is active.
    pub unlock_confirmations: Vec<String>,

    /// Best-effort command to disable terminal paging for the session.
    pub paging_disable_command: String,
}

impl Default for MatcherProfile {
    fn default() -> Self {
        Self {
            login_prompts: vec![r"(?i)(?:login|username)\s*:\s*$".to_string()],
            password_prompts: vec![r"(?i)password\s*:\s*$".to_string()],
            // Hostname-shaped only: must not match interactive tails like
            // the `[Y/N]` confirmation question.
            command_prompts: vec![r"[<\[][\w.\-]+[>\]]\s*$".to_string()],
            pagination_markers: vec![r"-{2,4}\s?\(?[Mm]ore\)?\s?-{2,4}".to_string()],
            login_failures: vec![
                r"(?i)login\s+failed".to_string(),
                r"(?i)invalid\s+(?:username|password)".to_string(),
                r"(?i)authentication\s+fail".to_string(),
                r"(?i)access\s+denied".to_string(),
            ],
            privilege_denied: vec![
                r"(?i)%\s?unrecognized\s+command".to_string(),
                r"(?i)%\s?insufficient\s+privilege".to_string(),
                r"(?i)%\s?permission\s+denied".to_string(),
                r"(?i)%\s?wrong\s+parameter".to_string(),
            ],
            unlock_command: "_cmdline-mode on".to_string(),
            unlock_password: "512900".to_string(),
            unlock_confirm_reply: "Y".to_string(),
            unlock_confirm_prompts: vec![r"(?i)continue\?\s*\[y/n\]\s*$".to_string()],
            unlock_password_prompts: vec![
                r"(?i)(?:please\s+input\s+)?password\s*:\s*$".to_string(),
            ],
            unlock_confirmations: vec![
                r"(?i)all-command\s+mode".to_string(),
                r"(?i)now\s+you\s+enter".to_string(),
            ],
            paging_disable_command: "screen-length disable".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn defaults_match_documented_values() {
        let config = MonitorConfig::new("10.0.0.2", "admin", "secret");
        assert_eq!(config.port, 23);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert!(config.cycle_deadline < config.poll_interval);
        assert_eq!(config.failure_threshold, 3);
    }

    #[test]
    fn default_profile_patterns_compile() {
        let profile = MatcherProfile::default();
        let all = profile
            .login_prompts
            .iter()
            .chain(&profile.password_prompts)
            .chain(&profile.command_prompts)
            .chain(&profile.pagination_markers)
            .chain(&profile.login_failures)
            .chain(&profile.privilege_denied)
            .chain(&profile.unlock_confirm_prompts)
            .chain(&profile.unlock_password_prompts)
            .chain(&profile.unlock_confirmations);
        for pattern in all {
            assert!(Regex::new(pattern).is_ok(), "bad pattern: {pattern}");
        }
    }

    #[test]
    fn default_prompt_patterns_recognize_comware_prompts() {
        let prompt = Regex::new(&MatcherProfile::default().command_prompts[0]).unwrap();
        assert!(prompt.is_match("<V1910-24G>"));
        assert!(prompt.is_match("[V1910-24G]"));
        assert!(!prompt.is_match("display version"));
    }

    #[test]
    fn default_pagination_pattern_recognizes_more_markers() {
        let more = Regex::new(&MatcherProfile::default().pagination_markers[0]).unwrap();
        assert!(more.is_match("  ---- More ----"));
        assert!(more.is_match("--More--"));
        assert!(!more.is_match("more output follows"));
    }
}
