//! Telnet CLI session management and command execution.
//!
//! One [`SessionController`] owns one [`TelnetStream`] and drives the whole
//! interactive lifecycle as an explicit state machine: TCP connect, the
//! login exchange, the vendor hidden-mode unlock, then serialized command
//! execution with transparent `--More--` paging.
//!
//! # Main Components
//!
//! - [`SessionController`] - Single-connection session with state tracking
//! - [`SessionState`] - Observable handshake/lifecycle state
//! - [`CompiledMatchers`](crate::config::MatcherProfile) patterns are
//!   compiled once per controller; see `config` for the profile knobs.

use std::io;
use std::time::Duration;

use log::{debug, trace, warn};
use regex::{Regex, RegexSet};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::{MatcherProfile, MonitorConfig};
use crate::error::SwitchError;
use crate::transport::TelnetStream;

/// Lifecycle state of a switch session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    /// Running the vendor unlock dialogue for the extended command set.
    UnlockingShell,
    Ready,
    /// A handshake step failed; the next cycle restarts from `Connecting`.
    Error,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::UnlockingShell => "unlocking-shell",
            SessionState::Ready => "ready",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Matcher profile compiled into regex sets.
pub(crate) struct CompiledMatchers {
    pub(crate) login_prompt: RegexSet,
    pub(crate) password_prompt: RegexSet,
    pub(crate) command_prompt: RegexSet,
    pub(crate) login_failure: RegexSet,
    pub(crate) privilege_denied: RegexSet,
    pub(crate) unlock_confirm: RegexSet,
    pub(crate) unlock_password_prompt: RegexSet,
    pub(crate) unlock_success: RegexSet,
    /// Individual regexes because match *positions* are needed to cut the
    /// marker out of the buffer.
    pub(crate) pagination: Vec<Regex>,
}

fn regex_set(name: &str, patterns: &[String]) -> Result<RegexSet, SwitchError> {
    RegexSet::new(patterns)
        .map_err(|err| SwitchError::InvalidMatcherProfile(format!("{name}: {err}")))
}

impl CompiledMatchers {
    pub(crate) fn compile(profile: &MatcherProfile) -> Result<Self, SwitchError> {
        if profile.command_prompts.is_empty() {
            return Err(SwitchError::InvalidMatcherProfile(
                "command_prompts must not be empty".to_string(),
            ));
        }
        let pagination = profile
            .pagination_markers
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|err| {
                    SwitchError::InvalidMatcherProfile(format!("pagination_markers: {err}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            login_prompt: regex_set("login_prompts", &profile.login_prompts)?,
            password_prompt: regex_set("password_prompts", &profile.password_prompts)?,
            command_prompt: regex_set("command_prompts", &profile.command_prompts)?,
            login_failure: regex_set("login_failures", &profile.login_failures)?,
            privilege_denied: regex_set("privilege_denied", &profile.privilege_denied)?,
            unlock_confirm: regex_set("unlock_confirm_prompts", &profile.unlock_confirm_prompts)?,
            unlock_password_prompt: regex_set(
                "unlock_password_prompts",
                &profile.unlock_password_prompts,
            )?,
            unlock_success: regex_set("unlock_confirmations", &profile.unlock_confirmations)?,
            pagination,
        })
    }

    /// Byte range of the earliest pagination marker in `buffer`, if any.
    fn find_pagination(&self, buffer: &str) -> Option<std::ops::Range<usize>> {
        self.pagination
            .iter()
            .filter_map(|re| re.find(buffer))
            .min_by_key(|m| m.start())
            .map(|m| m.range())
    }
}

/// An authenticated Telnet CLI session to one switch.
///
/// All operations take `&mut self`, which serializes command execution: the
/// underlying CLI has no multiplexing, so only one exchange can be in flight.
pub struct SessionController {
    config: MonitorConfig,
    matchers: CompiledMatchers,
    transport: Option<TelnetStream>,
    state: SessionState,
    extended_mode: bool,
}

impl SessionController {
    /// Builds a controller; fails if the matcher profile does not compile.
    pub fn new(config: MonitorConfig) -> Result<Self, SwitchError> {
        let matchers = CompiledMatchers::compile(&config.matchers)?;
        Ok(Self {
            config,
            matchers,
            transport: None,
            state: SessionState::Disconnected,
            extended_mode: false,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Whether the hidden-mode unlock was confirmed by the device.
    ///
    /// When false the session is still usable, but commands outside the
    /// restricted menu set will come back as `InsufficientPrivilege`.
    pub fn extended_mode(&self) -> bool {
        self.extended_mode
    }

    /// Drops the connection without any farewell exchange.
    pub fn disconnect(&mut self) {
        if self.transport.take().is_some() {
            debug!("{} session closed", self.config.host);
        }
        self.state = SessionState::Disconnected;
        self.extended_mode = false;
    }

    /// Runs the full handshake: connect, authenticate, unlock, disable
    /// paging. Always restarts from scratch; there is no cheap re-auth path.
    pub async fn connect(&mut self) -> Result<(), SwitchError> {
        self.disconnect();
        self.state = SessionState::Connecting;
        debug!("{}:{} connecting", self.config.host, self.config.port);
        let transport = match TelnetStream::connect(
            &self.config.host,
            self.config.port,
            self.config.connect_timeout,
        )
        .await
        {
            Ok(t) => t,
            Err(err) => {
                self.state = SessionState::Error;
                return Err(SwitchError::Connection(err));
            }
        };
        self.transport = Some(transport);

        self.state = SessionState::Authenticating;
        if let Err(err) = self.authenticate().await {
            self.transport = None;
            self.state = SessionState::Error;
            return Err(err);
        }
        debug!("{} authenticated", self.config.host);

        self.state = SessionState::UnlockingShell;
        match self.unlock_shell().await {
            Ok(confirmed) => {
                self.extended_mode = confirmed;
                if confirmed {
                    debug!("{} extended command set unlocked", self.config.host);
                } else {
                    warn!(
                        "{} shell unlock not confirmed; extended commands may be rejected",
                        self.config.host
                    );
                }
            }
            Err(err) => {
                self.transport = None;
                self.state = SessionState::Error;
                return Err(err);
            }
        }

        if let Err(err) = self.disable_paging().await {
            if err.is_connection_loss() {
                self.transport = None;
                self.state = SessionState::Error;
                return Err(err);
            }
            debug!("{} paging-disable rejected: {err}", self.config.host);
        }

        self.state = SessionState::Ready;
        Ok(())
    }

    /// Executes one command and returns its full output, with the echoed
    /// command line, trailing prompt, and pagination markers removed.
    pub async fn run_command(&mut self, command: &str) -> Result<String, SwitchError> {
        let deadline = Instant::now() + self.config.command_timeout;
        self.run_command_until(command, deadline).await
    }

    /// Like [`run_command`](Self::run_command) but bounded by an external
    /// deadline, so a poll cycle can shrink the window for its last commands.
    pub(crate) async fn run_command_until(
        &mut self,
        command: &str,
        deadline: Instant,
    ) -> Result<String, SwitchError> {
        if self.state != SessionState::Ready {
            return Err(SwitchError::SessionClosed);
        }
        match self.command_dialogue(command, deadline).await {
            Ok(output) => Ok(output),
            Err(err) => {
                if err.is_connection_loss() {
                    debug!(
                        "{} connection lost during '{command}': {err}",
                        self.config.host
                    );
                    self.transport = None;
                    self.state = SessionState::Disconnected;
                }
                Err(err)
            }
        }
    }

    async fn command_dialogue(
        &mut self,
        command: &str,
        deadline: Instant,
    ) -> Result<String, SwitchError> {
        let read_timeout = self.config.read_timeout;
        let transport = self.transport.as_mut().ok_or(SwitchError::SessionClosed)?;
        transport.send_line(command, read_timeout).await?;

        let mut buffer = String::new();
        let mut rejected = false;
        loop {
            let remaining = remaining_until(deadline).ok_or(SwitchError::PromptTimeout)?;
            let chunk = match transport.read_some(read_timeout.min(remaining)).await {
                Ok(chunk) => chunk,
                Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                    return Err(SwitchError::PromptTimeout);
                }
                Err(err) => return Err(SwitchError::Connection(err)),
            };
            buffer.push_str(&chunk);

            // Cut every complete pagination marker out and answer each with a
            // page keystroke so multi-page output arrives as one block.
            while let Some(range) = self.matchers.find_pagination(&buffer) {
                trace!("{} pagination marker, requesting next page", self.config.host);
                buffer.replace_range(range, "");
                transport.send_raw(b" ", read_timeout).await?;
            }

            if !rejected && self.matchers.privilege_denied.is_match(&buffer) {
                rejected = true;
            }

            let tail = last_line(&buffer);
            if !tail.is_empty() && self.matchers.command_prompt.is_match(tail) {
                if rejected {
                    return Err(SwitchError::InsufficientPrivilege(command.to_string()));
                }
                return Ok(finish_output(&buffer, command, &self.matchers.command_prompt));
            }
        }
    }

    /// Answers login/password prompts until the command prompt appears.
    async fn authenticate(&mut self) -> Result<(), SwitchError> {
        let deadline = Instant::now() + self.config.handshake_timeout;
        let read_timeout = self.config.read_timeout;
        let transport = self.transport.as_mut().ok_or(SwitchError::SessionClosed)?;

        let mut buffer = String::new();
        let mut sent_username = false;
        let mut sent_password = false;
        loop {
            let remaining = remaining_until(deadline).ok_or(SwitchError::PromptTimeout)?;
            let chunk = match transport.read_some(read_timeout.min(remaining)).await {
                Ok(chunk) => chunk,
                // The V1910 slams the connection shut on bad credentials.
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(SwitchError::AuthenticationFailed);
                }
                Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                    return Err(SwitchError::PromptTimeout);
                }
                Err(err) => return Err(SwitchError::Connection(err)),
            };
            buffer.push_str(&chunk);

            if self.matchers.login_failure.is_match(&buffer) {
                return Err(SwitchError::AuthenticationFailed);
            }

            let tail = last_line(&buffer);
            if tail.is_empty() {
                continue;
            }
            if self.matchers.command_prompt.is_match(tail) {
                return Ok(());
            }
            if !sent_password && self.matchers.password_prompt.is_match(tail) {
                transport
                    .send_line(&self.config.password, read_timeout)
                    .await?;
                sent_password = true;
                buffer.clear();
            } else if !sent_username && self.matchers.login_prompt.is_match(tail) {
                transport
                    .send_line(&self.config.username, read_timeout)
                    .await?;
                sent_username = true;
                buffer.clear();
            }
        }
    }

    /// Runs the hidden-mode unlock dialogue.
    ///
    /// Returns whether the device confirmed the extended command set. A
    /// missing confirmation is not an error: the session continues in the
    /// restricted shell and individual commands get rejected later.
    async fn unlock_shell(&mut self) -> Result<bool, SwitchError> {
        let deadline = Instant::now() + self.config.handshake_timeout;
        let read_timeout = self.config.read_timeout;
        let unlock_command = self.config.matchers.unlock_command.clone();
        let unlock_password = self.config.matchers.unlock_password.clone();
        let confirm_reply = self.config.matchers.unlock_confirm_reply.clone();
        let transport = self.transport.as_mut().ok_or(SwitchError::SessionClosed)?;
        transport.send_line(&unlock_command, read_timeout).await?;

        let mut buffer = String::new();
        let mut confirmed = false;
        let mut sent_confirm = false;
        let mut sent_password = false;
        loop {
            let remaining = remaining_until(deadline).ok_or(SwitchError::PromptTimeout)?;
            let chunk = match transport.read_some(read_timeout.min(remaining)).await {
                Ok(chunk) => chunk,
                Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                    return Err(SwitchError::PromptTimeout);
                }
                Err(err) => return Err(SwitchError::Connection(err)),
            };
            buffer.push_str(&chunk);

            if self.matchers.unlock_success.is_match(&buffer) {
                confirmed = true;
            }

            let tail = last_line(&buffer);
            if tail.is_empty() {
                continue;
            }
            // Interactive tails first: a prompt-shaped fragment inside the
            // confirmation question must not end the dialogue early.
            if !sent_confirm && self.matchers.unlock_confirm.is_match(tail) {
                transport.send_line(&confirm_reply, read_timeout).await?;
                sent_confirm = true;
                buffer.clear();
            } else if !sent_password && self.matchers.unlock_password_prompt.is_match(tail) {
                transport.send_line(&unlock_password, read_timeout).await?;
                sent_password = true;
                buffer.clear();
            } else if self.matchers.command_prompt.is_match(tail) {
                return Ok(confirmed);
            }
        }
    }

    /// Best-effort paging disable. Pagination handling in
    /// [`command_dialogue`](Self::command_dialogue) stays active regardless,
    /// since not every firmware build accepts the command.
    async fn disable_paging(&mut self) -> Result<(), SwitchError> {
        let command = self.config.matchers.paging_disable_command.clone();
        if command.is_empty() {
            return Ok(());
        }
        let deadline = Instant::now() + self.config.command_timeout;
        match self.command_dialogue(&command, deadline).await {
            Ok(_) => Ok(()),
            Err(SwitchError::InsufficientPrivilege(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

fn remaining_until(deadline: Instant) -> Option<Duration> {
    let now = Instant::now();
    if now >= deadline {
        None
    } else {
        Some(deadline - now)
    }
}

/// Last line of the buffer, with line-ending control characters trimmed, for
/// prompt matching against partial (un-terminated) output.
fn last_line(buffer: &str) -> &str {
    buffer
        .rsplit('\n')
        .next()
        .unwrap_or(buffer)
        .trim_matches(['\r', '\u{8}'])
}

/// Emulates CR and backspace the way a terminal would, so the in-place
/// erase sequences a paginating device emits disappear from the output.
pub(crate) fn scrub(raw: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\n' => lines.push(std::mem::take(&mut current)),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                    lines.push(std::mem::take(&mut current));
                } else {
                    // Bare CR: the device is overwriting the line.
                    current.clear();
                }
            }
            '\u{8}' => {
                current.pop();
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines.join("\n")
}

/// Scrubs the accumulated dialogue and strips the echoed command line and the
/// trailing prompt, leaving only the command's own output.
fn finish_output(buffer: &str, command: &str, prompt: &RegexSet) -> String {
    let scrubbed = scrub(buffer);
    let mut lines: Vec<&str> = scrubbed.lines().collect();
    if let Some(last) = lines.last()
        && prompt.is_match(last.trim_start())
    {
        lines.pop();
    }
    if let Some(first) = lines.first()
        && first.trim() == command.trim()
    {
        lines.remove(0);
    }
    while lines.first().is_some_and(|l| l.trim().is_empty()) {
        lines.remove(0);
    }
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatcherProfile;

    fn matchers() -> CompiledMatchers {
        CompiledMatchers::compile(&MatcherProfile::default()).expect("default profile compiles")
    }

    #[test]
    fn compile_rejects_empty_command_prompts() {
        let mut profile = MatcherProfile::default();
        profile.command_prompts.clear();
        let err = match CompiledMatchers::compile(&profile) {
            Ok(_) => panic!("empty command_prompts should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, SwitchError::InvalidMatcherProfile(_)));
    }

    #[test]
    fn compile_rejects_bad_regex() {
        let mut profile = MatcherProfile::default();
        profile.login_failures.push("[".to_string());
        assert!(matches!(
            CompiledMatchers::compile(&profile),
            Err(SwitchError::InvalidMatcherProfile(_))
        ));
    }

    #[test]
    fn find_pagination_returns_earliest_marker() {
        let m = matchers();
        let buffer = "line one\n  ---- More ----rest --More--";
        let range = m.find_pagination(buffer).expect("marker found");
        assert_eq!(&buffer[range], "---- More ----");
    }

    #[test]
    fn scrub_preserves_crlf_lines() {
        assert_eq!(scrub("abc\r\ndef\r\n"), "abc\ndef");
    }

    #[test]
    fn scrub_drops_overwritten_line_content() {
        // CR without LF rewinds the line, as the device does when erasing a
        // pagination marker after the page keystroke.
        assert_eq!(scrub("junk\rreal\r\nnext"), "real\nnext");
        assert_eq!(scrub("        \rpage two\r\n"), "page two");
    }

    #[test]
    fn scrub_applies_backspaces() {
        assert_eq!(scrub("abcd\u{8}\u{8}ef"), "abef");
    }

    #[test]
    fn finish_output_strips_echo_and_prompt() {
        let m = matchers();
        let buffer = "display version\r\nComware Software, Version 5.20\r\n<V1910-24G>";
        let output = finish_output(buffer, "display version", &m.command_prompt);
        assert_eq!(output, "Comware Software, Version 5.20");
    }

    #[test]
    fn finish_output_keeps_body_without_echo() {
        let m = matchers();
        let buffer = "Total: 5\r\nUsed: 3\r\n<sw>";
        let output = finish_output(buffer, "display memory", &m.command_prompt);
        assert_eq!(output, "Total: 5\nUsed: 3");
    }

    #[test]
    fn last_line_handles_partial_prompt() {
        assert_eq!(last_line("banner\r\n<V1910>"), "<V1910>");
        assert_eq!(last_line("<V1910>"), "<V1910>");
        assert_eq!(last_line("abc\r\n"), "");
    }

    #[test]
    fn session_state_display_names() {
        assert_eq!(SessionState::Ready.to_string(), "ready");
        assert_eq!(SessionState::UnlockingShell.to_string(), "unlocking-shell");
    }
}
