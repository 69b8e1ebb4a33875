//! Error types for session management, parsing, and polling.
//!
//! The taxonomy follows the recovery rules of the poller: only
//! connection-level failures abort a cycle and force a reconnect; everything
//! else degrades a single snapshot field.

use thiserror::Error;

/// Errors that can occur while talking to a switch or assembling a snapshot.
#[derive(Error, Debug)]
pub enum SwitchError {
    /// Transport open/read/write failure.
    ///
    /// Aborts the remainder of the current poll cycle and forces a full
    /// reconnect handshake on the next one.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The device rejected the configured credentials, or closed the
    /// connection during the login exchange.
    #[error("authentication rejected by device")]
    AuthenticationFailed,

    /// A command was rejected by the device shell.
    ///
    /// Typically means the account lacks Management-level access or the
    /// hidden-mode unlock did not take. Surfaced per affected field; never
    /// fatal to the cycle.
    #[error("command '{0}' rejected: insufficient privilege")]
    InsufficientPrivilege(String),

    /// Command output could not be parsed into a typed record.
    #[error("unparseable output of '{command}': {failure}")]
    Parse {
        command: String,
        #[source]
        failure: ParseFailure,
    },

    /// The aggregate per-cycle deadline was exceeded; commands still pending
    /// at that point are abandoned for the cycle.
    #[error("poll cycle deadline exceeded")]
    CycleTimeout,

    /// The command prompt did not reappear within the command timeout.
    ///
    /// Leaves the stream in an unknown position, so it is treated as a
    /// connection loss.
    #[error("timed out waiting for command prompt")]
    PromptTimeout,

    /// The session is not connected.
    #[error("session is not connected")]
    SessionClosed,

    /// A matcher profile regex failed to compile.
    #[error("invalid matcher profile: {0}")]
    InvalidMatcherProfile(String),
}

impl SwitchError {
    /// True when the session must be torn down and the handshake restarted.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            SwitchError::Connection(_) | SwitchError::PromptTimeout | SwitchError::SessionClosed
        )
    }
}

/// Why a parser gave up on a block of command output.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFailureReason {
    /// The output was empty or whitespace-only.
    #[error("empty output")]
    EmptyOutput,

    /// The device answered with a rejection marker instead of data.
    #[error("command rejected by device")]
    CommandRejected,

    /// No recognizable header or field markers anywhere in the block.
    #[error("unrecognized format")]
    UnrecognizedFormat,
}

/// A structural parse failure, carrying a bounded sample of the offending
/// text for diagnosability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason} (raw: {snippet:?})")]
pub struct ParseFailure {
    pub reason: ParseFailureReason,
    pub snippet: String,
}

const SNIPPET_LIMIT: usize = 160;

impl ParseFailure {
    /// Builds a failure, truncating the raw text to a loggable snippet.
    pub fn new(reason: ParseFailureReason, raw: &str) -> Self {
        let mut snippet: String = raw.chars().take(SNIPPET_LIMIT).collect();
        if raw.chars().nth(SNIPPET_LIMIT).is_some() {
            snippet.push('…');
        }
        Self { reason, snippet }
    }
}
