//! Raw Telnet transport.
//!
//! A thin wrapper over a TCP stream that strips Telnet IAC command sequences
//! from the inbound byte stream and refuses every option the peer proposes
//! (DO → WONT, WILL → DONT), leaving a plain NVT text channel. Every read and
//! write carries an explicit timeout; this crate never blocks indefinitely on
//! a wedged device.

use std::io;
use std::time::Duration;

use log::trace;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

/// Incremental Telnet command-sequence filter.
///
/// Separated from the socket so the byte-level protocol handling is testable
/// without I/O. State persists across chunks because IAC sequences can split
/// at arbitrary read boundaries.
#[derive(Debug, Default)]
pub(crate) struct TelnetFilter {
    state: FilterState,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum FilterState {
    #[default]
    Data,
    Command,
    Negotiate(u8),
    Subnegotiation,
    SubnegotiationCommand,
}

impl TelnetFilter {
    /// Feeds raw bytes through the filter.
    ///
    /// Plain data bytes are appended to `data`; refusals for negotiation
    /// requests are appended to `replies` and must be written back to the
    /// peer.
    pub(crate) fn feed(&mut self, input: &[u8], data: &mut Vec<u8>, replies: &mut Vec<u8>) {
        for &byte in input {
            self.state = match self.state {
                FilterState::Data => {
                    if byte == IAC {
                        FilterState::Command
                    } else {
                        data.push(byte);
                        FilterState::Data
                    }
                }
                FilterState::Command => match byte {
                    // Escaped 0xFF data byte.
                    IAC => {
                        data.push(IAC);
                        FilterState::Data
                    }
                    DO | WILL | DONT | WONT => FilterState::Negotiate(byte),
                    SB => FilterState::Subnegotiation,
                    _ => FilterState::Data,
                },
                FilterState::Negotiate(verb) => {
                    match verb {
                        DO => replies.extend_from_slice(&[IAC, WONT, byte]),
                        WILL => replies.extend_from_slice(&[IAC, DONT, byte]),
                        // Refusals and acknowledgements of our refusals need
                        // no answer.
                        _ => {}
                    }
                    FilterState::Data
                }
                FilterState::Subnegotiation => {
                    if byte == IAC {
                        FilterState::SubnegotiationCommand
                    } else {
                        FilterState::Subnegotiation
                    }
                }
                FilterState::SubnegotiationCommand => {
                    if byte == SE {
                        FilterState::Data
                    } else {
                        FilterState::Subnegotiation
                    }
                }
            };
        }
    }
}

/// A Telnet connection to one device.
pub struct TelnetStream {
    stream: TcpStream,
    filter: TelnetFilter,
    peer: String,
}

impl TelnetStream {
    /// Opens a connection, failing after `timeout`.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> io::Result<TelnetStream> {
        let peer = format!("{host}:{port}");
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        stream.set_nodelay(true)?;
        trace!("{peer} TCP connection established");
        Ok(Self {
            stream,
            filter: TelnetFilter::default(),
            peer,
        })
    }

    /// Reads the next chunk of decoded text from the device.
    ///
    /// Loops internally past chunks that contain only negotiation traffic.
    /// Returns `TimedOut` when nothing arrives within `timeout` and
    /// `UnexpectedEof` when the peer closed the connection.
    pub async fn read_some(&mut self, timeout: Duration) -> io::Result<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut raw = [0u8; 4096];
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))?;
            let n = tokio::time::timeout(remaining, self.stream.read(&mut raw))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))??;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by device",
                ));
            }

            let mut data = Vec::with_capacity(n);
            let mut replies = Vec::new();
            self.filter.feed(&raw[..n], &mut data, &mut replies);
            if !replies.is_empty() {
                trace!("{} refusing {} negotiation byte(s)", self.peer, replies.len());
                self.stream.write_all(&replies).await?;
            }
            if !data.is_empty() {
                let text = String::from_utf8_lossy(&data).into_owned();
                trace!("{} read {:?}", self.peer, text);
                return Ok(text);
            }
        }
    }

    /// Sends one line, terminated with CRLF per the Telnet NVT convention.
    pub async fn send_line(&mut self, line: &str, timeout: Duration) -> io::Result<()> {
        trace!("{} send line {:?}", self.peer, line);
        let mut bytes = Vec::with_capacity(line.len() + 2);
        bytes.extend_from_slice(line.as_bytes());
        bytes.extend_from_slice(b"\r\n");
        self.send_raw(&bytes, timeout).await
    }

    /// Sends raw bytes, e.g. the single-space page keystroke.
    pub async fn send_raw(&mut self, bytes: &[u8], timeout: Duration) -> io::Result<()> {
        tokio::time::timeout(timeout, self.stream.write_all(bytes))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write timed out"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_filter(input: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut filter = TelnetFilter::default();
        let mut data = Vec::new();
        let mut replies = Vec::new();
        filter.feed(input, &mut data, &mut replies);
        (data, replies)
    }

    #[test]
    fn plain_text_passes_through() {
        let (data, replies) = run_filter(b"Login:");
        assert_eq!(data, b"Login:");
        assert!(replies.is_empty());
    }

    #[test]
    fn do_is_refused_with_wont() {
        // IAC DO ECHO(1) interleaved with text.
        let (data, replies) = run_filter(&[b'a', IAC, DO, 1, b'b']);
        assert_eq!(data, b"ab");
        assert_eq!(replies, vec![IAC, WONT, 1]);
    }

    #[test]
    fn will_is_refused_with_dont() {
        let (data, replies) = run_filter(&[IAC, WILL, 3]);
        assert!(data.is_empty());
        assert_eq!(replies, vec![IAC, DONT, 3]);
    }

    #[test]
    fn peer_refusals_are_not_answered() {
        let (_, replies) = run_filter(&[IAC, WONT, 1, IAC, DONT, 3]);
        assert!(replies.is_empty());
    }

    #[test]
    fn subnegotiation_is_skipped_entirely() {
        let mut input = vec![b'x', IAC, SB, 24, 1, 2, 3, IAC, SE, b'y'];
        let (data, replies) = run_filter(&input);
        assert_eq!(data, b"xy");
        assert!(replies.is_empty());

        // An IAC inside the subnegotiation payload must not terminate it.
        input = vec![IAC, SB, 24, IAC, 99, 5, IAC, SE, b'z'];
        let (data, _) = run_filter(&input);
        assert_eq!(data, b"z");
    }

    #[test]
    fn escaped_iac_yields_data_byte() {
        let (data, replies) = run_filter(&[IAC, IAC, b'q']);
        assert_eq!(data, vec![IAC, b'q']);
        assert!(replies.is_empty());
    }

    #[test]
    fn sequences_split_across_chunks_are_handled() {
        let mut filter = TelnetFilter::default();
        let mut data = Vec::new();
        let mut replies = Vec::new();
        filter.feed(&[b'a', IAC], &mut data, &mut replies);
        filter.feed(&[DO], &mut data, &mut replies);
        filter.feed(&[1, b'b'], &mut data, &mut replies);
        assert_eq!(data, b"ab");
        assert_eq!(replies, vec![IAC, WONT, 1]);
    }
}
