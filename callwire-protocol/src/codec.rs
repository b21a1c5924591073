//! Message framing.
//!
//! Two framings are supported and both ends must agree on one:
//!
//! - [`Framing::SingleRead`]: every socket read is exactly one message and no
//!   delimiter is written. A message can be at most one read buffer long and
//!   must arrive in a single segment. This is the default and the compatible
//!   wire format.
//! - [`Framing::Lines`]: newline-delimited JSON. Partial lines are buffered
//!   across reads and several messages may arrive in one read.

use crate::error::ProtocolError;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// How messages are delimited on the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// One read is one message.
    #[default]
    SingleRead,
    /// One line is one message.
    Lines,
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::SingleRead => write!(f, "single_read"),
            Framing::Lines => write!(f, "lines"),
        }
    }
}

impl FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "single_read" | "single" => Ok(Framing::SingleRead),
            "lines" | "jsonl" => Ok(Framing::Lines),
            other => Err(format!("unknown framing: {}", other)),
        }
    }
}

/// Serializes a message for the given framing.
pub fn encode_message<T: Serialize>(value: &T, framing: Framing) -> Result<Vec<u8>, ProtocolError> {
    let mut bytes = serde_json::to_vec(value)?;
    if framing == Framing::Lines {
        bytes.push(b'\n');
    }
    Ok(bytes)
}

/// Splits inbound bytes into messages.
pub struct MessageDecoder {
    framing: Framing,
    max_message_size: usize,
    /// Whole messages (single-read framing).
    pending: VecDeque<Bytes>,
    /// Unterminated line data (line framing).
    buffer: BytesMut,
    /// Set after an unterminated line overflowed; input is dropped up to and
    /// including the next newline.
    discarding: bool,
}

impl MessageDecoder {
    pub fn new(framing: Framing, max_message_size: usize) -> Self {
        Self {
            framing,
            max_message_size,
            pending: VecDeque::new(),
            buffer: BytesMut::with_capacity(max_message_size.min(64 * 1024)),
            discarding: false,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Feeds the bytes of one socket read.
    pub fn extend(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        match self.framing {
            Framing::SingleRead => self.pending.push_back(Bytes::copy_from_slice(data)),
            Framing::Lines => self.buffer.extend_from_slice(data),
        }
    }

    /// Returns the next complete message, if any.
    ///
    /// With line framing, an oversized line (complete or not) is discarded
    /// and reported as [`ProtocolError::MessageTooLarge`] exactly once, even
    /// when the rest of it arrives in later reads. Decoding resumes after the
    /// line's newline.
    pub fn next_message(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        match self.framing {
            Framing::SingleRead => Ok(self.pending.pop_front()),
            Framing::Lines => self.next_line(),
        }
    }

    fn next_line(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        loop {
            let newline = self.buffer.iter().position(|&b| b == b'\n');

            if self.discarding {
                match newline {
                    Some(pos) => {
                        let _ = self.buffer.split_to(pos + 1);
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        self.buffer.clear();
                        return Ok(None);
                    }
                }
            }

            let pos = match newline {
                Some(pos) => pos,
                None => {
                    if self.buffer.len() > self.max_message_size {
                        let size = self.buffer.len();
                        self.buffer.clear();
                        self.discarding = true;
                        return Err(ProtocolError::MessageTooLarge {
                            size,
                            max: self.max_message_size,
                        });
                    }
                    return Ok(None);
                }
            };

            let mut line = self.buffer.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            if line.len() > self.max_message_size {
                return Err(ProtocolError::MessageTooLarge {
                    size: line.len(),
                    max: self.max_message_size,
                });
            }
            return Ok(Some(line.freeze()));
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len() + self.pending.iter().map(Bytes::len).sum::<usize>()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.discarding = false;
        self.pending.clear();
    }
}
