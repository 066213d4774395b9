//! Record framing for the device's carriage-return protocol.

use crate::protocol::{Command, RECORD_SEPARATOR, UNIT_MARKER};

/// Wrap a command in the unit prefix and terminate it
pub fn encode(command: &Command) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(UNIT_MARKER.len() + 24);
    bytes.extend_from_slice(UNIT_MARKER.as_bytes());
    bytes.extend_from_slice(command.token().as_bytes());
    bytes.push(RECORD_SEPARATOR);
    bytes
}

/// Append `new_bytes` to the carry-over `buffer` and split off every complete record.
///
/// Returns the complete records (trimmed, blank ones skipped) and the unterminated
/// tail, which must be passed back in with the next delivery.
pub fn feed(mut buffer: Vec<u8>, new_bytes: &[u8]) -> (Vec<String>, Vec<u8>) {
    buffer.extend_from_slice(new_bytes);

    let Some(last_separator) = buffer.iter().rposition(|b| *b == RECORD_SEPARATOR) else {
        return (Vec::new(), buffer);
    };

    let remainder = buffer.split_off(last_separator + 1);
    let records = buffer
        .split(|b| *b == RECORD_SEPARATOR)
        .map(|raw| String::from_utf8_lossy(raw).trim().to_string())
        .filter(|record| !record.is_empty())
        .collect();

    (records, remainder)
}

/// Carry-over buffer for one connection's read-loop
#[derive(Debug, Default)]
pub struct RecordBuffer {
    pending: Vec<u8>,
}

impl RecordBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed freshly read bytes, returning every record they completed
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let (records, remainder) = feed(std::mem::take(&mut self.pending), bytes);
        self.pending = remainder;
        records
    }

    /// Bytes still waiting for a separator
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }
}
