//! NETCONF 1.0 end-of-message framing.

/// Marker that terminates every message.
pub const DELIMITER: &str = "]]>]]>";

/// Append the delimiter to a message.
pub fn frame(message: &str) -> String {
    format!("{}\n{}\n", message.trim_end(), DELIMITER)
}

/// Splits a byte stream into complete messages.
#[derive(Debug, Default)]
pub struct Decoder {
    buf: Vec<u8>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes read from the stream.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Take the next complete message, if one has arrived.
    pub fn next_message(&mut self) -> Option<String> {
        let marker = DELIMITER.as_bytes();
        let end = self
            .buf
            .windows(marker.len())
            .position(|w| w == marker)?;
        let message = String::from_utf8_lossy(&self.buf[..end]).trim().to_string();
        self.buf.drain(..end + marker.len());
        Some(message)
    }

    /// Bytes received that don't yet form a complete message.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }
}
