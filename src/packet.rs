//! Decoded packets and the bounded pull buffer.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

/// Maximum number of packets held for pull-style consumption.
pub const PACKET_BUFFER_CAPACITY: usize = 100;

static FIELD_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ ,]+").expect("field separator pattern is valid"));

/// One decoded line of incoming data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Packet {
    text: String,
}

impl Packet {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Decode raw line bytes; invalid UTF-8 is replaced, never rejected.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::new(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Interpret the payload, falling back tier by tier: JSON, then fields
    /// split on spaces/commas, then the raw text. Never fails.
    pub fn decode(&self) -> PacketValue {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&self.text) {
            return PacketValue::Json(value);
        }

        let fields: Vec<String> = FIELD_SEPARATOR
            .split(self.text.trim())
            .filter(|field| !field.is_empty())
            .map(str::to_string)
            .collect();
        if fields.len() > 1 {
            return PacketValue::Fields(fields);
        }

        PacketValue::Raw(self.text.clone())
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<String> for Packet {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&str> for Packet {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl AsRef<str> for Packet {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

/// Result of [`Packet::decode`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PacketValue {
    Json(serde_json::Value),
    Fields(Vec<String>),
    Raw(String),
}

/// Fixed-capacity FIFO; pushing into a full buffer evicts the oldest packet.
#[derive(Debug, Clone)]
pub struct PacketBuffer {
    packets: VecDeque<Packet>,
    capacity: usize,
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self::with_capacity(PACKET_BUFFER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            packets: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `packet`, returning the evicted oldest packet if full.
    pub fn push(&mut self, packet: Packet) -> Option<Packet> {
        let evicted = if self.packets.len() >= self.capacity {
            self.packets.pop_front()
        } else {
            None
        };
        self.packets.push_back(packet);
        evicted
    }

    pub fn pop(&mut self) -> Option<Packet> {
        self.packets.pop_front()
    }

    /// Packet at `index` without removing it; 0 is the oldest.
    pub fn peek(&self, index: usize) -> Option<&Packet> {
        self.packets.get(index)
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.packets.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Packet> {
        self.packets.iter()
    }
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_buffer_fifo_order() {
        let mut buffer = PacketBuffer::new();
        buffer.push("a".into());
        buffer.push("b".into());

        assert_eq!(buffer.peek(0).map(Packet::as_str), Some("a"));
        assert_eq!(buffer.peek(1).map(Packet::as_str), Some("b"));
        assert_eq!(buffer.peek(2), None);
        assert_eq!(buffer.pop().map(Packet::into_string), Some("a".into()));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_buffer_evicts_oldest_at_capacity() {
        let mut buffer = PacketBuffer::new();
        for i in 1..=PACKET_BUFFER_CAPACITY {
            assert!(buffer.push(Packet::new(i.to_string())).is_none());
        }
        let evicted = buffer.push(Packet::new("101"));

        assert_eq!(evicted, Some(Packet::new("1")));
        assert_eq!(buffer.len(), PACKET_BUFFER_CAPACITY);
        assert_eq!(buffer.peek(0).map(Packet::as_str), Some("2"));
    }

    #[test]
    fn test_pop_empty() {
        let mut buffer = PacketBuffer::new();
        assert!(buffer.pop().is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_decode_json_tier() {
        let packet = Packet::new(r#"{"temp": 21.5, "ok": true}"#);
        assert_eq!(
            packet.decode(),
            PacketValue::Json(json!({"temp": 21.5, "ok": true}))
        );
    }

    #[test]
    fn test_decode_fields_tier() {
        let packet = Packet::new("12, 34 ,56 78");
        assert_eq!(
            packet.decode(),
            PacketValue::Fields(vec!["12".into(), "34".into(), "56".into(), "78".into()])
        );
    }

    #[test]
    fn test_decode_raw_tier() {
        assert_eq!(
            Packet::new("READY").decode(),
            PacketValue::Raw("READY".into())
        );
        assert_eq!(Packet::new("").decode(), PacketValue::Raw(String::new()));
        // Broken JSON with no separators stays raw.
        assert_eq!(
            Packet::new("{broken").decode(),
            PacketValue::Raw("{broken".into())
        );
    }

    #[test]
    fn test_lossy_utf8() {
        let packet = Packet::from_bytes(&[b'o', b'k', 0xff]);
        assert!(packet.as_str().starts_with("ok"));
    }

    proptest! {
        #[test]
        fn prop_buffer_keeps_last_items(count in 0usize..400) {
            let mut buffer = PacketBuffer::new();
            for i in 0..count {
                buffer.push(Packet::new(i.to_string()));
            }

            prop_assert!(buffer.len() <= PACKET_BUFFER_CAPACITY);
            prop_assert_eq!(buffer.len(), count.min(PACKET_BUFFER_CAPACITY));
            let first = count.saturating_sub(PACKET_BUFFER_CAPACITY);
            let expected: Vec<String> = (first..count).map(|i| i.to_string()).collect();
            let actual: Vec<String> = buffer.iter().map(|p| p.as_str().to_string()).collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
