use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// Kind prefix for service access credentials
pub const ACCESS_KIND: &str = "ak";
/// Kind prefix for master key ids
pub const MASTER_KEY_KIND: &str = "mk";
pub const SEP: char = '.';

// 2020-01-01T00:00:00Z
const ID_EPOCH_MILLIS: i64 = 1_577_836_800_000;
const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;

/// Snowflake-style ordinals: milliseconds since 2020 | node bits | sequence.
///
/// Strictly increasing within a process; the node bits keep two gateways
/// minting in the same millisecond apart.
#[derive(Debug)]
pub struct IdGenerator {
    node_bits: u64,
    last: AtomicU64,
}

impl IdGenerator {
    pub fn new(node_id: &str) -> Self {
        let mut s = DefaultHasher::new();
        node_id.hash(&mut s);
        Self {
            node_bits: s.finish() & ((1 << NODE_BITS) - 1),
            last: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> u64 {
        let millis = (Utc::now().timestamp_millis() - ID_EPOCH_MILLIS).max(0) as u64;
        let base = (millis << (NODE_BITS + SEQUENCE_BITS)) | (self.node_bits << SEQUENCE_BITS);
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let candidate = if base > last { base } else { last + 1 };
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }

    pub fn next_master_key_id(&self) -> String {
        format!("{}{}", MASTER_KEY_KIND, self.next_id())
    }
}

/// Parsed form of `{kind}.{masterKeyId}.{checksum:04x}{ordinal}`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessId {
    pub kind: String,
    pub master_key_id: String,
    pub checksum: u16,
    pub ordinal: String,
}

impl AccessId {
    pub fn new(master_key_id: &str, checksum: u16, ordinal: &str) -> Self {
        Self {
            kind: ACCESS_KIND.to_string(),
            master_key_id: master_key_id.to_string(),
            checksum,
            ordinal: ordinal.to_string(),
        }
    }

    /// Structural parse only; the checksum is not verified here
    pub fn parse(id: &str) -> Option<Self> {
        let mut parts = id.splitn(3, SEP);
        let kind = parts.next()?;
        let master_key_id = parts.next()?;
        let tail = parts.next()?;
        if kind.is_empty() || master_key_id.is_empty() || tail.len() <= 4 || !tail.is_ascii() {
            return None;
        }
        let (checksum, ordinal) = tail.split_at(4);
        if !ordinal.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let checksum = u16::from_str_radix(checksum, 16).ok()?;
        Some(Self {
            kind: kind.to_string(),
            master_key_id: master_key_id.to_string(),
            checksum,
            ordinal: ordinal.to_string(),
        })
    }

    /// Id prefix selecting every access of a kind, optionally under one master key
    pub fn prefix(master_key_id: Option<&str>) -> String {
        match master_key_id {
            Some(mk) => format!("{}{}{}{}", ACCESS_KIND, SEP, mk, SEP),
            None => format!("{}{}", ACCESS_KIND, SEP),
        }
    }
}

impl std::fmt::Display for AccessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}{}{:04x}{}",
            self.kind, SEP, self.master_key_id, SEP, self.checksum, self.ordinal
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_ids_strictly_increase() {
        let gen = IdGenerator::new("gw-1");
        let mut prev = gen.next_id();
        for _ in 0..10_000 {
            let next = gen.next_id();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let gen = Arc::new(IdGenerator::new("gw-1"));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gen = gen.clone();
                std::thread::spawn(move || (0..2_000).map(|_| gen.next_id()).collect::<Vec<_>>())
            })
            .collect();
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
    }

    #[test]
    fn test_access_id_format_and_parse() {
        let id = AccessId::new("mk123", 0x0a1f, "987654");
        let rendered = id.to_string();
        assert_eq!(rendered, "ak.mk123.0a1f987654");
        assert_eq!(AccessId::parse(&rendered), Some(id));
    }

    #[test]
    fn test_access_id_parse_rejects_malformed() {
        for bad in [
            "",
            "ak",
            "ak.mk1",
            "ak.mk1.0a1f",
            "ak..0a1f12",
            ".mk1.0a1f12",
            "ak.mk1.zzzz12",
            "ak.mk1.0a1f12x",
            "ak.mk1.0a1é12",
        ] {
            assert!(AccessId::parse(bad).is_none(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_prefix() {
        assert_eq!(AccessId::prefix(None), "ak.");
        assert_eq!(AccessId::prefix(Some("mk7")), "ak.mk7.");
    }
}
