//! Subtree walk capability.
//!
//! A walker answers one question: give me every `(oid, value)` pair below a
//! root. Workers only see the [`SubtreeWalker`] trait; [`snmp::SnmpWalker`]
//! is the production implementation.

use std::{fmt, str::FromStr};

use async_trait::async_trait;
use thiserror::Error;

use super::error::PollError;

pub mod snmp;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid OID '{input}': {reason}")]
pub struct OidParseError {
    input: String,
    reason: &'static str,
}

/// Object identifier as a list of arcs. Ordering is lexicographic by arc,
/// which is the order agents walk in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn new(arcs: Vec<u32>) -> Self {
        Oid(arcs)
    }

    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when `self` lies strictly below `root`.
    pub fn is_below(&self, root: &Oid) -> bool {
        self.0.len() > root.0.len() && self.0.starts_with(&root.0)
    }

    /// Index suffix of `self` under `root`.
    pub fn suffix(&self, root: &Oid) -> Option<&[u32]> {
        if self.is_below(root) {
            Some(&self.0[root.0.len()..])
        } else {
            None
        }
    }

    pub fn child(&self, arcs: &[u32]) -> Oid {
        let mut child = self.0.clone();
        child.extend_from_slice(arcs);
        Oid(child)
    }
}

impl FromStr for Oid {
    type Err = OidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let error = |reason| OidParseError {
            input: s.to_string(),
            reason,
        };

        let trimmed = s.trim().trim_start_matches('.');
        if trimmed.is_empty() {
            return Err(error("empty"));
        }

        let arcs = trimmed
            .split('.')
            .map(|arc| arc.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| error("arcs must be unsigned integers"))?;

        if arcs.len() < 2 {
            return Err(error("at least two arcs required"));
        }
        if arcs[0] > 2 || (arcs[0] < 2 && arcs[1] >= 40) {
            return Err(error("first arcs out of range"));
        }

        Ok(Oid(arcs))
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut arcs = self.0.iter();
        if let Some(first) = arcs.next() {
            write!(f, "{first}")?;
        }
        for arc in arcs {
            write!(f, ".{arc}")?;
        }
        Ok(())
    }
}

/// A variable value as reported by an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    ObjectId(Oid),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    /// A type this client does not interpret, kept as tag and raw content.
    Unknown(u8, Vec<u8>),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl Value {
    /// Numeric reading. Text values holding a decimal number also qualify,
    /// some controllers report counters as strings.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Integer(i) => u64::try_from(*i).ok(),
            Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => Some(u64::from(*v)),
            Value::Counter64(v) => Some(*v),
            Value::OctetString(bytes) => std::str::from_utf8(bytes).ok()?.trim().parse().ok(),
            _ => None,
        }
    }

    /// Human readable rendering, `None` for exceptions and NULL.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::OctetString(bytes) => {
                // C-style agents pad fixed-size strings with NULs.
                let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
                Some(match std::str::from_utf8(&bytes[..end]) {
                    Ok(text) if !text.chars().any(|c| c.is_control() && c != '\n' && c != '\t') => {
                        text.to_string()
                    }
                    _ => hex_colon(bytes),
                })
            }
            Value::Integer(i) => Some(i.to_string()),
            Value::ObjectId(oid) => Some(oid.to_string()),
            Value::IpAddress([a, b, c, d]) => Some(format!("{a}.{b}.{c}.{d}")),
            Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => Some(v.to_string()),
            Value::Counter64(v) => Some(v.to_string()),
            Value::Opaque(bytes) => Some(hex_colon(bytes)),
            Value::Unknown(..) => None,
            Value::Null | Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView => None,
        }
    }

    /// Hardware address rendering. Six raw octets become `aa:bb:cc:dd:ee:ff`;
    /// a textual value is taken as is.
    pub fn as_mac(&self) -> Option<String> {
        match self {
            Value::OctetString(bytes) if bytes.len() == 6 => Some(hex_colon(bytes)),
            Value::OctetString(_) => self.as_text().filter(|text| !text.trim().is_empty()),
            _ => None,
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView
        )
    }
}

fn hex_colon(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// One `(oid, value)` pair from a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarBind {
    pub oid: Oid,
    pub value: Value,
}

impl VarBind {
    pub fn new(oid: Oid, value: Value) -> Self {
        Self { oid, value }
    }
}

/// Walks a subtree of a single target's management tree.
#[async_trait]
pub trait SubtreeWalker: Send + Sync {
    /// Returns every binding strictly below `root`, in walk order.
    async fn walk(&self, root: &Oid) -> Result<Vec<VarBind>, PollError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oid_parse_and_display() {
        let oid: Oid = ".1.3.6.1.4.1.14179.2.2.1.1.3".parse().unwrap();
        assert_eq!(oid.len(), 12);
        assert_eq!(oid.to_string(), "1.3.6.1.4.1.14179.2.2.1.1.3");
    }

    #[test]
    fn test_oid_parse_rejects_garbage() {
        assert!("".parse::<Oid>().is_err());
        assert!("1".parse::<Oid>().is_err());
        assert!("1.3.x.1".parse::<Oid>().is_err());
        assert!("3.1".parse::<Oid>().is_err());
        assert!("1.3..6".parse::<Oid>().is_err());
    }

    #[test]
    fn test_oid_ordering_is_by_arc() {
        let a: Oid = "1.3.6.1.2".parse().unwrap();
        let b: Oid = "1.3.6.1.10".parse().unwrap();
        let c: Oid = "1.3.6.1.2.1".parse().unwrap();
        assert!(a < c);
        assert!(c < b);
    }

    #[test]
    fn test_oid_suffix() {
        let root: Oid = "1.3.6.1.4.1.14179.2.2.1.1.3".parse().unwrap();
        let leaf = root.child(&[0, 17, 42, 1]);
        assert_eq!(leaf.suffix(&root), Some(&[0, 17, 42, 1][..]));
        assert_eq!(root.suffix(&root), None);
        assert!(!root.is_below(&leaf));
    }

    #[test]
    fn test_value_as_u64() {
        assert_eq!(Value::Counter32(7).as_u64(), Some(7));
        assert_eq!(Value::Counter64(1 << 40).as_u64(), Some(1 << 40));
        assert_eq!(Value::Integer(-1).as_u64(), None);
        assert_eq!(Value::OctetString(b" 42 ".to_vec()).as_u64(), Some(42));
        assert_eq!(Value::OctetString(b"n/a".to_vec()).as_u64(), None);
        assert_eq!(Value::NoSuchInstance.as_u64(), None);
    }

    #[test]
    fn test_value_as_mac() {
        let raw = Value::OctetString(vec![0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01]);
        assert_eq!(raw.as_mac().as_deref(), Some("aa:bb:cc:dd:ee:01"));

        let text = Value::OctetString(b"00:11:22:33:44:55".to_vec());
        assert_eq!(text.as_mac().as_deref(), Some("00:11:22:33:44:55"));

        assert_eq!(Value::OctetString(Vec::new()).as_mac(), None);
        assert_eq!(Value::Integer(1).as_mac(), None);
    }

    #[test]
    fn test_value_as_text() {
        assert_eq!(
            Value::OctetString(b"AP-Lobby".to_vec()).as_text().as_deref(),
            Some("AP-Lobby")
        );
        assert_eq!(
            Value::IpAddress([10, 0, 0, 7]).as_text().as_deref(),
            Some("10.0.0.7")
        );
        assert_eq!(Value::EndOfMibView.as_text(), None);
    }

    #[test]
    fn test_value_as_text_strips_nul_padding() {
        assert_eq!(
            Value::OctetString(b"AP-1\0\0\0".to_vec()).as_text().as_deref(),
            Some("AP-1")
        );
        assert_eq!(
            Value::OctetString(vec![0x01, 0x00, 0x7f]).as_text().as_deref(),
            Some("01:00:7f")
        );
    }

    #[test]
    fn test_unknown_value_is_not_read() {
        let value = Value::Unknown(0x47, vec![0x05]);
        assert_eq!(value.as_text(), None);
        assert_eq!(value.as_u64(), None);
        assert_eq!(value.as_mac(), None);
        assert!(!value.is_exception());
    }
}
