//! Content fingerprints for statements and evidence.
//!
//! A fingerprint identifies the *logical content* of a statement: its kind
//! and, for every agent, the entity identity plus modifier state. Evidence,
//! instance ids, surface text and agent display names never enter it.
//!
//! - algorithm: **SHA-256**
//! - input: a canonical encoding in which every field, nested ones included,
//!   is length-prefixed (below)
//! - output: `"sha256:<64 lowercase hex digits>"`
//!
//! ```text
//! kind=<len><name> n=<len><count> agent=<len><encoded agent> ...
//! encoded agent := entity=<len><key> (mod=<len><m>)* (bound=<len><b>)* loc=<len><opt>
//! key   := grounded=<len><count> (ns=<len><ns> id=<len><id>)* | name=<len><name>
//! m     := type=<len><t> residue=<len><opt> position=<len><opt> modified=<len><0|1>
//! b     := partner=<len><p> bound=<len><0|1>
//! opt   := 0x00 | 0x01 <value>
//! ```
//!
//! Mods and bound conditions are sorted and deduplicated, so they behave as
//! sets. Members of symmetric kinds are sorted by their encoding before
//! hashing, so member order cannot change the digest.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::statement::{Agent, BoundCondition, EntityKey, Evidence, ModCondition, StatementKind};

/// Prefix used in serialized fingerprints.
pub const FINGERPRINT_PREFIX: &str = "sha256:";

/// SHA-256 digest of statement (or evidence) content.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First eight bytes as a signed big-endian integer, for compact display
    /// and integer-keyed tables.
    pub fn short_key(&self) -> i64 {
        let mut head = [0u8; 8];
        head.copy_from_slice(&self.0[..8]);
        i64::from_be_bytes(head)
    }

    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(64);
        for b in self.0 {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{FINGERPRINT_PREFIX}{}", self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FingerprintParseError {
    #[error("fingerprint must start with `{FINGERPRINT_PREFIX}`")]
    MissingPrefix,
    #[error("fingerprint must have 64 hex digits, got {0}")]
    Length(usize),
    #[error("invalid hex digit in fingerprint")]
    InvalidHex,
}

impl FromStr for Fingerprint {
    type Err = FingerprintParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .strip_prefix(FINGERPRINT_PREFIX)
            .ok_or(FingerprintParseError::MissingPrefix)?;
        if hex.len() != 64 {
            return Err(FingerprintParseError::Length(hex.len()));
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let pair = hex
                .get(2 * i..2 * i + 2)
                .ok_or(FingerprintParseError::InvalidHex)?;
            *byte = u8::from_str_radix(pair, 16).map_err(|_| FingerprintParseError::InvalidHex)?;
        }
        Ok(Self(bytes))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let text = String::deserialize(deserializer)?;
            text.parse().map_err(serde::de::Error::custom)
        } else {
            <[u8; 32]>::deserialize(deserializer).map(Fingerprint)
        }
    }
}

// ============================================================================
// Canonical encoding
// ============================================================================

fn push_field(buf: &mut Vec<u8>, tag: &str, value: &[u8]) {
    buf.extend_from_slice(tag.as_bytes());
    buf.push(b'=');
    buf.extend_from_slice(&(value.len() as u64).to_le_bytes());
    buf.extend_from_slice(value);
}

/// An optional value gets a presence byte, so `None` and `Some("")` differ.
fn push_opt(buf: &mut Vec<u8>, tag: &str, value: Option<&str>) {
    match value {
        None => push_field(buf, tag, &[0]),
        Some(text) => {
            let mut present = Vec::with_capacity(text.len() + 1);
            present.push(1);
            present.extend_from_slice(text.as_bytes());
            push_field(buf, tag, &present);
        }
    }
}

fn push_flag(buf: &mut Vec<u8>, tag: &str, value: bool) {
    push_field(buf, tag, &[u8::from(value)]);
}

fn encode_entity(key: &EntityKey) -> Vec<u8> {
    let mut buf = Vec::new();
    match key {
        EntityKey::Grounded(refs) => {
            push_field(&mut buf, "grounded", &(refs.len() as u64).to_le_bytes());
            for grounding in refs {
                push_field(&mut buf, "ns", grounding.namespace.as_bytes());
                push_field(&mut buf, "id", grounding.id.as_bytes());
            }
        }
        EntityKey::Ungrounded(name) => push_field(&mut buf, "name", name.as_bytes()),
    }
    buf
}

fn encode_mod(condition: &ModCondition) -> Vec<u8> {
    let mut buf = Vec::new();
    push_field(&mut buf, "type", condition.mod_type.as_bytes());
    push_opt(&mut buf, "residue", condition.residue.as_deref());
    push_opt(&mut buf, "position", condition.position.as_deref());
    push_flag(&mut buf, "modified", condition.is_modified);
    buf
}

fn encode_bound(condition: &BoundCondition) -> Vec<u8> {
    let mut buf = Vec::new();
    push_field(&mut buf, "partner", condition.partner.as_bytes());
    push_flag(&mut buf, "bound", condition.is_bound);
    buf
}

/// Encodings as a set: sorted, duplicates removed.
fn encoded_set<T>(items: &[T], encode: impl Fn(&T) -> Vec<u8>) -> Vec<Vec<u8>> {
    let mut encoded: Vec<Vec<u8>> = items.iter().map(encode).collect();
    encoded.sort();
    encoded.dedup();
    encoded
}

fn encode_agent(agent: &Agent) -> Vec<u8> {
    let mut buf = Vec::new();
    push_field(&mut buf, "entity", &encode_entity(&agent.entity_key()));
    for m in encoded_set(&agent.mods, encode_mod) {
        push_field(&mut buf, "mod", &m);
    }
    for b in encoded_set(&agent.bound_conditions, encode_bound) {
        push_field(&mut buf, "bound", &b);
    }
    push_opt(&mut buf, "loc", agent.location.as_deref());
    buf
}

/// Fingerprint of a statement's logical content.
pub fn fingerprint(kind: StatementKind, agents: &[Agent]) -> Fingerprint {
    let mut members: Vec<Vec<u8>> = agents.iter().map(encode_agent).collect();
    if kind.is_symmetric() {
        members.sort();
    }

    let mut buf = Vec::new();
    push_field(&mut buf, "kind", kind.as_str().as_bytes());
    push_field(&mut buf, "n", &(members.len() as u64).to_le_bytes());
    for member in &members {
        push_field(&mut buf, "agent", member);
    }

    let mut hasher = Sha256::new();
    hasher.update(&buf);
    Fingerprint(hasher.finalize().into())
}

/// Digest of an evidence record's content.
pub fn evidence_digest(evidence: &Evidence) -> Fingerprint {
    let mut buf = Vec::new();
    push_field(&mut buf, "api", evidence.source_api.as_bytes());
    push_opt(&mut buf, "sid", evidence.source_id.as_deref());
    push_opt(&mut buf, "text", evidence.text.as_deref());
    for (key, value) in &evidence.annotations {
        push_field(&mut buf, "ann", key.as_bytes());
        push_field(&mut buf, "val", value.as_bytes());
    }

    let mut hasher = Sha256::new();
    hasher.update(&buf);
    Fingerprint(hasher.finalize().into())
}
