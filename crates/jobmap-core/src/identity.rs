//! Identity atoms: content hashes, scheduler ids, map tags.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, InvalidId};

/// Characters that may not appear in a map tag (tags become directory names).
pub const INVALID_TAG_CHARACTERS: &[char] =
    &['/', '\\', '<', '>', ':', '"', '|', '?', '*', ' ', '[', ']', '!'];

/// Digest of a function name and a canonically serialized argument tuple.
///
/// The first 16 bytes of a SHA-256. Used both as the cache
/// key in the content store and as the correlation key echoed back through
/// the scheduler event stream.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    pub const HEX_LEN: usize = 32;

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Hash a payload.
    pub fn digest(payload: &[u8]) -> Self {
        let full = Sha256::digest(payload);
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&full[..16]);
        Self(bytes)
    }

    /// Hash `payload` under a length-prefixed `key`.
    pub fn digest_keyed(key: &[u8], payload: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((key.len() as u64).to_le_bytes());
        hasher.update(key);
        hasher.update(payload);
        let full = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&full[..16]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        if s.len() != Self::HEX_LEN {
            return Err(InvalidId::ContentHash {
                raw: s.to_string(),
                reason: format!("must be {} hex chars (got {})", Self::HEX_LEN, s.len()),
            }
            .into());
        }
        let mut bytes = [0u8; 16];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex = std::str::from_utf8(chunk).map_err(|_| InvalidId::ContentHash {
                raw: s.to_string(),
                reason: "contains invalid UTF-8".into(),
            })?;
            bytes[i] = u8::from_str_radix(hex, 16).map_err(|_| InvalidId::ContentHash {
                raw: s.to_string(),
                reason: format!("contains invalid hex: {}", hex),
            })?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Scheduler-assigned id for one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(u64);

impl ClusterId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a job within one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcId(u64);

impl ProcId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a map. Doubles as its directory name, so path separators and shell
/// metacharacters are refused.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tag(String);

impl Tag {
    pub fn parse(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        if s.is_empty() {
            return Err(InvalidId::Tag {
                raw: s,
                reason: "must be a non-empty string".into(),
            }
            .into());
        }
        let mut bad: Vec<char> = s
            .chars()
            .filter(|c| INVALID_TAG_CHARACTERS.contains(c))
            .collect();
        if !bad.is_empty() {
            bad.sort_unstable();
            bad.dedup();
            let listed: Vec<String> = bad.iter().map(|c| format!("{c:?}")).collect();
            return Err(InvalidId::Tag {
                raw: s,
                reason: format!("contains invalid characters: {}", listed.join(", ")),
            }
            .into());
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({:?})", self.0)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Tag {
    type Error = CoreError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Tag::parse(s)
    }
}

impl From<Tag> for String {
    fn from(t: Tag) -> String {
        t.0
    }
}

/// Name under which a component function is registered with the worker.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FunctionName(String);

impl FunctionName {
    pub fn parse(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into().trim().to_string();
        if s.is_empty() {
            return Err(InvalidId::Function {
                raw: s,
                reason: "empty".into(),
            }
            .into());
        }
        if s.chars().any(char::is_whitespace) {
            return Err(InvalidId::Function {
                raw: s,
                reason: "cannot contain whitespace".into(),
            }
            .into());
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionName({:?})", self.0)
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for FunctionName {
    type Error = CoreError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        FunctionName::parse(s)
    }
}

impl From<FunctionName> for String {
    fn from(n: FunctionName) -> String {
        n.0
    }
}

/// Persisted identity of a map.
///
/// `hashes[i]` is the input of component `i` for the whole lifetime of the
/// map. `cluster_ids` only ever grows: one entry per (re)submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapIdentity {
    pub tag: Tag,
    pub cluster_ids: Vec<ClusterId>,
    pub hashes: Vec<ContentHash>,
    pub num_components: usize,
}

impl MapIdentity {
    pub fn new(tag: Tag, hashes: Vec<ContentHash>) -> Self {
        let num_components = hashes.len();
        Self {
            tag,
            cluster_ids: Vec::new(),
            hashes,
            num_components,
        }
    }

    /// Components whose input is `hash` (duplicated inputs share a hash).
    pub fn components_for(&self, hash: &ContentHash) -> impl Iterator<Item = usize> + '_ {
        let hash = *hash;
        self.hashes
            .iter()
            .enumerate()
            .filter(move |(_, h)| **h == hash)
            .map(|(idx, _)| idx)
    }
}
