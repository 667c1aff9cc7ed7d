//! Component arguments and their canonical serialization.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::{ContentHash, FunctionName};

/// Positional and keyword arguments for one component.
///
/// Canonical form is the JSON encoding of this struct. Keyword arguments
/// live in a `BTreeMap` and nested objects in `serde_json::Map` (sorted
/// without `preserve_order`), so equal arguments always encode to the same
/// bytes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Args {
    #[serde(default)]
    pub positional: Vec<Value>,
    #[serde(default)]
    pub keyword: BTreeMap<String, Value>,
}

impl Args {
    pub fn new(positional: Vec<Value>, keyword: BTreeMap<String, Value>) -> Self {
        Self {
            positional,
            keyword,
        }
    }

    /// A single positional argument.
    pub fn single(value: impl Into<Value>) -> Self {
        Self {
            positional: vec![value.into()],
            keyword: BTreeMap::new(),
        }
    }

    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Canonical bytes and the hash that keys them for `function`.
    ///
    /// The function name is part of the digest: the same arguments under
    /// two functions are two different components.
    pub fn encode(&self, function: &FunctionName) -> Result<(ContentHash, Vec<u8>), serde_json::Error> {
        let bytes = self.to_canonical_bytes()?;
        let hash = ContentHash::digest_keyed(function.as_str().as_bytes(), &bytes);
        Ok((hash, bytes))
    }
}

/// Index-wise pairing of positional tuples with keyword mappings.
///
/// The shorter stream is right-padded with an empty tuple or empty mapping;
/// iteration ends only once both streams are exhausted.
pub struct ZipArgs<P, K> {
    positional: P,
    keyword: K,
}

pub fn zip_args_and_kwargs<P, K>(positional: P, keyword: K) -> ZipArgs<P::IntoIter, K::IntoIter>
where
    P: IntoIterator<Item = Vec<Value>>,
    K: IntoIterator<Item = BTreeMap<String, Value>>,
{
    ZipArgs {
        positional: positional.into_iter(),
        keyword: keyword.into_iter(),
    }
}

impl<P, K> Iterator for ZipArgs<P, K>
where
    P: Iterator<Item = Vec<Value>>,
    K: Iterator<Item = BTreeMap<String, Value>>,
{
    type Item = Args;

    fn next(&mut self) -> Option<Args> {
        match (self.positional.next(), self.keyword.next()) {
            (None, None) => None,
            (positional, keyword) => Some(Args {
                positional: positional.unwrap_or_default(),
                keyword: keyword.unwrap_or_default(),
            }),
        }
    }
}
