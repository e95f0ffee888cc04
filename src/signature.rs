//! Stage signatures
//!
//! A signature is the SHA256 of a canonical serialization of everything that
//! influences a stage's output: the stage kind, the previous stage's
//! signature and the stage's own inputs. Same inputs = same signature, across
//! runs and process restarts.
//!
//! # Canonical form
//!
//! Every field is written as its byte length (u64, little endian) followed by
//! its bytes, so `["ab", "c"]` and `["a", "bc"]` hash differently. Lists keep
//! their declared order. Maps are `BTreeMap`s and are emitted in lexical key
//! order, which keeps map-valued inputs (env, labels) stable regardless of how
//! they were declared.

use crate::stage::StageKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Marker hashed in place of a dependency signature for the first stage
const NO_DEPENDENCY: &str = "-";

/// Fixed-length (64 hex chars) stage signature
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    /// Full hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for display and tags
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered accumulator for a stage's signature inputs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureInputs(Vec<String>);

impl SignatureInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one input
    pub fn push(&mut self, value: impl Into<String>) -> &mut Self {
        self.0.push(value.into());
        self
    }

    /// Append inputs in iteration order
    pub fn extend<I, S>(&mut self, values: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.extend(values.into_iter().map(Into::into));
        self
    }

    /// Append an optional input; `None` is hashed as an empty string
    pub fn push_opt(&mut self, value: Option<&str>) -> &mut Self {
        self.0.push(value.unwrap_or_default().to_string());
        self
    }

    /// Append a map as `key, value` pairs in lexical key order
    pub fn push_map(&mut self, map: &BTreeMap<String, String>) -> &mut Self {
        for (key, value) in map {
            self.0.push(key.clone());
            self.0.push(value.clone());
        }
        self
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

fn write_field(hasher: &mut Sha256, field: &[u8]) {
    hasher.update((field.len() as u64).to_le_bytes());
    hasher.update(field);
}

/// Compute a stage signature.
///
/// Pure and total: the result depends only on the arguments.
pub fn compute_signature(
    dependency: Option<&Signature>,
    kind: StageKind,
    inputs: &[String],
) -> Signature {
    let mut hasher = Sha256::new();

    write_field(&mut hasher, kind.name().as_bytes());
    write_field(
        &mut hasher,
        dependency.map_or(NO_DEPENDENCY, Signature::as_str).as_bytes(),
    );

    hasher.update((inputs.len() as u64).to_le_bytes());
    for input in inputs {
        write_field(&mut hasher, input.as_bytes());
    }

    Signature(hex::encode(hasher.finalize()))
}

/// SHA256 hex digest of raw bytes
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
