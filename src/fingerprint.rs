use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::OccError;
use crate::query::QuerySpec;

/// Hex characters kept from the SHA-256 digest (128 bits).
pub const FINGERPRINT_LEN: usize = 32;

/// Content address of a [`QuerySpec`]; names the cached dataset files.
/// Not a security boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stem of the cached occurrence table.
    pub fn geodata_file_name(&self) -> String {
        format!("{}_geodata.csv", self.0)
    }

    pub fn coordinates_file_name(&self) -> String {
        format!("{}_coordinates.csv", self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = OccError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        let is_valid = normalized.len() == FINGERPRINT_LEN
            && normalized.chars().all(|ch| ch.is_ascii_hexdigit());
        if !is_valid {
            return Err(OccError::InvalidFingerprint(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = OccError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

/// Canonical text hashed by [`fingerprint`]: every filter on its own line in a
/// fixed key order with its value as a JSON string, then the species list as a
/// JSON array. Values are escaped so no value can forge another line.
pub fn canonical_text(query: &QuerySpec) -> String {
    let mut text = String::from("Filters:\n");
    for (key, value) in query.filters().entries() {
        text.push_str(key);
        text.push_str(": ");
        text.push_str(&serde_json::Value::from(value).to_string());
        text.push('\n');
    }
    let species = query
        .species()
        .iter()
        .map(|name| serde_json::Value::from(name.as_str()).to_string())
        .collect::<Vec<_>>()
        .join(", ");
    text.push('[');
    text.push_str(&species);
    text.push(']');
    text
}

pub fn fingerprint(query: &QuerySpec) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(canonical_text(query).as_bytes());
    let digest = hex::encode(hasher.finalize());
    Fingerprint(digest[..FINGERPRINT_LEN].to_string())
}
