use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::OccError;

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));
static SPECIES_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\p{L}[^\p{Cc}]*$").expect("static regex"));

/// Scientific name as sent to the taxonomic backbone lookup.
///
/// Leading/trailing whitespace is dropped and inner whitespace runs collapse to
/// a single space, so `"Quercus  robur "` and `"Quercus robur"` are the same
/// name (and produce the same fingerprint).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SpeciesName(String);

impl SpeciesName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpeciesName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SpeciesName {
    type Err = OccError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = WHITESPACE_RUN.replace_all(value.trim(), " ").into_owned();
        if !SPECIES_NAME.is_match(&normalized) {
            return Err(OccError::InvalidSpeciesName(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for SpeciesName {
    type Error = OccError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SpeciesName> for String {
    fn from(value: SpeciesName) -> Self {
        value.0
    }
}

/// GBIF backbone usage key for a taxon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxonKey(u64);

impl TaxonKey {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaxonKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// GBIF occurrence identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OccurrenceKey(u64);

impl OccurrenceKey {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OccurrenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
