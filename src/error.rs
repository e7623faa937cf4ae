use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum OccError {
    #[error("invalid species name: {0:?}")]
    InvalidSpeciesName(String),

    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("no species given (use --species or a gbif-occ.json query file)")]
    #[diagnostic(help("list species under \"species\" in gbif-occ.json"))]
    EmptyQuery,

    #[error("missing query file gbif-occ.json in current directory")]
    MissingConfig,

    #[error("failed to read query file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON query file: {0}")]
    ConfigParse(String),

    #[error("GBIF request failed: {0}")]
    GbifHttp(String),

    #[error("GBIF returned status {status}: {message}")]
    GbifStatus { status: u16, message: String },

    #[error("GBIF response could not be read: {0}")]
    GbifDecode(String),

    #[error("failed to start fetch workers: {0}")]
    WorkerPool(String),

    #[error("dataset not found locally: {0}")]
    #[diagnostic(help("run `gbif-occ acquire` with the same query first"))]
    DatasetNotFound(String),

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl OccError {
    /// True for a 404 from the remote API.
    pub fn is_not_found(&self) -> bool {
        matches!(self, OccError::GbifStatus { status: 404, .. })
    }

    /// The server answered, but not with something usable. Affects a single
    /// lookup, page or record; the run goes on without it.
    pub fn is_bad_response(&self) -> bool {
        matches!(self, OccError::GbifStatus { .. } | OccError::GbifDecode(_))
    }
}

impl From<csv::Error> for OccError {
    fn from(err: csv::Error) -> Self {
        OccError::Csv(err.to_string())
    }
}
