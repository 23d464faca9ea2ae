use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RipperError>;

/// Errors which make the configured run impossible. These are fatal and are reported
/// before any file is dispatched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No parser type selected. Choose `--csv` for evtx2csv or `--db` for evtx2sql")]
    NoOutputMode,

    #[error("Only one parser type may be selected, got both `--csv` and `--db`")]
    ConflictingOutputModes,

    #[error("Input not given")]
    MissingInput,

    #[error("Output not given")]
    MissingOutput,

    #[error("Number of workers must be at least 1")]
    ZeroWorkers,

    #[error(
        "Number of cores given ({requested}) is equal to or greater than the number of cores available ({available}), try reducing this number"
    )]
    TooManyWorkers { requested: usize, available: usize },

    #[error("Row limit must be -1 (unlimited) or a non-negative number, got {0}")]
    InvalidRowLimit(i64),

    #[error("CSV buffer size must be greater than zero")]
    ZeroBufferSize,

    #[error("CSV delimiter must be a single ASCII character, got `{0}`")]
    NonAsciiDelimiter(char),
}

/// Failure reported by the external decoder for one level of the
/// `open -> chunks -> records` contract.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Failed to open event log `{}`: {message}", path.display())]
    Open { path: PathBuf, message: String },

    #[error("Failed to load chunk {index}: {message}")]
    Chunk { index: usize, message: String },

    #[error("Failed to decode record: {message}")]
    Record { message: String },
}

#[derive(Debug, Error)]
pub enum RipperError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Input path `{}` does not exist", path.display())]
    InputPathMissing { path: PathBuf },

    #[error("Failed to walk input directory: {0}")]
    Discovery(#[from] walkdir::Error),

    #[error("Failed to open file {}: {source}", path.display())]
    FailedToOpenFile { source: io::Error, path: PathBuf },

    #[error("Failed to create directory {}: {source}", path.display())]
    FailedToCreateDirectory { source: io::Error, path: PathBuf },

    #[error("Failed to create temporary document in {}: {source}", dir.display())]
    FailedToCreateTempFile { source: io::Error, dir: PathBuf },

    #[error("An I/O error has occurred: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Failed to parse XML attribute: {0}")]
    XmlAttribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("Malformed event: {message}")]
    MalformedEvent { message: String },

    #[error("Failed to write CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to serialize EventData mapping: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to open SQL destination {}: {source}", path.display())]
    SqlDestination {
        source: rusqlite::Error,
        path: PathBuf,
    },

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl RipperError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        RipperError::MalformedEvent {
            message: message.into(),
        }
    }
}
