use std::path::PathBuf;

/// Malformed or missing configuration. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{key}: invalid byte size {value:?}")]
    ByteSize { key: String, value: String },
    #[error("{key}: invalid number {value:?}")]
    Number { key: String, value: String },
    #[error("{key}: {reason}")]
    OutOfRange { key: String, reason: String },
    #[error("store {path:?} holds no records of {record_size} bytes")]
    EmptyStore { path: PathBuf, record_size: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    /// Failure to map a store, open a cursor, or bring a page in.
    #[error("store i/o: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
