//! Benchmark configuration, loaded once from a properties file.
//!
//! ```text
//! # props.conf
//! pageSize = 8k
//! maxRam = 1g
//! nodeRecordSize = 32
//! relationshipRecordSize = 64
//! sparseValue = 10
//! localityProbability = 0.2
//! nodeStore = /tmp/nodestore
//! relationshipStore = /tmp/relationshipstore
//! ```
//!
//! Keys that are absent keep their defaults. Unknown keys are ignored.

use std::{collections::HashMap, path::Path, path::PathBuf, str::FromStr};

use tracing::debug;

use crate::{byte_size, error::ConfigError, walker::Locality};

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Config {
    /// Page size of the cache in bytes.
    pub page_size: usize,
    /// Memory budget of the cache in bytes.
    pub max_ram: u64,
    pub node_record_size: usize,
    pub relationship_record_size: usize,
    /// Relationship records read per traversal.
    pub sparse_value: u32,
    /// Chance that the next relationship read stays on the current page.
    pub locality_probability: f64,
    pub node_store: PathBuf,
    pub relationship_store: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            page_size: 8 * 1024,
            max_ram: 1 << 30,
            node_record_size: 32,
            relationship_record_size: 64,
            sparse_value: 10,
            locality_probability: Locality::DEFAULT.stay_probability(),
            node_store: PathBuf::from("/tmp/nodestore"),
            relationship_store: PathBuf::from("/tmp/relationshipstore"),
        }
    }
}

impl Config {
    pub const DEFAULT_PATH: &'static str = "props.conf";

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        let config = Self::parse(&text)?;
        debug!(?path, ?config, "loaded configuration");
        Ok(config)
    }

    /// Parses properties text; see the module documentation for the format.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut props = parse_properties(text);
        let mut config = Config::default();
        if let Some(v) = props.remove("pageSize") {
            config.page_size = usize::try_from(bytes_of("pageSize", &v)?)
                .map_err(|_| out_of_range("pageSize", "does not fit the address space"))?;
        }
        if let Some(v) = props.remove("maxRam") {
            config.max_ram = bytes_of("maxRam", &v)?;
        }
        if let Some(v) = props.remove("nodeRecordSize") {
            config.node_record_size = number_of("nodeRecordSize", &v)?;
        }
        if let Some(v) = props.remove("relationshipRecordSize") {
            config.relationship_record_size = number_of("relationshipRecordSize", &v)?;
        }
        if let Some(v) = props.remove("sparseValue") {
            config.sparse_value = number_of("sparseValue", &v)?;
        }
        if let Some(v) = props.remove("localityProbability") {
            config.locality_probability = number_of("localityProbability", &v)?;
        }
        if let Some(v) = props.remove("nodeStore") {
            config.node_store = PathBuf::from(v);
        }
        if let Some(v) = props.remove("relationshipStore") {
            config.relationship_store = PathBuf::from(v);
        }
        for key in props.keys() {
            debug!(key, "ignoring unknown configuration key");
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(out_of_range("pageSize", "must be positive"));
        }
        if self.max_ram < self.page_size as u64 {
            return Err(out_of_range("maxRam", "must hold at least one page"));
        }
        for (key, size) in [
            ("nodeRecordSize", self.node_record_size),
            ("relationshipRecordSize", self.relationship_record_size),
        ] {
            if size == 0 || size > self.page_size {
                return Err(out_of_range(
                    key,
                    format!("must be within 1..={} (the page size)", self.page_size),
                ));
            }
        }
        self.locality()?;
        Ok(())
    }

    pub fn locality(&self) -> Result<Locality, ConfigError> {
        Locality::new(self.locality_probability)
            .ok_or_else(|| out_of_range("localityProbability", "must be within 0..=1"))
    }
}

/// `key=value`, `key: value` or `key value` per line; `#` and `!` start comments.
fn parse_properties(text: &str) -> HashMap<String, String> {
    let mut props = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let key_end = line
            .find(|c: char| c == '=' || c == ':' || c.is_whitespace())
            .unwrap_or(line.len());
        let (key, rest) = line.split_at(key_end);
        let rest = rest.trim_start();
        let value = rest
            .strip_prefix(|c: char| c == '=' || c == ':')
            .unwrap_or(rest)
            .trim();
        props.insert(key.to_owned(), value.to_owned());
    }
    props
}

fn bytes_of(key: &str, value: &str) -> Result<u64, ConfigError> {
    byte_size::parse(value).ok_or_else(|| ConfigError::ByteSize {
        key: key.to_owned(),
        value: value.to_owned(),
    })
}

fn number_of<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Number {
        key: key.to_owned(),
        value: value.to_owned(),
    })
}

fn out_of_range(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::OutOfRange {
        key: key.to_owned(),
        reason: reason.into(),
    }
}
