//! Source stage: turns an external record list into identifiers.
//!
//! A [`SourceProvider`] opens the named list; [`records::IdentifierRecords`]
//! parses it (CSV, header first); [`reader::read_source`] pushes identifiers
//! into the bounded identifier queue and closes it when done.

pub mod reader;
pub mod records;

pub use reader::{read_source, spawn_source_reader};
pub use records::{IdentifierRecords, RecordOutcome, SkipReason};

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;

/// Fatal source conditions. Any of these aborts the whole pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("cannot open source {name}: {source}")]
    Open {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid source: missing header ({0})")]
    MissingHeader(String),
}

/// Counters returned by the source stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub emitted: u64,
    pub skipped_empty: u64,
    pub skipped_malformed: u64,
    /// Identifiers read but not enqueued because the pipeline was cancelled.
    pub abandoned: u64,
}

/// Opens a named record source.
pub trait SourceProvider: Send + Sync {
    fn open(&self, name: &str) -> Result<Box<dyn Read + Send>, SourceError>;
}

/// Opens sources as local files, optionally relative to a base directory.
#[derive(Debug, Clone, Default)]
pub struct FsSourceProvider {
    base: Option<PathBuf>,
}

impl FsSourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self {
            base: Some(base.into()),
        }
    }
}

impl SourceProvider for FsSourceProvider {
    fn open(&self, name: &str) -> Result<Box<dyn Read + Send>, SourceError> {
        let path = match &self.base {
            Some(base) => base.join(name),
            None => PathBuf::from(name),
        };
        let file = File::open(&path).map_err(|source| SourceError::Open {
            name: path.display().to_string(),
            source,
        })?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// In-memory source: every `open` yields the same bytes, whatever the name.
#[derive(Debug, Clone)]
pub struct StaticSource {
    content: Vec<u8>,
}

impl StaticSource {
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

impl SourceProvider for StaticSource {
    fn open(&self, _name: &str) -> Result<Box<dyn Read + Send>, SourceError> {
        Ok(Box::new(io::Cursor::new(self.content.clone())))
    }
}
