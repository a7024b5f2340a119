//! CSV records of a run: a manifest of persisted payloads and a dead-letter
//! list of identifiers that produced nothing.

use crate::observer::{PipelineEvent, PipelineObserver};
use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

type CsvSink = Mutex<Option<csv::Writer<File>>>;

/// Observer appending to up to two CSV files.
///
/// Manifest columns: `key,identifier,bytes,sha256`.
/// Dead-letter columns: `identifier,reason` (empty, failed and unsaved items).
#[derive(Debug, Default)]
pub struct CsvEventLog {
    manifest: CsvSink,
    dead_letter: CsvSink,
}

impl CsvEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the manifest to `path` (truncated if it exists).
    pub fn with_manifest(self, path: &Path) -> Result<Self> {
        let w = open_csv(path, &["key", "identifier", "bytes", "sha256"])?;
        *self.manifest.lock().unwrap() = Some(w);
        Ok(self)
    }

    /// Write the dead-letter list to `path` (truncated if it exists).
    pub fn with_dead_letter(self, path: &Path) -> Result<Self> {
        let w = open_csv(path, &["identifier", "reason"])?;
        *self.dead_letter.lock().unwrap() = Some(w);
        Ok(self)
    }

    pub fn flush(&self) -> Result<()> {
        for sink in [&self.manifest, &self.dead_letter] {
            if let Some(w) = sink.lock().unwrap().as_mut() {
                w.flush().context("flush csv event log")?;
            }
        }
        Ok(())
    }
}

fn open_csv(path: &Path, header: &[&str]) -> Result<csv::Writer<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let mut w = csv::Writer::from_path(path)
        .with_context(|| format!("open {}", path.display()))?;
    w.write_record(header)
        .with_context(|| format!("write header to {}", path.display()))?;
    w.flush()?;
    Ok(w)
}

fn append(sink: &CsvSink, record: &[&str]) {
    if let Some(w) = sink.lock().unwrap().as_mut() {
        if let Err(e) = w.write_record(record).and_then(|()| w.flush().map_err(Into::into)) {
            tracing::warn!(error = %e, "failed to append to csv event log");
        }
    }
}

impl PipelineObserver for CsvEventLog {
    fn on_event(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::Persisted {
                identifier,
                key,
                bytes,
                sha256,
                ..
            } => append(
                &self.manifest,
                &[
                    key.as_str(),
                    identifier.as_str(),
                    bytes.to_string().as_str(),
                    sha256.as_str(),
                ],
            ),
            PipelineEvent::Dropped { identifier, reason } => append(
                &self.dead_letter,
                &[identifier.as_str(), reason.to_string().as_str()],
            ),
            PipelineEvent::PersistFailed {
                identifier, error, ..
            } => append(
                &self.dead_letter,
                &[identifier.as_str(), format!("storage: {}", error).as_str()],
            ),
            _ => {}
        }
    }
}
