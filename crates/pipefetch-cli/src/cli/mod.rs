//! CLI for the pipefetch download pipeline.

mod run;

use anyhow::Result;
use clap::Parser;
use pipefetch_core::config::{self, DroppedPolicy, PipelineConfig};
use std::path::PathBuf;

/// Fetch every URL listed in a CSV file and store each body in a directory.
#[derive(Debug, Parser)]
#[command(name = "pipefetch")]
#[command(about = "pipefetch: bounded concurrent fetch-and-persist pipeline", long_about = None)]
pub struct Cli {
    /// CSV file with a header row; the first column holds the URLs.
    pub source: PathBuf,

    /// Directory that receives the downloaded files (created if missing).
    pub dest: PathBuf,

    /// Maximum fetches in flight at once.
    #[arg(long, value_name = "N")]
    pub max_in_flight: Option<usize>,

    /// Number of fetch worker tasks (defaults to --max-in-flight).
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Overall deadline for the run, in seconds.
    #[arg(long, value_name = "S", conflicts_with = "no_deadline")]
    pub deadline_secs: Option<u64>,

    /// Run until the source is exhausted, however long it takes.
    #[arg(long)]
    pub no_deadline: bool,

    /// Write `key,identifier,bytes,sha256` for every stored file.
    #[arg(long, value_name = "PATH")]
    pub manifest: Option<PathBuf>,

    /// Write `identifier,reason` for every URL that produced nothing.
    #[arg(long, value_name = "PATH")]
    pub dead_letter: Option<PathBuf>,

    /// Config file to use instead of ~/.config/pipefetch/config.toml.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log to stderr instead of the log file.
    #[arg(long)]
    pub log_stderr: bool,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let mut cfg = match &self.config {
            Some(path) => config::load_or_init_at(path)?,
            None => config::load_or_init()?,
        };
        self.apply_overrides(&mut cfg);
        cfg.validate()?;
        tracing::debug!("loaded config: {:?}", cfg);
        run::run_pipeline(&self, cfg).await
    }

    /// Command-line flags take precedence over the config file.
    pub fn apply_overrides(&self, cfg: &mut PipelineConfig) {
        if let Some(n) = self.max_in_flight {
            cfg.max_in_flight = n;
        }
        if let Some(n) = self.workers {
            cfg.workers = Some(n);
        }
        if self.no_deadline {
            cfg.deadline_secs = None;
        } else if let Some(s) = self.deadline_secs {
            cfg.deadline_secs = Some(s);
        }
        if self.dead_letter.is_some() {
            cfg.dropped_policy = DroppedPolicy::DeadLetter;
        }
    }

    /// Where dropped identifiers go, if anywhere.
    pub fn dead_letter_path(&self, cfg: &PipelineConfig) -> Option<PathBuf> {
        match (&self.dead_letter, cfg.dropped_policy) {
            (Some(path), _) => Some(path.clone()),
            (None, DroppedPolicy::DeadLetter) => Some(self.dest.join("dead_letter.csv")),
            (None, DroppedPolicy::Discard) => None,
        }
    }
}
