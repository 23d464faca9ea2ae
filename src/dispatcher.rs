//! Runs the filter/flatten/sink pipeline over many files in fixed-size groups.
//!
//! Files are taken `workers` at a time, and a group runs to completion on the worker
//! pool before the next one starts. A failure (or panic) while processing one file is
//! recorded as that file's outcome; the rest of the group and all later groups still run.

use crate::csv_output;
use crate::discovery::collect_files;
use crate::err::{Result, RipperError};
use crate::evtx_filter::EvtxFilter;
use crate::settings::{OutputMode, RunConfig, SqlOptions, file_stem};
use crate::source::EventLogDecoder;
use crate::sql_output::{self, SqlDestination, SqlDestinations};

use log::{debug, error, info, warn};
use rayon::prelude::*;
use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    /// Output was produced, with this many rows.
    Written { rows: usize },
    /// No record of the file passed the filter, nothing was written.
    NoMatches,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub status: FileStatus,
}

/// One outcome per dispatched file, in dispatch order.
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub outcomes: Vec<FileOutcome>,
}

impl RunSummary {
    pub fn files(&self) -> usize {
        self.outcomes.len()
    }

    pub fn written(&self) -> usize {
        self.count(|status| matches!(status, FileStatus::Written { .. }))
    }

    pub fn no_matches(&self) -> usize {
        self.count(|status| *status == FileStatus::NoMatches)
    }

    pub fn failed(&self) -> usize {
        self.count(|status| matches!(status, FileStatus::Failed { .. }))
    }

    pub fn rows(&self) -> usize {
        self.outcomes
            .iter()
            .map(|outcome| match outcome.status {
                FileStatus::Written { rows } => rows,
                _ => 0,
            })
            .sum()
    }

    pub fn outcome(&self, path: &Path) -> Option<&FileStatus> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.path == path)
            .map(|outcome| &outcome.status)
    }

    fn count(&self, predicate: impl Fn(&FileStatus) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| predicate(&outcome.status))
            .count()
    }
}

pub struct Dispatcher<'a> {
    config: &'a RunConfig,
    decoder: &'a dyn EventLogDecoder,
    filter: EvtxFilter,
    shared_sql: Option<Arc<SqlDestination>>,
    separate_sql: SqlDestinations,
}

impl<'a> Dispatcher<'a> {
    /// Prepares the output directory and, for shared SQL output, opens `results.sql`.
    ///
    /// Failing to open the shared database is fatal for the whole run.
    pub fn new(config: &'a RunConfig, decoder: &'a dyn EventLogDecoder) -> Result<Self> {
        create_dir(config.get_output_dir())?;
        create_dir(config.get_temp_dir())?;

        let shared_sql = match config.get_output_mode() {
            OutputMode::Sql(SqlOptions {
                separate: false, ..
            }) => Some(Arc::new(SqlDestination::open(&config.shared_sql_target())?)),
            _ => None,
        };

        Ok(Dispatcher {
            config,
            decoder,
            filter: EvtxFilter::forensic(),
            shared_sql,
            separate_sql: SqlDestinations::default(),
        })
    }

    /// Replaces the forensic allow list.
    pub fn with_filter(mut self, filter: EvtxFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn run(&self, files: &[PathBuf]) -> Result<RunSummary> {
        let workers = self.config.get_workers();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("evtx-ripper-{index}"))
            .build()?;

        let groups = files.len().div_ceil(workers);
        let mut summary = RunSummary {
            outcomes: Vec::with_capacity(files.len()),
        };

        // Assigned up front so that files with the same stem never write the same CSV.
        let jobs: Vec<(&Path, PathBuf)> = files
            .iter()
            .map(PathBuf::as_path)
            .zip(self.config.csv_targets(files))
            .collect();

        for (index, group) in jobs.chunks(workers).enumerate() {
            info!(
                "Processing chunk: {} of {} - There are {} files",
                index + 1,
                groups,
                group.len()
            );

            let outcomes: Vec<FileOutcome> =
                pool.install(|| {
                group
                    .par_iter()
                    .map(|(path, csv_target)| self.attempt(path, csv_target))
                    .collect()
            });
            summary.outcomes.extend(outcomes);
        }

        info!("Evtx file parsing complete...");
        info!(
            "{} files: {} written ({} rows), {} without matches, {} failed",
            summary.files(),
            summary.written(),
            summary.rows(),
            summary.no_matches(),
            summary.failed()
        );

        Ok(summary)
    }

    fn attempt(&self, path: &Path, csv_target: &Path) -> FileOutcome {
        let status = match panic::catch_unwind(AssertUnwindSafe(|| {
            self.process_file(path, csv_target)
        })) {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                error!("Failed to process {}: {}", path.display(), e);
                FileStatus::Failed {
                    reason: e.to_string(),
                }
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!("Panicked while processing {}: {}", path.display(), reason);
                FileStatus::Failed { reason }
            }
        };

        FileOutcome {
            path: path.to_path_buf(),
            status,
        }
    }

    /// `csv_target` is only written in CSV mode.
    fn process_file(&self, path: &Path, csv_target: &Path) -> Result<FileStatus> {
        info!("Processing {}", path.display());

        let mut log = self.decoder.open(path)?;
        let report = self
            .filter
            .filter_log(path, log.as_mut(), self.config.get_temp_dir())?;

        let document = match report.document {
            Some(document) => document,
            None => {
                warn!(
                    "WARN: No successful events found in file {}. Proceeding to next file(s).",
                    path.display()
                );
                return Ok(FileStatus::NoMatches);
            }
        };

        debug!(
            "{} events of {} kept in {}",
            document.len(),
            path.display(),
            document.path().display()
        );

        let rows = match self.config.get_output_mode() {
            OutputMode::Csv(options) => {
                if file_stem(csv_target) != file_stem(path) {
                    info!(
                        "{} shares its name with an earlier file, writing {}",
                        path.display(),
                        csv_target.display()
                    );
                }
                let rows = csv_output::export_document(&document, csv_target, options)?;
                info!("wrote {} rows to {}", rows, csv_target.display());
                rows
            }
            OutputMode::Sql(options) => {
                let destination = match self.shared_sql {
                    Some(ref shared) => Arc::clone(shared),
                    None => self
                        .separate_sql
                        .get_or_open(&self.config.separate_sql_target(path))?,
                };
                let stats = sql_output::export_document(&document, &destination, options.policy)?;
                info!(
                    "inserted {} rows into {} ({} failed, {} columns added)",
                    stats.rows,
                    destination.path().display(),
                    stats.failed_rows,
                    stats.added_columns
                );
                stats.rows
            }
        };

        Ok(FileStatus::Written { rows })
    }
}

/// Discovers the input files of `config` and runs them through the pipeline with the
/// decoder of the configured input format.
pub fn run_pipeline(config: &RunConfig) -> Result<RunSummary> {
    let files = collect_files(config.get_input(), config.get_suffix())?;
    let decoder = config.get_input_format().decoder();

    Dispatcher::new(config, decoder.as_ref())?.run(&files)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|source| RipperError::FailedToCreateDirectory {
        source,
        path: path.to_path_buf(),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
