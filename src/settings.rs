use crate::csv_output::CsvOptions;
use crate::err::ConfigError;
use crate::source::InputFormat;
use crate::sql_output::SqlErrorPolicy;

use hashbrown::HashSet;
use std::path::{Path, PathBuf};

pub const DEFAULT_WORKERS: usize = 4;
pub const SHARED_SQL_FILE_NAME: &str = "results.sql";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlOptions {
    /// One database per source file instead of a shared `results.sql`.
    pub separate: bool,
    pub policy: SqlErrorPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMode {
    Csv(CsvOptions),
    Sql(SqlOptions),
}

/// Builder for a run. Populated once (from the command line) and turned into an
/// immutable `RunConfig` by `build`, which performs every validation up front.
#[derive(Debug, Clone)]
pub struct RipperSettings {
    workers: usize,
    csv: Option<CsvOptions>,
    sql: Option<SqlOptions>,
    input: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    input_format: InputFormat,
    suffix: Option<String>,
    temp_dir: Option<PathBuf>,
}

impl Default for RipperSettings {
    fn default() -> Self {
        RipperSettings {
            workers: DEFAULT_WORKERS,
            csv: None,
            sql: None,
            input: None,
            output_dir: None,
            input_format: InputFormat::Evtx,
            suffix: None,
            temp_dir: None,
        }
    }
}

impl RipperSettings {
    pub fn new() -> Self {
        RipperSettings::default()
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn csv(mut self, options: CsvOptions) -> Self {
        self.csv = Some(options);
        self
    }

    pub fn sql(mut self, options: SqlOptions) -> Self {
        self.sql = Some(options);
        self
    }

    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.input = Some(path.into());
        self
    }

    pub fn output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(path.into());
        self
    }

    pub fn input_format(mut self, format: InputFormat) -> Self {
        self.input_format = format;
        self
    }

    /// Overrides the file name suffix used when walking directories.
    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    /// Directory for the temporary per-file documents, the system temp dir by default.
    pub fn temp_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(path.into());
        self
    }

    /// Validates the settings against a host with `host_cores` cores.
    pub fn build(self, host_cores: usize) -> Result<RunConfig, ConfigError> {
        let output_mode = match (self.csv, self.sql) {
            (Some(csv), None) => OutputMode::Csv(csv),
            (None, Some(sql)) => OutputMode::Sql(sql),
            (None, None) => return Err(ConfigError::NoOutputMode),
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingOutputModes),
        };

        let input = self.input.ok_or(ConfigError::MissingInput)?;
        let output_dir = self.output_dir.ok_or(ConfigError::MissingOutput)?;

        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }

        if self.workers >= host_cores {
            return Err(ConfigError::TooManyWorkers {
                requested: self.workers,
                available: host_cores,
            });
        }

        if let OutputMode::Csv(ref csv) = output_mode {
            if csv.buffer_size == 0 {
                return Err(ConfigError::ZeroBufferSize);
            }

            if !csv.delimiter.is_ascii() {
                return Err(ConfigError::NonAsciiDelimiter(csv.delimiter));
            }
        }

        Ok(RunConfig {
            workers: self.workers,
            output_mode,
            input,
            output_dir,
            input_format: self.input_format,
            suffix: self
                .suffix
                .unwrap_or_else(|| self.input_format.default_suffix().to_string()),
            temp_dir: self.temp_dir.unwrap_or_else(std::env::temp_dir),
        })
    }
}

/// A validated, immutable run configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    workers: usize,
    output_mode: OutputMode,
    input: PathBuf,
    output_dir: PathBuf,
    input_format: InputFormat,
    suffix: String,
    temp_dir: PathBuf,
}

impl RunConfig {
    pub fn get_workers(&self) -> usize {
        self.workers
    }

    pub fn get_output_mode(&self) -> &OutputMode {
        &self.output_mode
    }

    pub fn get_input(&self) -> &Path {
        &self.input
    }

    pub fn get_output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn get_input_format(&self) -> InputFormat {
        self.input_format
    }

    pub fn get_suffix(&self) -> &str {
        &self.suffix
    }

    pub fn get_temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// One CSV file per source, in the order given. The first source with a given stem
    /// gets `<output_dir>/<stem>.csv`; later ones get `<stem>_1.csv`, `<stem>_2.csv` and
    /// so on. Names are compared case-insensitively.
    pub fn csv_targets(&self, sources: &[PathBuf]) -> Vec<PathBuf> {
        let mut taken = HashSet::with_capacity(sources.len());

        sources
            .iter()
            .map(|source| {
                let stem = file_stem(source);
                let mut name = stem.clone();
                let mut n = 0;
                while !taken.insert(name.to_lowercase()) {
                    n += 1;
                    name = format!("{stem}_{n}");
                }
                self.output_dir.join(format!("{name}.csv"))
            })
            .collect()
    }

    /// `<output_dir>/results.sql`, shared by every file unless SQL output is separate.
    pub fn shared_sql_target(&self) -> PathBuf {
        self.output_dir.join(SHARED_SQL_FILE_NAME)
    }

    /// `<output_dir>/<stem>.sql` for a source file in separate mode.
    pub fn separate_sql_target(&self, source: &Path) -> PathBuf {
        self.output_dir.join(format!("{}.sql", file_stem(source)))
    }
}

pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
