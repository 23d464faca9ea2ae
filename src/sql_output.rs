use crate::err::{Result, RipperError};
use crate::event_document::FilteredEventDocument;
use crate::flatten::{Flavor, flatten_event};
use crate::model::row::FlattenedRow;

use hashbrown::{HashMap, HashSet};
use log::{debug, info, warn};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

pub const EVENT_TABLE: &str = "event";
/// Seed column, present in every destination even if no event ever fills it.
pub const SEED_COLUMN: &str = "id";

const CREATE_EVENT_TABLE: &str = "CREATE TABLE IF NOT EXISTS event (id varchar(32))";
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// What to do when altering the table or inserting a row fails mid-file.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SqlErrorPolicy {
    /// Log the failure and carry on with the next row.
    #[default]
    BestEffort,
    /// Give up on the current file.
    FailFast,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InsertReport {
    pub added_columns: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SqlExportStats {
    pub rows: usize,
    pub failed_rows: usize,
    pub added_columns: usize,
}

/// One SQLite file holding the `event` table.
///
/// The connection sits behind a mutex: reading the column set, adding the missing
/// columns and inserting a row happen under one lock, so concurrent writers never race
/// each other's schema changes.
#[derive(Debug)]
pub struct SqlDestination {
    path: PathBuf,
    connection: Mutex<Connection>,
}

impl SqlDestination {
    /// Opens (or creates) the database at `path` and makes sure the `event` table exists.
    pub fn open(path: &Path) -> Result<Self> {
        let connection = Connection::open(path)
            .and_then(|connection| {
                connection.busy_timeout(BUSY_TIMEOUT)?;
                connection.execute(CREATE_EVENT_TABLE, [])?;
                Ok(connection)
            })
            .map_err(|source| RipperError::SqlDestination {
                source,
                path: path.to_path_buf(),
            })?;

        info!("opened SQL destination {}", path.display());

        Ok(SqlDestination {
            path: path.to_path_buf(),
            connection: Mutex::new(connection),
        })
    }

    #[cfg(test)]
    pub(crate) fn open_in_memory() -> Result<Self> {
        let connection = Connection::open_in_memory()?;
        connection.execute(CREATE_EVENT_TABLE, [])?;

        Ok(SqlDestination {
            path: PathBuf::from(":memory:"),
            connection: Mutex::new(connection),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current columns of the `event` table, in table order.
    pub fn columns(&self) -> Result<Vec<String>> {
        table_columns(&self.lock())
    }

    pub fn row_count(&self) -> Result<usize> {
        let count: i64 =
            self.lock()
                .query_row("SELECT COUNT(*) FROM event", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Adds whatever columns `row` introduces, then inserts it by column name.
    ///
    /// Columns with an empty name are dropped. Names are compared case-insensitively, the
    /// way SQLite resolves them; a name repeated within the row keeps its last value.
    pub fn insert_row(&self, row: &FlattenedRow) -> Result<InsertReport> {
        let connection = self.lock();

        let mut columns: Vec<&str> = Vec::with_capacity(row.len());
        let mut values: Vec<&str> = Vec::with_capacity(row.len());
        let mut positions: HashMap<String, usize> = HashMap::with_capacity(row.len());

        for (column, value) in row.iter().filter(|(column, _)| !column.is_empty()) {
            match positions.get(&column.to_ascii_lowercase()) {
                Some(&index) => values[index] = value,
                None => {
                    positions.insert(column.to_ascii_lowercase(), columns.len());
                    columns.push(column);
                    values.push(value);
                }
            }
        }

        let mut report = InsertReport::default();
        if columns.is_empty() {
            return Ok(report);
        }

        let existing: HashSet<String> = table_columns(&connection)?
            .into_iter()
            .map(|column| column.to_ascii_lowercase())
            .collect();

        for column in columns
            .iter()
            .filter(|column| !existing.contains(&column.to_ascii_lowercase()))
        {
            // Autocommit: the new column is committed before the insert runs.
            connection.execute(
                &format!(
                    "ALTER TABLE {EVENT_TABLE} ADD COLUMN {} TEXT",
                    quote_identifier(column)
                ),
                [],
            )?;
            debug!("added column `{}` to {}", column, self.path.display());
            report.added_columns.push((*column).to_owned());
        }

        let names: Vec<String> = columns.iter().map(|c| quote_identifier(c)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();

        connection.execute(
            &format!(
                "INSERT INTO {EVENT_TABLE} ({}) VALUES ({})",
                names.join(", "),
                placeholders.join(", ")
            ),
            rusqlite::params_from_iter(values.iter()),
        )?;

        Ok(report)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panicking writer cannot leave a half-applied statement behind in autocommit
        // mode, so the connection stays usable.
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hands out one shared `SqlDestination` per output path.
///
/// Destinations are held weakly: a per-file database is closed as soon as the last
/// file writing to it is done, while files racing for the same path share a single
/// connection (and lock).
#[derive(Debug, Default)]
pub struct SqlDestinations {
    open: Mutex<HashMap<PathBuf, Weak<SqlDestination>>>,
}

impl SqlDestinations {
    pub fn get_or_open(&self, path: &Path) -> Result<Arc<SqlDestination>> {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(destination) = open.get(path).and_then(Weak::upgrade) {
            return Ok(destination);
        }

        let destination = Arc::new(SqlDestination::open(path)?);
        open.retain(|_, weak| weak.strong_count() > 0);
        open.insert(path.to_path_buf(), Arc::downgrade(&destination));

        Ok(destination)
    }
}

/// Inserts every event of `document` into `destination`.
pub fn export_document(
    document: &FilteredEventDocument,
    destination: &SqlDestination,
    policy: SqlErrorPolicy,
) -> Result<SqlExportStats> {
    let mut stats = SqlExportStats::default();

    for event in document.events()? {
        let row = flatten_event(&event?, Flavor::Sql)?;

        match destination.insert_row(&row) {
            Ok(report) => {
                stats.rows += 1;
                stats.added_columns += report.added_columns.len();
            }
            Err(e) if policy == SqlErrorPolicy::BestEffort => {
                warn!(
                    "Failed to insert event into {}: {}",
                    destination.path().display(),
                    e
                );
                stats.failed_rows += 1;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(stats)
}

fn table_columns(connection: &Connection) -> Result<Vec<String>> {
    let mut statement = connection.prepare("SELECT name FROM pragma_table_info('event')")?;
    let columns = statement
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(columns)
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
