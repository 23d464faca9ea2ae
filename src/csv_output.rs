use crate::err::{ConfigError, Result, RipperError};
use crate::event_document::FilteredEventDocument;
use crate::flatten::{Flavor, flatten_event};
use crate::model::row::FlattenedRow;

use csv::{QuoteStyle, Terminator, WriterBuilder};
use hashbrown::{HashMap, HashSet};
use log::debug;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// How many data rows a CSV file may receive.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum RowLimit {
    #[default]
    Unlimited,
    /// `AtMost(0)` still writes the header, but no data rows.
    AtMost(usize),
}

impl RowLimit {
    /// Interprets the command line convention, where `-1` means unlimited.
    pub fn from_flag(value: i64) -> std::result::Result<Self, ConfigError> {
        match value {
            -1 => Ok(RowLimit::Unlimited),
            n if n >= 0 => Ok(RowLimit::AtMost(n as usize)),
            n => Err(ConfigError::InvalidRowLimit(n)),
        }
    }

    fn reached(self, rows: usize) -> bool {
        match self {
            RowLimit::Unlimited => false,
            RowLimit::AtMost(limit) => rows >= limit,
        }
    }
}

/// Where the header comes from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum HeaderMode {
    /// Union of every row's columns, computed before writing. Rows are aligned to it.
    #[default]
    Union,
    /// The first row's columns; later rows are written as they come, even if their
    /// columns differ.
    FirstRow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvOptions {
    pub delimiter: char,
    pub quotes: bool,
    pub no_header: bool,
    pub limit: RowLimit,
    pub buffer_size: usize,
    pub header_mode: HeaderMode,
}

impl CsvOptions {
    /// The delimiter as the single byte the writer expects. Settings validation
    /// rejects non-ASCII delimiters before a sink is built.
    pub fn delimiter_byte(&self) -> u8 {
        u8::try_from(self.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .unwrap_or(b',')
    }
}

impl Default for CsvOptions {
    fn default() -> Self {
        CsvOptions {
            delimiter: ',',
            quotes: true,
            no_header: false,
            limit: RowLimit::Unlimited,
            buffer_size: 1000,
            header_mode: HeaderMode::Union,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SinkProgress {
    Continue,
    LimitReached,
}

/// Column identity used to align rows: the name and how often it occurred before.
pub type ColumnKey = (String, usize);

/// Collects the ordered union of column keys over a stream of rows.
#[derive(Debug, Default)]
pub struct HeaderCollector {
    keys: Vec<ColumnKey>,
    seen: HashSet<ColumnKey>,
}

impl HeaderCollector {
    pub fn observe(&mut self, row: &FlattenedRow) {
        for key in row.keyed_columns() {
            if self.seen.insert(key.clone()) {
                self.keys.push(key);
            }
        }
    }

    pub fn into_header(self) -> Vec<ColumnKey> {
        self.keys
    }
}

/// Buffered CSV writer for the rows of one source file.
///
/// Rows are held back until more than `buffer_size` of them are pending, then handed to
/// the underlying `csv::Writer`.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
    options: CsvOptions,
    fixed_header: Option<Vec<ColumnKey>>,
    header_written: bool,
    buffer: Vec<Vec<String>>,
    rows: usize,
}

impl<W: Write> CsvSink<W> {
    /// A sink whose header is taken from the first row.
    pub fn new(output: W, options: CsvOptions) -> Self {
        let quote_style = if options.quotes {
            QuoteStyle::Always
        } else {
            QuoteStyle::Never
        };

        let writer = WriterBuilder::new()
            .delimiter(options.delimiter_byte())
            .quote_style(quote_style)
            .flexible(true)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(output);

        CsvSink {
            writer,
            options,
            fixed_header: None,
            header_written: false,
            buffer: Vec::new(),
            rows: 0,
        }
    }

    /// A sink with a precomputed header; every row is aligned to it.
    pub fn with_header(output: W, options: CsvOptions, header: Vec<ColumnKey>) -> Self {
        CsvSink {
            fixed_header: Some(header),
            ..Self::new(output, options)
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn write_row(&mut self, row: &FlattenedRow) -> Result<SinkProgress> {
        if !self.header_written {
            self.write_header(row)?;
        }

        if self.options.limit.reached(self.rows) {
            return Ok(SinkProgress::LimitReached);
        }

        let record: Vec<String> = match self.fixed_header {
            Some(ref header) => {
                let cells: HashMap<ColumnKey, &str> = row
                    .keyed_columns()
                    .into_iter()
                    .zip(row.values.iter().map(String::as_str))
                    .collect();
                header
                    .iter()
                    .map(|key| self.cell(cells.get(key).copied().unwrap_or_default()))
                    .collect()
            }
            None => row.values.iter().map(|value| self.cell(value)).collect(),
        };

        self.buffer.push(record);
        self.rows += 1;

        if self.buffer.len() > self.options.buffer_size {
            self.flush_buffer()?;
        }

        if self.options.limit.reached(self.rows) {
            Ok(SinkProgress::LimitReached)
        } else {
            Ok(SinkProgress::Continue)
        }
    }

    /// Flushes what is left and returns the number of data rows written.
    pub fn finish(mut self) -> Result<usize> {
        self.flush_buffer()?;
        self.writer.flush()?;
        Ok(self.rows)
    }

    /// Header names are only quoted when they would otherwise break the line.
    fn write_header(&mut self, first_row: &FlattenedRow) -> Result<()> {
        self.header_written = true;

        if self.options.no_header {
            return Ok(());
        }

        let names: Vec<&str> = match self.fixed_header {
            Some(ref header) => header.iter().map(|(name, _)| name.as_str()).collect(),
            None => first_row.columns.iter().map(String::as_str).collect(),
        };

        if names.is_empty() {
            return Ok(());
        }

        let mut header = WriterBuilder::new()
            .delimiter(self.options.delimiter_byte())
            .quote_style(QuoteStyle::Necessary)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        header.write_record(&names)?;
        let line = header.into_inner().map_err(|e| e.into_error())?;

        // Nothing has been handed to the record writer yet, so the raw line lands first.
        self.writer.get_mut().write_all(&line)?;

        Ok(())
    }

    /// Unquoted output still doubles embedded quotes.
    fn cell(&self, value: &str) -> String {
        if self.options.quotes {
            value.to_owned()
        } else {
            value.replace('"', "\"\"")
        }
    }

    fn flush_buffer(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        debug!("flushing {} rows", self.buffer.len());

        for record in self.buffer.drain(..) {
            self.writer.write_record(&record)?;
        }
        self.writer.flush()?;

        Ok(())
    }
}

/// Writes every event of `document` as one CSV row into `target`, returning how many
/// data rows were written.
pub fn export_document(
    document: &FilteredEventDocument,
    target: &Path,
    options: &CsvOptions,
) -> Result<usize> {
    let header = match options.header_mode {
        HeaderMode::Union => Some(collect_header(document, options.limit)?),
        HeaderMode::FirstRow => None,
    };

    let file = File::create(target).map_err(|source| RipperError::FailedToOpenFile {
        source,
        path: target.to_path_buf(),
    })?;
    let output = BufWriter::new(file);

    let mut sink = match header {
        Some(header) => CsvSink::with_header(output, options.clone(), header),
        None => CsvSink::new(output, options.clone()),
    };

    for event in document.events()? {
        let row = flatten_event(&event?, Flavor::Csv)?;
        if sink.write_row(&row)? == SinkProgress::LimitReached {
            break;
        }
    }

    sink.finish()
}

/// Union header over the rows that will actually be written.
fn collect_header(document: &FilteredEventDocument, limit: RowLimit) -> Result<Vec<ColumnKey>> {
    let considered = match limit {
        RowLimit::Unlimited => usize::MAX,
        // A zero limit still writes the first row's header.
        RowLimit::AtMost(limit) => limit.max(1),
    };

    let mut collector = HeaderCollector::default();
    for event in document.events()?.take(considered) {
        collector.observe(&flatten_event(&event?, Flavor::Csv)?);
    }

    Ok(collector.into_header())
}
