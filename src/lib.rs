#![deny(unused_must_use)]
#![forbid(unsafe_code)]

pub use csv_output::{CsvOptions, CsvSink, HeaderMode, RowLimit};
pub use dispatcher::{Dispatcher, FileOutcome, FileStatus, RunSummary, run_pipeline};
pub use err::{ConfigError, DecodeError, Result, RipperError};
pub use event_document::{EventDocumentWriter, FilteredEventDocument};
pub use evtx_filter::{EvtxFilter, FilterReport, FilterStats};
pub use flatten::{Flavor, flatten_event, flatten_fragment};
pub use model::row::FlattenedRow;
pub use model::xml::{XmlAttribute, XmlElement};
pub use settings::{OutputMode, RipperSettings, RunConfig, SqlOptions};
pub use source::{EventChunk, EventLog, EventLogDecoder, EvtxDecoder, InputFormat, XmlDocumentDecoder};
pub use sql_output::{SqlDestination, SqlDestinations, SqlErrorPolicy};

pub mod allow_list;
pub mod csv_output;
pub mod discovery;
pub mod dispatcher;
pub mod err;
pub mod event_document;
pub mod evtx_filter;
pub mod flatten;
pub mod model;
pub mod settings;
pub mod source;
pub mod sql_output;
pub mod xml_builder;
pub mod xml_output;
