//! The decoder contract the pipeline is written against.
//!
//! A decoder opens a container, the container yields chunks and every chunk yields the
//! XML text of its records. Failures are reported per level, so the filter can skip a
//! single bad record (or chunk) without giving up on the whole file.

mod evtx_log;
mod xml_log;

pub use evtx_log::EvtxDecoder;
pub use xml_log::XmlDocumentDecoder;

use crate::err::DecodeError;
use std::path::Path;

/// Outcome of decoding one record: its rendered XML, or why it could not be rendered.
pub type RecordOutcome = Result<String, DecodeError>;

pub type ChunkOutcome = Result<Box<dyn EventChunk>, DecodeError>;

pub trait EventLogDecoder: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn EventLog>, DecodeError>;
}

pub trait EventLog {
    fn chunks(&mut self) -> Box<dyn Iterator<Item = ChunkOutcome> + '_>;
}

pub trait EventChunk {
    fn records(&mut self) -> Box<dyn Iterator<Item = RecordOutcome> + '_>;
}

/// Input formats the command line can select a decoder for.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InputFormat {
    /// Binary Windows XML Event Log containers.
    Evtx,
    /// XML documents whose `<Event>` elements are the records, such as exported or
    /// previously filtered event documents.
    Xml,
}

impl InputFormat {
    pub fn default_suffix(self) -> &'static str {
        match self {
            InputFormat::Evtx => ".evtx",
            InputFormat::Xml => ".xml",
        }
    }

    pub fn decoder(self) -> Box<dyn EventLogDecoder> {
        match self {
            InputFormat::Evtx => Box::new(EvtxDecoder::new()),
            InputFormat::Xml => Box::new(XmlDocumentDecoder),
        }
    }
}
