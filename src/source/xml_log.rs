use super::{ChunkOutcome, EventChunk, EventLog, EventLogDecoder, RecordOutcome};
use crate::err::DecodeError;
use crate::xml_builder::ElementStream;
use crate::xml_output::to_pretty_string;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Reads XML documents whose `<Event>` elements are the records.
///
/// A document is exposed as a single chunk. A syntax error ends the document: the
/// records before it are still delivered, the error is reported as one failed record.
#[derive(Debug, Default, Clone, Copy)]
pub struct XmlDocumentDecoder;

impl EventLogDecoder for XmlDocumentDecoder {
    fn open(&self, path: &Path) -> Result<Box<dyn EventLog>, DecodeError> {
        let file = File::open(path).map_err(|e| DecodeError::Open {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        Ok(Box::new(XmlLog {
            reader: Some(BufReader::new(file)),
        }))
    }
}

struct XmlLog {
    reader: Option<BufReader<File>>,
}

impl EventLog for XmlLog {
    fn chunks(&mut self) -> Box<dyn Iterator<Item = ChunkOutcome> + '_> {
        let chunk = self.reader.take().map(|reader| {
            Ok(Box::new(XmlChunk {
                events: ElementStream::of_elements_named(reader, "Event"),
            }) as Box<dyn EventChunk>)
        });

        Box::new(chunk.into_iter())
    }
}

struct XmlChunk {
    events: ElementStream<BufReader<File>>,
}

impl EventChunk for XmlChunk {
    fn records(&mut self) -> Box<dyn Iterator<Item = RecordOutcome> + '_> {
        Box::new(self.events.by_ref().map(|event| {
            event
                .and_then(|event| to_pretty_string(&event))
                .map_err(|e| DecodeError::Record {
                    message: e.to_string(),
                })
        }))
    }
}
