use super::{ChunkOutcome, EventChunk, EventLog, EventLogDecoder, RecordOutcome};
use crate::err::DecodeError;

use evtx::{EvtxChunkData, EvtxParser, ParserSettings};
use log::debug;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Decodes binary EVTX containers with the `evtx` crate.
///
/// Files are already processed in parallel by the dispatcher, so the parser itself is
/// kept single threaded.
#[derive(Clone)]
pub struct EvtxDecoder {
    settings: Arc<ParserSettings>,
}

impl EvtxDecoder {
    pub fn new() -> Self {
        Self::with_settings(ParserSettings::default().num_threads(1))
    }

    pub fn with_settings(settings: ParserSettings) -> Self {
        EvtxDecoder {
            settings: Arc::new(settings),
        }
    }
}

impl Default for EvtxDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLogDecoder for EvtxDecoder {
    fn open(&self, path: &Path) -> Result<Box<dyn EventLog>, DecodeError> {
        let parser = EvtxParser::from_path(path)
            .map_err(|e| DecodeError::Open {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
            .with_configuration((*self.settings).clone());

        Ok(Box::new(EvtxLog {
            parser,
            settings: Arc::clone(&self.settings),
        }))
    }
}

struct EvtxLog {
    parser: EvtxParser<File>,
    settings: Arc<ParserSettings>,
}

impl EventLog for EvtxLog {
    fn chunks(&mut self) -> Box<dyn Iterator<Item = ChunkOutcome> + '_> {
        let settings = Arc::clone(&self.settings);

        Box::new(
            self.parser
                .chunks()
                .enumerate()
                .map(move |(index, chunk)| match chunk {
                    Ok(data) => Ok(Box::new(EvtxChunk {
                        index,
                        data,
                        settings: Arc::clone(&settings),
                    }) as Box<dyn EventChunk>),
                    Err(e) => Err(DecodeError::Chunk {
                        index,
                        message: e.to_string(),
                    }),
                }),
        )
    }
}

struct EvtxChunk {
    index: usize,
    data: EvtxChunkData,
    settings: Arc<ParserSettings>,
}

impl EventChunk for EvtxChunk {
    fn records(&mut self) -> Box<dyn Iterator<Item = RecordOutcome> + '_> {
        debug!("parsing chunk {}", self.index);

        // Records borrow the parsed chunk, render them while it is alive.
        let records: Vec<RecordOutcome> = match self.data.parse(Arc::clone(&self.settings)) {
            Ok(mut chunk) => chunk
                .iter()
                .map(|record| {
                    record
                        .and_then(|record| record.into_xml())
                        .map(|serialized| serialized.data)
                        .map_err(|e| DecodeError::Record {
                            message: e.to_string(),
                        })
                })
                .collect(),
            Err(e) => vec![Err(DecodeError::Chunk {
                index: self.index,
                message: e.to_string(),
            })],
        };

        Box::new(records.into_iter())
    }
}
