use crate::allow_list::EVENT_ALLOW_LIST;
use crate::err::{DecodeError, Result};
use crate::event_document::{EventDocumentWriter, FilteredEventDocument};
use crate::model::xml::XmlElement;
use crate::source::EventLog;
use crate::xml_builder::parse_fragment;

use log::{debug, warn};
use std::path::Path;

/// Counters collected while filtering one file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FilterStats {
    pub records: usize,
    pub matched: usize,
    pub skipped_records: usize,
    pub skipped_chunks: usize,
}

#[derive(Debug)]
pub struct FilterReport {
    /// `None` when no record of the file matched; nothing is retained on disk then.
    pub document: Option<FilteredEventDocument>,
    pub stats: FilterStats,
}

impl FilterReport {
    pub fn success(&self) -> bool {
        self.document.is_some()
    }
}

/// Keeps records whose `<EventID>` is one of a fixed set of codes.
#[derive(Debug, Clone)]
pub struct EvtxFilter {
    pub ids: Vec<String>,
}

impl EvtxFilter {
    pub fn new(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// The forensic allow list.
    pub fn forensic() -> Self {
        Self::new(EVENT_ALLOW_LIST)
    }

    pub fn matches(&self, event: &XmlElement) -> bool {
        event_id(event).is_some_and(|id| self.ids.iter().any(|allowed| allowed == id))
    }

    /// Runs every record of `log` through the filter, writing survivors into a fresh
    /// temporary document under `temp_dir`.
    ///
    /// Records (or whole chunks) the decoder fails on are logged and skipped. Only
    /// failing to write the document aborts the file.
    pub fn filter_log(
        &self,
        source: &Path,
        log: &mut dyn EventLog,
        temp_dir: &Path,
    ) -> Result<FilterReport> {
        let mut writer = EventDocumentWriter::create_in(temp_dir)?;
        let mut stats = FilterStats::default();

        for chunk in log.chunks() {
            let mut chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("WARN:: Failed to read chunk from {}. REASON: {}.", source.display(), e);
                    stats.skipped_chunks += 1;
                    continue;
                }
            };

            for record in chunk.records() {
                let xml = match record {
                    Ok(xml) => xml,
                    Err(e @ DecodeError::Chunk { .. }) => {
                        warn!("WARN:: Failed to read chunk from {}. REASON: {}.", source.display(), e);
                        stats.skipped_chunks += 1;
                        continue;
                    }
                    Err(e) => {
                        warn!("WARN:: Failed to parse record from {}. REASON: {}.", source.display(), e);
                        stats.records += 1;
                        stats.skipped_records += 1;
                        continue;
                    }
                };

                stats.records += 1;

                let event = match parse_fragment(&xml) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("WARN:: Failed to parse record from {}. REASON: {}.", source.display(), e);
                        stats.skipped_records += 1;
                        continue;
                    }
                };

                match event_id(&event) {
                    None => {
                        warn!("WARN:: Record from {} has no EventID, skipping it.", source.display());
                        stats.skipped_records += 1;
                    }
                    Some(id) if self.ids.iter().any(|allowed| allowed == id) => {
                        writer.append(&event)?;
                        stats.matched += 1;
                    }
                    Some(id) => {
                        debug!("dropping event {} from {}", id, source.display());
                    }
                }
            }
        }

        debug!("filtered {}: {:?}", source.display(), stats);

        Ok(FilterReport {
            document: writer.finish()?,
            stats,
        })
    }
}

impl Default for EvtxFilter {
    fn default() -> Self {
        Self::forensic()
    }
}

/// Text of the first `<EventID>` element, depth first.
pub fn event_id(event: &XmlElement) -> Option<&str> {
    event
        .find_descendant("EventID")
        .map(XmlElement::trimmed_text)
        .filter(|id| !id.is_empty())
}
