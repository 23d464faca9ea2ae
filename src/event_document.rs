use crate::err::{Result, RipperError};
use crate::model::xml::XmlElement;
use crate::xml_builder::ElementStream;
use crate::xml_output::write_pretty;

use log::debug;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

pub const DOCUMENT_HEADER: &str = "<?xml version='1.0' encoding='utf-8' standalone='yes' ?>\n<Events>";
pub const DOCUMENT_FOOTER: &str = "\n</Events>\n";

/// Accumulates the surviving events of one source file into a uniquely named temporary
/// document (`results_<random>.xml`).
pub struct EventDocumentWriter {
    output: BufWriter<NamedTempFile>,
    events: usize,
}

impl EventDocumentWriter {
    pub fn create_in(dir: &Path) -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix("results_")
            .suffix(".xml")
            .tempfile_in(dir)
            .map_err(|source| RipperError::FailedToCreateTempFile {
                source,
                dir: dir.to_path_buf(),
            })?;

        debug!("created temporary document {}", file.path().display());

        let mut output = BufWriter::new(file);
        output.write_all(DOCUMENT_HEADER.as_bytes())?;

        Ok(EventDocumentWriter { output, events: 0 })
    }

    pub fn path(&self) -> &Path {
        self.output.get_ref().path()
    }

    pub fn append(&mut self, event: &XmlElement) -> Result<()> {
        self.output.write_all(b"\n")?;
        write_pretty(event, &mut self.output)?;
        self.events += 1;
        Ok(())
    }

    pub fn events(&self) -> usize {
        self.events
    }

    /// Closes the envelope. A document without events is deleted and `None` is returned.
    pub fn finish(mut self) -> Result<Option<FilteredEventDocument>> {
        if self.events == 0 {
            return Ok(None);
        }

        self.output.write_all(DOCUMENT_FOOTER.as_bytes())?;
        let file = self.output.into_inner().map_err(|e| e.into_error())?;

        Ok(Some(FilteredEventDocument {
            file,
            events: self.events,
        }))
    }
}

/// The filtered events of one source file.
///
/// Owns its temporary file, which is removed when the document is dropped, whichever
/// way the sink consuming it finished.
#[derive(Debug)]
pub struct FilteredEventDocument {
    file: NamedTempFile,
    events: usize,
}

impl FilteredEventDocument {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn len(&self) -> usize {
        self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events == 0
    }

    /// Streams the events back in the order they were appended.
    pub fn events(&self) -> Result<ElementStream<BufReader<File>>> {
        let file = self.file.reopen()?;
        Ok(ElementStream::of_elements_named(BufReader::new(file), "Event"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml_builder::parse_fragment;

    #[test]
    fn test_document_round_trips_events_and_is_deleted_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = EventDocumentWriter::create_in(dir.path()).unwrap();

        let first = parse_fragment("<Event><System><EventID>4624</EventID></System></Event>").unwrap();
        let second = parse_fragment("<Event><System><EventID>4625</EventID></System></Event>").unwrap();
        writer.append(&first).unwrap();
        writer.append(&second).unwrap();

        let document = writer.finish().unwrap().expect("two events were appended");
        let path = document.path().to_path_buf();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("results_") && name.ends_with(".xml"));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(DOCUMENT_HEADER));
        assert!(text.ends_with(DOCUMENT_FOOTER));

        let events: Vec<XmlElement> = document.events().unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(events, vec![first, second]);

        drop(document);
        assert!(!path.exists());
    }

    #[test]
    fn test_empty_document_is_not_retained() {
        let dir = tempfile::tempdir().unwrap();
        let writer = EventDocumentWriter::create_in(dir.path()).unwrap();
        let path = writer.path().to_path_buf();

        assert!(writer.finish().unwrap().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_concurrent_documents_get_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let a = EventDocumentWriter::create_in(dir.path()).unwrap();
        let b = EventDocumentWriter::create_in(dir.path()).unwrap();

        assert_ne!(a.path(), b.path());
    }
}
