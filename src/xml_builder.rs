use crate::err::{Result, RipperError};
use crate::model::xml::{XmlAttribute, XmlElement};

use log::trace;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::io::BufRead;

/// Builds owned element trees from a stream of `quick-xml` events.
///
/// With a target name, elements are only captured once an element with that (local) name
/// opens; everything around them (document declaration, `<Events>` envelope, ...) is
/// skipped. Without one, every top-level element is yielded.
pub struct ElementStream<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    target: Option<String>,
    stack: Vec<XmlElement>,
    exhausted: bool,
}

impl<R: BufRead> ElementStream<R> {
    pub fn new(source: R) -> Self {
        Self::with_target(source, None)
    }

    pub fn of_elements_named(source: R, name: impl Into<String>) -> Self {
        Self::with_target(source, Some(name.into()))
    }

    fn with_target(source: R, target: Option<String>) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.config_mut().trim_text(true);

        ElementStream {
            reader,
            buf: Vec::new(),
            target,
            stack: Vec::new(),
            exhausted: false,
        }
    }

    fn next_element(&mut self) -> Result<Option<XmlElement>> {
        loop {
            let completed = match self.reader.read_event_into(&mut self.buf)? {
                Event::Start(start) => {
                    let element = element_from_start(&start)?;
                    if !self.stack.is_empty() || is_target(self.target.as_deref(), &element.name) {
                        self.stack.push(element);
                    } else {
                        trace!("skipping enclosing element <{}>", element.name);
                    }
                    None
                }
                Event::Empty(start) => {
                    let element = element_from_start(&start)?;
                    match self.stack.last_mut() {
                        Some(parent) => {
                            parent.children.push(element);
                            None
                        }
                        None if is_target(self.target.as_deref(), &element.name) => Some(element),
                        None => None,
                    }
                }
                Event::Text(text) => {
                    if let Some(current) = self.stack.last_mut() {
                        current.push_text(&text.unescape()?);
                    }
                    None
                }
                Event::CData(cdata) => {
                    if let Some(current) = self.stack.last_mut() {
                        current.push_text(&String::from_utf8_lossy(&cdata));
                    }
                    None
                }
                Event::End(_) => match self.stack.pop() {
                    Some(element) => match self.stack.last_mut() {
                        Some(parent) => {
                            parent.children.push(element);
                            None
                        }
                        None => Some(element),
                    },
                    None => None,
                },
                Event::Eof => {
                    if let Some(open) = self.stack.last() {
                        return Err(RipperError::malformed(format!(
                            "document ended inside <{}>",
                            open.name
                        )));
                    }
                    return Ok(None);
                }
                _ => None,
            };

            self.buf.clear();

            if completed.is_some() {
                return Ok(completed);
            }
        }
    }
}

impl<R: BufRead> Iterator for ElementStream<R> {
    type Item = Result<XmlElement>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        match self.next_element() {
            Ok(Some(element)) => Some(Ok(element)),
            Ok(None) => {
                self.exhausted = true;
                None
            }
            Err(e) => {
                // The reader cannot recover its position after a syntax error.
                self.exhausted = true;
                Some(Err(e))
            }
        }
    }
}

/// Parses a single XML fragment (as rendered per record by the decoder) into its root
/// element.
pub fn parse_fragment(xml: &str) -> Result<XmlElement> {
    ElementStream::new(xml.as_bytes())
        .next()
        .unwrap_or_else(|| Err(RipperError::malformed("fragment has no root element")))
}

fn is_target(target: Option<&str>, name: &str) -> bool {
    target.is_none_or(|target| target == name)
}

fn element_from_start(start: &BytesStart<'_>) -> Result<XmlElement> {
    let mut element = XmlElement::new(String::from_utf8_lossy(start.local_name().as_ref()));

    for attr in start.attributes() {
        let attr = attr?;
        // Namespace declarations keep their prefix so they can be written back verbatim.
        let name = if attr.key.as_namespace_binding().is_some() {
            String::from_utf8_lossy(attr.key.as_ref()).into_owned()
        } else {
            String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned()
        };

        element.attributes.push(XmlAttribute {
            name,
            value: attr.unescape_value()?.into_owned(),
        });
    }

    Ok(element)
}
