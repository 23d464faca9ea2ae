use crate::err::Result;
use crate::model::xml::XmlElement;

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use std::io::Write;

/// Writes `element` as a tab-indented fragment, without an XML declaration.
///
/// Text-only elements stay on one line (`<EventID>4624</EventID>`), childless elements
/// without text are written self-closed.
pub fn write_pretty<W: Write>(element: &XmlElement, target: W) -> Result<W> {
    let mut writer = Writer::new_with_indent(target, b'\t', 1);
    write_element(&mut writer, element)?;
    Ok(writer.into_inner())
}

pub fn to_pretty_string(element: &XmlElement) -> Result<String> {
    let bytes = write_pretty(element, Vec::new())?;
    // Every piece written is valid UTF-8 coming from `String`s.
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn write_element<W: Write>(writer: &mut Writer<W>, element: &XmlElement) -> Result<()> {
    let mut start = BytesStart::new(element.name.as_str());
    for attr in &element.attributes {
        start.push_attribute((attr.name.as_str(), attr.value.as_str()));
    }

    let text = element.text.as_deref().filter(|text| !text.is_empty());

    if text.is_none() && element.children.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;

    if let Some(text) = text {
        writer.write_event(Event::Text(BytesText::new(text)))?;
    }

    for child in &element.children {
        write_element(writer, child)?;
    }

    writer.write_event(Event::End(BytesEnd::new(element.name.as_str())))?;

    Ok(())
}
