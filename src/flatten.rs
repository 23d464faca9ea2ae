//! Flattening of nested event XML into a single row.
//!
//! Only the two sections every event carries are understood:
//!
//! * `System`: fixed metadata. Every sub-element contributes its attributes first and
//!   then its own text, e.g. `<TimeCreated SystemTime=".."/>` becomes `System_SystemTime`
//!   followed by an (empty) `System_TimeCreated`.
//! * `EventData`: the event specific payload, keyed by each `<Data Name="..">`.
//!
//! Column names differ per sink: the CSV flavour keeps the XML casing and folds the
//! whole `EventData` section into one JSON cell, the SQL flavour lowercases every name
//! and gives each `EventData` entry its own column.

use crate::err::Result;
use crate::model::row::FlattenedRow;
use crate::model::xml::XmlElement;
use crate::xml_builder::parse_fragment;

use log::warn;
use serde_json::{Map, Value};

pub const SYSTEM_SECTION: &str = "System";
pub const EVENT_DATA_SECTION: &str = "EventData";
/// The single CSV cell holding the serialized `EventData` mapping.
pub const EVENT_DATA_COLUMN: &str = "EventData_Data";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Flavor {
    Csv,
    Sql,
}

impl Flavor {
    fn column(self, section: &str, name: &str) -> String {
        match self {
            Flavor::Csv => format!("{section}_{name}"),
            Flavor::Sql => format!("{}_{}", section.to_lowercase(), name.to_lowercase()),
        }
    }

    /// CSV rows keep duplicate names as they are, SQL rows keep the last value.
    fn add(self, row: &mut FlattenedRow, column: String, value: &str) {
        match self {
            Flavor::Csv => row.push(column, value),
            Flavor::Sql => row.upsert(column, value),
        }
    }
}

pub fn flatten_event(event: &XmlElement, flavor: Flavor) -> Result<FlattenedRow> {
    let mut row = FlattenedRow::new();

    for section in &event.children {
        match section.name.as_str() {
            SYSTEM_SECTION => flatten_system(section, flavor, &mut row),
            EVENT_DATA_SECTION => flatten_event_data(section, flavor, &mut row)?,
            other => warn!("Could not identify child element {other}, dropping it"),
        }
    }

    Ok(row)
}

pub fn flatten_fragment(xml: &str, flavor: Flavor) -> Result<FlattenedRow> {
    flatten_event(&parse_fragment(xml)?, flavor)
}

fn flatten_system(system: &XmlElement, flavor: Flavor, row: &mut FlattenedRow) {
    for element in &system.children {
        for attr in element
            .attributes
            .iter()
            .filter(|attr| !is_namespace_declaration(&attr.name))
        {
            flavor.add(row, flavor.column(SYSTEM_SECTION, &attr.name), attr.value.trim());
        }

        flavor.add(
            row,
            flavor.column(SYSTEM_SECTION, &element.name),
            element.trimmed_text(),
        );
    }
}

fn flatten_event_data(
    event_data: &XmlElement,
    flavor: Flavor,
    row: &mut FlattenedRow,
) -> Result<()> {
    let mut mapping = Map::new();

    for (position, element) in event_data.children.iter().enumerate() {
        let name = match element.attribute("Name") {
            Some(name) => name.to_owned(),
            None => format!("{}_{}", element.name, position),
        };

        match flavor {
            Flavor::Csv => {
                mapping.insert(name, Value::String(element.trimmed_text().to_owned()));
            }
            Flavor::Sql => row.upsert(name.to_lowercase(), element.trimmed_text()),
        }
    }

    if flavor == Flavor::Csv {
        row.push(EVENT_DATA_COLUMN, serde_json::to_string(&mapping)?);
    }

    Ok(())
}

fn is_namespace_declaration(name: &str) -> bool {
    name == "xmlns" || name.starts_with("xmlns:")
}
