//! Decoder for InfluxDB annotated CSV query responses
//!
//! A response holds one or more tables. Each table starts with annotation
//! rows (`#datatype`, `#group`, `#default`) followed by a header row, then
//! data rows. The first cell of every row is the annotation column, which is
//! empty on header and data rows.

use crate::error::SourceError;
use crate::observation::{Observation, Scalar, Timestamp};
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::HashMap;

/// Column layout of the table currently being read
#[derive(Debug, Default)]
struct TableLayout {
    columns: HashMap<String, usize>,
    datatypes: Vec<String>,
}

impl TableLayout {
    fn from_header(record: &csv::StringRecord, datatypes: Vec<String>) -> Self {
        let columns = record
            .iter()
            .enumerate()
            .filter(|(_, name)| !name.is_empty())
            .map(|(i, name)| (name.to_string(), i))
            .collect();
        Self { columns, datatypes }
    }

    fn index(&self, name: &str) -> Option<usize> {
        self.columns.get(name).copied()
    }

    fn datatype(&self, index: usize) -> &str {
        self.datatypes.get(index).map(String::as_str).unwrap_or("")
    }
}

/// Decode every data row of a response into observations
pub fn decode_observations(body: &str) -> Result<Vec<Observation>, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut observations = Vec::new();
    let mut pending_datatypes: Vec<String> = Vec::new();
    let mut expecting_header = true;
    let mut layout: Option<TableLayout> = None;

    for (row, record) in reader.records().enumerate() {
        let record = record
            .map_err(|e| SourceError::DecodeError(format!("row {}: {}", row + 1, e)))?;

        let first = record.get(0).unwrap_or("");
        if first.starts_with('#') {
            if first == "#datatype" {
                pending_datatypes = record.iter().map(str::to_string).collect();
            }
            expecting_header = true;
            continue;
        }

        if record.iter().all(str::is_empty) {
            continue;
        }

        // Unannotated responses separate tables with a bare header row
        let repeated_header = layout.is_some() && is_header_row(&record);

        if expecting_header || repeated_header {
            layout = Some(TableLayout::from_header(
                &record,
                std::mem::take(&mut pending_datatypes),
            ));
            expecting_header = false;
            continue;
        }

        let table = layout
            .as_ref()
            .ok_or_else(|| SourceError::DecodeError("data row before header".to_string()))?;
        observations.push(decode_row(table, &record, row + 1)?);
    }

    debug!("Decoded {} observation(s) from query response", observations.len());
    Ok(observations)
}

/// The row names the columns instead of carrying data
///
/// Column order may differ between tables, so any position counts.
fn is_header_row(record: &csv::StringRecord) -> bool {
    record.iter().any(|cell| cell == "_field") && record.iter().any(|cell| cell == "_value")
}

fn decode_row(
    table: &TableLayout,
    record: &csv::StringRecord,
    row: usize,
) -> Result<Observation, SourceError> {
    let (_, device) = required_cell(table, record, "device", row)?;
    let (_, model) = required_cell(table, record, "_measurement", row)?;
    let (_, field) = required_cell(table, record, "_field", row)?;
    let (value_index, raw_value) = required_cell(table, record, "_value", row)?;

    if device.is_empty() || model.is_empty() || field.is_empty() {
        return Err(SourceError::DecodeError(format!(
            "row {}: empty device, measurement or field",
            row
        )));
    }

    let component = table
        .index("component")
        .and_then(|i| record.get(i))
        .filter(|c| !c.is_empty());

    let time = match table.index("_time").and_then(|i| record.get(i)) {
        Some(raw) if !raw.is_empty() => parse_time(raw, row)?,
        _ => Timestamp::MIN_UTC,
    };

    let value = parse_value(table.datatype(value_index), raw_value, row)?;

    Ok(Observation {
        device: device.to_string(),
        component: component.map(str::to_string),
        model: model.to_string(),
        field: field.to_string(),
        time,
        value,
    })
}

fn required_cell<'r>(
    table: &TableLayout,
    record: &'r csv::StringRecord,
    name: &str,
    row: usize,
) -> Result<(usize, &'r str), SourceError> {
    let index = table
        .index(name)
        .ok_or_else(|| SourceError::DecodeError(format!("row {}: missing column {}", row, name)))?;
    Ok((index, record.get(index).unwrap_or("")))
}

fn parse_time(raw: &str, row: usize) -> Result<Timestamp, SourceError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SourceError::DecodeError(format!("row {}: bad _time '{}': {}", row, raw, e)))
}

/// Interpret a raw cell according to its `#datatype` annotation
///
/// Without an annotation the cell is sniffed: number, then boolean, then text.
fn parse_value(datatype: &str, raw: &str, row: usize) -> Result<Scalar, SourceError> {
    let bad = |e: &dyn std::fmt::Display| {
        SourceError::DecodeError(format!(
            "row {}: bad {} value '{}': {}",
            row, datatype, raw, e
        ))
    };

    match datatype {
        "double" => raw.parse::<f64>().map(Scalar::Float).map_err(|e| bad(&e)),
        "long" => raw.parse::<i64>().map(Scalar::Integer).map_err(|e| bad(&e)),
        "unsignedLong" => match raw.parse::<u64>() {
            Ok(v) => Ok(i64::try_from(v)
                .map(Scalar::Integer)
                .unwrap_or(Scalar::Float(v as f64))),
            Err(e) => Err(bad(&e)),
        },
        "boolean" => raw.parse::<bool>().map(Scalar::Bool).map_err(|e| bad(&e)),
        "" => Ok(sniff_value(raw)),
        _ => Ok(Scalar::Text(raw.to_string())),
    }
}

fn sniff_value(raw: &str) -> Scalar {
    if let Ok(i) = raw.parse::<i64>() {
        Scalar::Integer(i)
    } else if let Ok(x) = raw.parse::<f64>() {
        Scalar::Float(x)
    } else if let Ok(b) = raw.parse::<bool>() {
        Scalar::Bool(b)
    } else {
        Scalar::Text(raw.to_string())
    }
}
