//! CSV input: header plus string grid, projected onto the declared slots.

use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result, bail};
use batchrun_core::{InputSlot, SlotKind};
use polars::prelude::*;

/// Header and rows of a CSV, every cell read as text (nulls become "").
pub fn read_table(content: &str) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let cursor = Cursor::new(content.as_bytes());
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .into_reader_with_file_handle(cursor)
        .finish()
        .context("parse csv")?;

    let header: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|c| c.to_string())
        .collect();
    let mut columns: Vec<Vec<String>> = Vec::with_capacity(header.len());
    for name in &header {
        let column = df.column(name)?.cast(&DataType::String)?;
        let values = column
            .str()?
            .into_iter()
            .map(|v| v.unwrap_or_default().to_string())
            .collect();
        columns.push(values);
    }
    let rows = (0..df.height())
        .map(|r| columns.iter().map(|c| c[r].clone()).collect())
        .collect();
    Ok((header, rows))
}

/// One required text slot per column.
pub fn slots_from_header(header: &[String]) -> Vec<InputSlot> {
    header
        .iter()
        .map(|name| InputSlot::new(name.clone(), SlotKind::Text))
        .collect()
}

pub fn load_slots(path: &Path) -> Result<Vec<InputSlot>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read slots {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse slots {}", path.display()))
}

/// Reorders CSV columns into slot order. A slot without a column gets blank
/// cells; a column without a slot is an error.
pub fn project(
    header: &[String],
    rows: Vec<Vec<String>>,
    slots: &[InputSlot],
) -> Result<Vec<Vec<String>>> {
    let unknown: Vec<&str> = header
        .iter()
        .filter(|h| !slots.iter().any(|s| &s.name == *h))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        bail!("columns without a matching slot: {}", unknown.join(", "));
    }
    let positions: Vec<Option<usize>> = slots
        .iter()
        .map(|slot| header.iter().position(|h| *h == slot.name))
        .collect();
    Ok(rows
        .into_iter()
        .map(|row| {
            positions
                .iter()
                .map(|pos| pos.and_then(|i| row.get(i).cloned()).unwrap_or_default())
                .collect()
        })
        .collect())
}
