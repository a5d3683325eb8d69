//! Writes an export table as CSV or as an Excel workbook.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use batchrun_core::ExportTable;
use polars::prelude::*;
use polars_excel_writer::PolarsExcelWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("xlsx") => Self::Xlsx,
            _ => Self::Csv,
        }
    }
}

/// All columns are text; results are already stringified.
pub fn to_dataframe(table: &ExportTable) -> PolarsResult<DataFrame> {
    let columns: Vec<Column> = table
        .header
        .iter()
        .enumerate()
        .map(|(i, name)| Series::new(name.as_str().into(), table.column(i)).into())
        .collect();
    DataFrame::new(columns)
}

pub fn write_export(table: &ExportTable, path: &Path) -> Result<ExportFormat> {
    let mut df = to_dataframe(table).context("build export frame")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("create_dir_all")?;
    }
    let format = ExportFormat::from_path(path);
    match format {
        ExportFormat::Xlsx => {
            let mut writer = PolarsExcelWriter::new();
            writer
                .write_dataframe(&df)
                .map_err(|e| anyhow!("excel sheet: {e}"))?;
            writer
                .save(path)
                .map_err(|e| anyhow!("excel save: {e}"))?;
        }
        ExportFormat::Csv => {
            let mut file =
                File::create(path).with_context(|| format!("create {}", path.display()))?;
            CsvWriter::new(&mut file)
                .include_header(true)
                .finish(&mut df)
                .context("write csv")?;
        }
    }
    Ok(format)
}
