//! Validation of tabular input against declared input slots.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::task::{ParamValue, TaskParams};

/// Shape a slot value must coerce to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    #[default]
    Text,
    Number,
    Integer,
    Boolean,
    /// Any JSON document (object, array, ...).
    Json,
}

impl SlotKind {
    /// Human description of the expected shape, used in every row error.
    pub fn describe(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "a number",
            Self::Integer => "an integer",
            Self::Boolean => "a boolean (true/false)",
            Self::Json => "a JSON value",
        }
    }

    fn coerce(self, raw: &str) -> Option<serde_json::Value> {
        match self {
            Self::Text => Some(serde_json::Value::String(raw.to_string())),
            Self::Number => raw
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number),
            Self::Integer => raw.parse::<i64>().ok().map(serde_json::Value::from),
            Self::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(serde_json::Value::Bool(true)),
                "false" | "no" | "0" => Some(serde_json::Value::Bool(false)),
                _ => None,
            },
            Self::Json => serde_json::from_str(raw).ok(),
        }
    }
}

/// A named input the workflow declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSlot {
    pub name: String,
    #[serde(default)]
    pub kind: SlotKind,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl InputSlot {
    pub fn new(name: impl Into<String>, kind: SlotKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Why one row was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    /// 1-based row number in the submitted grid.
    pub row: usize,
    pub slot: Option<String>,
    pub message: String,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.slot {
            Some(slot) => write!(f, "row {} ({slot}): {}", self.row, self.message),
            None => write!(f, "row {}: {}", self.row, self.message),
        }
    }
}

/// All row errors of a rejected submission, reported together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors {
    pub errors: Vec<RowError>,
}

impl ValidationErrors {
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} input error(s): ", self.errors.len())?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Validates every row of `grid` against `slots`.
///
/// Column `i` feeds slot `i`. Rows made only of blank cells are skipped.
/// Returns one [`TaskParams`] per remaining row, or every row error at once.
pub fn validate_rows(
    slots: &[InputSlot],
    grid: &[Vec<String>],
) -> Result<Vec<TaskParams>, ValidationErrors> {
    if slots.is_empty() {
        return Err(ValidationErrors {
            errors: vec![RowError {
                row: 0,
                slot: None,
                message: "no input slots declared".into(),
            }],
        });
    }

    let mut params = Vec::new();
    let mut errors = Vec::new();
    for (idx, row) in grid.iter().enumerate() {
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        match validate_row(slots, idx + 1, row) {
            Ok(p) => params.push(p),
            Err(mut row_errors) => errors.append(&mut row_errors),
        }
    }

    if !errors.is_empty() {
        return Err(ValidationErrors { errors });
    }
    if params.is_empty() {
        return Err(ValidationErrors {
            errors: vec![RowError {
                row: 0,
                slot: None,
                message: "no input rows".into(),
            }],
        });
    }
    Ok(params)
}

fn validate_row(
    slots: &[InputSlot],
    row_no: usize,
    row: &[String],
) -> Result<TaskParams, Vec<RowError>> {
    let mut errors = Vec::new();
    if row.len() > slots.len() {
        errors.push(RowError {
            row: row_no,
            slot: None,
            message: format!(
                "expected at most {} column(s), found {}",
                slots.len(),
                row.len()
            ),
        });
    }

    let mut values = Vec::with_capacity(slots.len());
    for (col, slot) in slots.iter().enumerate() {
        let raw = row.get(col).map(|c| c.trim()).unwrap_or_default();
        if raw.is_empty() {
            if slot.required {
                errors.push(RowError {
                    row: row_no,
                    slot: Some(slot.name.clone()),
                    message: format!("value is required (expected {})", slot.kind.describe()),
                });
            } else {
                values.push(ParamValue {
                    slot: slot.name.clone(),
                    raw: String::new(),
                    value: serde_json::Value::Null,
                });
            }
            continue;
        }
        match slot.kind.coerce(raw) {
            Some(value) => values.push(ParamValue {
                slot: slot.name.clone(),
                raw: raw.to_string(),
                value,
            }),
            None => errors.push(RowError {
                row: row_no,
                slot: Some(slot.name.clone()),
                message: format!("expected {}, got {raw:?}", slot.kind.describe()),
            }),
        }
    }

    if errors.is_empty() {
        Ok(TaskParams(values))
    } else {
        Err(errors)
    }
}
