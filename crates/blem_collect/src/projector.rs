//! Table projection
//!
//! Reshapes the engine's per-element arrays into the RMAT and TWISS table
//! payloads. Pure: no I/O, same input gives the same payload.
//!
//! Column layout shared by both tables: `element`, `device_name`, `s`, `z`,
//! `length`. `s` and `z` both carry row 0 of the positions array; consumers
//! depend on that, so it stays.

use serde::{Deserialize, Serialize};

use crate::SyncError;
use crate::bus::TableRecord;
use crate::value::{Matrix6, Numeric};

/// Canonical Twiss parameter order, matching the engine's row order
pub const TWISS_KEYS: [&str; 11] = [
    "p0c", "psi_x", "beta_x", "alpha_x", "eta_x", "etap_x", "psi_y", "beta_y", "alpha_y", "eta_y",
    "etap_y",
];

/// Columns common to both tables, in order
pub const COMMON_COLUMNS: [&str; 5] = ["element", "device_name", "s", "z", "length"];

/// Which table a payload targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TableKind {
    Rmat,
    Twiss,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rmat => "RMAT",
            Self::Twiss => "TWISS",
        }
    }

    /// Table record PV under a namespace
    pub fn pv(&self, namespace: &str) -> String {
        format!("{namespace}:{}", self.as_str())
    }

    /// Freshness timestamp PV
    pub fn tod_pv(&self, namespace: &str) -> String {
        format!("{namespace}:{}_TOD", self.as_str())
    }

    /// Success counter PV
    pub fn cnt_pv(&self, namespace: &str) -> String {
        format!("{namespace}:{}_CNT", self.as_str())
    }
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column of a payload
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Text(Vec<String>),
    Real(Vec<f64>),
    /// Engine output that still has to prove it is real
    Numeric(Vec<Numeric>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Self::Text(v) => v.len(),
            Self::Real(v) => v.len(),
            Self::Numeric(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ordered columns for one table
#[derive(Debug, Clone, PartialEq)]
pub struct TablePayload {
    pub kind: TableKind,
    pub columns: Vec<(String, Column)>,
}

impl TablePayload {
    /// Number of rows (K)
    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, |(_, c)| c.len())
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Assign every column into a bus record.
    ///
    /// All columns are converted before the record is touched, so a failure
    /// leaves the record as it was.
    ///
    /// # Errors
    ///
    /// [`SyncError::DataType`] when a cell is complex or non-finite.
    pub fn write_into(&self, record: &mut TableRecord) -> Result<(), SyncError> {
        enum Ready<'a> {
            Text(&'a [String]),
            Real(Vec<f64>),
        }

        let mut ready = Vec::with_capacity(self.columns.len());
        for (name, column) in &self.columns {
            let converted = match column {
                Column::Text(values) => Ready::Text(values),
                Column::Real(values) => Ready::Real(check_finite(name, values.clone())?),
                Column::Numeric(values) => Ready::Real(check_finite(name, to_reals(name, values)?)?),
            };
            ready.push((name.as_str(), converted));
        }

        for (name, column) in ready {
            match column {
                Ready::Text(values) => record.set_text_column(name, values.to_vec()),
                Ready::Real(values) => record
                    .set_real_column(name, &values)
                    .map_err(|e| SyncError::DataType(e.to_string()))?,
            }
        }
        record.set_labels(&self.column_names());
        Ok(())
    }
}

fn to_reals(name: &str, values: &[Numeric]) -> Result<Vec<f64>, SyncError> {
    values
        .iter()
        .enumerate()
        .map(|(row, v)| {
            v.as_real().ok_or_else(|| {
                SyncError::DataType(format!("{name}[{row}] is not real: {v}"))
            })
        })
        .collect()
}

fn check_finite(name: &str, values: Vec<f64>) -> Result<Vec<f64>, SyncError> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(row) => Err(SyncError::DataType(format!(
            "{name}[{row}] is not finite: {}",
            values[row]
        ))),
        None => Ok(values),
    }
}

/// Per-element inputs for one projection
#[derive(Debug, Clone, Copy)]
pub struct ProjectionInput<'a> {
    pub names: &'a [String],
    pub devices: &'a [String],
    /// 2-D; row 0 holds the positions
    pub positions: &'a [Vec<f64>],
    /// 2-D; row 0 holds the effective lengths
    pub lengths: &'a [Vec<f64>],
    /// `[K][6][6]`, for RMAT
    pub matrices: Option<&'a [Matrix6]>,
    /// `[11][K]`, for TWISS
    pub twiss: Option<&'a [Vec<Numeric>]>,
}

/// Build the RMAT or TWISS payload, depending on which array is supplied.
///
/// # Errors
///
/// [`SyncError::InvalidArgument`] when both or neither of matrices and Twiss
/// are given, or when any column would not have exactly K rows.
pub fn project(input: &ProjectionInput<'_>) -> Result<TablePayload, SyncError> {
    let k = input.names.len();
    let kind = match (input.matrices, input.twiss) {
        (Some(_), None) => TableKind::Rmat,
        (None, Some(_)) => TableKind::Twiss,
        (Some(_), Some(_)) => {
            return Err(SyncError::InvalidArgument(
                "both transport matrices and Twiss parameters supplied".to_string(),
            ));
        }
        (None, None) => {
            return Err(SyncError::InvalidArgument(
                "neither transport matrices nor Twiss parameters supplied".to_string(),
            ));
        }
    };

    let z = first_row("positions", input.positions, k)?;
    let length = first_row("lengths", input.lengths, k)?;
    expect_len("device_name", input.devices.len(), k)?;

    let mut columns = vec![
        ("element".to_string(), Column::Text(input.names.to_vec())),
        ("device_name".to_string(), Column::Text(input.devices.to_vec())),
        ("s".to_string(), Column::Real(z.to_vec())),
        ("z".to_string(), Column::Real(z.to_vec())),
        ("length".to_string(), Column::Real(length.to_vec())),
    ];

    if let Some(matrices) = input.matrices {
        expect_len("matrices", matrices.len(), k)?;
        for i in 0..6 {
            for j in 0..6 {
                let cells = matrices.iter().map(|m| m[i][j]).collect();
                columns.push((format!("r{}{}", i + 1, j + 1), Column::Numeric(cells)));
            }
        }
    }

    if let Some(twiss) = input.twiss {
        expect_len("twiss parameters", twiss.len(), TWISS_KEYS.len())?;
        for (key, row) in TWISS_KEYS.iter().zip(twiss) {
            expect_len(key, row.len(), k)?;
            columns.push(((*key).to_string(), Column::Numeric(row.clone())));
        }
    }

    Ok(TablePayload { kind, columns })
}

fn first_row<'a>(name: &str, rows: &'a [Vec<f64>], k: usize) -> Result<&'a [f64], SyncError> {
    let row: &[f64] = match rows.first() {
        Some(row) => row,
        None if k == 0 => &[],
        None => {
            return Err(SyncError::InvalidArgument(format!("{name} has no rows")));
        }
    };
    expect_len(name, row.len(), k)?;
    Ok(row)
}

fn expect_len(name: &str, actual: usize, expected: usize) -> Result<(), SyncError> {
    if actual == expected {
        Ok(())
    } else {
        Err(SyncError::InvalidArgument(format!(
            "{name} has {actual} entries, expected {expected}"
        )))
    }
}
