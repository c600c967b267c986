//! Typed values returned by the model engine
//!
//! The engine hands back loosely typed arrays. Names that are not strings
//! decode to [`EngineName::Other`] and non-real numbers decode to
//! [`Numeric::Complex`], so filtering is a pattern match instead of a
//! runtime type check.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// One entry of an engine name list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineName {
    Name(String),
    Other,
}

impl EngineName {
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            Self::Other => None,
        }
    }

    pub fn into_name(self) -> Option<String> {
        match self {
            Self::Name(name) => Some(name),
            Self::Other => None,
        }
    }
}

impl<'de> Deserialize<'de> for EngineName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(name) => Self::Name(name),
            _ => Self::Other,
        })
    }
}

impl Serialize for EngineName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Name(name) => serializer.serialize_str(name),
            Self::Other => serializer.serialize_none(),
        }
    }
}

/// A numeric cell as produced by the engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    Real(f64),
    Complex { re: f64, im: f64 },
}

impl Numeric {
    /// The value as a real number, if it is one
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(*v),
            Self::Complex { .. } => None,
        }
    }
}

impl From<f64> for Numeric {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Real(v) => write!(f, "{v}"),
            Self::Complex { re, im } if *im < 0.0 => write!(f, "{re}-{}i", -im),
            Self::Complex { re, im } => write!(f, "{re}+{im}i"),
        }
    }
}

/// A 6x6 transport matrix, row-major
pub type Matrix6 = [[Numeric; 6]; 6];

/// Everything one transport model query returns
///
/// `positions` and `lengths` are 2-D with the canonical values in row 0.
/// `twiss` is parameter-major: 11 rows of K values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub matrices: Vec<Matrix6>,
    pub positions: Vec<Vec<f64>>,
    pub lengths: Vec<Vec<f64>>,
    pub twiss: Vec<Vec<Numeric>>,
    /// Beam energy; returned by the engine but not published
    #[serde(default)]
    pub energy: serde_json::Value,
    pub names: Vec<String>,
}

impl ModelSnapshot {
    /// Number of elements (K)
    pub fn element_count(&self) -> usize {
        self.names.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_names_decode() {
        let names: Vec<EngineName> = serde_json::from_str(r#"["Q1", 42, null, "Q2", [1]]"#).unwrap();
        assert_eq!(
            names,
            vec![
                EngineName::Name("Q1".into()),
                EngineName::Other,
                EngineName::Other,
                EngineName::Name("Q2".into()),
                EngineName::Other,
            ]
        );
        assert_eq!(names[0].as_name(), Some("Q1"));
        assert_eq!(names[1].as_name(), None);
    }

    #[test]
    fn test_numeric_decode() {
        let values: Vec<Numeric> = serde_json::from_str(r#"[1.5, 2, {"re": 1.0, "im": -0.5}]"#).unwrap();
        assert_eq!(values[0], Numeric::Real(1.5));
        assert_eq!(values[1], Numeric::Real(2.0));
        assert_eq!(values[2], Numeric::Complex { re: 1.0, im: -0.5 });
        assert_eq!(values[2].as_real(), None);
        assert_eq!(values[2].to_string(), "1-0.5i");
    }

    #[test]
    fn test_snapshot_decode() {
        let identity_row = |i: usize| {
            let mut row = [0.0; 6];
            row[i] = 1.0;
            row
        };
        let matrix: Vec<[f64; 6]> = (0..6).map(identity_row).collect();
        let twiss = vec![vec![0.5_f64]; 11];
        let json = serde_json::json!({
            "matrices": [matrix],
            "positions": [[1.25], [1.25]],
            "lengths": [[0.1], [0.1]],
            "twiss": twiss,
            "energy": 4.0,
            "names": ["QUAD1"],
        });

        let snapshot: ModelSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(snapshot.element_count(), 1);
        assert_eq!(snapshot.matrices[0][2][2], Numeric::Real(1.0));
        assert_eq!(snapshot.matrices[0][2][3], Numeric::Real(0.0));
        assert_eq!(snapshot.twiss.len(), 11);
    }

    #[test]
    fn test_snapshot_energy_optional() {
        let json = serde_json::json!({
            "matrices": [],
            "positions": [[]],
            "lengths": [[]],
            "twiss": [],
            "names": [],
        });
        let snapshot: ModelSnapshot = serde_json::from_value(json).unwrap();
        assert!(snapshot.energy.is_null());
        assert_eq!(snapshot.element_count(), 0);
    }
}
