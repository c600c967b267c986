//! Structured table record as seen on the bus
//!
//! A record is a JSON object. Columns live under its `value` member; every
//! other member (labels, alarm, timestamp, descriptor) belongs to the bus and
//! is carried through a read-modify-write untouched.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::BusError;

const VALUE_FIELD: &str = "value";

/// A complete table record
#[derive(Debug, Clone, PartialEq)]
pub struct TableRecord {
    /// Members of `value`
    columns: Map<String, Value>,
    /// Every other top-level member
    fields: Map<String, Value>,
}

impl Default for TableRecord {
    fn default() -> Self {
        Self::empty()
    }
}

impl TableRecord {
    /// A record with no columns
    pub fn empty() -> Self {
        let mut fields = Map::new();
        fields.insert("labels".to_string(), Value::Array(Vec::new()));
        Self {
            columns: Map::new(),
            fields,
        }
    }

    /// Wrap a decoded record
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Codec`] unless the value is an object whose
    /// `value` member, if present, is also an object.
    pub fn from_json(value: Value) -> Result<Self, BusError> {
        let mut fields = match value {
            Value::Object(fields) => fields,
            other => {
                return Err(BusError::Codec(format!("table record is not an object: {other}")));
            }
        };
        let columns = match fields.remove(VALUE_FIELD) {
            None => Map::new(),
            Some(Value::Object(columns)) => columns,
            Some(other) => {
                return Err(BusError::Codec(format!(
                    "table record value is not a structure: {other}"
                )));
            }
        };
        Ok(Self { columns, fields })
    }

    pub fn to_json(&self) -> Value {
        let mut out = self.fields.clone();
        out.insert(VALUE_FIELD.to_string(), Value::Object(self.columns.clone()));
        Value::Object(out)
    }

    /// A top-level member other than the columns
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Replace the column list shown by displays
    pub fn set_labels(&mut self, labels: &[String]) {
        let labels = labels.iter().cloned().map(Value::String).collect();
        self.fields.insert("labels".to_string(), Value::Array(labels));
    }

    /// Replace a column with strings
    pub fn set_text_column(&mut self, name: &str, values: Vec<String>) {
        let values = values.into_iter().map(Value::String).collect();
        self.columns.insert(name.to_string(), Value::Array(values));
    }

    /// Replace a column with reals
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Codec`] for non-finite values, which have no JSON form.
    pub fn set_real_column(&mut self, name: &str, values: &[f64]) -> Result<(), BusError> {
        let values = values
            .iter()
            .map(|v| {
                serde_json::Number::from_f64(*v)
                    .map(Value::Number)
                    .ok_or_else(|| BusError::Codec(format!("column {name} holds non-finite value {v}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.columns.insert(name.to_string(), Value::Array(values));
        Ok(())
    }

    /// Raw column contents
    pub fn column(&self, name: &str) -> Option<&Vec<Value>> {
        self.columns.get(name)?.as_array()
    }

    pub fn text_column(&self, name: &str) -> Option<Vec<String>> {
        self.column(name)?
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    pub fn real_column(&self, name: &str) -> Option<Vec<f64>> {
        self.column(name)?.iter().map(Value::as_f64).collect()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }
}

impl Serialize for TableRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TableRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(value).map_err(serde::de::Error::custom)
    }
}
