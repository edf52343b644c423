//! Parameter matrix expansion.
//!
//! A matrix maps parameter names to candidate value lists. Expanding it yields
//! the full cross product, one [`MatrixEntry`] per combination, enumerated with
//! the last-listed parameter varying fastest. Parameter order is the order in
//! which the document listed them.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Name of the single entry produced by an empty matrix.
pub const DEFAULT_ENTRY_NAME: &str = "default";

/// A single candidate value for a matrix parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatrixValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl MatrixValue {
    /// Fragment used when synthesizing entry names.
    ///
    /// Booleans render lower-case, so `true` and the string `"true"` produce the
    /// same fragment. Entry names are only unique across tuples that differ in
    /// their rendered form.
    pub fn name_fragment(&self) -> String {
        match self {
            Self::Bool(value) => value.to_string(),
            Self::Integer(value) => value.to_string(),
            Self::Float(value) => format_float(*value),
            Self::Text(value) => value.clone(),
        }
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Integer(value) => u64::try_from(*value).ok(),
            Self::Text(value) => value.trim().parse().ok(),
            _ => None,
        }
    }

    /// JSON form used when a value is written into a persisted config object.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(value) => serde_json::Value::Bool(*value),
            Self::Integer(value) => serde_json::Value::from(*value),
            Self::Float(value) => serde_json::Value::from(*value),
            Self::Text(value) => serde_json::Value::String(value.clone()),
        }
    }
}

impl fmt::Display for MatrixValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name_fragment())
    }
}

// Whole floats keep a trailing ".0" so `2.0` and the integer `2` stay distinct.
pub(crate) fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

/// One named parameter and its candidate values.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixParam {
    pub name: String,
    pub values: Vec<MatrixValue>,
}

/// An ordered set of matrix parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Matrix {
    params: Vec<MatrixParam>,
}

impl Matrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter. Parameters added later vary faster in the expansion.
    #[must_use]
    pub fn with_param(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = MatrixValue>,
    ) -> Self {
        self.params.push(MatrixParam {
            name: name.into(),
            values: values.into_iter().collect(),
        });
        self
    }

    pub fn params(&self) -> &[MatrixParam] {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
    }

    /// Number of entries [`Matrix::expand`] produces.
    pub fn cardinality(&self) -> usize {
        if self.params.is_empty() {
            return 1;
        }
        self.params.iter().map(|p| p.values.len()).product()
    }

    /// Every parameter must list at least one value.
    pub fn validate(&self) -> Vec<String> {
        self.params
            .iter()
            .filter(|p| p.values.is_empty())
            .map(|p| format!("matrix.{} must have at least one value", p.name))
            .collect()
    }

    /// Full cross product of the parameter lists.
    ///
    /// An empty matrix expands to exactly one entry named `default`. A parameter
    /// with no values makes the product empty; [`Matrix::validate`] reports that
    /// case when the configuration is loaded.
    pub fn expand(&self) -> Vec<MatrixEntry> {
        if self.params.is_empty() {
            return vec![MatrixEntry::default_entry()];
        }

        let mut combos: Vec<Vec<(String, MatrixValue)>> = vec![Vec::new()];
        for param in &self.params {
            combos = combos
                .into_iter()
                .flat_map(|prefix| {
                    param.values.iter().map(move |value| {
                        let mut next = prefix.clone();
                        next.push((param.name.clone(), value.clone()));
                        next
                    })
                })
                .collect();
        }

        combos.into_iter().map(MatrixEntry::from_values).collect()
    }

    /// Linear scan of the expansion for an entry with this synthesized name.
    pub fn entry(&self, name: &str) -> Option<MatrixEntry> {
        self.expand().into_iter().find(|entry| entry.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.expand().into_iter().map(|entry| entry.name).collect()
    }
}

impl Serialize for Matrix {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.params.len()))?;
        for param in &self.params {
            map.serialize_entry(&param.name, &param.values)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Matrix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MatrixVisitor;

        impl<'de> Visitor<'de> for MatrixVisitor {
            type Value = Matrix;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a table of parameter names to value lists")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Matrix, A::Error> {
                let mut params = Vec::new();
                while let Some((name, values)) =
                    access.next_entry::<String, Vec<MatrixValue>>()?
                {
                    params.push(MatrixParam { name, values });
                }
                Ok(Matrix { params })
            }
        }

        deserializer.deserialize_map(MatrixVisitor)
    }
}

/// One concrete point of the cross product.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixEntry {
    pub name: String,
    values: Vec<(String, MatrixValue)>,
}

impl MatrixEntry {
    pub fn default_entry() -> Self {
        Self {
            name: DEFAULT_ENTRY_NAME.to_string(),
            values: Vec::new(),
        }
    }

    fn from_values(values: Vec<(String, MatrixValue)>) -> Self {
        let name = values
            .iter()
            .map(|(_, value)| value.name_fragment())
            .collect::<Vec<_>>()
            .join("-");
        Self { name, values }
    }

    pub fn get(&self, param: &str) -> Option<&MatrixValue> {
        self.values
            .iter()
            .find_map(|(name, value)| (name == param).then_some(value))
    }

    pub fn values(&self) -> &[(String, MatrixValue)] {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for MatrixEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len() + 1))?;
        map.serialize_entry("name", &self.name)?;
        for (name, value) in &self.values {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
