use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How the engine treats one observed field
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Current state, replicated directly to `/{field}`
    Property,
    /// Time series, snapshotted into `/Current{field}`
    Telemetry,
    /// Model type is unknown to the table; dropped without comment
    Ignored,
}

/// Static mapping from model type to the fields that are telemetry
///
/// Built once from configuration and passed into the engine by value, so
/// tests can substitute their own table freely. Any field of a recognized
/// model that is not listed is a property. Names match exactly.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ClassificationTable {
    telemetry: BTreeMap<String, BTreeSet<String>>,
}

impl ClassificationTable {
    /// Create an empty table (every field is `Ignored`)
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model type and the fields that are telemetry for it
    ///
    /// Registering a model with no fields makes all of its fields properties.
    pub fn with_model<I, S>(mut self, model: impl Into<String>, telemetry_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.telemetry
            .entry(model.into())
            .or_default()
            .extend(telemetry_fields.into_iter().map(Into::into));
        self
    }

    /// Classify a field reported under the given model type
    pub fn classify(&self, model: &str, field: &str) -> Classification {
        match self.telemetry.get(model) {
            None => Classification::Ignored,
            Some(fields) if fields.contains(field) => Classification::Telemetry,
            Some(_) => Classification::Property,
        }
    }

    /// Whether the model type is present in the table
    pub fn knows_model(&self, model: &str) -> bool {
        self.telemetry.contains_key(model)
    }

    /// Number of registered model types
    pub fn model_count(&self) -> usize {
        self.telemetry.len()
    }
}

impl<M, F, S> FromIterator<(M, F)> for ClassificationTable
where
    M: Into<String>,
    F: IntoIterator<Item = S>,
    S: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (M, F)>>(iter: T) -> Self {
        iter.into_iter()
            .fold(Self::new(), |table, (model, fields)| {
                table.with_model(model, fields)
            })
    }
}
