//! Patch documents sent to the twin graph
//!
//! A reconciliation pass produces one [`ComponentPatch`] per device: a map
//! from component key (empty string for the device root) to the ordered
//! replace operations for that component's twin node.

use crate::observation::Scalar;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Suffix of the twin node that represents a device's root
pub const ROOT_TWIN_SUFFIX: &str = "Device";

/// Prefix marking a snapshot of a telemetry series
pub const CURRENT_PREFIX: &str = "Current";

/// Identifier of a node in the twin graph
///
/// Always `{device}-{component}`, with `Device` standing in for the root.
/// The graph's node ids are provisioned with this scheme, so it must be
/// reproduced exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TwinId(String);

impl TwinId {
    /// Derive the twin id for a device component (None or "" for the root)
    pub fn for_component(device: &str, component: Option<&str>) -> Self {
        let component = match component {
            Some(c) if !c.is_empty() => c,
            _ => ROOT_TWIN_SUFFIX,
        };
        Self(format!("{}-{}", device, component))
    }

    /// Map a root twin id back to its device id
    ///
    /// Ids without the root suffix are returned unchanged.
    pub fn device_of(twin_id: &str) -> &str {
        twin_id
            .strip_suffix(ROOT_TWIN_SUFFIX)
            .and_then(|rest| rest.strip_suffix('-'))
            .filter(|device| !device.is_empty())
            .unwrap_or(twin_id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TwinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// JSON Patch operation kind; the replicator only ever replaces
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Replace,
}

/// One JSON Patch operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    pub value: Scalar,
}

impl PatchOperation {
    /// `replace /{field}` for a property
    pub fn property(field: &str, value: Scalar) -> Self {
        Self {
            op: PatchOp::Replace,
            path: format!("/{}", field),
            value,
        }
    }

    /// `replace /Current{field}` for a telemetry snapshot
    pub fn current(field: &str, value: Scalar) -> Self {
        // Field name is appended verbatim, no case folding: `t` -> `/Currentt`
        Self {
            op: PatchOp::Replace,
            path: format!("/{}{}", CURRENT_PREFIX, field),
            value,
        }
    }
}

/// Ordered operations for a single twin node
///
/// Serializes as a bare JSON array, which is what the twin service expects.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct PatchDocument {
    operations: Vec<PatchOperation>,
}

impl PatchDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation, replacing an earlier one on the same path in place
    pub fn push(&mut self, operation: PatchOperation) {
        match self
            .operations
            .iter_mut()
            .find(|existing| existing.path == operation.path)
        {
            Some(existing) => *existing = operation,
            None => self.operations.push(operation),
        }
    }

    pub fn operations(&self) -> &[PatchOperation] {
        &self.operations
    }

    /// Look up the value written to a path
    pub fn value_at(&self, path: &str) -> Option<&Scalar> {
        self.operations
            .iter()
            .find(|op| op.path == path)
            .map(|op| &op.value)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Per-device patch: component key → operations for that component's twin
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentPatch {
    device: String,
    components: BTreeMap<String, PatchDocument>,
}

impl ComponentPatch {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            components: BTreeMap::new(),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Create the bucket for a component if it does not exist yet
    ///
    /// Returns the bucket so callers can append to it.
    pub fn open_component(&mut self, component: &str) -> &mut PatchDocument {
        self.components
            .entry(component.to_string())
            .or_insert_with(PatchDocument::new)
    }

    /// Operations for one component, if that component was observed
    pub fn component(&self, component: &str) -> Option<&PatchDocument> {
        self.components.get(component)
    }

    /// Iterate components in key order with their twin ids
    pub fn twins(&self) -> impl Iterator<Item = (TwinId, &PatchDocument)> + '_ {
        self.components.iter().map(move |(component, document)| {
            (
                TwinId::for_component(&self.device, Some(component.as_str())),
                document,
            )
        })
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn operation_count(&self) -> usize {
        self.components.values().map(PatchDocument::len).sum()
    }
}
