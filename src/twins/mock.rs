use crate::error::TwinError;
use crate::patch::{PatchDocument, TwinId};
use crate::twins::{TwinDirectory, TwinFuture};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

/// Mock twin graph for testing and development
///
/// Devices are scripted per model; patch failures are scripted per twin id.
/// Every successfully applied patch is recorded.
#[derive(Default)]
pub struct MockDirectory {
    devices: HashMap<String, Result<BTreeSet<String>, TwinError>>,
    patch_errors: HashMap<TwinId, TwinError>,
    applied: Arc<Mutex<Vec<(TwinId, PatchDocument)>>>,
    attempts: Arc<Mutex<usize>>,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the devices returned for a model
    pub fn with_devices<I, S>(mut self, model: &str, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.devices.insert(
            model.to_string(),
            Ok(devices.into_iter().map(Into::into).collect()),
        );
        self
    }

    /// Make discovery for a model fail
    pub fn with_discovery_error(mut self, model: &str, error: TwinError) -> Self {
        self.devices.insert(model.to_string(), Err(error));
        self
    }

    /// Make patches to one twin fail
    pub fn with_patch_error(mut self, twin_id: TwinId, error: TwinError) -> Self {
        self.patch_errors.insert(twin_id, error);
        self
    }

    /// Patches applied so far, in call order
    pub fn applied(&self) -> Vec<(TwinId, PatchDocument)> {
        self.applied.lock().unwrap().clone()
    }

    /// Latest patch applied to a twin
    pub fn patch_for(&self, twin_id: &str) -> Option<PatchDocument> {
        self.applied
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _)| id.as_str() == twin_id)
            .map(|(_, patch)| patch.clone())
    }

    /// Number of apply_patch calls, including failed ones
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

impl TwinDirectory for MockDirectory {
    fn list_devices_of_model<'a>(&'a self, model: &'a str) -> TwinFuture<'a, BTreeSet<String>> {
        Box::pin(async move {
            self.devices
                .get(model)
                .cloned()
                .unwrap_or_else(|| Ok(BTreeSet::new()))
        })
    }

    fn apply_patch<'a>(
        &'a self,
        twin_id: &'a TwinId,
        patch: &'a PatchDocument,
    ) -> TwinFuture<'a, ()> {
        Box::pin(async move {
            *self.attempts.lock().unwrap() += 1;

            if let Some(error) = self.patch_errors.get(twin_id) {
                return Err(error.clone());
            }

            self.applied
                .lock()
                .unwrap()
                .push((twin_id.clone(), patch.clone()));
            Ok(())
        })
    }
}
