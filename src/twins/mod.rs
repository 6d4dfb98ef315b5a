/// Twin graph port and its implementations
pub mod client;
pub mod mock;

pub use client::DigitalTwinsClient;
pub use mock::MockDirectory;

use crate::error::TwinError;
use crate::patch::{PatchDocument, TwinId};
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by twin graph calls
pub type TwinFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TwinError>> + Send + 'a>>;

/// Capability the engine needs from the twin graph
pub trait TwinDirectory: Send + Sync {
    /// Identifiers of the devices whose twins are of the given model
    fn list_devices_of_model<'a>(&'a self, model: &'a str) -> TwinFuture<'a, BTreeSet<String>>;

    /// Apply a partial update to one twin node
    fn apply_patch<'a>(
        &'a self,
        twin_id: &'a TwinId,
        patch: &'a PatchDocument,
    ) -> TwinFuture<'a, ()>;
}
