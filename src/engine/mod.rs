/// Reconciliation engine: discovery, alignment, assembly and submission
pub mod assembly;
pub mod replicator;
pub mod timeslice;

pub use assembly::{assemble_patch, telemetry_selectors};
pub use replicator::{
    DeviceReport, DeviceStatus, PassFailure, PassOutcome, PassSettings, Replicator, SkipReason,
};
pub use timeslice::{earliest_slice, TimeSlice};
