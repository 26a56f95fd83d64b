//! Study lifecycle core for Shield.
//!
//! This crate owns the decision logic of a study install: deterministic
//! variation assignment, the eligibility gate, the ending latch, and the
//! lifecycle controller the host loader drives through
//! [`LifecycleController::on_event`].

mod config;
pub mod controller;
pub mod dispatch;
pub mod eligibility;
pub mod ending;
mod host;
pub mod selector;
pub mod store;
pub mod telemetry;

pub use config::StudyConfig;
pub use controller::{LifecycleController, LifecycleError, LifecycleOutcome};
pub use dispatch::{MessageDispatcher, MessageResponse, StudyInfo};
pub use eligibility::{
    AlwaysEligible, EligibilityCheck, EligibilityCheckError, EligibilityFut, FnEligibility,
    check_eligibility,
};
pub use ending::{EndingOutcome, EndingResolver, EndingState};
pub use host::{ExtensionChannel, InstallMetadata};
pub use selector::{hash_fraction, select_variation};
pub use store::{
    FileStore, MemoryStore, PersistedStudy, StoreError, StudyStore, ensure_client_id,
};
pub use telemetry::{
    EventType, JsonLinesSink, MemorySink, Telemetry, TelemetryError, TelemetryRecord,
    TelemetrySink,
};
