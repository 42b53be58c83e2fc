//! Notification Dispatch
//!
//! Intake of provider change notifications: handshake, validation, loop
//! prevention, and fan-out to forward destinations and processors.

pub mod dedup;
pub mod envelope;
pub mod dispatcher;

pub use dedup::{DedupKey, DedupStore, DedupTable};
pub use envelope::{EnvelopeMetadata, ForwardEnvelope};
pub use dispatcher::{
    BatchReport, DispatchSettings, IntakeOutcome, IntakeRequest, IntakeResponse, ItemOutcome,
    NotificationDispatcher, SideTask, SideTaskOutcome, SideTaskReport,
};
