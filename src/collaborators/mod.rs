//! External Collaborators
//!
//! Traits for the provider, tracking store, item source, work queues, and
//! forward destinations, with in-memory and HTTP implementations.

pub mod traits;
pub mod memory;
pub mod http;

pub use traits::{find_record, Forwarder, ItemSource, SubscriptionSource, TrackingStore, WorkQueue};
pub use memory::{
    LocalCollaborators, LocalState, MemoryItemSource, MemoryProvider, MemoryTrackingStore,
    MemoryWorkQueue, RecordingForwarder,
};
pub use http::HttpForwarder;
