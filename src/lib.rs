//! subsync
//!
//! Keeps change-notification subscriptions alive, mirrors them into a
//! tracking store, and routes incoming notifications according to the
//! directives embedded in each subscription's client state.

pub mod error;
pub mod model;
pub mod directives;
pub mod collaborators;
pub mod processor;
pub mod resolver;
pub mod dispatch;
pub mod lifecycle;
pub mod config;
pub mod logging;
pub mod cli;
pub mod display;
pub mod app;

pub use error::{SubsyncError, SubsyncResult};
pub use directives::Directives;
pub use dispatch::{IntakeRequest, IntakeResponse, NotificationDispatcher};
pub use lifecycle::SubscriptionManager;
pub use model::{Notification, Subscription, TrackingRecord, TrackingStatus};
