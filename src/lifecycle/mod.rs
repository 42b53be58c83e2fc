//! Subscription Lifecycle
//!
//! Renewal before expiry, reconciliation of the tracking store against the
//! provider, and the manager that ties both to registration and deletion.

pub mod renewal;
pub mod reconcile;
pub mod manager;

pub use renewal::{RenewalDetail, RenewalReport, RenewalStatus, SubscriptionRenewer};
pub use reconcile::{Reconciler, SyncReport};
pub use manager::{CreatedSubscription, LifecycleSettings, MaintenanceReport, SubscriptionManager};
