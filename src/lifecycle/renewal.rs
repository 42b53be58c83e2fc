//! Subscription Renewer
//!
//! Extends subscriptions whose remaining lifetime has dropped below a
//! threshold. Every renewal asks for exactly the provider's maximum lifetime
//! from now and never more. Each subscription succeeds or fails on its own.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::collaborators::SubscriptionSource;
use crate::error::with_timeout;
use crate::model::Subscription;

/// What happened to one subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RenewalStatus {
    Renewed { expires_at: DateTime<Utc> },
    /// Remaining lifetime was above the threshold
    Skipped { remaining_secs: i64 },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewalDetail {
    pub subscription_id: String,
    pub resource: String,
    #[serde(flatten)]
    pub status: RenewalStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewalReport {
    pub checked: usize,
    pub renewed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub details: Vec<RenewalDetail>,

    /// Set when the subscription list itself could not be read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RenewalReport {
    fn push(&mut self, detail: RenewalDetail) {
        match detail.status {
            RenewalStatus::Renewed { .. } => self.renewed += 1,
            RenewalStatus::Skipped { .. } => self.skipped += 1,
            RenewalStatus::Failed { .. } => self.failed += 1,
        }
        self.details.push(detail);
    }
}

pub struct SubscriptionRenewer {
    source: Arc<dyn SubscriptionSource>,
    max_lifetime: chrono::Duration,
    timeout: Duration,
}

impl SubscriptionRenewer {
    pub fn new(source: Arc<dyn SubscriptionSource>, max_lifetime: chrono::Duration, timeout: Duration) -> Self {
        Self { source, max_lifetime, timeout }
    }

    pub fn max_lifetime(&self) -> chrono::Duration {
        self.max_lifetime
    }

    /// Renew every live subscription expiring within `threshold`
    pub async fn renew_expiring(&self, threshold: chrono::Duration) -> RenewalReport {
        self.renew_expiring_at(threshold, Utc::now()).await
    }

    pub async fn renew_expiring_at(&self, threshold: chrono::Duration, now: DateTime<Utc>) -> RenewalReport {
        match with_timeout("list_subscriptions", self.timeout, self.source.list_subscriptions()).await {
            Ok(subscriptions) => self.renew_subscriptions(&subscriptions, threshold, now).await,
            Err(e) => {
                warn!("Renewal pass could not list subscriptions: {}", e);
                RenewalReport { error: Some(e.to_string()), ..Default::default() }
            }
        }
    }

    /// Renew the subset of `subscriptions` expiring within `threshold`
    pub async fn renew_subscriptions(
        &self,
        subscriptions: &[Subscription],
        threshold: chrono::Duration,
        now: DateTime<Utc>,
    ) -> RenewalReport {
        let new_expiry = now + self.max_lifetime;

        let details = join_all(
            subscriptions
                .iter()
                .map(|subscription| self.renew_one(subscription, threshold, now, new_expiry)),
        )
        .await;

        let mut report = RenewalReport { checked: subscriptions.len(), ..Default::default() };
        for detail in details {
            report.push(detail);
        }

        info!(
            "Renewal pass: {} checked, {} renewed, {} skipped, {} failed",
            report.checked, report.renewed, report.skipped, report.failed
        );
        report
    }

    async fn renew_one(
        &self,
        subscription: &Subscription,
        threshold: chrono::Duration,
        now: DateTime<Utc>,
        new_expiry: DateTime<Utc>,
    ) -> RenewalDetail {
        let remaining = subscription.remaining_lifetime(now);

        let status = if remaining >= threshold {
            RenewalStatus::Skipped { remaining_secs: remaining.num_seconds() }
        } else {
            debug!(
                "Renewing {} ({}s left) until {}",
                subscription.id,
                remaining.num_seconds(),
                new_expiry.to_rfc3339()
            );
            let renewal = with_timeout(
                "renew_subscription",
                self.timeout,
                self.source.renew_subscription(&subscription.id, new_expiry),
            ).await;

            match renewal {
                Ok(renewed) => RenewalStatus::Renewed { expires_at: renewed.expires_at },
                Err(e) => {
                    warn!("Failed to renew subscription {}: {}", subscription.id, e);
                    RenewalStatus::Failed { error: e.to_string() }
                }
            }
        };

        RenewalDetail {
            subscription_id: subscription.id.clone(),
            resource: subscription.resource_path.clone(),
            status,
        }
    }
}
