//! Item Resolver
//!
//! Turns a notification's resource reference into the item that changed.
//!
//! When `resourceData` names an item it is fetched directly. Some notification
//! shapes carry no item identifier at all; for those we take the most recently
//! modified item under the resource as a stand-in for "the item that changed".
//! That fallback races: two near-simultaneous edits to different items can
//! both resolve to whichever was modified last. It is kept as a heuristic and
//! nothing here tries to make it stronger.
//!
//! Every failure resolves to `None`, which callers treat as "skip".

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;

use crate::collaborators::ItemSource;
use crate::error::with_timeout;
use crate::model::{item_id_from_resource_data, Item, ResourceInfo};

/// How an item was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedBy {
    ExplicitId,
    MostRecentlyModified,
}

pub struct ItemResolver {
    items: Arc<dyn ItemSource>,
    timeout: Duration,
}

impl ItemResolver {
    pub fn new(items: Arc<dyn ItemSource>, timeout: Duration) -> Self {
        Self { items, timeout }
    }

    /// Resolve the changed item, or `None` when it can't be determined
    pub async fn resolve(&self, resource_path: &str, resource_data: Option<&Value>) -> Option<Item> {
        self.resolve_with_method(resource_path, resource_data)
            .await
            .map(|(item, _)| item)
    }

    pub async fn resolve_with_method(
        &self,
        resource_path: &str,
        resource_data: Option<&Value>,
    ) -> Option<(Item, ResolvedBy)> {
        match resource_data.and_then(item_id_from_resource_data) {
            Some(item_id) => {
                let result = with_timeout(
                    "get_item",
                    self.timeout,
                    self.items.get_item(resource_path, &item_id),
                ).await;

                match result {
                    Ok(Some(item)) => Some((item, ResolvedBy::ExplicitId)),
                    Ok(None) => {
                        debug!("Item {} not found under {}", item_id, resource_path);
                        None
                    }
                    Err(e) => {
                        warn!("Failed to fetch item {} under {}: {}", item_id, resource_path, e);
                        None
                    }
                }
            }
            None => {
                let result = with_timeout(
                    "list_recently_modified",
                    self.timeout,
                    self.items.list_recently_modified(resource_path, 1),
                ).await;

                match result {
                    Ok(items) => {
                        let item = items.into_iter().next()?;
                        debug!(
                            "No item id in notification for {}, using most recently modified item {}",
                            resource_path, item.id
                        );
                        Some((item, ResolvedBy::MostRecentlyModified))
                    }
                    Err(e) => {
                        warn!("Failed to list recent items under {}: {}", resource_path, e);
                        None
                    }
                }
            }
        }
    }

    /// Display metadata for a resource, or a placeholder on any failure
    pub async fn describe(&self, resource_path: &str) -> ResourceInfo {
        match with_timeout("describe_resource", self.timeout, self.items.describe_resource(resource_path)).await {
            Ok(info) => info,
            Err(e) => {
                debug!("Using placeholder metadata for {}: {}", resource_path, e);
                ResourceInfo::placeholder(resource_path)
            }
        }
    }
}
