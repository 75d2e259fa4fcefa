//! Subscription Directory
//!
//! In-memory map of message type to subscribers, built once from the
//! subscription log. Log I/O always happens outside the lock; the lock only
//! guards applying an already computed change, so it is never held across
//! an `.await`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::log::{EntryId, LogEntry, SubscriptionLog};
use crate::{Result, Subscriber};

/// Live entry for one (subscriber, message type) pair.
#[derive(Debug, Clone)]
struct Route {
    subscriber: Subscriber,
    entry_id: EntryId,
}

/// message type -> lowercased transport address -> route
type RouteTable = HashMap<String, HashMap<String, Route>>;

pub struct SubscriptionDirectory {
    log: Arc<dyn SubscriptionLog>,
    initialized: OnceCell<()>,
    routes: RwLock<RouteTable>,
}

impl SubscriptionDirectory {
    pub fn new(log: Arc<dyn SubscriptionLog>) -> Self {
        Self {
            log,
            initialized: OnceCell::new(),
            routes: RwLock::new(HashMap::new()),
        }
    }

    /// Build the in-memory table from the log. Runs at most once; concurrent
    /// callers wait for the first build. A failed build is retried on the
    /// next call.
    pub async fn initialize(&self) -> Result<()> {
        self.initialized.get_or_try_init(|| self.build()).await?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.initialized()
    }

    async fn build(&self) -> Result<()> {
        let entries = self.log.list_all().await?;
        let total = entries.len();
        let (table, stale) = build_table(entries);

        for id in &stale {
            if let Err(e) = self.log.delete_by_id(*id).await {
                warn!(entry_id = id, error = %e, "Failed to delete superseded subscription entry");
            }
        }

        let routes: usize = table.values().map(HashMap::len).sum();
        *self.routes.write() = table;

        info!(entries = total, routes, superseded = stale.len(), "Subscription directory built");
        Ok(())
    }

    /// Subscribers of any of `message_types`, without duplicates.
    pub async fn get_subscribers(&self, message_types: &[&str]) -> Result<Vec<Subscriber>> {
        self.initialize().await?;

        let routes = self.routes.read();
        let mut seen = HashSet::new();
        let mut subscribers = Vec::new();
        for message_type in message_types {
            if let Some(by_address) = routes.get(*message_type) {
                for (address, route) in by_address {
                    if seen.insert(address.clone()) {
                        subscribers.push(route.subscriber.clone());
                    }
                }
            }
        }
        Ok(subscribers)
    }

    pub async fn subscribe(&self, subscriber: Subscriber, message_type: &str) -> Result<()> {
        self.initialize().await?;

        let entry_id = self.log.append(message_type, &subscriber.label()).await?;

        let previous = {
            let mut routes = self.routes.write();
            routes
                .entry(message_type.to_string())
                .or_default()
                .insert(
                    subscriber.address_key(),
                    Route {
                        subscriber: subscriber.clone(),
                        entry_id,
                    },
                )
        };

        // the route is already live; a leftover entry is retired on the next build
        if let Some(previous) = previous {
            if let Err(e) = self.log.delete_by_id(previous.entry_id).await {
                warn!(entry_id = previous.entry_id, error = %e, "Failed to delete superseded subscription entry");
            }
        }

        debug!(
            subscriber = %subscriber.transport_address,
            message_type = %message_type,
            entry_id,
            "Subscribed"
        );
        Ok(())
    }

    /// Remove a subscription. Returns false when it did not exist.
    pub async fn unsubscribe(&self, subscriber: &Subscriber, message_type: &str) -> Result<bool> {
        self.initialize().await?;

        let removed = {
            let mut routes = self.routes.write();
            let removed = routes
                .get_mut(message_type)
                .and_then(|by_address| by_address.remove(&subscriber.address_key()));
            if routes.get(message_type).is_some_and(HashMap::is_empty) {
                routes.remove(message_type);
            }
            removed
        };

        match removed {
            Some(route) => {
                self.log.delete_by_id(route.entry_id).await?;
                debug!(
                    subscriber = %subscriber.transport_address,
                    message_type = %message_type,
                    "Unsubscribed"
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Message types with at least one subscriber.
    pub fn message_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.routes.read().keys().cloned().collect();
        types.sort();
        types
    }
}

/// Latest log entry per (subscriber, type) wins; returns the table and the
/// ids of superseded entries.
fn build_table(mut entries: Vec<LogEntry>) -> (RouteTable, Vec<EntryId>) {
    entries.sort_by(|a, b| b.arrived_at.cmp(&a.arrived_at).then(a.id.cmp(&b.id)));

    let mut table = RouteTable::new();
    let mut stale = Vec::new();
    for entry in entries {
        let subscriber = match Subscriber::from_label(&entry.label) {
            Ok(subscriber) => subscriber,
            Err(e) => {
                warn!(entry_id = entry.id, label = %entry.label, error = %e, "Skipping malformed subscription entry");
                continue;
            }
        };

        let by_address = table.entry(entry.body).or_default();
        let key = subscriber.address_key();
        if by_address.contains_key(&key) {
            stale.push(entry.id);
        } else {
            by_address.insert(
                key,
                Route {
                    subscriber,
                    entry_id: entry.id,
                },
            );
        }
    }
    (table, stale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn entry(id: EntryId, secs: i64, body: &str, label: &str) -> LogEntry {
        LogEntry {
            id,
            body: body.to_string(),
            label: label.to_string(),
            arrived_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs),
        }
    }

    #[test]
    fn test_latest_arrival_wins() {
        let (table, stale) = build_table(vec![
            entry(1, 10, "Orders.Placed", "sales@host|Sales"),
            entry(2, 20, "Orders.Placed", "SALES@HOST|Sales"),
            entry(3, 5, "Orders.Placed", "billing@host|Billing"),
        ]);

        assert_eq!(stale, vec![1]);
        let routes = &table["Orders.Placed"];
        assert_eq!(routes.len(), 2);
        assert_eq!(routes["sales@host"].entry_id, 2);
    }

    #[test]
    fn test_equal_arrival_prefers_lower_id() {
        let (table, stale) = build_table(vec![
            entry(8, 10, "T", "a|A"),
            entry(4, 10, "T", "a|A"),
        ]);
        assert_eq!(stale, vec![8]);
        assert_eq!(table["T"]["a"].entry_id, 4);
    }

    #[test]
    fn test_malformed_labels_are_skipped() {
        let (table, stale) = build_table(vec![entry(1, 1, "T", "no-separator"), entry(2, 2, "T", "|Endpoint")]);
        assert!(table.is_empty());
        assert!(stale.is_empty());
    }
}
