//! Backplane Subscriptions
//!
//! Bookkeeping of which subscribers want which message types:
//! - `SubscriptionLog`: durable append log (memory, SQLite)
//! - `SubscriptionDirectory`: concurrent in-memory view rebuilt from the log

use std::hash::{Hash, Hasher};

use thiserror::Error;

pub mod directory;
pub mod log;

pub use directory::SubscriptionDirectory;
#[cfg(feature = "sqlite")]
pub use log::SqliteSubscriptionLog;
pub use log::{EntryId, LogEntry, MemorySubscriptionLog, SubscriptionLog};

const LABEL_SEPARATOR: char = '|';

#[derive(Error, Debug)]
pub enum SubscriptionError {
    #[error("Subscription log error: {0}")]
    Log(String),

    #[error("Malformed subscription label: {0}")]
    MalformedLabel(String),
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for SubscriptionError {
    fn from(e: sqlx::Error) -> Self {
        SubscriptionError::Log(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SubscriptionError>;

/// A subscribing endpoint. Two subscribers are equal when their transport
/// addresses match ignoring case; the endpoint name is informational.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub transport_address: String,
    pub endpoint: Option<String>,
}

impl Subscriber {
    pub fn new(transport_address: impl Into<String>, endpoint: Option<String>) -> Self {
        Self {
            transport_address: transport_address.into(),
            endpoint,
        }
    }

    /// `transportAddress|endpointName`
    pub fn label(&self) -> String {
        format!(
            "{}{}{}",
            self.transport_address,
            LABEL_SEPARATOR,
            self.endpoint.as_deref().unwrap_or_default()
        )
    }

    pub fn from_label(label: &str) -> Result<Self> {
        let (address, endpoint) = label
            .split_once(LABEL_SEPARATOR)
            .ok_or_else(|| SubscriptionError::MalformedLabel(label.to_string()))?;
        if address.trim().is_empty() {
            return Err(SubscriptionError::MalformedLabel(label.to_string()));
        }
        Ok(Self {
            transport_address: address.to_string(),
            endpoint: (!endpoint.is_empty()).then(|| endpoint.to_string()),
        })
    }

    pub(crate) fn address_key(&self) -> String {
        self.transport_address.to_lowercase()
    }
}

impl PartialEq for Subscriber {
    fn eq(&self, other: &Self) -> bool {
        self.address_key() == other.address_key()
    }
}

impl Eq for Subscriber {}

impl Hash for Subscriber {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address_key().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_equality_ignores_case_and_endpoint() {
        let a = Subscriber::new("Sales@Machine", Some("Sales".to_string()));
        let b = Subscriber::new("sales@machine", None);
        assert_eq!(a, b);

        let set: HashSet<Subscriber> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_label_round_trip() {
        let s = Subscriber::new("billing@host", Some("Billing".to_string()));
        assert_eq!(s.label(), "billing@host|Billing");
        let parsed = Subscriber::from_label(&s.label()).unwrap();
        assert_eq!(parsed.endpoint.as_deref(), Some("Billing"));

        let anonymous = Subscriber::from_label("queue@host|").unwrap();
        assert_eq!(anonymous.endpoint, None);
    }

    #[test]
    fn test_malformed_labels() {
        assert!(Subscriber::from_label("nothing").is_err());
        assert!(Subscriber::from_label(" |Endpoint").is_err());
    }
}
