use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

/// One registration log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub org: String,
    pub timestamp: DateTime<Utc>,
}

/// Registration form as posted by clients; every field is required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewRegistration {
    pub name: Option<String>,
    pub email: Option<String>,
    pub org: Option<String>,
}

impl NewRegistration {
    /// Trimmed registration stamped with `timestamp`, or `None` if a field is missing or blank.
    pub fn into_registration(self, timestamp: DateTime<Utc>) -> Option<Registration> {
        let field = |v: Option<String>| {
            v.map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        Some(Registration {
            name: field(self.name)?,
            email: field(self.email)?,
            org: field(self.org)?,
            timestamp,
        })
    }
}

/// Append-only registration log
#[async_trait::async_trait]
pub trait RegistrationStore: Send + Sync {
    async fn append(&self, registration: Registration) -> Result<()>;

    /// All registrations in append order
    async fn list(&self) -> Result<Vec<Registration>>;
}

/// Process-memory store: starts empty and is lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryRegistrationStore {
    entries: RwLock<Vec<Registration>>,
}

impl InMemoryRegistrationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RegistrationStore for InMemoryRegistrationStore {
    async fn append(&self, registration: Registration) -> Result<()> {
        info!(
            name = %registration.name,
            email = %registration.email,
            org = %registration.org,
            "new registration"
        );
        self.entries.write().await.push(registration);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Registration>> {
        Ok(self.entries.read().await.clone())
    }
}
