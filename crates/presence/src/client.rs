use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PresenceClientError {
    #[error("presence service unavailable: {0}")]
    Unavailable(String),

    #[error("presence request rejected: {0}")]
    Rejected(String),

    #[error("no presence status found: {0}")]
    NotFound(String),
}

/// Richer description of the agent's current presence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusDetail {
    pub status_id: Option<String>,
    pub status_name: Option<String>,
    pub logged_in: Option<bool>,
}

impl StatusDetail {
    /// Whether any field identifies an established presence.
    pub fn identifies_presence(&self) -> bool {
        let non_empty = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.is_empty());
        non_empty(&self.status_id) || non_empty(&self.status_name) || self.logged_in == Some(true)
    }
}

/// A unit of work currently routed to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub work_id: String,
}

/// A presence status the agent may switch to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableStatus {
    pub id: String,
    pub name: String,
}

impl AvailableStatus {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Capability surface of the platform's presence service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PresenceClient: Send + Sync {
    /// The id of the agent's current presence status, if any.
    async fn current_status_id(&self) -> Result<Option<String>, PresenceClientError>;

    async fn status_detail(&self) -> Result<StatusDetail, PresenceClientError>;

    async fn active_work(&self) -> Result<Vec<WorkItem>, PresenceClientError>;

    async fn set_status(&self, status_id: &str) -> Result<(), PresenceClientError>;

    /// The backend's designated default ("away") status, if one is configured.
    async fn default_away_status_id(&self) -> Result<Option<String>, PresenceClientError>;

    async fn available_statuses(&self) -> Result<Vec<AvailableStatus>, PresenceClientError>;
}

#[derive(Debug, Default)]
struct Backend {
    statuses: Vec<AvailableStatus>,
    default_away: Option<String>,
    current: Option<String>,
    active_work: Vec<WorkItem>,
}

/// In-process presence service. Only statuses it was built with can be set.
#[derive(Debug, Default)]
pub struct InMemoryPresenceClient {
    backend: RwLock<Backend>,
}

impl InMemoryPresenceClient {
    pub fn new(statuses: Vec<AvailableStatus>) -> Self {
        Self {
            backend: RwLock::new(Backend {
                statuses,
                ..Default::default()
            }),
        }
    }

    pub fn with_default_away(self, status_id: impl Into<String>) -> Self {
        self.backend.write().unwrap().default_away = Some(status_id.into());
        self
    }

    pub fn with_current_status(self, status_id: impl Into<String>) -> Self {
        self.backend.write().unwrap().current = Some(status_id.into());
        self
    }

    pub fn current(&self) -> Option<String> {
        self.backend.read().unwrap().current.clone()
    }

    /// Drop the agent out of presence, as the platform does on timeout.
    pub fn sign_out(&self) {
        let mut backend = self.backend.write().unwrap();
        backend.current = None;
        backend.active_work.clear();
    }

    pub fn assign_work(&self, work_id: impl Into<String>) {
        self.backend.write().unwrap().active_work.push(WorkItem {
            work_id: work_id.into(),
        });
    }
}

#[async_trait]
impl PresenceClient for InMemoryPresenceClient {
    async fn current_status_id(&self) -> Result<Option<String>, PresenceClientError> {
        Ok(self.current())
    }

    async fn status_detail(&self) -> Result<StatusDetail, PresenceClientError> {
        let backend = self.backend.read().unwrap();
        let status_name = backend.current.as_ref().and_then(|current| {
            backend
                .statuses
                .iter()
                .find(|status| &status.id == current)
                .map(|status| status.name.clone())
        });
        Ok(StatusDetail {
            status_id: backend.current.clone(),
            status_name,
            logged_in: Some(backend.current.is_some()),
        })
    }

    async fn active_work(&self) -> Result<Vec<WorkItem>, PresenceClientError> {
        Ok(self.backend.read().unwrap().active_work.clone())
    }

    async fn set_status(&self, status_id: &str) -> Result<(), PresenceClientError> {
        let mut backend = self.backend.write().unwrap();
        if !backend.statuses.iter().any(|status| status.id == status_id) {
            return Err(PresenceClientError::Rejected(format!(
                "unknown status id {status_id}"
            )));
        }
        debug!(status_id, "presence status set");
        backend.current = Some(status_id.to_string());
        Ok(())
    }

    async fn default_away_status_id(&self) -> Result<Option<String>, PresenceClientError> {
        Ok(self.backend.read().unwrap().default_away.clone())
    }

    async fn available_statuses(&self) -> Result<Vec<AvailableStatus>, PresenceClientError> {
        Ok(self.backend.read().unwrap().statuses.clone())
    }
}
