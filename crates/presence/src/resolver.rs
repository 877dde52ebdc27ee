use std::sync::Arc;

use autologin_core::config::{AutoLoginConfig, RetryFallback};
use tracing::debug;

use crate::client::{PresenceClient, PresenceClientError};

/// Status id used when neither an override nor a backend default exists.
pub const DEFAULT_STATUS_ID: &str = "0N58c000000092H";

/// Which optional strategies the resolver may use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverOptions {
    pub status_override: Option<String>,
    pub status_detail_fallback: bool,
    pub active_work_fallback: bool,
    pub retry_fallback: RetryFallback,
}

impl From<&AutoLoginConfig> for ResolverOptions {
    fn from(config: &AutoLoginConfig) -> Self {
        Self {
            status_override: config.status_override().map(String::from),
            status_detail_fallback: config.status_detail_fallback,
            active_work_fallback: config.active_work_fallback,
            retry_fallback: config.retry_fallback,
        }
    }
}

/// Works out whether the agent is logged in and which status to set.
/// Query failures never propagate: each strategy falls through to the next.
pub struct StatusResolver {
    client: Arc<dyn PresenceClient>,
    options: ResolverOptions,
}

impl StatusResolver {
    pub fn new(client: Arc<dyn PresenceClient>, options: ResolverOptions) -> Self {
        Self { client, options }
    }

    pub async fn is_logged_in(&self) -> bool {
        match self.client.current_status_id().await {
            Ok(Some(status_id)) if !status_id.is_empty() => {
                debug!(status_id = %status_id, "agent holds a presence status");
                return true;
            }
            Ok(_) => debug!("no current presence status id"),
            Err(error) => debug!(error = %error, "current status query failed, assuming logged out"),
        }

        if self.options.status_detail_fallback {
            match self.client.status_detail().await {
                Ok(detail) if detail.identifies_presence() => {
                    debug!(?detail, "status detail identifies a presence");
                    return true;
                }
                Ok(_) => debug!("status detail carries no presence"),
                Err(error) => debug!(error = %error, "status detail query failed"),
            }
        }

        if self.options.active_work_fallback {
            match self.client.active_work().await {
                Ok(work) if !work.is_empty() => {
                    debug!(count = work.len(), "agent has active work");
                    return true;
                }
                Ok(_) => debug!("no active work"),
                Err(error) => debug!(error = %error, "active work query failed"),
            }
        }

        false
    }

    /// The status to set on login: the configured override, then the
    /// backend's default, then [`DEFAULT_STATUS_ID`].
    pub async fn target_status_id(&self) -> String {
        if let Some(status_id) = &self.options.status_override {
            return status_id.clone();
        }

        match self.client.default_away_status_id().await {
            Ok(Some(status_id)) if !status_id.is_empty() => return status_id,
            Ok(_) => debug!("backend has no default status"),
            Err(error) => debug!(error = %error, "default status lookup failed"),
        }

        DEFAULT_STATUS_ID.to_string()
    }

    /// The status id to retry with after the primary set-status call failed.
    pub async fn retry_status_id(&self) -> Result<String, PresenceClientError> {
        match self.options.retry_fallback {
            RetryFallback::CurrentStatus => self
                .client
                .current_status_id()
                .await?
                .filter(|status_id| !status_id.is_empty())
                .ok_or_else(|| PresenceClientError::NotFound("no current status id".into())),
            RetryFallback::FirstAvailable => self
                .client
                .available_statuses()
                .await?
                .into_iter()
                .next()
                .map(|status| status.id)
                .ok_or_else(|| PresenceClientError::NotFound("no available statuses".into())),
        }
    }
}
