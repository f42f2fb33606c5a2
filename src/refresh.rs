//! Asks the downstream reporting API to refresh its dataset after a run.

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTarget {
    pub api_url: String,
    pub workspace: String,
    pub dataset: String,
}

impl RefreshTarget {
    pub fn refresh_url(&self) -> String {
        format!("{}/RefreshNow", self.api_url.trim_end_matches('/'))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RefreshStatus {
    Refreshed(String),
    Rejected(String),
    Unreachable,
}

#[derive(Deserialize)]
struct ApiMessage {
    message: String,
}

fn interpret(status: StatusCode, body: &str) -> Result<RefreshStatus> {
    let message = || -> Result<String> {
        let parsed: ApiMessage =
            serde_json::from_str(body).context("refresh API answered without a message")?;
        Ok(parsed.message)
    };

    match status {
        StatusCode::OK => Ok(RefreshStatus::Refreshed(message()?)),
        StatusCode::BAD_REQUEST => Ok(RefreshStatus::Rejected(message()?)),
        StatusCode::NOT_FOUND => Ok(RefreshStatus::Unreachable),
        other => anyhow::bail!("refresh API answered {other}"),
    }
}

/// Posts the refresh request and interprets the answer.
pub async fn request_refresh(client: &Client, target: &RefreshTarget) -> Result<RefreshStatus> {
    let response = client
        .post(target.refresh_url())
        .query(&[
            ("workspace", target.workspace.as_str()),
            ("dataset", target.dataset.as_str()),
        ])
        .send()
        .await
        .context("failed to reach refresh API")?;

    let status = response.status();
    let body = response.text().await?;

    interpret(status, &body)
}

/// Triggers the refresh and logs the outcome. Never fails the run.
pub async fn trigger_refresh(client: &Client, target: &RefreshTarget) {
    info!(url = %target.refresh_url(), "Sending request to refresh API");

    match request_refresh(client, target).await {
        Ok(RefreshStatus::Refreshed(message)) => info!("{message}"),
        Ok(RefreshStatus::Rejected(message)) => error!("{message}"),
        Ok(RefreshStatus::Unreachable) => {
            error!("The refresh API URL cannot be found, skipping refresh")
        }
        Err(e) => error!("An error occurred trying to refresh the downstream dataset: {e:#}"),
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_build_refresh_url() {
        let target = RefreshTarget {
            api_url: "https://reports.example.com/api/".to_string(),
            workspace: "hydro".to_string(),
            dataset: "merge".to_string(),
        };

        assert_eq!(
            target.refresh_url(),
            "https://reports.example.com/api/RefreshNow"
        );
    }

    #[test]
    fn should_interpret_api_answers() {
        let body = r#"{"message": "Dataset refresh queued"}"#;

        assert_eq!(
            interpret(StatusCode::OK, body).unwrap(),
            RefreshStatus::Refreshed("Dataset refresh queued".to_string())
        );
        assert_eq!(
            interpret(StatusCode::BAD_REQUEST, body).unwrap(),
            RefreshStatus::Rejected("Dataset refresh queued".to_string())
        );
        assert_eq!(
            interpret(StatusCode::NOT_FOUND, "").unwrap(),
            RefreshStatus::Unreachable
        );
        assert!(interpret(StatusCode::INTERNAL_SERVER_ERROR, body).is_err());
        assert!(interpret(StatusCode::OK, "<html>").is_err());
    }
}
