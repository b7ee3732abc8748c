use anyhow::Result;
use anyhow::anyhow;
use std::time::Duration;
use tracing::warn;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for one agent address.
pub struct Worker {
    base_url: String,
    http: reqwest::Client,
}

impl Worker {
    pub fn new(address: &str) -> Self {
        Self {
            base_url: address.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Fetches the agent's current textual profile.
    pub async fn profile(&self) -> Result<String> {
        let url = format!("{}/v1/cover/profile", self.base_url);
        self.send(self.http.get(url).timeout(REQUEST_TIMEOUT)).await
    }

    /// Asks the agent to zero its counters.
    pub async fn clear(&self) -> Result<String> {
        let url = format!("{}/v1/cover/clear", self.base_url);
        self.send(self.http.post(url).timeout(REQUEST_TIMEOUT)).await
    }

    /// Sends the request, retrying exactly once when the transport fails
    /// before a response arrives. Status errors are never retried.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String> {
        let retry = request.try_clone();
        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(err) if is_network_error(&err) => match retry {
                Some(request) => {
                    warn!("agent request failed, trying again: {err}");
                    request.send().await?
                }
                None => return Err(err.into()),
            },
            Err(err) => return Err(err.into()),
        };
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("agent request failed: {status} - {body}"));
        }
        Ok(resp.text().await?)
    }
}

fn is_network_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || err.is_request() || err.is_body()
}
