use crate::proto::ProfileRequest;
use anyhow::Result;
use anyhow::anyhow;
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the hub's own HTTP API, used by the command-line front end.
pub struct HubClient {
    base_url: String,
    http: reqwest::Client,
}

impl HubClient {
    pub fn new(center: &str) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self {
            base_url: center.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Registers one (service, address) pair by hand.
    pub async fn register_service(&self, name: &str, address: &str) -> Result<String> {
        let url = format!("{}/v1/cover/register", self.base_url);
        let resp = self
            .http
            .post(url)
            .query(&[("name", name), ("address", address)])
            .send()
            .await?;
        expect_success("register", resp).await
    }

    pub async fn list_services(&self) -> Result<HashMap<String, Vec<String>>> {
        let url = format!("{}/v1/cover/list", self.base_url);
        let resp = self.http.get(url).send().await?;
        let body = expect_success("list", resp).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Fetches the merged textual profile for a selection.
    pub async fn profile(&self, request: &ProfileRequest) -> Result<String> {
        let url = format!("{}/v1/cover/profile", self.base_url);
        let resp = self.http.post(url).json(request).send().await?;
        expect_success("profile", resp).await
    }

    /// Zeroes the counters of the selected agents.
    pub async fn clear(&self, request: &ProfileRequest) -> Result<String> {
        let url = format!("{}/v1/cover/clear", self.base_url);
        let resp = self.http.post(url).json(request).send().await?;
        expect_success("clear", resp).await
    }

    /// Wipes the whole registry.
    pub async fn init_system(&self) -> Result<String> {
        let url = format!("{}/v1/cover/init", self.base_url);
        let resp = self.http.post(url).send().await?;
        expect_success("init", resp).await
    }

    /// Deregisters the given addresses from every service.
    pub async fn remove_services(&self, addresses: &[String]) -> Result<String> {
        let url = format!("{}/v1/cover/remove", self.base_url);
        let request = ProfileRequest {
            address: addresses.to_vec(),
            ..ProfileRequest::default()
        };
        let resp = self.http.post(url).json(&request).send().await?;
        expect_success("remove", resp).await
    }
}

async fn expect_success(what: &str, resp: reqwest::Response) -> Result<String> {
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(anyhow!("{what} request failed: {status} - {body}"));
    }
    Ok(resp.text().await?)
}
