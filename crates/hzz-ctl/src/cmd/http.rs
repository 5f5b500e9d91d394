//! Shared HTTP request helpers for CLI commands.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub fn base_url(broker: &str) -> String {
    format!("{}/api", broker.trim_end_matches('/'))
}

#[derive(Deserialize)]
struct ApiError {
    kind: String,
    message: String,
}

async fn decode<T: for<'de> Deserialize<'de>>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        match resp.json::<ApiError>().await {
            Ok(err) => bail!("broker returned {status}: {} ({})", err.message, err.kind),
            Err(_) => bail!("broker returned {status}"),
        }
    }
    resp.json::<T>().await.context("failed to parse response")
}

pub async fn get_json<T: for<'de> Deserialize<'de>>(url: &str) -> Result<T> {
    let resp = reqwest::get(url)
        .await
        .with_context(|| format!("failed to connect to broker at {url}; is hzzd broker running?"))?;
    decode(resp).await
}

pub async fn post_json<T: for<'de> Deserialize<'de>>(url: &str) -> Result<T> {
    let resp = reqwest::Client::new()
        .post(url)
        .send()
        .await
        .with_context(|| format!("failed to connect to broker at {url}; is hzzd broker running?"))?;
    decode(resp).await
}

pub async fn post_json_body<T, R>(url: &str, body: &T) -> Result<R>
where
    T: Serialize,
    R: for<'de> Deserialize<'de>,
{
    let resp = reqwest::Client::new()
        .post(url)
        .json(body)
        .send()
        .await
        .with_context(|| format!("failed to connect to broker at {url}; is hzzd broker running?"))?;
    decode(resp).await
}
