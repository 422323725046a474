//! HTTP reachability probe

use super::HttpProbe;
use crate::error::{OptimizerError, Result};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{redirect, Client};
use std::time::Duration;

/// Issues `HEAD` requests without following redirects, so a 3xx from the
/// instance itself is observed as such
pub struct ReqwestProbe {
    client: Client,
}

impl ReqwestProbe {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .danger_accept_invalid_certs(true)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn probe(&self, url: &str, timeout: Duration) -> Result<u16> {
        let response = self
            .client
            .head(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| OptimizerError::ProbeFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        Ok(response.status().as_u16())
    }
}
