//! EBI Job Dispatcher REST client
//!
//! Talks to `<base>/<tool>/{run,status,resulttypes,result}` for a single tool.

use crate::consts::http::{REQUEST_TIMEOUT_SECS, user_agent};
use crate::environment::Environment;
use crate::gateway::ServiceGateway;
use crate::gateway::error::GatewayError;
use crate::job::{JobHandle, ParamSet, ResultTypeDescriptor};
use log::debug;
use reqwest::header::ACCEPT;
use reqwest::{Client, ClientBuilder, Response};
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize)]
struct ResultTypesResponse {
    #[serde(default)]
    types: Vec<ResultTypeDescriptor>,
}

#[derive(Debug, Clone)]
pub struct RestGateway {
    client: Client,
    base_url: String,
    tool: String,
}

impl RestGateway {
    /// Create a gateway for `tool` against the service of the given environment.
    pub fn new(environment: &Environment, tool: &str) -> Result<Self, GatewayError> {
        Self::with_base_url(environment.service_url(), tool)
    }

    pub fn with_base_url(base_url: impl Into<String>, tool: &str) -> Result<Self, GatewayError> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(user_agent())
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            tool: tool.to_string(),
        })
    }

    fn build_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.tool,
            endpoint.trim_start_matches('/')
        )
    }

    fn job_url(&self, endpoint: &str, handle: &JobHandle) -> String {
        self.build_url(&format!(
            "{}/{}",
            endpoint,
            urlencoding::encode(handle.as_str())
        ))
    }

    async fn handle_response_status(response: Response) -> Result<Response, GatewayError> {
        if !response.status().is_success() {
            return Err(GatewayError::from_response(response).await);
        }
        Ok(response)
    }

    async fn get_text(&self, url: &str) -> Result<String, GatewayError> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?;
        let response = Self::handle_response_status(response).await?;
        Ok(response.text().await?)
    }
}

#[async_trait::async_trait]
impl ServiceGateway for RestGateway {
    async fn submit(
        &self,
        email: Option<&str>,
        title: &str,
        params: &ParamSet,
    ) -> Result<JobHandle, GatewayError> {
        let mut form: Vec<(&str, &str)> = Vec::with_capacity(params.len() + 2);
        if let Some(email) = email {
            form.push(("email", email));
        }
        form.push(("title", title));
        form.extend(params.pairs());

        let url = self.build_url("run");
        debug!("POST {} ({} fields)", url, form.len());
        let response = self.client.post(&url).form(&form).send().await?;
        let response = Self::handle_response_status(response).await?;
        let job_id = response.text().await?;
        let job_id = job_id.trim();
        if job_id.is_empty() {
            return Err(GatewayError::Protocol(
                "service returned an empty job identifier".to_string(),
            ));
        }
        Ok(JobHandle::new(job_id))
    }

    async fn status(&self, handle: &JobHandle) -> Result<String, GatewayError> {
        let text = self.get_text(&self.job_url("status", handle)).await?;
        Ok(text.trim().to_string())
    }

    async fn result_types(
        &self,
        handle: &JobHandle,
    ) -> Result<Vec<ResultTypeDescriptor>, GatewayError> {
        let url = self.job_url("resulttypes", handle);
        debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let response = Self::handle_response_status(response).await?;
        let bytes = response.bytes().await?;
        let parsed: ResultTypesResponse = serde_json::from_slice(&bytes)?;
        Ok(parsed.types)
    }

    async fn fetch_result(
        &self,
        handle: &JobHandle,
        type_id: &str,
    ) -> Result<Vec<u8>, GatewayError> {
        let url = self.build_url(&format!(
            "result/{}/{}",
            urlencoding::encode(handle.as_str()),
            urlencoding::encode(type_id)
        ));
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;
        let response = Self::handle_response_status(response).await?;
        Ok(response.bytes().await?.to_vec())
    }
}
