use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::{AnalysisRequest, AnalysisResult, build_prompt};
use crate::error::AnalysisError;

/// The AI collaborator boundary. The call is opaque; schema validation of
/// the response is the only responsibility kept on this side.
pub trait AnalysisProvider: Send + Sync {
    fn analyze(
        &self,
        request: &AnalysisRequest,
    ) -> BoxFuture<'_, Result<AnalysisResult, Report<AnalysisError>>>;
}

/// Talks to a hosted generative-model endpoint over HTTPS.
pub struct HttpAnalysisProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    chart_image: &'a str,
    payload: &'a AnalysisRequest,
}

/// Envelope the endpoint wraps its structured output in.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    output: serde_json::Value,
}

impl HttpAnalysisProvider {
    pub fn new(endpoint: String, model: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            model,
            api_key,
        }
    }
}

impl AnalysisProvider for HttpAnalysisProvider {
    fn analyze(
        &self,
        request: &AnalysisRequest,
    ) -> BoxFuture<'_, Result<AnalysisResult, Report<AnalysisError>>> {
        let body = GenerateRequest {
            model: &self.model,
            prompt: build_prompt(request),
            chart_image: &request.chart_image,
            payload: request,
        };
        let body = serde_json::to_value(&body);
        Box::pin(async move {
            let body = body.change_context(AnalysisError::Failed)?;

            let mut http_request = self.client.post(&self.endpoint).json(&body);
            if let Some(key) = &self.api_key {
                http_request = http_request.bearer_auth(key);
            }

            let response = http_request
                .send()
                .await
                .change_context(AnalysisError::Failed)?;

            if !response.status().is_success() {
                return Err(Report::new(AnalysisError::Failed)
                    .attach(format!("HTTP status: {}", response.status())));
            }

            let envelope: GenerateResponse = response
                .json()
                .await
                .change_context(AnalysisError::SchemaMismatch)?;

            debug!("analysis response received, validating schema");
            validate_output(envelope.output)
        })
    }
}

/// Reject any response that does not deserialize into the expected result
/// schema.
fn validate_output(output: serde_json::Value) -> Result<AnalysisResult, Report<AnalysisError>> {
    serde_json::from_value(output).change_context(AnalysisError::SchemaMismatch)
}
