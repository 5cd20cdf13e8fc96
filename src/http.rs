use std::time::Duration;

use async_trait::async_trait;
use reflection_worker_job::AnalysisType;
use reflection_worker_task_handler::{
    AnalysisHandler, AnalysisOutcome, AnalysisRequest, HandlerError, SkipReason,
};
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use tracing::debug;

use crate::config::ConfigError;

/// Message fragments the analysis functions use for failures that will never
/// clear up by retrying. Matched only when the answer carries no `reason`.
const SKIP_PATTERNS: [(&str, SkipReason); 3] = [
    ("incomplete", SkipReason::EntryIncomplete),
    ("already exists", SkipReason::AlreadyExists),
    ("too short", SkipReason::TextTooShort),
];

fn describe(value: &Value) -> Option<String> {
    ["error", "message"]
        .into_iter()
        .find_map(|field| value.get(field).and_then(Value::as_str))
        .map(str::to_string)
}

/// A structured `reason` wins; an unknown one counts as absent.
fn skip_reason(value: &Value, description: Option<&str>) -> Option<SkipReason> {
    value
        .get("reason")
        .and_then(|reason| serde_json::from_value::<SkipReason>(reason.clone()).ok())
        .or_else(|| {
            let description = description?;
            SKIP_PATTERNS
                .iter()
                .find(|(pattern, _)| description.contains(pattern))
                .map(|(_, reason)| *reason)
        })
}

/// Maps an HTTP answer onto an [`AnalysisOutcome`].
///
/// `success: false` is a validation failure when it carries a known `reason`
/// or a known non-retryable message, and transient otherwise.
pub fn classify_response(status: StatusCode, body: &str) -> Result<AnalysisOutcome, HandlerError> {
    let value: Value = serde_json::from_str(body).map_err(|e| {
        HandlerError::InvalidResponse(format!("HTTP {status}, unparseable body: {e}"))
    })?;
    let description = describe(&value);

    if value.get("success").and_then(Value::as_bool) == Some(false) {
        return Ok(match skip_reason(&value, description.as_deref()) {
            Some(reason) => match description {
                Some(description) => AnalysisOutcome::ValidationFailure(description),
                None => AnalysisOutcome::skipped(reason),
            },
            None => AnalysisOutcome::TransientFailure(
                description.unwrap_or_else(|| "Function returned unsuccessful result".into()),
            ),
        });
    }

    if !status.is_success() {
        return Ok(AnalysisOutcome::TransientFailure(
            format!("HTTP {status} {}", description.unwrap_or_default())
                .trim_end()
                .to_string(),
        ));
    }

    if value.get("success").is_some_and(|success| !success.is_boolean()) {
        return Err(HandlerError::InvalidResponse(format!(
            "HTTP {status}, non-boolean success field"
        )));
    }

    Ok(AnalysisOutcome::Success(value))
}

/// Calls the `ai-analyze-{daily,weekly,monthly}` functions over HTTP.
#[derive(Clone)]
pub struct HttpAnalysisHandler {
    client: Client,
    functions_url: Url,
    service_key: String,
}

impl HttpAnalysisHandler {
    pub fn new(
        functions_url: &str,
        service_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let mut functions_url = Url::parse(functions_url)
            .map_err(|_| ConfigError::InvalidFunctionsUrl(functions_url.to_string()))?;
        if functions_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidFunctionsUrl(functions_url.to_string()));
        }
        if !functions_url.path().ends_with('/') {
            let path = format!("{}/", functions_url.path());
            functions_url.set_path(&path);
        }

        let service_key = service_key.into();
        if service_key.trim().is_empty() {
            return Err(ConfigError::MissingServiceKey);
        }

        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "http_client",
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            functions_url,
            service_key,
        })
    }

    pub fn endpoint(&self, analysis_type: AnalysisType) -> Result<Url, HandlerError> {
        self.functions_url
            .join(&format!("ai-analyze-{analysis_type}"))
            .map_err(|e| HandlerError::Unreachable(e.to_string()))
    }
}

#[async_trait]
impl AnalysisHandler for HttpAnalysisHandler {
    async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisOutcome, HandlerError> {
        let url = self.endpoint(request.analysis_type())?;
        debug!(%url, "Invoking analysis function");

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.service_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| HandlerError::Unreachable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| HandlerError::Unreachable(e.to_string()))?;

        classify_response(status, &body)
    }

    fn identifier(&self) -> &str {
        "http_analysis_handler"
    }
}
