// src/analysis.rs

use crate::config::{AnalysisConfig, credential};
use crate::error::InvoiceError;
use crate::pdf_pages::PageInput;
use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Anything that turns one page into a raw analysis result
/// (`{"tables": [{"cells": [...]}, ...], ...}`).
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    async fn analyze(&self, page: &PageInput) -> Result<Value, InvoiceError>;
}

/// Azure AI Document Intelligence over its REST API.
pub struct AzureDocumentAnalyzer {
    client: Client,
    config: AnalysisConfig,
    api_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    status: OperationStatus,
    #[serde(default)]
    analyze_result: Option<Value>,
    #[serde(default)]
    error: Option<ServiceError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
enum OperationStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Outcome of one poll of the analyze operation.
#[derive(Debug, PartialEq)]
enum PollOutcome {
    Pending,
    Done(Value),
}

impl AzureDocumentAnalyzer {
    pub fn new(config: AnalysisConfig, api_key: String) -> Result<Self, InvoiceError> {
        if config.endpoint.is_empty() {
            return Err(InvoiceError::Config(
                "document_intelligence.endpoint is not set (or AZURE_DOC_ENDPOINT)".to_string(),
            ));
        }
        Ok(Self {
            client: Client::new(),
            config,
            api_key,
        })
    }

    /// Build from config, reading the key from `AZURE_DOC_KEY`.
    pub fn from_env(config: AnalysisConfig) -> Result<Self, InvoiceError> {
        let api_key = credential("AZURE_DOC_KEY")?;
        Self::new(config, api_key)
    }

    async fn submit(&self, page: &PageInput) -> Result<String, InvoiceError> {
        let response = self
            .client
            .post(analyze_url(&self.config))
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .header(header::CONTENT_TYPE, page.mime)
            .body(page.bytes.clone())
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::ACCEPTED {
            let body = response.text().await.unwrap_or_default();
            return Err(InvoiceError::Analysis(format!("analyze request returned {status}: {body}")));
        }

        response
            .headers()
            .get("Operation-Location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| InvoiceError::Analysis("response has no Operation-Location header".to_string()))
    }

    async fn poll(&self, operation_url: &str) -> Result<PollOutcome, InvoiceError> {
        let response = self
            .client
            .get(operation_url)
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InvoiceError::Analysis(format!("poll returned {status}: {body}")));
        }

        let body: OperationResponse = response.json().await?;
        interpret(body)
    }
}

#[async_trait]
impl DocumentAnalyzer for AzureDocumentAnalyzer {
    async fn analyze(&self, page: &PageInput) -> Result<Value, InvoiceError> {
        let operation_url = self.submit(page).await?;
        info!(page = page.number, model = %self.config.model_id, "Analysis submitted");

        let interval = Duration::from_millis(self.config.poll_interval_ms);
        for attempt in 1..=self.config.max_polls {
            tokio::time::sleep(interval).await;
            match self.poll(&operation_url).await? {
                PollOutcome::Done(result) => {
                    info!(page = page.number, polls = attempt, "Analysis succeeded");
                    return Ok(result);
                }
                PollOutcome::Pending => debug!(page = page.number, attempt, "Analysis still running"),
            }
        }

        warn!(page = page.number, polls = self.config.max_polls, "Gave up waiting for analysis");
        Err(InvoiceError::AnalysisTimeout {
            polls: self.config.max_polls,
        })
    }
}

fn analyze_url(config: &AnalysisConfig) -> String {
    format!(
        "{}/documentintelligence/documentModels/{}:analyze?api-version={}",
        config.endpoint.trim_end_matches('/'),
        config.model_id,
        config.api_version
    )
}

fn interpret(body: OperationResponse) -> Result<PollOutcome, InvoiceError> {
    match body.status {
        OperationStatus::NotStarted | OperationStatus::Running => Ok(PollOutcome::Pending),
        OperationStatus::Succeeded => Ok(PollOutcome::Done(body.analyze_result.unwrap_or(Value::Null))),
        OperationStatus::Failed | OperationStatus::Canceled => {
            let detail = body
                .error
                .map(|e| format!("{}: {}", e.code, e.message))
                .unwrap_or_else(|| format!("operation {:?}", body.status));
            Err(InvoiceError::Analysis(detail))
        }
    }
}
