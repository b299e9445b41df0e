//! HTTP implementation of the remote boundaries.

use async_trait::async_trait;
use reqwest::{
    Client, Response,
    multipart::{Form, Part},
};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::{
    boundary::{AssistantChat, ReportAnalyzer, ReportChat, ReportStore},
    config::ClientConfig,
    error::{ReportError, Result},
    model::{AnalysisReply, QaAnswer, StoredReport, UploadedFile},
    wire::{
        AnalyzeResponse, AssistantRequest, AssistantResponse, ErrorBody, ReportChatRequest,
        ReportChatResponse, UploadResponse,
    },
};

const ANALYZE_PATH: &str = "/api/analyze-report";
const REPORT_CHAT_PATH: &str = "/api/chat-with-report";
const ASSISTANT_PATH: &str = "/api/chat";
const UPLOAD_PATH: &str = "/api/upload";

/// Talks to the report analysis service over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpReportClient {
    base_url: String,
    client: Client,
}

impl HttpReportClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ReportError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn file_part(file: &UploadedFile) -> Result<Part> {
        Part::bytes(file.content().to_vec())
            .file_name(file.name().to_string())
            .mime_str(file.mime_type())
            .map_err(|e| {
                ReportError::InvalidInput(format!(
                    "invalid MIME type {}: {}",
                    file.mime_type(),
                    e
                ))
            })
    }

    async fn read_json<T: DeserializeOwned>(endpoint: &str, response: Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(ErrorBody::message);
            warn!("{} returned HTTP {}", endpoint, status);
            return Err(ReportError::TransportFailure(match reason {
                Some(reason) => format!("{} returned HTTP {}: {}", endpoint, status, reason),
                None => format!("{} returned HTTP {}", endpoint, status),
            }));
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl ReportAnalyzer for HttpReportClient {
    async fn analyze(&self, file: &UploadedFile) -> Result<AnalysisReply> {
        let url = self.endpoint(ANALYZE_PATH);
        info!(
            "Submitting {} ({} bytes, {}) for analysis",
            file.name(),
            file.size(),
            file.mime_type()
        );

        let form = Form::new().part("file", Self::file_part(file)?);
        let response = self.client.post(&url).multipart(form).send().await?;
        let body: AnalyzeResponse = Self::read_json(ANALYZE_PATH, response).await?;
        debug!("Analysis reply received, success={}", body.success);

        body.into_reply()
    }
}

#[async_trait]
impl ReportChat for HttpReportClient {
    async fn ask(&self, report_text: &str, question: &str) -> Result<QaAnswer> {
        let url = self.endpoint(REPORT_CHAT_PATH);
        info!(
            "Asking a question against a report of {} bytes",
            report_text.len()
        );

        let request = ReportChatRequest {
            text: report_text,
            question,
        };
        let response = self.client.post(&url).json(&request).send().await?;
        let body: ReportChatResponse = Self::read_json(REPORT_CHAT_PATH, response).await?;

        body.into_answer()
    }
}

#[async_trait]
impl AssistantChat for HttpReportClient {
    async fn chat(&self, message: &str) -> Result<String> {
        let url = self.endpoint(ASSISTANT_PATH);
        debug!("Sending assistant message");

        let response = self
            .client
            .post(&url)
            .json(&AssistantRequest { message })
            .send()
            .await?;
        let body: AssistantResponse = Self::read_json(ASSISTANT_PATH, response).await?;

        body.into_message()
    }
}

#[async_trait]
impl ReportStore for HttpReportClient {
    async fn store(&self, file: &UploadedFile) -> Result<StoredReport> {
        let url = self.endpoint(UPLOAD_PATH);
        info!("Storing {} ({} bytes)", file.name(), file.size());

        let form = Form::new().part("report", Self::file_part(file)?);
        let response = self.client.post(&url).multipart(form).send().await?;
        let body: UploadResponse = Self::read_json(UPLOAD_PATH, response).await?;

        Ok(body.into_stored())
    }
}
