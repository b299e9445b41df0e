use async_trait::async_trait;

use crate::{
    error::Result,
    model::{AnalysisReply, QaAnswer, StoredReport, UploadedFile},
};

/// Remote document analysis (`POST /api/analyze-report`).
///
/// `Ok(AnalysisReply::NotMedical { .. })` is a rejection of the document, not a
/// failure. Transport problems, non-success statuses and `success: false`
/// replies come back as errors.
#[async_trait]
pub trait ReportAnalyzer: Send + Sync {
    async fn analyze(&self, file: &UploadedFile) -> Result<AnalysisReply>;
}

/// Questions answered against one report's extracted text (`POST /api/chat-with-report`).
#[async_trait]
pub trait ReportChat: Send + Sync {
    async fn ask(&self, report_text: &str, question: &str) -> Result<QaAnswer>;
}

/// General-purpose assistant with no report context (`POST /api/chat`).
#[async_trait]
pub trait AssistantChat: Send + Sync {
    async fn chat(&self, message: &str) -> Result<String>;
}

/// Raw file storage stub (`POST /api/upload`).
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn store(&self, file: &UploadedFile) -> Result<StoredReport>;
}
