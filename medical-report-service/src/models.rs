use report_flow::{
    AbnormalTest, AnalysisResult, ChatMessage, Classification, ClassifiedRow, Entity, FileInfo,
    OverallStatus, QaExchange, QaSession, QaStatus, SessionSnapshot,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct QuestionRequest {
    pub question: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssistantMessageRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub generation: u64,
    pub status: String,
    pub message: Option<String>,
    pub file: Option<FileInfo>,
    pub analysis: Option<AnalysisView>,
    pub qa: Option<QaView>,
}

impl SessionResponse {
    pub fn from_snapshot(session_id: &str, snapshot: SessionSnapshot) -> Self {
        Self {
            session_id: session_id.to_string(),
            generation: snapshot.generation,
            status: snapshot.state.name().to_string(),
            message: snapshot.state.message().map(str::to_string),
            file: snapshot.file,
            analysis: snapshot
                .state
                .analysis()
                .map(|analysis| AnalysisView::from(analysis.as_ref())),
            qa: snapshot.qa.as_ref().map(QaView::from),
        }
    }
}

/// Analysis as rendered for the browser, with per-row status already derived.
#[derive(Debug, Serialize)]
pub struct AnalysisView {
    pub summary: String,
    pub classification: Option<Classification>,
    pub entities: Vec<Entity>,
    pub recommendations: Vec<String>,
    pub overall_status: OverallStatus,
    pub abnormal_count: usize,
    pub results: Vec<ClassifiedRow>,
    pub abnormal_tests: Vec<AbnormalTest>,
    pub text: String,
}

impl From<&AnalysisResult> for AnalysisView {
    fn from(analysis: &AnalysisResult) -> Self {
        Self {
            summary: analysis.summary.clone(),
            classification: analysis.classification.clone(),
            entities: analysis.entities.clone(),
            recommendations: analysis.recommendations.clone(),
            overall_status: analysis.overall_status(),
            abnormal_count: analysis.abnormal_count(),
            results: analysis.classified_rows(),
            abnormal_tests: analysis.abnormal_tests.clone(),
            text: analysis.raw_text.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QaView {
    pub state: QaStatus,
    pub exchanges: Vec<QaExchange>,
}

impl From<&QaSession> for QaView {
    fn from(qa: &QaSession) -> Self {
        Self {
            state: qa.status(),
            exchanges: qa.exchanges().to_vec(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QuestionResponse {
    pub status: String,
    pub exchange: Option<QaExchange>,
    pub question: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AssistantResponse {
    pub reply: Option<ChatMessage>,
    pub messages: Vec<ChatMessage>,
}
