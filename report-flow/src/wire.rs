//! JSON shapes exchanged with the remote report services, and their conversion
//! into the crate's model types.
//!
//! Parsing is lenient where the service is known to vary: lab rows may use the
//! tabular `"Test Name"` keys or snake/camel case, entities may carry raw NER
//! keys (`word`, `entity`, `score`), values may be numbers or strings, and
//! abnormal tests may be plain names or records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{ReportError, Result},
    model::{
        AbnormalTest, AnalysisReply, AnalysisResult, Classification, Entity, QaAnswer,
        StoredReport, TestResult,
    },
};

pub const NOT_MEDICAL_REASON: &str = "This document doesn't appear to be a medical report";

#[derive(Debug, Serialize)]
pub struct ReportChatRequest<'a> {
    pub text: &'a str,
    pub question: &'a str,
}

#[derive(Debug, Serialize)]
pub struct AssistantRequest<'a> {
    pub message: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeResponse {
    #[serde(default)]
    pub success: bool,
    pub analysis: Option<AnalysisPayload>,
    pub results: Option<Vec<ResultRow>>,
    pub evaluation: Option<EvaluationPayload>,
    pub text: Option<String>,
    pub error: Option<String>,
    pub details: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisPayload {
    #[serde(alias = "isMedicalReport")]
    pub is_medical_report: Option<bool>,
    pub summary: Option<String>,
    pub classification: Option<ClassificationPayload>,
    pub entities: Option<Vec<EntityPayload>>,
    pub recommendations: Option<Vec<String>>,
    #[serde(alias = "rawText", alias = "raw_text")]
    pub text: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClassificationPayload {
    pub label: String,
    #[serde(alias = "score", default)]
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
pub struct EntityPayload {
    #[serde(alias = "word")]
    pub text: String,
    #[serde(alias = "entity")]
    pub label: String,
    #[serde(alias = "score", default)]
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
pub struct ResultRow {
    #[serde(rename = "Test Name", alias = "test_name", alias = "testName")]
    pub test_name: String,
    #[serde(rename = "Value", alias = "value", default)]
    pub value: Value,
    #[serde(rename = "Unit", alias = "unit", default)]
    pub unit: Option<String>,
    #[serde(
        rename = "Reference Range",
        alias = "reference_range",
        alias = "referenceRange",
        default
    )]
    pub reference_range: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct EvaluationPayload {
    pub status: Option<String>,
    pub abnormal_tests: Option<Vec<AbnormalPayload>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AbnormalPayload {
    Name(String),
    Record(AbnormalRecord),
}

#[derive(Debug, Deserialize)]
pub struct AbnormalRecord {
    #[serde(alias = "test_name", alias = "testName", alias = "Test Name")]
    pub test: String,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(alias = "range", alias = "normal_range", default)]
    pub reference_range: Option<Value>,
    #[serde(alias = "status", default)]
    pub note: Option<String>,
}

impl AnalyzeResponse {
    pub fn into_reply(self) -> Result<AnalysisReply> {
        if !self.success {
            return Err(ReportError::RemoteRejection(failure_message(
                self.error,
                self.details,
                "Report analysis failed",
            )));
        }

        let has_table = self.results.is_some() || self.evaluation.is_some();
        let payload = match self.analysis {
            Some(payload) => Some(payload),
            None if has_table => None,
            None => {
                return Err(ReportError::TransportFailure(
                    "malformed response: successful reply without an analysis".to_string(),
                ));
            }
        };

        if let Some(payload) = &payload {
            if payload.is_medical_report == Some(false) {
                let reason = payload
                    .error
                    .clone()
                    .unwrap_or_else(|| NOT_MEDICAL_REASON.to_string());
                return Ok(AnalysisReply::NotMedical { reason });
            }
        }

        let test_results = self
            .results
            .unwrap_or_default()
            .into_iter()
            .map(ResultRow::into_model)
            .collect();

        let abnormal_tests = self
            .evaluation
            .and_then(|evaluation| evaluation.abnormal_tests)
            .unwrap_or_default()
            .into_iter()
            .map(AbnormalPayload::into_model)
            .collect();

        let mut result = AnalysisResult {
            raw_text: self.text.unwrap_or_default(),
            test_results,
            abnormal_tests,
            ..Default::default()
        };

        if let Some(payload) = payload {
            result.summary = payload.summary.unwrap_or_default();
            result.classification = payload.classification.map(|c| Classification {
                label: c.label,
                confidence: clamp_confidence(c.confidence),
            });
            result.entities = payload
                .entities
                .unwrap_or_default()
                .into_iter()
                .map(|e| Entity {
                    text: e.text,
                    label: e.label,
                    confidence: clamp_confidence(e.confidence),
                })
                .collect();
            result.recommendations = payload.recommendations.unwrap_or_default();
            if let Some(text) = payload.text {
                result.raw_text = text;
            }
        }

        Ok(AnalysisReply::Report(result))
    }
}

impl ResultRow {
    fn into_model(self) -> TestResult {
        TestResult {
            test_name: self.test_name,
            value: text_of(&self.value).unwrap_or_default(),
            unit: self.unit.unwrap_or_default(),
            reference_range: self.reference_range.as_ref().and_then(text_of),
        }
    }
}

impl AbnormalPayload {
    fn into_model(self) -> AbnormalTest {
        match self {
            Self::Name(name) => AbnormalTest::named(name),
            Self::Record(record) => AbnormalTest {
                test_name: record.test,
                value: record.value.as_ref().and_then(text_of),
                reference_range: record.reference_range.as_ref().and_then(text_of),
                note: record.note,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReportChatResponse {
    #[serde(default)]
    pub success: bool,
    pub response: Option<AnswerPayload>,
    pub error: Option<String>,
    pub details: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnswerPayload {
    pub answer: Option<String>,
    pub confidence: Option<f64>,
    pub relevant_text: Option<String>,
    pub error: Option<String>,
    pub details: Option<String>,
}

impl ReportChatResponse {
    pub fn into_answer(self) -> Result<QaAnswer> {
        if !self.success {
            return Err(ReportError::RemoteRejection(failure_message(
                self.error,
                self.details,
                "The question could not be answered",
            )));
        }

        let payload = self.response.ok_or_else(|| {
            ReportError::TransportFailure(
                "malformed response: successful reply without an answer".to_string(),
            )
        })?;

        if payload.error.is_some() {
            return Err(ReportError::RemoteRejection(failure_message(
                payload.error,
                payload.details,
                "The question could not be answered",
            )));
        }

        let answer = payload.answer.ok_or_else(|| {
            ReportError::TransportFailure("malformed response: answer is missing".to_string())
        })?;

        Ok(QaAnswer {
            answer,
            confidence: payload.confidence.map(clamp_confidence),
            relevant_excerpt: payload.relevant_text,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct AssistantResponse {
    pub response: Option<String>,
    pub error: Option<String>,
}

impl AssistantResponse {
    pub fn into_message(self) -> Result<String> {
        match (self.response, self.error) {
            (_, Some(error)) => Err(ReportError::RemoteRejection(error)),
            (Some(response), None) => Ok(response),
            (None, None) => Err(ReportError::TransportFailure(
                "malformed response: assistant reply is missing".to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    pub message: Option<String>,
    #[serde(default)]
    pub file: Value,
}

impl UploadResponse {
    pub fn into_stored(self) -> StoredReport {
        StoredReport {
            message: self
                .message
                .unwrap_or_else(|| "File uploaded successfully".to_string()),
            file: self.file,
        }
    }
}

/// Body of a non-2xx response, when the service sent one.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub error: Option<String>,
    pub details: Option<String>,
    pub detail: Option<Value>,
}

impl ErrorBody {
    pub fn message(self) -> Option<String> {
        let details = self.details.or_else(|| self.detail.as_ref().and_then(text_of));
        match (self.error, details) {
            (None, None) => None,
            (error, details) => Some(failure_message(error, details, "")),
        }
    }
}

fn failure_message(error: Option<String>, details: Option<String>, fallback: &str) -> String {
    match (error, details) {
        (Some(error), Some(details)) => format!("{}: {}", error, details),
        (Some(error), None) => error,
        (None, Some(details)) => details,
        (None, None) => fallback.to_string(),
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
