use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::classifier::{self, ClassifiedRow, TestStatus};

/// A document picked by the user. Immutable once created; the content is
/// shared so cloning a file never copies its bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    name: String,
    mime_type: String,
    content: Arc<[u8]>,
}

impl UploadedFile {
    /// Create a file, guessing the MIME type from the file name.
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let name = name.into();
        let mime_type = mime_guess::from_path(&name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self::with_mime_type(name, mime_type, content)
    }

    /// Create a file with an explicit MIME type, e.g. the one reported by a browser.
    pub fn with_mime_type(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            content: Arc::from(content.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn info(&self) -> FileInfo {
        FileInfo {
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            size: self.size(),
        }
    }
}

/// Displayable metadata of an [`UploadedFile`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub mime_type: String,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    pub label: String,
    pub confidence: f64,
}

/// One row of the tabulated lab values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_name: String,
    pub value: String,
    pub unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_range: Option<String>,
}

/// A test the remote service flagged as out of range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbnormalTest {
    pub test_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_range: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl AbnormalTest {
    pub fn named(test_name: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            value: None,
            reference_range: None,
            note: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverallStatus {
    Good,
    NeedsReview,
}

/// Snapshot of a completed analysis of a medical report.
///
/// Sessions hand it out behind an `Arc` and never mutate it after construction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: String,
    pub classification: Option<Classification>,
    pub entities: Vec<Entity>,
    pub recommendations: Vec<String>,
    /// Full extracted text of the document; the context for every question.
    pub raw_text: String,
    pub test_results: Vec<TestResult>,
    pub abnormal_tests: Vec<AbnormalTest>,
}

impl AnalysisResult {
    pub fn abnormal_count(&self) -> usize {
        self.abnormal_tests.len()
    }

    pub fn overall_status(&self) -> OverallStatus {
        if self.abnormal_tests.is_empty() {
            OverallStatus::Good
        } else {
            OverallStatus::NeedsReview
        }
    }

    pub fn row_statuses(&self) -> Vec<TestStatus> {
        classifier::classify(&self.test_results, &self.abnormal_tests)
    }

    pub fn classified_rows(&self) -> Vec<ClassifiedRow> {
        self.test_results
            .iter()
            .cloned()
            .zip(self.row_statuses())
            .map(|(result, status)| ClassifiedRow { result, status })
            .collect()
    }
}

/// What the analyze boundary returns when the remote call itself succeeded.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisReply {
    Report(AnalysisResult),
    /// The service read the document but does not consider it a medical report.
    NotMedical { reason: String },
}

/// Answer to a question asked against a report's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaAnswer {
    pub answer: String,
    pub confidence: Option<f64>,
    pub relevant_excerpt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaExchange {
    pub question: String,
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevant_excerpt: Option<String>,
}

/// Acknowledgement from the raw-file storage stub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReport {
    pub message: String,
    pub file: serde_json::Value,
}
