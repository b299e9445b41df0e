pub mod assistant;
pub mod boundary;
pub mod classifier;
pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod qa;
pub mod session;
pub mod storage;
pub mod wire;

// Re-export commonly used types
pub use assistant::{AssistantConversation, ChatMessage, MessageRole};
pub use boundary::{AssistantChat, ReportAnalyzer, ReportChat, ReportStore};
pub use classifier::{ClassifiedRow, TestStatus, classify};
pub use client::HttpReportClient;
pub use config::{ClientConfig, SessionConfig};
pub use error::{ReportError, Result};
pub use model::{
    AbnormalTest, AnalysisReply, AnalysisResult, Classification, Entity, FileInfo, OverallStatus,
    QaAnswer, QaExchange, StoredReport, TestResult, UploadedFile,
};
pub use qa::{QaSession, QaStatus};
pub use session::{AnalyzeOutcome, QaOutcome, ReportSession, Selection, SessionSnapshot, SessionState};
pub use storage::{InMemorySessionStorage, Session, SessionStorage};
