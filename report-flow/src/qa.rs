//! Question/answer state for one analyzed report.
//!
//! `QaSession` holds no reference to the report itself; the owning
//! [`ReportSession`](crate::session::ReportSession) supplies the report text
//! for each question and drops the `QaSession` together with the report.

use serde::Serialize;

use crate::{
    error::{ReportError, Result},
    model::{QaAnswer, QaExchange},
};

/// Issued when a question is submitted; needed to apply its answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QaTicket {
    id: u64,
    question: String,
}

impl QaTicket {
    /// The trimmed question text sent to the remote service.
    pub fn question(&self) -> &str {
        &self.question
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QaStatus {
    Ready,
    Asking { question: String },
    /// The last question failed; its text is kept for a retry.
    QaFailed { question: String, message: String },
}

/// History of exchanges plus the state of the current question.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QaSession {
    exchanges: Vec<QaExchange>,
    pending: Option<QaTicket>,
    failure: Option<(String, String)>,
    next_ticket: u64,
}

impl QaSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new question. Fails with `InvalidInput` for blank text and
    /// with `Busy` while another question is outstanding.
    pub fn begin(&mut self, question: &str) -> Result<QaTicket> {
        let trimmed = question.trim();
        if trimmed.is_empty() {
            return Err(ReportError::InvalidInput(
                "question must not be empty".to_string(),
            ));
        }
        if let Some(pending) = &self.pending {
            return Err(ReportError::Busy(format!(
                "still waiting for an answer to \"{}\"",
                pending.question
            )));
        }

        self.next_ticket += 1;
        let ticket = QaTicket {
            id: self.next_ticket,
            question: trimmed.to_string(),
        };
        self.pending = Some(ticket.clone());
        self.failure = None;
        Ok(ticket)
    }

    /// Record the answer for `ticket`. Returns `None` if the ticket is not the
    /// outstanding one.
    pub fn complete(&mut self, ticket: &QaTicket, answer: QaAnswer) -> Option<QaExchange> {
        if self.pending.as_ref() != Some(ticket) {
            return None;
        }
        self.pending = None;

        let exchange = QaExchange {
            question: ticket.question.clone(),
            answer: answer.answer,
            confidence: answer.confidence,
            relevant_excerpt: answer.relevant_excerpt,
        };
        self.exchanges.push(exchange.clone());
        Some(exchange)
    }

    /// Record a failure for `ticket`. Returns `false` if the ticket is stale.
    pub fn fail(&mut self, ticket: &QaTicket, message: impl Into<String>) -> bool {
        if self.pending.as_ref() != Some(ticket) {
            return false;
        }
        self.pending = None;
        self.failure = Some((ticket.question.clone(), message.into()));
        true
    }

    pub fn status(&self) -> QaStatus {
        match (&self.pending, &self.failure) {
            (Some(ticket), _) => QaStatus::Asking {
                question: ticket.question.clone(),
            },
            (None, Some((question, message))) => QaStatus::QaFailed {
                question: question.clone(),
                message: message.clone(),
            },
            (None, None) => QaStatus::Ready,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn exchanges(&self) -> &[QaExchange] {
        &self.exchanges
    }

    pub fn latest(&self) -> Option<&QaExchange> {
        self.exchanges.last()
    }

    /// The question of the last failed attempt, for resubmission.
    pub fn retry_question(&self) -> Option<&str> {
        self.failure.as_ref().map(|(question, _)| question.as_str())
    }
}
