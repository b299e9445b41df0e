//! The upload → analysis → Q&A lifecycle of one report.
//!
//! State lives behind an async mutex that is never held across a remote call.
//! Every transition that invalidates the selected file or the current result
//! bumps a generation counter; a remote response is applied only if the
//! generation it was issued under is still current, so a superseded response
//! is dropped on arrival instead of overwriting newer state.
//! A caller that drops an operation mid-call gets its in-flight marker rolled
//! back, leaving the session `Failed` or the question `QaFailed`.

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    boundary::{ReportAnalyzer, ReportChat},
    config::SessionConfig,
    error::{ReportError, Result},
    model::{AnalysisReply, AnalysisResult, FileInfo, QaExchange, UploadedFile},
    qa::{QaSession, QaTicket},
};

pub const ANALYSIS_CANCELLED: &str = "analysis was cancelled before it completed";
pub const QUESTION_CANCELLED: &str = "question was cancelled before it was answered";

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Uploading,
    Succeeded(Arc<AnalysisResult>),
    Failed(String),
    RejectedNonMedical(String),
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Uploading => "uploading",
            Self::Succeeded(_) => "succeeded",
            Self::Failed(_) => "failed",
            Self::RejectedNonMedical(_) => "rejected_non_medical",
        }
    }

    pub fn analysis(&self) -> Option<&Arc<AnalysisResult>> {
        match self {
            Self::Succeeded(analysis) => Some(analysis),
            _ => None,
        }
    }

    /// Error or rejection message, if the state carries one.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Failed(message) | Self::RejectedNonMedical(message) => Some(message),
            _ => None,
        }
    }
}

/// What observers receive on every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub generation: u64,
    pub state: SessionState,
    pub file: Option<FileInfo>,
    pub qa: Option<QaSession>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzeOutcome {
    /// The response was applied; carries the resulting state.
    Applied(SessionState),
    /// The request was superseded by a reset or a new selection before its
    /// response arrived.
    Discarded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QaOutcome {
    Answered(QaExchange),
    QaFailed { question: String, message: String },
    Discarded,
}

/// Result of [`ReportSession::select_file`].
#[derive(Debug)]
pub enum Selection {
    Selected,
    /// Auto-analysis was started in the background.
    Analyzing(JoinHandle<Result<AnalyzeOutcome>>),
}

struct SessionInner {
    generation: u64,
    state: SessionState,
    file: Option<UploadedFile>,
    analysis_in_flight: Option<u64>,
    qa: Option<QaSession>,
}

impl SessionInner {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            generation: self.generation,
            state: self.state.clone(),
            file: self.file.as_ref().map(UploadedFile::info),
            qa: self.qa.clone(),
        }
    }

    /// Start a new generation: outstanding calls become stale and the Q&A
    /// attached to the previous result goes away.
    fn invalidate(&mut self) {
        self.generation += 1;
        self.analysis_in_flight = None;
        self.qa = None;
    }
}

enum PendingKind {
    Analysis,
    Question(QaTicket),
}

/// Held across a remote call. If the call's future is dropped before its
/// response is applied, the in-flight marker is rolled back so the session
/// does not stay `Uploading` or `Asking`.
struct PendingCall {
    session: ReportSession,
    generation: u64,
    kind: Option<PendingKind>,
}

impl PendingCall {
    fn new(session: &ReportSession, generation: u64, kind: PendingKind) -> Self {
        Self {
            session: session.clone(),
            generation,
            kind: Some(kind),
        }
    }

    /// The response is being applied under the lock; nothing to roll back.
    fn disarm(mut self) {
        self.kind = None;
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        let Some(kind) = self.kind.take() else {
            return;
        };
        let generation = self.generation;

        if let Ok(mut inner) = self.session.inner.try_lock() {
            self.session.roll_back(&mut inner, generation, kind);
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let session = self.session.clone();
                handle.spawn(async move {
                    let mut inner = session.inner.lock().await;
                    session.roll_back(&mut inner, generation, kind);
                });
            }
            Err(_) => error!(
                "Cancelled call for generation {} could not be rolled back outside a runtime",
                generation
            ),
        }
    }
}

/// Orchestrates one report's lifecycle. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ReportSession {
    inner: Arc<Mutex<SessionInner>>,
    updates: Arc<watch::Sender<SessionSnapshot>>,
    analyzer: Arc<dyn ReportAnalyzer>,
    chat: Arc<dyn ReportChat>,
    config: Arc<SessionConfig>,
}

impl ReportSession {
    pub fn new(
        config: SessionConfig,
        analyzer: Arc<dyn ReportAnalyzer>,
        chat: Arc<dyn ReportChat>,
    ) -> Self {
        let inner = SessionInner {
            generation: 0,
            state: SessionState::Idle,
            file: None,
            analysis_in_flight: None,
            qa: None,
        };
        let (updates, _) = watch::channel(inner.snapshot());

        Self {
            inner: Arc::new(Mutex::new(inner)),
            updates: Arc::new(updates),
            analyzer,
            chat,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Receive a snapshot after every transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.updates.subscribe()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.inner.lock().await.snapshot()
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state.clone()
    }

    pub async fn file(&self) -> Option<UploadedFile> {
        self.inner.lock().await.file.clone()
    }

    pub async fn qa(&self) -> Option<QaSession> {
        self.inner.lock().await.qa.clone()
    }

    /// Replace the selected file, discarding any result, error or pending
    /// analysis. With auto-analysis enabled the analysis is spawned right away.
    pub async fn select_file(&self, file: UploadedFile) -> Result<Selection> {
        self.validate_file(&file)?;

        let generation = {
            let mut inner = self.inner.lock().await;
            if inner.analysis_in_flight.is_some() {
                info!(
                    "Selection of {} supersedes the analysis in flight (generation {})",
                    file.name(),
                    inner.generation
                );
            }
            inner.invalidate();
            inner.state = SessionState::Idle;
            info!(
                "Selected {} ({} bytes, {})",
                file.name(),
                file.size(),
                file.mime_type()
            );
            inner.file = Some(file);
            self.publish(&inner);
            inner.generation
        };

        if self.config.auto_analyze_on_select {
            let session = self.clone();
            let handle = tokio::spawn(async move { session.run_analysis(Some(generation)).await });
            return Ok(Selection::Analyzing(handle));
        }

        Ok(Selection::Selected)
    }

    /// Submit the selected file for analysis and apply the outcome.
    ///
    /// Fails with `InvalidState` without a file and with `Busy` while another
    /// analysis is outstanding. Remote failures are not errors here: they end
    /// up in the returned state as `Failed` or `RejectedNonMedical`.
    pub async fn analyze(&self) -> Result<AnalyzeOutcome> {
        self.run_analysis(None).await
    }

    async fn run_analysis(&self, expected_generation: Option<u64>) -> Result<AnalyzeOutcome> {
        let (generation, file) = {
            let mut inner = self.inner.lock().await;
            if let Some(expected) = expected_generation {
                if inner.generation != expected {
                    debug!(
                        "Skipping auto-analysis for generation {}, session is at {}",
                        expected, inner.generation
                    );
                    return Ok(AnalyzeOutcome::Discarded);
                }
            }
            if inner.analysis_in_flight.is_some() {
                return Err(ReportError::Busy(
                    "an analysis is already in progress".to_string(),
                ));
            }
            let file = inner
                .file
                .clone()
                .ok_or_else(|| ReportError::InvalidState("no file selected".to_string()))?;

            inner.invalidate();
            inner.analysis_in_flight = Some(inner.generation);
            inner.state = SessionState::Uploading;
            self.publish(&inner);
            (inner.generation, file)
        };

        info!("Analyzing {} (generation {})", file.name(), generation);
        let pending = PendingCall::new(self, generation, PendingKind::Analysis);
        let reply = self.analyzer.analyze(&file).await;

        let mut inner = self.inner.lock().await;
        pending.disarm();
        if inner.generation != generation || inner.analysis_in_flight != Some(generation) {
            warn!(
                "Discarding analysis of {} from superseded generation {}",
                file.name(),
                generation
            );
            return Ok(AnalyzeOutcome::Discarded);
        }

        inner.analysis_in_flight = None;
        let state = match reply {
            Ok(AnalysisReply::Report(result)) => {
                info!(
                    "Analysis of {} succeeded: {} rows, {} abnormal",
                    file.name(),
                    result.test_results.len(),
                    result.abnormal_count()
                );
                inner.qa = Some(QaSession::new());
                SessionState::Succeeded(Arc::new(result))
            }
            Ok(AnalysisReply::NotMedical { reason }) => {
                warn!("{} rejected as non-medical: {}", file.name(), reason);
                SessionState::RejectedNonMedical(reason)
            }
            Err(e) => {
                error!("Analysis of {} failed: {}", file.name(), e);
                SessionState::Failed(e.detail())
            }
        };
        inner.state = state;
        self.publish(&inner);

        Ok(AnalyzeOutcome::Applied(inner.state.clone()))
    }

    /// Ask a question about the analyzed report.
    ///
    /// Blank questions fail with `InvalidInput` and nothing is sent. Without a
    /// successful analysis this fails with `NoActiveReport`; while another
    /// question is pending, with `Busy`. A remote failure is reported as
    /// [`QaOutcome::QaFailed`] and the question is kept for a retry.
    pub async fn ask_question(&self, question: &str) -> Result<QaOutcome> {
        if question.trim().is_empty() {
            return Err(ReportError::InvalidInput(
                "question must not be empty".to_string(),
            ));
        }

        let (generation, ticket, analysis) = {
            let mut inner = self.inner.lock().await;
            let analysis = inner
                .state
                .analysis()
                .cloned()
                .ok_or(ReportError::NoActiveReport)?;
            if analysis.raw_text.trim().is_empty() {
                return Err(ReportError::InvalidState(
                    "the analyzed report has no extracted text".to_string(),
                ));
            }

            let generation = inner.generation;
            let qa = inner.qa.as_mut().ok_or(ReportError::NoActiveReport)?;
            let ticket = qa.begin(question)?;
            self.publish(&inner);
            (generation, ticket, analysis)
        };

        debug!("Question submitted (generation {})", generation);
        let pending = PendingCall::new(self, generation, PendingKind::Question(ticket.clone()));
        let reply = self.chat.ask(&analysis.raw_text, ticket.question()).await;

        let mut inner = self.inner.lock().await;
        pending.disarm();
        if inner.generation != generation {
            warn!(
                "Discarding answer for a report from superseded generation {}",
                generation
            );
            return Ok(QaOutcome::Discarded);
        }
        let Some(qa) = inner.qa.as_mut() else {
            return Ok(QaOutcome::Discarded);
        };

        let outcome = match reply {
            Ok(answer) => match qa.complete(&ticket, answer) {
                Some(exchange) => QaOutcome::Answered(exchange),
                None => QaOutcome::Discarded,
            },
            Err(e) => {
                let message = e.detail();
                error!("Question failed: {}", e);
                if qa.fail(&ticket, message.clone()) {
                    QaOutcome::QaFailed {
                        question: ticket.question().to_string(),
                        message,
                    }
                } else {
                    QaOutcome::Discarded
                }
            }
        };
        self.publish(&inner);

        Ok(outcome)
    }

    /// Back to `Idle` with no file, result, error or Q&A.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.invalidate();
        inner.state = SessionState::Idle;
        inner.file = None;
        info!("Session reset (generation {})", inner.generation);
        self.publish(&inner);
    }

    fn validate_file(&self, file: &UploadedFile) -> Result<()> {
        if file.is_empty() {
            return Err(ReportError::InvalidInput(format!(
                "{} is empty",
                file.name()
            )));
        }
        if !self.config.accepts(file.mime_type()) {
            return Err(ReportError::InvalidInput(format!(
                "unsupported file type {} for {}",
                file.mime_type(),
                file.name()
            )));
        }
        Ok(())
    }

    fn roll_back(&self, inner: &mut SessionInner, generation: u64, kind: PendingKind) {
        if inner.generation != generation {
            return;
        }
        match kind {
            PendingKind::Analysis => {
                if inner.analysis_in_flight != Some(generation) {
                    return;
                }
                warn!("Analysis for generation {} was cancelled", generation);
                inner.analysis_in_flight = None;
                inner.state = SessionState::Failed(ANALYSIS_CANCELLED.to_string());
            }
            PendingKind::Question(ticket) => {
                let Some(qa) = inner.qa.as_mut() else {
                    return;
                };
                if !qa.fail(&ticket, QUESTION_CANCELLED) {
                    return;
                }
                warn!("Question \"{}\" was cancelled", ticket.question());
            }
        }
        self.publish(inner);
    }

    fn publish(&self, inner: &SessionInner) {
        self.updates.send_replace(inner.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AbnormalTest, Classification, QaAnswer, TestResult};
    use crate::model::OverallStatus;
    use crate::qa::QaStatus;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    type AnalyzeReply = Result<AnalysisReply>;

    /// Answers each file by name with whatever the test sends on its channel.
    #[derive(Default)]
    struct FakeAnalyzer {
        replies: StdMutex<HashMap<String, oneshot::Receiver<AnalyzeReply>>>,
        calls: StdMutex<Vec<String>>,
    }

    impl FakeAnalyzer {
        fn reply_for(&self, name: &str) -> oneshot::Sender<AnalyzeReply> {
            let (tx, rx) = oneshot::channel();
            self.replies.lock().unwrap().insert(name.to_string(), rx);
            tx
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReportAnalyzer for FakeAnalyzer {
        async fn analyze(&self, file: &UploadedFile) -> Result<AnalysisReply> {
            self.calls.lock().unwrap().push(file.name().to_string());
            let rx = self
                .replies
                .lock()
                .unwrap()
                .remove(file.name())
                .expect("no reply registered for file");
            rx.await
                .unwrap_or_else(|_| Err(ReportError::TransportFailure("dropped".to_string())))
        }
    }

    #[derive(Default)]
    struct FakeChat {
        replies: StdMutex<VecDeque<oneshot::Receiver<Result<QaAnswer>>>>,
        calls: StdMutex<Vec<(String, String)>>,
    }

    impl FakeChat {
        fn next_reply(&self) -> oneshot::Sender<Result<QaAnswer>> {
            let (tx, rx) = oneshot::channel();
            self.replies.lock().unwrap().push_back(rx);
            tx
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReportChat for FakeChat {
        async fn ask(&self, report_text: &str, question: &str) -> Result<QaAnswer> {
            self.calls
                .lock()
                .unwrap()
                .push((report_text.to_string(), question.to_string()));
            let rx = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("no reply registered for question");
            rx.await
                .unwrap_or_else(|_| Err(ReportError::TransportFailure("dropped".to_string())))
        }
    }

    struct Harness {
        session: ReportSession,
        analyzer: Arc<FakeAnalyzer>,
        chat: Arc<FakeChat>,
    }

    fn harness(config: SessionConfig) -> Harness {
        let analyzer = Arc::new(FakeAnalyzer::default());
        let chat = Arc::new(FakeChat::default());
        let session = ReportSession::new(config, analyzer.clone(), chat.clone());
        Harness {
            session,
            analyzer,
            chat,
        }
    }

    fn pdf(name: &str) -> UploadedFile {
        UploadedFile::new(name, b"%PDF-1.7 lab report".to_vec())
    }

    fn report(text: &str) -> AnalysisReply {
        AnalysisReply::Report(AnalysisResult {
            summary: "Routine blood panel".to_string(),
            classification: Some(Classification {
                label: "Normal".to_string(),
                confidence: 0.92,
            }),
            recommendations: vec!["Stay hydrated".to_string()],
            raw_text: text.to_string(),
            ..Default::default()
        })
    }

    fn answer(text: &str) -> QaAnswer {
        QaAnswer {
            answer: text.to_string(),
            confidence: Some(0.8),
            relevant_excerpt: Some("Glucose 110 mg/dL".to_string()),
        }
    }

    async fn analyzed(h: &Harness, text: &str) {
        h.session.select_file(pdf("report.pdf")).await.unwrap();
        h.analyzer.reply_for("report.pdf").send(Ok(report(text))).unwrap();
        h.session.analyze().await.unwrap();
    }

    #[tokio::test]
    async fn test_end_to_end_success() {
        let h = harness(SessionConfig::default());
        h.session.select_file(pdf("report.pdf")).await.unwrap();
        assert_eq!(h.session.state().await, SessionState::Idle);

        h.analyzer
            .reply_for("report.pdf")
            .send(Ok(report("Glucose 110 mg/dL")))
            .unwrap();
        let outcome = h.session.analyze().await.unwrap();

        let AnalyzeOutcome::Applied(SessionState::Succeeded(result)) = outcome else {
            panic!("expected a successful analysis, got {:?}", outcome);
        };
        assert_eq!(result.classification.as_ref().unwrap().label, "Normal");
        assert_eq!(result.recommendations, vec!["Stay hydrated".to_string()]);
        assert_eq!(result.overall_status(), OverallStatus::Good);
        assert_eq!(h.analyzer.calls(), vec!["report.pdf".to_string()]);

        let snapshot = h.session.snapshot().await;
        assert_eq!(snapshot.file.unwrap().name, "report.pdf");
        assert_eq!(snapshot.qa.unwrap().status(), QaStatus::Ready);
    }

    #[tokio::test]
    async fn test_overall_status_reflects_abnormal_tests() {
        let h = harness(SessionConfig::default());
        h.session.select_file(pdf("panel.pdf")).await.unwrap();
        h.analyzer
            .reply_for("panel.pdf")
            .send(Ok(AnalysisReply::Report(AnalysisResult {
                raw_text: "Glucose 110".to_string(),
                test_results: vec![TestResult {
                    test_name: "Glucose".to_string(),
                    value: "110".to_string(),
                    unit: "mg/dL".to_string(),
                    reference_range: None,
                }],
                abnormal_tests: vec![AbnormalTest::named("Glucose")],
                ..Default::default()
            })))
            .unwrap();
        h.session.analyze().await.unwrap();

        let state = h.session.state().await;
        let result = state.analysis().unwrap();
        assert_eq!(result.overall_status(), OverallStatus::NeedsReview);
        assert_eq!(result.abnormal_count(), 1);
    }

    #[tokio::test]
    async fn test_non_medical_rejection_keeps_no_result() {
        let h = harness(SessionConfig::default());
        h.session.select_file(pdf("invoice.pdf")).await.unwrap();
        h.analyzer
            .reply_for("invoice.pdf")
            .send(Ok(AnalysisReply::NotMedical {
                reason: "Not a lab report".to_string(),
            }))
            .unwrap();

        let outcome = h.session.analyze().await.unwrap();
        assert_eq!(
            outcome,
            AnalyzeOutcome::Applied(SessionState::RejectedNonMedical(
                "Not a lab report".to_string()
            ))
        );
        assert!(h.session.state().await.analysis().is_none());
        assert!(h.session.qa().await.is_none());
        assert_eq!(
            h.session.ask_question("Is this fine?").await,
            Err(ReportError::NoActiveReport)
        );
    }

    #[tokio::test]
    async fn test_transport_failure_then_explicit_retry() {
        let h = harness(SessionConfig::default());
        h.session.select_file(pdf("report.pdf")).await.unwrap();
        h.analyzer
            .reply_for("report.pdf")
            .send(Err(ReportError::TransportFailure(
                "connection refused".to_string(),
            )))
            .unwrap();

        let outcome = h.session.analyze().await.unwrap();
        assert_eq!(
            outcome,
            AnalyzeOutcome::Applied(SessionState::Failed("connection refused".to_string()))
        );
        assert!(h.session.file().await.is_some());

        h.analyzer
            .reply_for("report.pdf")
            .send(Ok(report("text")))
            .unwrap();
        let outcome = h.session.analyze().await.unwrap();
        assert!(matches!(
            outcome,
            AnalyzeOutcome::Applied(SessionState::Succeeded(_))
        ));
        assert_eq!(h.analyzer.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_analyze_without_file_is_invalid_state() {
        let h = harness(SessionConfig::default());
        assert!(matches!(
            h.session.analyze().await,
            Err(ReportError::InvalidState(_))
        ));
        assert!(h.analyzer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_second_analyze_while_uploading_is_busy() {
        let h = harness(SessionConfig::default());
        h.session.select_file(pdf("report.pdf")).await.unwrap();
        let reply = h.analyzer.reply_for("report.pdf");

        let mut updates = h.session.subscribe();
        let session = h.session.clone();
        let first = tokio::spawn(async move { session.analyze().await });
        updates
            .wait_for(|s| s.state == SessionState::Uploading)
            .await
            .unwrap();

        assert!(matches!(
            h.session.analyze().await,
            Err(ReportError::Busy(_))
        ));

        reply.send(Ok(report("text"))).unwrap();
        let outcome = first.await.unwrap().unwrap();
        assert!(matches!(
            outcome,
            AnalyzeOutcome::Applied(SessionState::Succeeded(_))
        ));
        assert_eq!(h.analyzer.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_superseded_response_is_discarded() {
        let h = harness(SessionConfig::default());
        h.session.select_file(pdf("a.pdf")).await.unwrap();
        let reply_a = h.analyzer.reply_for("a.pdf");

        let mut updates = h.session.subscribe();
        let session = h.session.clone();
        let pending_a = tokio::spawn(async move { session.analyze().await });
        updates
            .wait_for(|s| s.state == SessionState::Uploading)
            .await
            .unwrap();

        h.session.select_file(pdf("b.pdf")).await.unwrap();
        let reply_b = h.analyzer.reply_for("b.pdf");
        let session = h.session.clone();
        let pending_b = tokio::spawn(async move { session.analyze().await });
        updates
            .wait_for(|s| s.state == SessionState::Uploading)
            .await
            .unwrap();

        reply_a.send(Ok(report("text of A"))).unwrap();
        assert_eq!(pending_a.await.unwrap().unwrap(), AnalyzeOutcome::Discarded);
        assert_eq!(h.session.state().await, SessionState::Uploading);

        reply_b.send(Ok(report("text of B"))).unwrap();
        pending_b.await.unwrap().unwrap();

        let snapshot = h.session.snapshot().await;
        assert_eq!(snapshot.file.unwrap().name, "b.pdf");
        assert_eq!(
            snapshot.state.analysis().unwrap().raw_text,
            "text of B"
        );
    }

    #[tokio::test]
    async fn test_reset_while_uploading_discards_response() {
        let h = harness(SessionConfig::default());
        h.session.select_file(pdf("a.pdf")).await.unwrap();
        let reply = h.analyzer.reply_for("a.pdf");

        let mut updates = h.session.subscribe();
        let session = h.session.clone();
        let pending = tokio::spawn(async move { session.analyze().await });
        updates
            .wait_for(|s| s.state == SessionState::Uploading)
            .await
            .unwrap();

        h.session.reset().await;
        reply.send(Ok(report("late"))).unwrap();

        assert_eq!(pending.await.unwrap().unwrap(), AnalyzeOutcome::Discarded);
        assert_eq!(h.session.state().await, SessionState::Idle);
        assert!(h.session.file().await.is_none());
    }

    #[tokio::test]
    async fn test_reset_after_success_clears_everything() {
        let h = harness(SessionConfig::default());
        analyzed(&h, "Glucose 110").await;
        assert!(h.session.qa().await.is_some());

        let before = h.session.snapshot().await.generation;
        h.session.reset().await;

        let snapshot = h.session.snapshot().await;
        assert_eq!(snapshot.state, SessionState::Idle);
        assert!(snapshot.state.message().is_none());
        assert!(snapshot.file.is_none());
        assert!(snapshot.qa.is_none());
        assert!(snapshot.generation > before);
    }

    #[tokio::test]
    async fn test_auto_analyze_on_select() {
        let h = harness(SessionConfig {
            auto_analyze_on_select: true,
            ..SessionConfig::default()
        });
        h.analyzer
            .reply_for("report.pdf")
            .send(Ok(report("text")))
            .unwrap();

        let selection = h.session.select_file(pdf("report.pdf")).await.unwrap();
        let Selection::Analyzing(handle) = selection else {
            panic!("expected auto-analysis to start");
        };
        let outcome = handle.await.unwrap().unwrap();
        assert!(matches!(
            outcome,
            AnalyzeOutcome::Applied(SessionState::Succeeded(_))
        ));
    }

    #[tokio::test]
    async fn test_unsupported_or_empty_files_are_rejected() {
        let h = harness(SessionConfig::default());
        analyzed(&h, "text").await;
        let before = h.session.snapshot().await;

        let image = UploadedFile::new("scan.png", vec![1, 2, 3]);
        assert!(matches!(
            h.session.select_file(image).await,
            Err(ReportError::InvalidInput(_))
        ));
        let empty = UploadedFile::new("empty.pdf", Vec::new());
        assert!(matches!(
            h.session.select_file(empty).await,
            Err(ReportError::InvalidInput(_))
        ));

        assert_eq!(h.session.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_question_before_analysis_has_no_report() {
        let h = harness(SessionConfig::default());
        assert_eq!(
            h.session.ask_question("What is my glucose?").await,
            Err(ReportError::NoActiveReport)
        );
        h.session.select_file(pdf("report.pdf")).await.unwrap();
        assert_eq!(
            h.session.ask_question("What is my glucose?").await,
            Err(ReportError::NoActiveReport)
        );
        assert!(h.chat.calls().is_empty());
    }

    #[tokio::test]
    async fn test_blank_questions_never_reach_the_network() {
        let h = harness(SessionConfig::default());
        analyzed(&h, "Glucose 110").await;

        assert!(matches!(
            h.session.ask_question("").await,
            Err(ReportError::InvalidInput(_))
        ));
        assert!(matches!(
            h.session.ask_question("   ").await,
            Err(ReportError::InvalidInput(_))
        ));
        assert!(h.chat.calls().is_empty());
    }

    #[tokio::test]
    async fn test_question_is_asked_against_report_text() {
        let h = harness(SessionConfig::default());
        analyzed(&h, "Glucose 110 mg/dL").await;

        h.chat.next_reply().send(Ok(answer("It is 110 mg/dL"))).unwrap();
        let outcome = h.session.ask_question(" What is my glucose? ").await.unwrap();

        let QaOutcome::Answered(exchange) = outcome else {
            panic!("expected an answer");
        };
        assert_eq!(exchange.question, "What is my glucose?");
        assert_eq!(exchange.answer, "It is 110 mg/dL");
        assert_eq!(
            h.chat.calls(),
            vec![(
                "Glucose 110 mg/dL".to_string(),
                "What is my glucose?".to_string()
            )]
        );

        h.chat.next_reply().send(Ok(answer("Yes"))).unwrap();
        h.session.ask_question("Is that high?").await.unwrap();
        assert_eq!(h.session.qa().await.unwrap().exchanges().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_question_keeps_report_and_question() {
        let h = harness(SessionConfig::default());
        analyzed(&h, "Glucose 110").await;

        h.chat
            .next_reply()
            .send(Err(ReportError::RemoteRejection(
                "Could not process the question".to_string(),
            )))
            .unwrap();
        let outcome = h.session.ask_question("Is my LDL high?").await.unwrap();
        assert_eq!(
            outcome,
            QaOutcome::QaFailed {
                question: "Is my LDL high?".to_string(),
                message: "Could not process the question".to_string(),
            }
        );

        assert!(h.session.state().await.analysis().is_some());
        let qa = h.session.qa().await.unwrap();
        assert_eq!(qa.retry_question(), Some("Is my LDL high?"));
    }

    #[tokio::test]
    async fn test_concurrent_question_is_busy() {
        let h = harness(SessionConfig::default());
        analyzed(&h, "Glucose 110").await;
        let reply = h.chat.next_reply();

        let mut updates = h.session.subscribe();
        let session = h.session.clone();
        let first = tokio::spawn(async move { session.ask_question("first?").await });
        updates
            .wait_for(|s| s.qa.as_ref().is_some_and(|qa| qa.is_pending()))
            .await
            .unwrap();

        assert!(matches!(
            h.session.ask_question("second?").await,
            Err(ReportError::Busy(_))
        ));

        reply.send(Ok(answer("one"))).unwrap();
        assert!(matches!(
            first.await.unwrap().unwrap(),
            QaOutcome::Answered(_)
        ));
        assert_eq!(h.chat.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_reset_discards_pending_answer() {
        let h = harness(SessionConfig::default());
        analyzed(&h, "Glucose 110").await;
        let reply = h.chat.next_reply();

        let mut updates = h.session.subscribe();
        let session = h.session.clone();
        let pending = tokio::spawn(async move { session.ask_question("first?").await });
        updates
            .wait_for(|s| s.qa.as_ref().is_some_and(|qa| qa.is_pending()))
            .await
            .unwrap();

        h.session.reset().await;
        reply.send(Ok(answer("late"))).unwrap();

        assert_eq!(pending.await.unwrap().unwrap(), QaOutcome::Discarded);
        assert!(h.session.qa().await.is_none());
    }

    #[tokio::test]
    async fn test_observers_see_transitions() {
        let h = harness(SessionConfig::default());
        let mut updates = h.session.subscribe();
        assert_eq!(updates.borrow().state, SessionState::Idle);

        h.session.select_file(pdf("report.pdf")).await.unwrap();
        assert!(updates.has_changed().unwrap());
        assert_eq!(
            updates.borrow_and_update().file.as_ref().unwrap().name,
            "report.pdf"
        );

        h.analyzer
            .reply_for("report.pdf")
            .send(Ok(report("text")))
            .unwrap();
        h.session.analyze().await.unwrap();
        assert_eq!(updates.borrow_and_update().state.name(), "succeeded");
    }

    #[tokio::test]
    async fn test_dropped_question_can_be_retried() {
        let h = harness(SessionConfig::default());
        analyzed(&h, "Glucose 110").await;
        let _unanswered = h.chat.next_reply();

        let elapsed = tokio::time::timeout(
            Duration::from_millis(50),
            h.session.ask_question("first?"),
        )
        .await;
        assert!(elapsed.is_err());

        let qa = h.session.qa().await.unwrap();
        assert_eq!(
            qa.status(),
            QaStatus::QaFailed {
                question: "first?".to_string(),
                message: QUESTION_CANCELLED.to_string(),
            }
        );
        assert_eq!(qa.retry_question(), Some("first?"));

        h.chat.next_reply().send(Ok(answer("two"))).unwrap();
        let outcome = h.session.ask_question("second?").await.unwrap();
        let QaOutcome::Answered(exchange) = outcome else {
            panic!("expected an answer, got {:?}", outcome);
        };
        assert_eq!(exchange.question, "second?");
        assert!(h.session.state().await.analysis().is_some());
    }

    #[tokio::test]
    async fn test_dropped_analysis_leaves_session_retryable() {
        let h = harness(SessionConfig::default());
        h.session.select_file(pdf("report.pdf")).await.unwrap();
        let _unanswered = h.analyzer.reply_for("report.pdf");

        let elapsed =
            tokio::time::timeout(Duration::from_millis(50), h.session.analyze()).await;
        assert!(elapsed.is_err());
        assert_eq!(
            h.session.state().await,
            SessionState::Failed(ANALYSIS_CANCELLED.to_string())
        );
        assert!(h.session.file().await.is_some());

        h.analyzer
            .reply_for("report.pdf")
            .send(Ok(report("Glucose 110")))
            .unwrap();
        let outcome = h.session.analyze().await.unwrap();
        assert!(matches!(
            outcome,
            AnalyzeOutcome::Applied(SessionState::Succeeded(_))
        ));
    }
}
