//! Submission workflow on top of the grading engine: draft saves,
//! pre-checks, final submission with deadline handling, and the status
//! state machine backed by the store's compare-and-set.

use crate::deadline::{due_date, is_late};
use crate::error::GradeError;
use crate::grade::{apply_late_penalty, GradingEngine};
use gradebox_common::clock::Clock;
use gradebox_common::store::{SubmissionStore, UpsertOutcome};
use gradebox_common::types::{
    Assignment, PreCheckReport, QuestionResult, SubmissionRecord, SubmissionStatus,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

const REDACTED: &str = "(hidden)";

/// What the caller gets back from a successful submit.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub per_question: Vec<QuestionResult>,
    pub raw_score: u32,
    pub final_score: u32,
    pub late: bool,
    pub submitted_at: DateTime<Utc>,
}

pub struct GradingService {
    engine: GradingEngine,
    store: Arc<dyn SubmissionStore>,
    clock: Arc<dyn Clock>,
    course_start: NaiveDate,
    reveal_hidden_results: bool,
}

impl GradingService {
    pub fn new(
        engine: GradingEngine,
        store: Arc<dyn SubmissionStore>,
        clock: Arc<dyn Clock>,
        course_start: NaiveDate,
        reveal_hidden_results: bool,
    ) -> Self {
        Self {
            engine,
            store,
            clock,
            course_start,
            reveal_hidden_results,
        }
    }

    /// Persist in-progress answers. Rejected once the record is terminal.
    pub async fn save_draft(
        &self,
        user_id: &str,
        assignment_id: &str,
        answers: HashMap<String, String>,
    ) -> Result<(), GradeError> {
        self.require_assignment(assignment_id).await?;
        if self.is_submitted(user_id, assignment_id).await? {
            return Err(GradeError::Locked);
        }
        let record = SubmissionRecord::draft(user_id, assignment_id, answers);
        match self
            .store
            .upsert_submission(&record, SubmissionStatus::InProgress)
            .await?
        {
            UpsertOutcome::Stored => Ok(()),
            UpsertOutcome::Conflict => Err(GradeError::Locked),
        }
    }

    /// Run the visible tests for one question and save the answers as a
    /// draft. No score is stored; repeating the call changes nothing.
    pub async fn pre_check(
        &self,
        user_id: &str,
        assignment_id: &str,
        question_id: &str,
        answers: HashMap<String, String>,
    ) -> Result<PreCheckReport, GradeError> {
        let assignment = self.require_assignment(assignment_id).await?;
        if self.is_submitted(user_id, assignment_id).await? {
            return Err(GradeError::Locked);
        }

        let report = self
            .engine
            .pre_check(&assignment, question_id, &answers)
            .await?;

        // Checking a question implies the caller wants the answers kept.
        let record = SubmissionRecord::draft(user_id, assignment_id, answers);
        match self
            .store
            .upsert_submission(&record, SubmissionStatus::InProgress)
            .await?
        {
            UpsertOutcome::Stored => Ok(report),
            UpsertOutcome::Conflict => Err(GradeError::Locked),
        }
    }

    /// Grade everything, apply the late penalty, and finalize the record.
    /// Exactly one submit can win; later attempts conflict and leave the
    /// stored result untouched.
    pub async fn submit(
        &self,
        user_id: &str,
        assignment_id: &str,
        answers: HashMap<String, String>,
    ) -> Result<SubmitOutcome, GradeError> {
        let assignment = self.require_assignment(assignment_id).await?;
        if self.is_submitted(user_id, assignment_id).await? {
            return Err(GradeError::Conflict);
        }

        let grading = self.engine.grade(&assignment, &answers).await?;

        let now = self.clock.now();
        let due = due_date(self.course_start, assignment.day_index);
        let late = is_late(due, now);
        let final_score = apply_late_penalty(grading.raw_total, late);

        let record = SubmissionRecord {
            user_id: user_id.to_string(),
            assignment_id: assignment_id.to_string(),
            saved_answers: answers,
            validation: Some(grading.per_question.clone()),
            status: SubmissionStatus::Submitted,
            score: final_score,
            submitted_at: Some(now),
        };
        match self
            .store
            .upsert_submission(&record, SubmissionStatus::InProgress)
            .await?
        {
            UpsertOutcome::Stored => {}
            UpsertOutcome::Conflict => return Err(GradeError::Conflict),
        }

        info!(
            user_id,
            assignment_id,
            raw = grading.raw_total,
            score = final_score,
            late,
            "submission finalized"
        );

        Ok(SubmitOutcome {
            per_question: self.caller_view(grading.per_question),
            raw_score: grading.raw_total,
            final_score,
            late,
            submitted_at: now,
        })
    }

    /// Fetch a stored submission, with hidden test rows redacted the same
    /// way the submit response redacts them.
    pub async fn submission(
        &self,
        user_id: &str,
        assignment_id: &str,
    ) -> Result<Option<SubmissionRecord>, GradeError> {
        let mut record = self.store.get_submission(user_id, assignment_id).await?;
        if let Some(record) = record.as_mut() {
            if let Some(validation) = record.validation.take() {
                record.validation = Some(self.caller_view(validation));
            }
        }
        Ok(record)
    }

    pub async fn assignment(&self, assignment_id: &str) -> Result<Option<Assignment>, GradeError> {
        Ok(self.store.get_assignment(assignment_id).await?)
    }

    /// Caller-triggered "restart kernel".
    pub fn restart_session(&self) {
        self.engine.restart();
    }

    async fn require_assignment(&self, assignment_id: &str) -> Result<Assignment, GradeError> {
        self.store
            .get_assignment(assignment_id)
            .await?
            .ok_or_else(|| GradeError::UnknownAssignment(assignment_id.to_string()))
    }

    async fn is_submitted(&self, user_id: &str, assignment_id: &str) -> Result<bool, GradeError> {
        Ok(self
            .store
            .get_submission(user_id, assignment_id)
            .await?
            .is_some_and(|record| record.status.is_terminal()))
    }

    /// Redact the text fields of hidden test rows when policy says so.
    /// Pass/fail and visibility always remain.
    fn caller_view(&self, mut per_question: Vec<QuestionResult>) -> Vec<QuestionResult> {
        if self.reveal_hidden_results {
            return per_question;
        }
        for question in &mut per_question {
            for test in &mut question.tests {
                if !test.visible {
                    test.input = REDACTED.to_string();
                    test.expected = REDACTED.to_string();
                    test.actual = REDACTED.to_string();
                }
            }
        }
        per_question
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionPool;
    use crate::testing::{ScriptedFactory, ScriptedReply};
    use chrono::TimeZone;
    use gradebox_common::clock::FixedClock;
    use gradebox_common::store::MemoryStore;
    use gradebox_common::types::{AssignmentKind, Question, QuestionKind, TestCase};
    use std::time::Duration;

    fn course_start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()
    }

    fn adder_assignment() -> Assignment {
        Assignment {
            id: "hw-1".to_string(),
            day_index: 1, // due 2026-01-06 13:00 UTC
            kind: AssignmentKind::Homework,
            title: "Addition".to_string(),
            max_score: 20,
            questions: vec![Question {
                id: "q1".to_string(),
                kind: QuestionKind::Code,
                prompt: "Add the numbers".to_string(),
                points: 20,
                starter_code: String::new(),
                test_cases: vec![
                    TestCase {
                        input: "5,7".to_string(),
                        expected: "12".to_string(),
                        visible: true,
                    },
                    TestCase {
                        input: "6,6".to_string(),
                        expected: "12".to_string(),
                        visible: false,
                    },
                ],
            }],
            is_locked: false,
        }
    }

    fn adder_script(code: &str) -> ScriptedReply {
        if code.contains("print") {
            ScriptedReply::Stdout("12\n".to_string())
        } else {
            ScriptedReply::Stdout(String::new())
        }
    }

    async fn service_at(
        now: DateTime<Utc>,
        reveal_hidden: bool,
    ) -> (GradingService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.put_assignment(&adder_assignment()).await.unwrap();
        let pool = SessionPool::new(Arc::new(ScriptedFactory::new(adder_script)), 1);
        let engine = GradingEngine::new(pool, Duration::from_millis(100));
        let service = GradingService::new(
            engine,
            Arc::clone(&store) as Arc<dyn SubmissionStore>,
            Arc::new(FixedClock(now)),
            course_start(),
            reveal_hidden,
        );
        (service, store)
    }

    fn answers() -> HashMap<String, String> {
        HashMap::from([("q1".to_string(), "print(a + b)".to_string())])
    }

    fn before_due() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 6, 12, 0, 0).unwrap()
    }

    fn after_due() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 7, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn on_time_submit_keeps_full_score() {
        let (service, store) = service_at(before_due(), true).await;

        let outcome = service.submit("u1", "hw-1", answers()).await.unwrap();
        assert_eq!(outcome.raw_score, 20);
        assert_eq!(outcome.final_score, 20);
        assert!(!outcome.late);
        assert_eq!(outcome.submitted_at, before_due());

        let stored = store.get_submission("u1", "hw-1").await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::Submitted);
        assert_eq!(stored.score, 20);
        assert!(stored.validation.is_some());
    }

    #[tokio::test]
    async fn late_submit_keeps_sixty_percent() {
        let (service, _store) = service_at(after_due(), true).await;

        let outcome = service.submit("u1", "hw-1", answers()).await.unwrap();
        assert!(outcome.late);
        assert_eq!(outcome.raw_score, 20);
        assert_eq!(outcome.final_score, 12);
    }

    #[tokio::test]
    async fn second_submit_conflicts_and_leaves_record_untouched() {
        let (service, store) = service_at(before_due(), true).await;

        service.submit("u1", "hw-1", answers()).await.unwrap();
        let err = service
            .submit("u1", "hw-1", HashMap::new())
            .await
            .err()
            .expect("second submit must not land");
        assert!(matches!(err, GradeError::Conflict));

        let stored = store.get_submission("u1", "hw-1").await.unwrap().unwrap();
        assert_eq!(stored.score, 20);
        assert_eq!(stored.saved_answers, answers());
    }

    #[tokio::test]
    async fn draft_and_pre_check_are_locked_after_submit() {
        let (service, _store) = service_at(before_due(), true).await;
        service.submit("u1", "hw-1", answers()).await.unwrap();

        let err = service
            .save_draft("u1", "hw-1", answers())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GradeError::Locked));

        let err = service
            .pre_check("u1", "hw-1", "q1", answers())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GradeError::Locked));
    }

    #[tokio::test]
    async fn draft_saves_answers_without_scoring() {
        let (service, store) = service_at(before_due(), true).await;

        service.save_draft("u1", "hw-1", answers()).await.unwrap();

        let stored = store.get_submission("u1", "hw-1").await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::InProgress);
        assert_eq!(stored.score, 0);
        assert!(stored.validation.is_none());
        assert_eq!(stored.saved_answers, answers());
    }

    #[tokio::test]
    async fn pre_check_reports_visible_tests_and_saves_draft() {
        let (service, store) = service_at(before_due(), true).await;

        let report = service
            .pre_check("u1", "hw-1", "q1", answers())
            .await
            .unwrap();
        assert_eq!(report.ratio, 1.0);
        assert_eq!(report.log.len(), 1); // only the visible test ran

        let stored = store.get_submission("u1", "hw-1").await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::InProgress);
        assert_eq!(stored.score, 0);

        // Re-running changes nothing.
        let again = service
            .pre_check("u1", "hw-1", "q1", answers())
            .await
            .unwrap();
        assert_eq!(again.ratio, report.ratio);
        assert_eq!(again.log, report.log);
    }

    #[tokio::test]
    async fn hidden_rows_are_redacted_when_policy_says_so() {
        let (service, _store) = service_at(before_due(), false).await;

        let outcome = service.submit("u1", "hw-1", answers()).await.unwrap();
        let tests = &outcome.per_question[0].tests;
        let hidden = tests.iter().find(|t| !t.visible).unwrap();
        assert_eq!(hidden.input, REDACTED);
        assert_eq!(hidden.expected, REDACTED);
        assert_eq!(hidden.actual, REDACTED);
        assert!(hidden.passed);

        let visible = tests.iter().find(|t| t.visible).unwrap();
        assert_eq!(visible.input, "5,7");
        assert_eq!(visible.actual, "12");

        let fetched = service.submission("u1", "hw-1").await.unwrap().unwrap();
        let rows = &fetched.validation.unwrap()[0].tests;
        assert!(rows.iter().filter(|t| !t.visible).all(|t| t.input == REDACTED));
    }

    #[tokio::test]
    async fn unknown_assignment_is_reported() {
        let (service, _store) = service_at(before_due(), true).await;
        let err = service
            .submit("u1", "nope", answers())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GradeError::UnknownAssignment(_)));
    }
}
