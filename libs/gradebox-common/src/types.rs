use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single test case attached to a code question.
///
/// `input` is raw text: either literal value(s) for the injector to bind, or
/// an executable statement (e.g. a direct function call). Visible test cases
/// are the only ones run during pre-check; all of them run at submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected: String,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    Code,
    Markdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub kind: QuestionKind,
    pub prompt: String,
    pub points: u32,
    #[serde(default)]
    pub starter_code: String,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentKind {
    Exercise,
    Homework,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: String,
    /// 1-based course day. Zero or negative means "no deadline".
    pub day_index: i32,
    pub kind: AssignmentKind,
    pub title: String,
    pub max_score: u32,
    pub questions: Vec<Question>,
    /// Admin gate. Checked by the API layer before the core is invoked.
    #[serde(default)]
    pub is_locked: bool,
}

/// Submission lifecycle. The absent record plays the "not started" role;
/// `Submitted` is terminal and locks the record against any further write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    InProgress,
    Submitted,
}

impl SubmissionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SubmissionStatus::Submitted)
    }

    /// Stable wire name, matching the serde encoding. Used by the Redis
    /// compare-and-set script.
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionStatus::InProgress => "in_progress",
            SubmissionStatus::Submitted => "submitted",
        }
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One user's saved state for one assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub user_id: String,
    pub assignment_id: String,
    pub saved_answers: HashMap<String, String>,
    /// Last grading snapshot. Populated once, on submit.
    #[serde(default)]
    pub validation: Option<Vec<QuestionResult>>,
    pub status: SubmissionStatus,
    pub score: u32,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl SubmissionRecord {
    /// A fresh in-progress draft. Created implicitly on the first save.
    pub fn draft(
        user_id: impl Into<String>,
        assignment_id: impl Into<String>,
        saved_answers: HashMap<String, String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            assignment_id: assignment_id.into(),
            saved_answers,
            validation: None,
            status: SubmissionStatus::InProgress,
            score: 0,
            submitted_at: None,
        }
    }
}

/// Outcome of one test case, as shown in the pre-check/submit report table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub input: String,
    pub expected: String,
    pub actual: String,
    pub passed: bool,
    pub visible: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question_id: String,
    /// Always 0 or `max_points` for questions with test cases.
    pub score: u32,
    pub max_points: u32,
    pub tests: Vec<TestReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingResult {
    pub per_question: Vec<QuestionResult>,
    pub raw_total: u32,
}

/// Returned by pre-check: fraction of visible tests passed plus a
/// human-readable log. Never affects the stored score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreCheckReport {
    pub ratio: f64,
    pub log: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_visible_by_default() {
        let tc: TestCase = serde_json::from_str(r#"{"input":"5","expected":"25"}"#).unwrap();
        assert!(tc.visible);
    }

    #[test]
    fn status_wire_names_match_serde() {
        for status in [SubmissionStatus::InProgress, SubmissionStatus::Submitted] {
            let encoded = serde_json::to_string(&status).unwrap();
            assert_eq!(encoded, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn submitted_is_terminal() {
        assert!(SubmissionStatus::Submitted.is_terminal());
        assert!(!SubmissionStatus::InProgress.is_terminal());
    }
}
