//! Grading orchestration: session + injector + comparator across the
//! questions and test cases of an assignment.
//!
//! Error policy: a fault or timeout inside one test-case run is recorded as
//! that test's outcome and the batch continues; only a session bootstrap
//! failure escapes as an error.

use crate::compare::compare;
use crate::error::GradeError;
use crate::inject::{inject, parse, Binding, SubmissionParts};
use crate::session::{required_extensions, RunStatus, SessionLease, SessionPool};
use gradebox_common::types::{
    Assignment, GradingResult, PreCheckReport, QuestionKind, QuestionResult, TestCase, TestReport,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Recorded as `actual` when the submitted code raised a fault.
pub const FAULT_MARKER: &str = "Runtime Error";
/// Recorded as `actual` when a run exceeded its wall-clock budget.
pub const TIMEOUT_MARKER: &str = "Timed Out";

const MISSING_DELIMITER_HINT: &str =
    "hint: no '# solution code below' delimiter found; setup variables were not rebound";

pub struct GradingEngine {
    pool: Arc<SessionPool>,
    run_budget: Duration,
}

/// Result of running one test case, whatever happened inside the session.
struct TestOutcome {
    actual: String,
    passed: bool,
    ambiguous: bool,
}

impl TestOutcome {
    fn failed(marker: &str) -> Self {
        Self {
            actual: marker.to_string(),
            passed: false,
            ambiguous: false,
        }
    }
}

impl GradingEngine {
    pub fn new(pool: Arc<SessionPool>, run_budget: Duration) -> Self {
        Self { pool, run_budget }
    }

    /// Run only the visible test cases of one question. No score side
    /// effects; repeated calls with unchanged inputs give identical output.
    pub async fn pre_check(
        &self,
        assignment: &Assignment,
        question_id: &str,
        answers: &HashMap<String, String>,
    ) -> Result<PreCheckReport, GradeError> {
        let question = assignment
            .questions
            .iter()
            .find(|q| q.id == question_id)
            .ok_or_else(|| GradeError::UnknownQuestion(question_id.to_string()))?;

        let visible: Vec<&TestCase> = question.test_cases.iter().filter(|t| t.visible).collect();
        if visible.is_empty() {
            return Ok(PreCheckReport {
                ratio: 1.0,
                log: vec!["no visible test cases for this question".to_string()],
            });
        }

        let code = answers.get(question_id).map(String::as_str).unwrap_or("");
        let parts = parse(code);
        let mut lease = self.acquire_for(assignment).await?;

        let mut passed_count = 0usize;
        let mut log = Vec::new();
        for (idx, test) in visible.iter().enumerate() {
            let outcome = self.run_test_case(&mut lease, &parts, test).await?;
            if outcome.passed {
                passed_count += 1;
                log.push(format!(
                    "✓ [Test #{}] PASS\n   Input: {}\n   Output: {}",
                    idx + 1,
                    test.input,
                    outcome.actual
                ));
            } else {
                let mut entry = format!(
                    "✗ [Test #{}] FAIL\n   Input: {}\n   Expected: {}\n   Got: {}",
                    idx + 1,
                    test.input,
                    test.expected.trim(),
                    outcome.actual
                );
                if !parts.had_delimiter {
                    entry.push_str("\n   ");
                    entry.push_str(MISSING_DELIMITER_HINT);
                }
                log.push(entry);
            }
            if outcome.ambiguous {
                log.push(format!(
                    "⚠ [Test #{}] setup variables did not match the input shape; \
                     input ran as a statement",
                    idx + 1
                ));
            }
        }

        let ratio = passed_count as f64 / visible.len() as f64;
        debug!(question_id, ratio, "pre-check complete");
        Ok(PreCheckReport { ratio, log })
    }

    /// Grade every code question against all of its test cases (visible and
    /// hidden), with no short-circuiting. Per question the score is
    /// all-or-nothing; a question without test cases scores its points iff
    /// the submitted logic is non-empty.
    pub async fn grade(
        &self,
        assignment: &Assignment,
        answers: &HashMap<String, String>,
    ) -> Result<GradingResult, GradeError> {
        let mut lease = self.acquire_for(assignment).await?;

        let mut per_question = Vec::new();
        let mut raw_total = 0u32;
        for question in &assignment.questions {
            if question.kind != QuestionKind::Code {
                continue;
            }
            let code = answers.get(&question.id).map(String::as_str).unwrap_or("");
            let parts = parse(code);

            let mut tests = Vec::new();
            let all_passed = if question.test_cases.is_empty() {
                !parts.logic.trim().is_empty()
            } else {
                let mut all_passed = true;
                for test in &question.test_cases {
                    let outcome = self.run_test_case(&mut lease, &parts, test).await?;
                    all_passed &= outcome.passed;
                    tests.push(TestReport {
                        input: test.input.clone(),
                        expected: test.expected.trim().to_string(),
                        actual: outcome.actual,
                        passed: outcome.passed,
                        visible: test.visible,
                    });
                }
                all_passed
            };

            let score = if all_passed { question.points } else { 0 };
            raw_total += score;
            per_question.push(QuestionResult {
                question_id: question.id.clone(),
                score,
                max_points: question.points,
                tests,
            });
        }

        info!(assignment_id = %assignment.id, raw_total, "grading pass complete");
        Ok(GradingResult {
            per_question,
            raw_total,
        })
    }

    /// Explicit "restart kernel" from the caller.
    pub fn restart(&self) {
        self.pool.restart();
    }

    async fn acquire_for(&self, assignment: &Assignment) -> Result<SessionLease, GradeError> {
        let extensions: Vec<String> = required_extensions(assignment.day_index)
            .iter()
            .map(|name| name.to_string())
            .collect();
        self.pool.acquire(&extensions).await
    }

    /// One test case: soft reset, bind the input, run the logic, compare.
    /// Faults and timeouts become failed outcomes; a poisoned session is
    /// replaced before the next test so the batch keeps going.
    async fn run_test_case(
        &self,
        lease: &mut SessionLease,
        parts: &SubmissionParts,
        test: &TestCase,
    ) -> Result<TestOutcome, GradeError> {
        if lease.poisoned() {
            lease.rebootstrap().await?;
        }
        if let Err(e) = lease.soft_reset().await {
            warn!(error = %e, "soft reset failed, replacing session");
            lease.rebootstrap().await?;
        }

        let mut ambiguous = false;
        match inject(&parts.setup_vars, &test.input) {
            Binding::Unpack(statement) => {
                match lease.run_budgeted(&statement, self.run_budget).await {
                    Ok(RunStatus::Completed(out)) => {
                        if let Some(fault) = out.fault {
                            debug!(fault = %fault, "binding statement faulted");
                            return Ok(TestOutcome::failed(FAULT_MARKER));
                        }
                    }
                    Ok(RunStatus::TimedOut) => return Ok(TestOutcome::failed(TIMEOUT_MARKER)),
                    Err(e) => {
                        warn!(error = %e, "session failure while binding");
                        return Ok(TestOutcome::failed(FAULT_MARKER));
                    }
                }
            }
            Binding::Direct { name, value } => {
                match lease.bind_budgeted(&name, &value, self.run_budget).await {
                    Ok(RunStatus::Completed(out)) => {
                        if let Some(fault) = out.fault {
                            debug!(fault = %fault, "direct binding faulted");
                            return Ok(TestOutcome::failed(FAULT_MARKER));
                        }
                    }
                    Ok(RunStatus::TimedOut) => return Ok(TestOutcome::failed(TIMEOUT_MARKER)),
                    Err(e) => {
                        warn!(error = %e, "session failure while binding");
                        return Ok(TestOutcome::failed(FAULT_MARKER));
                    }
                }
            }
            Binding::Statement { code, ambiguous: was_ambiguous } => {
                ambiguous = was_ambiguous;
                if ambiguous {
                    warn!(input = %test.input, "setup variables did not match input shape");
                }
                if !code.is_empty() {
                    match lease.run_budgeted(&code, self.run_budget).await {
                        Ok(RunStatus::Completed(out)) => {
                            // A fault in the input statement is advisory
                            // only; the logic may not need it.
                            if let Some(fault) = out.fault {
                                debug!(fault = %fault, "input statement faulted");
                            }
                        }
                        Ok(RunStatus::TimedOut) => {
                            return Ok(TestOutcome::failed(TIMEOUT_MARKER))
                        }
                        Err(e) => {
                            warn!(error = %e, "session failure running input statement");
                            return Ok(TestOutcome::failed(FAULT_MARKER));
                        }
                    }
                }
            }
        }

        match lease.run_budgeted(&parts.logic, self.run_budget).await {
            Ok(RunStatus::Completed(out)) => match out.fault {
                Some(fault) => {
                    debug!(fault = %fault, "submitted code faulted");
                    Ok(TestOutcome {
                        actual: FAULT_MARKER.to_string(),
                        passed: false,
                        ambiguous,
                    })
                }
                None => {
                    let actual = out.stdout.trim().to_string();
                    let passed = compare(&actual, test.expected.trim());
                    Ok(TestOutcome {
                        actual,
                        passed,
                        ambiguous,
                    })
                }
            },
            Ok(RunStatus::TimedOut) => Ok(TestOutcome {
                actual: TIMEOUT_MARKER.to_string(),
                passed: false,
                ambiguous,
            }),
            Err(e) => {
                warn!(error = %e, "session failure running submitted code");
                Ok(TestOutcome {
                    actual: FAULT_MARKER.to_string(),
                    passed: false,
                    ambiguous,
                })
            }
        }
    }
}

/// Late submissions keep 60% of the raw total, rounded up. Applied exactly
/// once per submission; the result is what gets persisted.
pub fn apply_late_penalty(raw_total: u32, is_late: bool) -> u32 {
    if is_late && raw_total > 0 {
        // ceil(raw * 0.6) without floating point
        (raw_total * 3).div_ceil(5)
    } else {
        raw_total
    }
}
