// CLI commands: seeding assignment content and local grading runs

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use gradebox_common::store::{RedisStore, SubmissionStore};
use gradebox_common::types::Assignment;
use gradebox_engine::deadline::{due_date, is_late};
use gradebox_engine::grade::{apply_late_penalty, GradingEngine};
use gradebox_engine::runtime::DockerRuntimeFactory;
use gradebox_engine::session::SessionPool;
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

fn load_assignment(path: &str) -> Result<Assignment> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read assignment file {path}"))?;
    serde_json::from_str(&content).context("Failed to parse assignment JSON")
}

fn load_answers(path: &str) -> Result<HashMap<String, String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read answers file {path}"))?;
    serde_json::from_str(&content).context("Failed to parse answers JSON")
}

fn build_engine(image: &str, timeout_ms: u64) -> Result<GradingEngine> {
    let factory = DockerRuntimeFactory::new(image.to_string(), 256, 0.5)?;
    let pool = SessionPool::new(Arc::new(factory), 1);
    Ok(GradingEngine::new(pool, Duration::from_millis(timeout_ms)))
}

/// Push an assignment definition into Redis for the API to serve.
pub async fn seed(file: &str, redis_url: &str) -> Result<()> {
    let assignment = load_assignment(file)?;
    let store = RedisStore::connect(redis_url).await?;
    store.put_assignment(&assignment).await?;

    let tests: usize = assignment
        .questions
        .iter()
        .map(|q| q.test_cases.len())
        .sum();
    println!(
        "✓ Seeded '{}' ({} questions, {} test cases)",
        assignment.id,
        assignment.questions.len(),
        tests
    );
    Ok(())
}

/// Run the visible tests of one question and print the report log.
pub async fn precheck(
    assignment_path: &str,
    question_id: &str,
    answers_path: &str,
    image: &str,
    timeout_ms: u64,
) -> Result<()> {
    let assignment = load_assignment(assignment_path)?;
    let answers = load_answers(answers_path)?;
    let engine = build_engine(image, timeout_ms)?;

    let report = engine.pre_check(&assignment, question_id, &answers).await?;
    for entry in &report.log {
        println!("{entry}");
    }
    println!(
        "\n{:.0}% of visible tests passed",
        report.ratio * 100.0
    );
    Ok(())
}

/// Grade every question and print the score breakdown.
pub async fn grade(
    assignment_path: &str,
    answers_path: &str,
    course_start: Option<NaiveDate>,
    image: &str,
    timeout_ms: u64,
) -> Result<()> {
    let assignment = load_assignment(assignment_path)?;
    let answers = load_answers(answers_path)?;
    let engine = build_engine(image, timeout_ms)?;

    let result = engine.grade(&assignment, &answers).await?;

    for question in &result.per_question {
        let mark = if question.score == question.max_points {
            "✓"
        } else {
            "✗"
        };
        println!(
            "{} {} - {}/{} points",
            mark, question.question_id, question.score, question.max_points
        );
        for (idx, test) in question.tests.iter().enumerate() {
            let mark = if test.passed { "✓" } else { "✗" };
            println!(
                "   {} test #{}: expected '{}', got '{}'",
                mark,
                idx + 1,
                test.expected,
                test.actual
            );
        }
    }

    println!("\nRaw total: {}/{}", result.raw_total, assignment.max_score);

    if let Some(start) = course_start {
        let due = due_date(start, assignment.day_index);
        let late = is_late(due, Utc::now());
        let final_score = apply_late_penalty(result.raw_total, late);
        match due {
            Some(due) if late => {
                println!("Late (was due {due}): final score {final_score}");
            }
            Some(due) => println!("On time (due {due}): final score {final_score}"),
            None => println!("No deadline: final score {final_score}"),
        }
    }

    Ok(())
}
