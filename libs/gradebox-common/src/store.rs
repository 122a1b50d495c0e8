use crate::types::{Assignment, SubmissionRecord, SubmissionStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Key prefixes. Defined in one place so the API, CLI and any future worker
/// never drift and keys stay deterministic.
pub const ASSIGNMENT_PREFIX: &str = "gradebox:assignment";
pub const SUBMISSION_PREFIX: &str = "gradebox:submission";

pub fn assignment_key(assignment_id: &str) -> String {
    format!("{}:{}", ASSIGNMENT_PREFIX, assignment_id)
}

pub fn submission_key(user_id: &str, assignment_id: &str) -> String {
    format!("{}:{}:{}", SUBMISSION_PREFIX, user_id, assignment_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Stored,
    /// The stored record's status did not match the expected prior status.
    /// The stored record is left untouched; the caller must re-fetch.
    Conflict,
}

/// Persistence collaborator for submissions and assignment content.
///
/// `upsert_submission` is an optimistic compare-and-set keyed on the
/// record's status: the write only lands if the stored record is absent or
/// still in `expected_prior`. Two racing submits cannot both succeed.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn get_assignment(&self, assignment_id: &str) -> Result<Option<Assignment>>;

    async fn put_assignment(&self, assignment: &Assignment) -> Result<()>;

    async fn get_submission(
        &self,
        user_id: &str,
        assignment_id: &str,
    ) -> Result<Option<SubmissionRecord>>;

    async fn upsert_submission(
        &self,
        record: &SubmissionRecord,
        expected_prior: SubmissionStatus,
    ) -> Result<UpsertOutcome>;
}

/// Status-guarded upsert. Runs atomically inside Redis, so concurrent
/// submits for the same (user, assignment) serialize here.
const UPSERT_CAS: &str = r#"
local current = redis.call('GET', KEYS[1])
if current then
  local status = cjson.decode(current)['status']
  if status ~= ARGV[2] then
    return 0
  end
end
redis.call('SET', KEYS[1], ARGV[1])
return 1
"#;

#[derive(Clone)]
pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("invalid Redis URL")?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .context("failed to connect to Redis")?;
        Ok(Self { conn })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(key).await.context("Redis GET failed")?;
        match payload {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).context("corrupt record in Redis")?,
            )),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SubmissionStore for RedisStore {
    async fn get_assignment(&self, assignment_id: &str) -> Result<Option<Assignment>> {
        self.get_json(&assignment_key(assignment_id)).await
    }

    async fn put_assignment(&self, assignment: &Assignment) -> Result<()> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(assignment)?;
        let _: () = conn
            .set(assignment_key(&assignment.id), payload)
            .await
            .context("Redis SET failed")?;
        Ok(())
    }

    async fn get_submission(
        &self,
        user_id: &str,
        assignment_id: &str,
    ) -> Result<Option<SubmissionRecord>> {
        self.get_json(&submission_key(user_id, assignment_id)).await
    }

    async fn upsert_submission(
        &self,
        record: &SubmissionRecord,
        expected_prior: SubmissionStatus,
    ) -> Result<UpsertOutcome> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(record)?;
        let stored: i32 = redis::Script::new(UPSERT_CAS)
            .key(submission_key(&record.user_id, &record.assignment_id))
            .arg(payload)
            .arg(expected_prior.as_str())
            .invoke_async(&mut conn)
            .await
            .context("Redis upsert script failed")?;
        if stored == 1 {
            Ok(UpsertOutcome::Stored)
        } else {
            Ok(UpsertOutcome::Conflict)
        }
    }
}

/// In-memory store for tests and the CLI. Same contract as `RedisStore`,
/// including the status compare-and-set.
#[derive(Default)]
pub struct MemoryStore {
    assignments: Mutex<HashMap<String, Assignment>>,
    submissions: Mutex<HashMap<(String, String), SubmissionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn get_assignment(&self, assignment_id: &str) -> Result<Option<Assignment>> {
        Ok(self
            .assignments
            .lock()
            .unwrap()
            .get(assignment_id)
            .cloned())
    }

    async fn put_assignment(&self, assignment: &Assignment) -> Result<()> {
        self.assignments
            .lock()
            .unwrap()
            .insert(assignment.id.clone(), assignment.clone());
        Ok(())
    }

    async fn get_submission(
        &self,
        user_id: &str,
        assignment_id: &str,
    ) -> Result<Option<SubmissionRecord>> {
        Ok(self
            .submissions
            .lock()
            .unwrap()
            .get(&(user_id.to_string(), assignment_id.to_string()))
            .cloned())
    }

    async fn upsert_submission(
        &self,
        record: &SubmissionRecord,
        expected_prior: SubmissionStatus,
    ) -> Result<UpsertOutcome> {
        let mut submissions = self.submissions.lock().unwrap();
        let key = (record.user_id.clone(), record.assignment_id.clone());
        if let Some(existing) = submissions.get(&key) {
            if existing.status != expected_prior {
                return Ok(UpsertOutcome::Conflict);
            }
        }
        submissions.insert(key, record.clone());
        Ok(UpsertOutcome::Stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SubmissionStatus;

    #[test]
    fn key_formats_are_deterministic() {
        assert_eq!(assignment_key("hw-3"), "gradebox:assignment:hw-3");
        assert_eq!(
            submission_key("u1", "hw-3"),
            "gradebox:submission:u1:hw-3"
        );
    }

    #[tokio::test]
    async fn memory_store_cas_allows_first_write() {
        let store = MemoryStore::new();
        let record = SubmissionRecord::draft("u1", "a1", Default::default());
        let outcome = store
            .upsert_submission(&record, SubmissionStatus::InProgress)
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Stored);
    }

    #[tokio::test]
    async fn memory_store_cas_rejects_terminal_record() {
        let store = MemoryStore::new();
        let mut record = SubmissionRecord::draft("u1", "a1", Default::default());
        record.status = SubmissionStatus::Submitted;
        record.score = 40;
        store
            .upsert_submission(&record, SubmissionStatus::InProgress)
            .await
            .unwrap();

        // A later draft-style write must not land.
        let draft = SubmissionRecord::draft("u1", "a1", Default::default());
        let outcome = store
            .upsert_submission(&draft, SubmissionStatus::InProgress)
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Conflict);

        let stored = store.get_submission("u1", "a1").await.unwrap().unwrap();
        assert_eq!(stored.score, 40);
        assert_eq!(stored.status, SubmissionStatus::Submitted);
    }

    /// Exercises the Lua compare-and-set against a real Redis.
    #[tokio::test]
    #[ignore] // Requires a running Redis instance
    async fn redis_store_cas_round_trip() {
        let store = RedisStore::connect("redis://127.0.0.1:6379").await.unwrap();
        let user = uuid::Uuid::new_v4().to_string();

        let draft = SubmissionRecord::draft(user.clone(), "a1", Default::default());
        assert_eq!(
            store
                .upsert_submission(&draft, SubmissionStatus::InProgress)
                .await
                .unwrap(),
            UpsertOutcome::Stored
        );

        let mut submitted = draft.clone();
        submitted.status = SubmissionStatus::Submitted;
        assert_eq!(
            store
                .upsert_submission(&submitted, SubmissionStatus::InProgress)
                .await
                .unwrap(),
            UpsertOutcome::Stored
        );

        // Terminal record: both a re-submit and a draft save must conflict.
        assert_eq!(
            store
                .upsert_submission(&submitted, SubmissionStatus::InProgress)
                .await
                .unwrap(),
            UpsertOutcome::Conflict
        );
    }
}
