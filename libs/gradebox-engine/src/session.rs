//! Execution session lifecycle.
//!
//! A session is a single, stateful, non-reentrant resource: only one run may
//! be in flight inside it at a time. The pool hands sessions out as leases:
//! a grading pass acquires once, every run is serialized against the leased
//! session, and the session returns to the pool on every exit path via Drop.

use crate::error::GradeError;
use crate::runtime::{ExecutionRuntime, RunOutput, RuntimeFactory};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Names that survive a soft reset: runtime internals plus the replacement
/// `input`. Loaded extensions are appended per session.
pub const PROTECTED_NAMES: &[&str] = &["sys", "io", "json", "input"];

/// Installed at bootstrap. Replaces `input()` with a non-blocking stub so a
/// submission that calls it echoes the prompt instead of hanging a headless
/// session.
pub const SESSION_PRELUDE: &str = r#"
def input(prompt=""):
    print(prompt, end="")
    return ""
"#;

/// Extension packages required per course day. Days 9 and 10 are the data
/// science and visualization units; everything else is standard library.
pub fn required_extensions(day_index: i32) -> &'static [&'static str] {
    match day_index {
        9 => &["numpy", "pandas"],
        10 => &["numpy", "pandas", "matplotlib"],
        _ => &[],
    }
}

/// Outcome of a budgeted run.
#[derive(Debug)]
pub enum RunStatus {
    Completed(RunOutput),
    /// The run exceeded its wall-clock budget and was interrupted. The
    /// session is poisoned and must be re-bootstrapped before further use.
    TimedOut,
}

/// A bootstrapped runtime plus the bookkeeping the pool needs.
pub struct Session {
    runtime: Box<dyn ExecutionRuntime>,
    loaded_extensions: Vec<String>,
    poisoned: bool,
}

impl Session {
    async fn bootstrap(factory: &dyn RuntimeFactory) -> Result<Self, GradeError> {
        let mut runtime = factory
            .spawn()
            .await
            .map_err(|e| GradeError::Bootstrap(e.to_string()))?;
        let prelude = runtime
            .run(SESSION_PRELUDE)
            .await
            .map_err(|e| GradeError::Bootstrap(e.to_string()))?;
        if let Some(fault) = prelude.fault {
            return Err(GradeError::Bootstrap(format!("session prelude failed: {fault}")));
        }
        debug!("execution session bootstrapped");
        Ok(Self {
            runtime,
            loaded_extensions: Vec::new(),
            poisoned: false,
        })
    }

    /// Load whatever is missing from `required`. Already-loaded extensions
    /// are unaffected by a later failure.
    async fn ensure_extensions(&mut self, required: &[String]) -> Result<(), GradeError> {
        for extension in required {
            if self.loaded_extensions.iter().any(|e| e == extension) {
                continue;
            }
            self.runtime
                .load_extension(extension)
                .await
                .map_err(|e| GradeError::Bootstrap(e.to_string()))?;
            info!(extension = %extension, "extension loaded");
            self.loaded_extensions.push(extension.clone());
        }
        Ok(())
    }

    /// Clear bound names back to the protected allow-list.
    pub async fn soft_reset(&mut self) -> anyhow::Result<()> {
        let keep: Vec<String> = PROTECTED_NAMES
            .iter()
            .map(|name| name.to_string())
            .chain(self.loaded_extensions.iter().cloned())
            .collect();
        self.runtime.reset(&keep).await
    }

    /// Execute with a wall-clock budget. On timeout the runtime is
    /// interrupted and the session marked poisoned.
    pub async fn run_budgeted(&mut self, code: &str, budget: Duration) -> anyhow::Result<RunStatus> {
        match tokio::time::timeout(budget, self.runtime.run(code)).await {
            Ok(Ok(output)) => Ok(RunStatus::Completed(output)),
            Ok(Err(e)) => {
                self.poisoned = true;
                Err(e)
            }
            Err(_) => {
                warn!(budget_ms = budget.as_millis() as u64, "run exceeded budget, interrupting");
                self.runtime.interrupt().await;
                self.poisoned = true;
                Ok(RunStatus::TimedOut)
            }
        }
    }

    /// Bind a single name, under the same budget rules as a run.
    pub async fn bind_budgeted(
        &mut self,
        name: &str,
        value: &str,
        budget: Duration,
    ) -> anyhow::Result<RunStatus> {
        match tokio::time::timeout(budget, self.runtime.bind(name, value)).await {
            Ok(Ok(output)) => Ok(RunStatus::Completed(output)),
            Ok(Err(e)) => {
                self.poisoned = true;
                Err(e)
            }
            Err(_) => {
                warn!(budget_ms = budget.as_millis() as u64, "bind exceeded budget, interrupting");
                self.runtime.interrupt().await;
                self.poisoned = true;
                Ok(RunStatus::TimedOut)
            }
        }
    }

    pub fn poisoned(&self) -> bool {
        self.poisoned
    }
}

/// Bounded pool of execution sessions. Capacity 1 gives the single
/// process-wide session; larger capacities give one session per concurrent
/// grading pass, never shared.
pub struct SessionPool {
    factory: Arc<dyn RuntimeFactory>,
    idle: Mutex<Vec<Session>>,
    slots: Arc<Semaphore>,
}

impl SessionPool {
    pub fn new(factory: Arc<dyn RuntimeFactory>, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            factory,
            idle: Mutex::new(Vec::new()),
            slots: Arc::new(Semaphore::new(capacity.max(1))),
        })
    }

    /// Lease a session, lazily bootstrapping one on first use, and make sure
    /// the required extensions are loaded. Idempotent when the cached
    /// session already has everything.
    pub async fn acquire(
        self: &Arc<Self>,
        required_extensions: &[String],
    ) -> Result<SessionLease, GradeError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .expect("session pool semaphore closed");

        let cached = self.idle.lock().unwrap().pop();
        let mut session = match cached {
            Some(session) => session,
            None => Session::bootstrap(&*self.factory).await?,
        };

        if let Err(e) = session.ensure_extensions(required_extensions).await {
            // Discard rather than reuse: the next acquire bootstraps fresh
            // and retries the load.
            drop(session);
            return Err(e);
        }

        Ok(SessionLease {
            pool: Arc::clone(self),
            session: Some(session),
            _permit: permit,
        })
    }

    /// Explicit "restart kernel": drop all cached sessions. In-flight leases
    /// are unaffected; poisoned sessions never re-enter the pool anyway.
    pub fn restart(&self) {
        let dropped = {
            let mut idle = self.idle.lock().unwrap();
            std::mem::take(&mut *idle).len()
        };
        info!(sessions = dropped, "session pool restarted");
    }

    fn release(&self, session: Session) {
        if session.poisoned() {
            return;
        }
        self.idle.lock().unwrap().push(session);
    }
}

/// Exclusive lease on one session for the duration of a grading pass.
pub struct SessionLease {
    pool: Arc<SessionPool>,
    session: Option<Session>,
    _permit: OwnedSemaphorePermit,
}

impl SessionLease {
    fn session_mut(&mut self) -> &mut Session {
        self.session.as_mut().expect("lease already released")
    }

    pub async fn soft_reset(&mut self) -> anyhow::Result<()> {
        self.session_mut().soft_reset().await
    }

    pub async fn run_budgeted(&mut self, code: &str, budget: Duration) -> anyhow::Result<RunStatus> {
        self.session_mut().run_budgeted(code, budget).await
    }

    pub async fn bind_budgeted(
        &mut self,
        name: &str,
        value: &str,
        budget: Duration,
    ) -> anyhow::Result<RunStatus> {
        self.session_mut().bind_budgeted(name, value, budget).await
    }

    pub fn poisoned(&self) -> bool {
        self.session.as_ref().map(Session::poisoned).unwrap_or(true)
    }

    /// Replace an interrupted runtime so the rest of the pass can continue.
    /// Previously loaded extensions are reloaded into the fresh session.
    pub async fn rebootstrap(&mut self) -> Result<(), GradeError> {
        let extensions = self
            .session
            .take()
            .map(|old| old.loaded_extensions)
            .unwrap_or_default();
        let mut fresh = Session::bootstrap(&*self.pool.factory).await?;
        fresh.ensure_extensions(&extensions).await?;
        self.session = Some(fresh);
        Ok(())
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(session);
        }
    }
}
