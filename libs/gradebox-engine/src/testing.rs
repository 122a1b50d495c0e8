//! Scripted runtime doubles for unit tests. The script maps the code text a
//! session is asked to run onto a canned reply, which keeps grading-path
//! tests hermetic (no Docker).

use crate::runtime::{ExecutionRuntime, RunOutput, RuntimeFactory};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub(crate) enum ScriptedReply {
    Stdout(String),
    Fault(String),
    /// Never completes; exercises the run budget.
    Hang,
}

type Script = Arc<dyn Fn(&str) -> ScriptedReply + Send + Sync>;

pub(crate) struct ScriptedFactory {
    script: Script,
    spawned: Arc<AtomicUsize>,
    extension_loads: Arc<AtomicUsize>,
    failing_extension: Option<String>,
    fail_spawn: bool,
}

impl ScriptedFactory {
    pub fn new(script: impl Fn(&str) -> ScriptedReply + Send + Sync + 'static) -> Self {
        Self {
            script: Arc::new(script),
            spawned: Arc::new(AtomicUsize::new(0)),
            extension_loads: Arc::new(AtomicUsize::new(0)),
            failing_extension: None,
            fail_spawn: false,
        }
    }

    /// Every run succeeds with empty stdout.
    pub fn quiet() -> Self {
        Self::new(|_| ScriptedReply::Stdout(String::new()))
    }

    pub fn failing_extension(mut self, name: &str) -> Self {
        self.failing_extension = Some(name.to_string());
        self
    }

    pub fn failing_spawn(mut self) -> Self {
        self.fail_spawn = true;
        self
    }

    pub fn spawn_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.spawned)
    }

    pub fn extension_loads(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.extension_loads)
    }
}

#[async_trait]
impl RuntimeFactory for ScriptedFactory {
    async fn spawn(&self) -> Result<Box<dyn ExecutionRuntime>> {
        if self.fail_spawn {
            bail!("scripted bootstrap failure");
        }
        self.spawned.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedRuntime {
            script: Arc::clone(&self.script),
            extension_loads: Arc::clone(&self.extension_loads),
            failing_extension: self.failing_extension.clone(),
        }))
    }
}

pub(crate) struct ScriptedRuntime {
    script: Script,
    extension_loads: Arc<AtomicUsize>,
    failing_extension: Option<String>,
}

#[async_trait]
impl ExecutionRuntime for ScriptedRuntime {
    async fn run(&mut self, code: &str) -> Result<RunOutput> {
        match (self.script)(code) {
            ScriptedReply::Stdout(stdout) => Ok(RunOutput {
                stdout,
                fault: None,
            }),
            ScriptedReply::Fault(fault) => Ok(RunOutput {
                stdout: String::new(),
                fault: Some(fault),
            }),
            ScriptedReply::Hang => {
                futures_util::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn bind(&mut self, name: &str, value: &str) -> Result<RunOutput> {
        self.run(&format!("{name} = {value}")).await
    }

    async fn reset(&mut self, _keep: &[String]) -> Result<()> {
        Ok(())
    }

    async fn load_extension(&mut self, name: &str) -> Result<()> {
        if self.failing_extension.as_deref() == Some(name) {
            bail!("scripted failure loading '{name}'");
        }
        self.extension_loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn interrupt(&mut self) {}
}
