//! Execution runtime collaborator.
//!
//! The grading core consumes a small set of primitives (run code capturing
//! stdout, bind a variable, reset bound state, load an extension package)
//! behind the `ExecutionRuntime` trait. The production implementation keeps
//! one long-lived Docker container per session, running an embedded Python
//! agent that speaks line-delimited JSON over the attached stdin/stdout.
//! Isolation comes from the container (network disabled, memory/CPU caps);
//! no sandboxing is designed here.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    KillContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::pin::Pin;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Captured result of one execution inside the session.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    /// Everything the code wrote to standard output, as a single string.
    pub stdout: String,
    /// A fault raised by the executed code. Reported, never propagated as
    /// `Err`; `Err` is reserved for infrastructure failures.
    pub fault: Option<String>,
}

/// Stateful code-execution context. Non-reentrant: one run in flight at a
/// time, which the session layer enforces with a lease.
#[async_trait]
pub trait ExecutionRuntime: Send {
    /// Execute `code` in the session's global scope, capturing stdout.
    async fn run(&mut self, code: &str) -> Result<RunOutput>;

    /// Bind `name` to `value` (a source-level literal) in the global scope.
    async fn bind(&mut self, name: &str, value: &str) -> Result<RunOutput>;

    /// Clear every bound name except `keep`, restoring a clean scope.
    async fn reset(&mut self, keep: &[String]) -> Result<()>;

    /// Load an extension package. Failure does not disturb extensions that
    /// are already loaded.
    async fn load_extension(&mut self, name: &str) -> Result<()>;

    /// Abort whatever is running. The runtime is unusable afterwards and
    /// must be replaced by the session layer.
    async fn interrupt(&mut self);
}

/// Spawns fresh runtimes; used for lazy bootstrap and for replacing a
/// runtime the session layer had to interrupt.
#[async_trait]
pub trait RuntimeFactory: Send + Sync {
    async fn spawn(&self) -> Result<Box<dyn ExecutionRuntime>>;
}

/// Upper bound on a single code payload sent to the agent.
const MAX_CODE_BYTES: usize = 1024 * 1024; // 1MB

/// The in-container session agent. Reads one JSON request per line from
/// stdin and answers with one JSON response per line on stdout. Submission
/// prints are captured through an io.StringIO redirect, so they arrive in
/// the response payload rather than interleaved with the protocol.
const SESSION_AGENT: &str = r#"
import sys, io, json

_scope = {"__name__": "__main__"}

def _respond(stdout, fault=None):
    sys.stdout.write(json.dumps({"stdout": stdout, "fault": fault}) + "\n")
    sys.stdout.flush()

for _line in sys.stdin:
    _line = _line.strip()
    if not _line:
        continue
    try:
        _req = json.loads(_line)
    except ValueError:
        _respond("", "malformed request")
        continue
    _op = _req.get("op")
    if _op == "run":
        _buf = io.StringIO()
        _real = sys.stdout
        sys.stdout = _buf
        _fault = None
        try:
            exec(_req["code"], _scope)
        except BaseException as _exc:
            _fault = "%s: %s" % (type(_exc).__name__, _exc)
        finally:
            sys.stdout = _real
        _respond(_buf.getvalue(), _fault)
    elif _op == "reset":
        _keep = set(_req.get("keep", []))
        for _name in list(_scope):
            if _name.startswith("_") or _name in _keep:
                continue
            del _scope[_name]
        _respond("")
    elif _op == "load":
        try:
            _scope[_req["name"]] = __import__(_req["name"])
            _respond("")
        except BaseException as _exc:
            _respond("", "%s: %s" % (type(_exc).__name__, _exc))
    else:
        _respond("", "unknown op")
"#;

/// Boot command: the agent script travels base64-encoded in the environment
/// so any stock Python image works without baking files into it.
const AGENT_BOOT: &str =
    "import base64,os;exec(base64.b64decode(os.environ[\"SESSION_AGENT\"]).decode())";

#[derive(Debug, Deserialize)]
struct AgentResponse {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    fault: Option<String>,
}

/// Spawns Docker-backed session runtimes.
#[derive(Clone)]
pub struct DockerRuntimeFactory {
    docker: Docker,
    image: String,
    memory_limit_mb: u32,
    cpus: f32,
}

impl DockerRuntimeFactory {
    pub fn new(image: impl Into<String>, memory_limit_mb: u32, cpus: f32) -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("failed to connect to Docker daemon")?;
        Ok(Self {
            docker,
            image: image.into(),
            memory_limit_mb,
            cpus,
        })
    }

    /// Pull the runtime image if it is not present locally.
    async fn ensure_image(&self) -> Result<()> {
        if self.docker.inspect_image(&self.image).await.is_ok() {
            debug!(image = %self.image, "image cache hit");
            return Ok(());
        }
        warn!(image = %self.image, "image cache miss, pulling");
        let options = Some(CreateImageOptions {
            from_image: self.image.as_str(),
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(progress) = stream.next().await {
            progress.context("failed to pull runtime image")?;
        }
        Ok(())
    }
}

#[async_trait]
impl RuntimeFactory for DockerRuntimeFactory {
    async fn spawn(&self) -> Result<Box<dyn ExecutionRuntime>> {
        self.ensure_image().await?;

        let container_name = format!("gradebox-session-{}", uuid::Uuid::new_v4());
        let env = vec![format!(
            "SESSION_AGENT={}",
            general_purpose::STANDARD.encode(SESSION_AGENT)
        )];

        let config = Config {
            image: Some(self.image.clone()),
            cmd: Some(vec![
                "python".to_string(),
                "-u".to_string(),
                "-c".to_string(),
                AGENT_BOOT.to_string(),
            ]),
            env: Some(env),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            open_stdin: Some(true),
            network_disabled: Some(true),
            host_config: Some(bollard::models::HostConfig {
                memory: Some(self.memory_limit_mb as i64 * 1024 * 1024),
                nano_cpus: Some((self.cpus as f64 * 1_000_000_000.0) as i64),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };
        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .context("failed to create session container")?;
        let container_id = container.id;

        let attach_options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            ..Default::default()
        };
        let AttachContainerResults { output, input } = self
            .docker
            .attach_container(&container_id, Some(attach_options))
            .await
            .context("failed to attach to session container")?;

        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .context("failed to start session container")?;

        debug!(container_id = %container_id, "session container started");

        Ok(Box::new(DockerRuntime {
            docker: self.docker.clone(),
            container_id,
            stdin: input,
            output,
            pending: Vec::new(),
            dead: false,
        }))
    }
}

/// One live session container plus its attached protocol streams.
pub struct DockerRuntime {
    docker: Docker,
    container_id: String,
    stdin: Pin<Box<dyn tokio::io::AsyncWrite + Send>>,
    output: Pin<Box<dyn futures_util::Stream<Item = Result<LogOutput, bollard::errors::Error>> + Send>>,
    pending: Vec<u8>,
    dead: bool,
}

impl DockerRuntime {
    async fn request(&mut self, request: serde_json::Value) -> Result<RunOutput> {
        if self.dead {
            bail!("session container is no longer usable");
        }
        let mut line = serde_json::to_vec(&request)?;
        if line.len() > MAX_CODE_BYTES {
            bail!("code payload exceeds {} bytes", MAX_CODE_BYTES);
        }
        line.push(b'\n');
        self.stdin
            .write_all(&line)
            .await
            .context("failed to write to session container")?;
        self.stdin.flush().await.ok();

        let raw = self.read_response_line().await?;
        let response: AgentResponse =
            serde_json::from_str(&raw).context("malformed session agent response")?;
        Ok(RunOutput {
            stdout: response.stdout,
            fault: response.fault,
        })
    }

    /// Accumulate stdout frames until one full response line is available.
    async fn read_response_line(&mut self) -> Result<String> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.pending.drain(..=pos).collect();
                return Ok(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned());
            }
            match self.output.next().await {
                Some(Ok(LogOutput::StdOut { message })) => {
                    self.pending.extend_from_slice(&message);
                }
                Some(Ok(LogOutput::StdErr { message })) => {
                    // Interpreter noise (warnings, native-library chatter).
                    debug!(container_id = %self.container_id,
                           stderr = %String::from_utf8_lossy(&message).trim_end(),
                           "session stderr");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    self.dead = true;
                    bail!("error reading from session container: {e}");
                }
                None => {
                    self.dead = true;
                    bail!("session container exited unexpectedly");
                }
            }
        }
    }
}

#[async_trait]
impl ExecutionRuntime for DockerRuntime {
    async fn run(&mut self, code: &str) -> Result<RunOutput> {
        self.request(json!({"op": "run", "code": code})).await
    }

    async fn bind(&mut self, name: &str, value: &str) -> Result<RunOutput> {
        self.request(json!({"op": "run", "code": format!("{name} = {value}")}))
            .await
    }

    async fn reset(&mut self, keep: &[String]) -> Result<()> {
        self.request(json!({"op": "reset", "keep": keep})).await?;
        Ok(())
    }

    async fn load_extension(&mut self, name: &str) -> Result<()> {
        let output = self.request(json!({"op": "load", "name": name})).await?;
        if let Some(fault) = output.fault {
            bail!("failed to load extension '{name}': {fault}");
        }
        Ok(())
    }

    async fn interrupt(&mut self) {
        self.dead = true;
        if let Err(e) = self
            .docker
            .kill_container(&self.container_id, None::<KillContainerOptions<String>>)
            .await
        {
            warn!(container_id = %self.container_id, error = %e,
                  "failed to kill interrupted session container");
        }
    }
}

impl Drop for DockerRuntime {
    fn drop(&mut self) {
        // Best-effort removal; Drop cannot be async.
        let docker = self.docker.clone();
        let container_id = self.container_id.clone();
        tokio::spawn(async move {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            if let Err(e) = docker.remove_container(&container_id, Some(options)).await {
                warn!(container_id = %container_id, error = %e,
                      "failed to remove session container");
            }
        });
    }
}
