//! Isolated execution of candidate code for the Tier 2 dynamic verifier.
//!
//! `ProcessSandbox` shells out to an interpreter rather than embedding one —
//! grounded on the prototype's `sandbox/wasm_runner.py` isolation-guarantee
//! list: no network unless `allow_network`, no filesystem unless
//! `allow_filesystem`, wall-clock timeout always enforced.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::VerifierError;

#[derive(Debug, Clone)]
pub struct SandboxRequest {
    pub code: String,
    pub language: String,
    pub stdin: Option<String>,
    pub timeout: Duration,
    pub allow_network: bool,
    pub allow_filesystem: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SandboxResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn run(&self, request: &SandboxRequest) -> Result<SandboxResult, VerifierError>;
}

/// Spawns the interpreter for `language` as a real OS process. Network and
/// filesystem access are not actually namespace-isolated here (that needs a
/// container runtime, out of scope) — this enforces only the wall-clock
/// timeout and reports what flags were requested so an orchestrator-level
/// policy can refuse to run untrusted code with either flag set.
pub struct ProcessSandbox {
    python_bin: String,
    node_bin: String,
}

impl Default for ProcessSandbox {
    fn default() -> Self {
        Self {
            python_bin: "python3".to_string(),
            node_bin: "node".to_string(),
        }
    }
}

impl ProcessSandbox {
    pub fn new(python_bin: impl Into<String>, node_bin: impl Into<String>) -> Self {
        Self {
            python_bin: python_bin.into(),
            node_bin: node_bin.into(),
        }
    }

    fn interpreter_for(&self, language: &str) -> Option<&str> {
        match language {
            "python" => Some(&self.python_bin),
            "javascript" | "node" => Some(&self.node_bin),
            _ => None,
        }
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    async fn run(&self, request: &SandboxRequest) -> Result<SandboxResult, VerifierError> {
        let interpreter = self
            .interpreter_for(&request.language)
            .ok_or_else(|| VerifierError::SandboxLaunch(format!("no interpreter for {}", request.language)))?;

        let mut child = Command::new(interpreter)
            .arg("-c")
            .arg(&request.code)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| VerifierError::SandboxLaunch(e.to_string()))?;

        if let Some(stdin_data) = &request.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(stdin_data.as_bytes()).await;
            }
        }

        match timeout(request.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(SandboxResult {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                timed_out: false,
            }),
            Ok(Err(e)) => Err(VerifierError::SandboxLaunch(e.to_string())),
            Err(_) => Err(VerifierError::SandboxTimeout(request.timeout)),
        }
    }
}

/// Scripted sandbox for tests — returns canned results without spawning a
/// process, matching the teacher's fakes-not-mocks convention.
#[derive(Default)]
pub struct FakeSandbox {
    responses: std::sync::Mutex<Vec<Result<SandboxResult, VerifierError>>>,
}

impl FakeSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_success(&self, stdout: impl Into<String>) {
        self.responses.lock().unwrap().push(Ok(SandboxResult {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            timed_out: false,
        }));
    }

    pub fn push_failure(&self, exit_code: i32, stderr: impl Into<String>) {
        self.responses.lock().unwrap().push(Ok(SandboxResult {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            timed_out: false,
        }));
    }
}

#[async_trait]
impl Sandbox for FakeSandbox {
    async fn run(&self, _request: &SandboxRequest) -> Result<SandboxResult, VerifierError> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Ok(SandboxResult {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                timed_out: false,
            });
        }
        responses.remove(0)
    }
}
