//! Provisioning engine adapter.
//!
//! The harness treats "apply a topology" and "destroy a topology" as atomic
//! external operations with their own failure modes. [`ProvisioningEngine`]
//! is the narrow contract; [`TerraformCli`] shells out to the real binary
//! with captured output and per-operation deadlines, and [`ScriptedEngine`]
//! is a builder-configured double for tests (no subprocesses, call
//! counters for lifecycle assertions).
//!
//! Engine operations are synchronous blocking calls (the apply/destroy
//! network wait dominates) and are lifted onto the async runtime through
//! `spawn_blocking` by the fixture layer.

use std::collections::{BTreeMap, VecDeque};
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::ErrorCode;
use crate::fixture::DeploymentContext;

/// Error type for engine operations. Provider error text stays opaque; the
/// retry classifier matches signatures against the rendered message.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("terraform {operation} failed (exit {exit_code}): {stderr}")]
    Failed {
        operation: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("terraform {operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("declared output {key:?} is missing")]
    OutputMissing { key: String },

    #[error("failed to parse {what}: {source}")]
    Parse {
        what: String,
        source: serde_json::Error,
    },
}

impl EngineError {
    /// Catalog code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Spawn { .. } => ErrorCode::ProvisionInitFailed,
            Self::Failed { operation, .. } if operation == "destroy" => {
                ErrorCode::TeardownDestroyFailed
            }
            Self::Failed { operation, .. } if operation.starts_with("plan") => {
                ErrorCode::ProvisionPlanFailed
            }
            Self::Failed { .. } => ErrorCode::ProvisionNonRetryable,
            Self::Timeout { operation, .. } if operation == "destroy" => {
                ErrorCode::TeardownTimeout
            }
            Self::Timeout { .. } => ErrorCode::ProvisionTimeout,
            Self::OutputMissing { .. } => ErrorCode::ProvisionOutputMissing,
            Self::Parse { .. } => ErrorCode::ProvisionPlanParseError,
        }
    }
}

/// Result of one external command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandResult {
    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_contains(&self, pattern: &str) -> bool {
        self.stdout.contains(pattern)
    }

    pub fn stderr_contains(&self, pattern: &str) -> bool {
        self.stderr.contains(pattern)
    }

    /// Combined output (stdout + stderr), used for signature matching when
    /// terraform writes provider errors to either stream.
    pub fn combined_output(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// A typed input variable passed to the provisioning engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VarValue {
    String(String),
    Bool(bool),
    Int(i64),
    List(Vec<String>),
}

impl VarValue {
    /// Render for a `-var key=value` argument. Lists are JSON-encoded,
    /// which terraform accepts as HCL list syntax.
    pub fn render(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::List(items) => {
                serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
            }
        }
    }
}

impl From<&str> for VarValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for VarValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// Declared outputs exposed by the engine after a successful apply.
///
/// All values are opaque strings until consumers parse them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeclaredOutputs(BTreeMap<String, String>);

impl DeclaredOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Fetch an output that the module is required to declare.
    pub fn require(&self, key: &str) -> Result<&str, EngineError> {
        self.get(key).ok_or_else(|| EngineError::OutputMissing {
            key: key.to_string(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse `terraform output -json`. Non-string values are re-encoded as
    /// JSON so consumers can parse them for type.
    pub fn from_output_json(raw: &str) -> Result<Self, EngineError> {
        #[derive(Deserialize)]
        struct OutputEntry {
            value: serde_json::Value,
        }

        let entries: BTreeMap<String, OutputEntry> =
            serde_json::from_str(raw).map_err(|source| EngineError::Parse {
                what: "terraform output JSON".to_string(),
                source,
            })?;

        let mut outputs = Self::new();
        for (name, entry) in entries {
            let rendered = match entry.value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            outputs.insert(name, rendered);
        }
        Ok(outputs)
    }
}

impl FromIterator<(String, String)> for DeclaredOutputs {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Kind of change the engine intends for one resource address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
    Replace,
    NoOp,
}

impl ChangeKind {
    /// Map terraform's `change.actions` array to a change kind.
    pub fn from_actions(actions: &[String]) -> Self {
        let has = |needle: &str| actions.iter().any(|a| a == needle);
        if has("create") && has("delete") {
            Self::Replace
        } else if has("create") {
            Self::Create
        } else if has("update") {
            Self::Update
        } else if has("delete") {
            Self::Delete
        } else {
            Self::NoOp
        }
    }
}

/// Structured description of a plan: resource address to intended change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    changes: BTreeMap<String, ChangeKind>,
}

impl PlanSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, address: impl Into<String>, kind: ChangeKind) {
        self.changes.insert(address.into(), kind);
    }

    pub fn get(&self, address: &str) -> Option<ChangeKind> {
        self.changes.get(address).copied()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ChangeKind)> {
        self.changes.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Count of addresses planned for the given change kind.
    pub fn count(&self, kind: ChangeKind) -> usize {
        self.changes.values().filter(|k| **k == kind).count()
    }

    /// Count of addresses with any real change (everything but no-op).
    pub fn pending(&self) -> usize {
        self.changes.len() - self.count(ChangeKind::NoOp)
    }

    /// True when any planned address references the resource type, even with
    /// zero instances of it changing (a `for_each` over an empty set still
    /// registers the address).
    pub fn contains_resource_type(&self, resource_type: &str) -> bool {
        self.changes.keys().any(|addr| addr.contains(resource_type))
    }

    /// Parse `terraform show -json <planfile>` output.
    pub fn from_show_json(raw: &str) -> Result<Self, EngineError> {
        #[derive(Deserialize)]
        struct ShowPlan {
            #[serde(default)]
            resource_changes: Vec<ResourceChange>,
        }

        #[derive(Deserialize)]
        struct ResourceChange {
            address: String,
            change: Change,
        }

        #[derive(Deserialize)]
        struct Change {
            actions: Vec<String>,
        }

        let plan: ShowPlan = serde_json::from_str(raw).map_err(|source| EngineError::Parse {
            what: "terraform plan JSON".to_string(),
            source,
        })?;

        let mut summary = Self::new();
        for rc in plan.resource_changes {
            summary.insert(rc.address, ChangeKind::from_actions(&rc.change.actions));
        }
        Ok(summary)
    }
}

/// Narrow contract over the external provisioning tool.
pub trait ProvisioningEngine: Send + Sync {
    /// Initialize the working directory (providers, backend).
    fn init(&self, ctx: &DeploymentContext) -> Result<CommandResult, EngineError>;

    /// Apply the topology and return the declared outputs.
    fn apply(&self, ctx: &DeploymentContext) -> Result<DeclaredOutputs, EngineError>;

    /// Destroy the topology.
    fn destroy(&self, ctx: &DeploymentContext) -> Result<CommandResult, EngineError>;

    /// Dry-run: structured description of intended changes. Never mutates
    /// external state.
    fn plan(&self, ctx: &DeploymentContext) -> Result<PlanSummary, EngineError>;

    /// Detailed plan exit code: 0 = no changes, 2 = changes pending.
    fn plan_exit_code(&self, ctx: &DeploymentContext) -> Result<i32, EngineError>;

    /// All declared outputs of the current state.
    fn outputs(&self, ctx: &DeploymentContext) -> Result<DeclaredOutputs, EngineError>;

    /// One declared output by key.
    fn output(&self, ctx: &DeploymentContext, key: &str) -> Result<String, EngineError> {
        Ok(self.outputs(ctx)?.require(key)?.to_string())
    }
}

/// Shells out to the `terraform` binary.
#[derive(Debug, Clone)]
pub struct TerraformCli {
    binary: String,
    apply_timeout: Duration,
    destroy_timeout: Duration,
    env: BTreeMap<String, String>,
}

impl Default for TerraformCli {
    fn default() -> Self {
        Self::new("terraform")
    }
}

impl TerraformCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            apply_timeout: Duration::from_secs(1800),
            // Reclaiming resources outranks diagnosing the failure, so the
            // destroy deadline defaults to twice the apply deadline.
            destroy_timeout: Duration::from_secs(3600),
            env: BTreeMap::new(),
        }
    }

    pub fn with_apply_timeout(mut self, timeout: Duration) -> Self {
        self.apply_timeout = timeout;
        self
    }

    pub fn with_destroy_timeout(mut self, timeout: Duration) -> Self {
        self.destroy_timeout = timeout;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// `-var key=value` arguments for the context's input variables.
    fn var_args(ctx: &DeploymentContext) -> Vec<String> {
        let mut args = Vec::with_capacity(ctx.vars().len() * 2);
        for (key, value) in ctx.vars() {
            args.push("-var".to_string());
            args.push(format!("{key}={}", value.render()));
        }
        args
    }

    /// Run one terraform subcommand with output capture and a deadline.
    fn run(
        &self,
        operation: &str,
        ctx: &DeploymentContext,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandResult, EngineError> {
        debug!(operation, args = ?args, dir = %ctx.working_dir().display(), "executing terraform");
        let start = Instant::now();

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .current_dir(ctx.working_dir())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (k, v) in &self.env {
            cmd.env(k, v);
        }

        let mut child = cmd.spawn().map_err(|source| EngineError::Spawn {
            program: self.binary.clone(),
            source,
        })?;

        let stdout_handle = child
            .stdout
            .take()
            .map(|mut stdout| thread::spawn(move || read_to_string(&mut stdout)));
        let stderr_handle = child
            .stderr
            .take()
            .map(|mut stderr| thread::spawn(move || read_to_string(&mut stderr)));

        let mut timed_out = false;
        let exit_status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {}
                Err(_) => break None,
            }
            if start.elapsed() >= timeout {
                timed_out = true;
                let _ = child.kill();
                break child.wait().ok();
            }
            thread::sleep(Duration::from_millis(50));
        };

        let result = CommandResult {
            exit_code: exit_status
                .and_then(|status| status.code())
                .unwrap_or(if timed_out { 124 } else { -1 }),
            stdout: join_output(stdout_handle),
            stderr: join_output(stderr_handle),
            duration: start.elapsed(),
        };

        if timed_out {
            warn!(operation, timeout_secs = timeout.as_secs(), "terraform timed out, killed");
            return Err(EngineError::Timeout {
                operation: operation.to_string(),
                timeout,
            });
        }

        debug!(
            operation,
            exit_code = result.exit_code,
            duration_ms = result.duration.as_millis() as u64,
            "terraform finished"
        );
        Ok(result)
    }

    /// Run and require exit code 0, surfacing combined output as the
    /// opaque error text.
    fn run_checked(
        &self,
        operation: &str,
        ctx: &DeploymentContext,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandResult, EngineError> {
        let result = self.run(operation, ctx, args, timeout)?;
        if !result.success() {
            return Err(EngineError::Failed {
                operation: operation.to_string(),
                exit_code: result.exit_code,
                stderr: result.combined_output().trim().to_string(),
            });
        }
        Ok(result)
    }
}

impl ProvisioningEngine for TerraformCli {
    fn init(&self, ctx: &DeploymentContext) -> Result<CommandResult, EngineError> {
        let args = vec![
            "init".to_string(),
            "-input=false".to_string(),
            "-no-color".to_string(),
        ];
        self.run_checked("init", ctx, &args, self.apply_timeout)
    }

    fn apply(&self, ctx: &DeploymentContext) -> Result<DeclaredOutputs, EngineError> {
        let mut args = vec![
            "apply".to_string(),
            "-input=false".to_string(),
            "-auto-approve".to_string(),
            "-no-color".to_string(),
        ];
        args.extend(Self::var_args(ctx));
        self.run_checked("apply", ctx, &args, self.apply_timeout)?;
        self.outputs(ctx)
    }

    fn destroy(&self, ctx: &DeploymentContext) -> Result<CommandResult, EngineError> {
        let mut args = vec![
            "destroy".to_string(),
            "-input=false".to_string(),
            "-auto-approve".to_string(),
            "-no-color".to_string(),
        ];
        args.extend(Self::var_args(ctx));
        self.run_checked("destroy", ctx, &args, self.destroy_timeout)
    }

    fn plan(&self, ctx: &DeploymentContext) -> Result<PlanSummary, EngineError> {
        let plan_path = ctx.plan_path().to_string_lossy().to_string();
        let mut args = vec![
            "plan".to_string(),
            "-input=false".to_string(),
            "-no-color".to_string(),
            "-out".to_string(),
            plan_path.clone(),
        ];
        args.extend(Self::var_args(ctx));
        self.run_checked("plan", ctx, &args, self.apply_timeout)?;

        let show_args = vec!["show".to_string(), "-json".to_string(), plan_path];
        let shown = self.run_checked("plan show", ctx, &show_args, self.apply_timeout)?;
        PlanSummary::from_show_json(&shown.stdout)
    }

    fn plan_exit_code(&self, ctx: &DeploymentContext) -> Result<i32, EngineError> {
        let mut args = vec![
            "plan".to_string(),
            "-input=false".to_string(),
            "-no-color".to_string(),
            "-detailed-exitcode".to_string(),
        ];
        args.extend(Self::var_args(ctx));
        let result = self.run("plan exitcode", ctx, &args, self.apply_timeout)?;
        match result.exit_code {
            // 0 = no changes, 2 = changes pending; both are valid answers.
            0 | 2 => Ok(result.exit_code),
            code => Err(EngineError::Failed {
                operation: "plan exitcode".to_string(),
                exit_code: code,
                stderr: result.combined_output().trim().to_string(),
            }),
        }
    }

    fn outputs(&self, ctx: &DeploymentContext) -> Result<DeclaredOutputs, EngineError> {
        let args = vec![
            "output".to_string(),
            "-json".to_string(),
            "-no-color".to_string(),
        ];
        let result = self.run_checked("output", ctx, &args, self.apply_timeout)?;
        DeclaredOutputs::from_output_json(&result.stdout)
    }
}

fn read_to_string<R: Read>(reader: &mut R) -> String {
    let mut buffer = Vec::new();
    if reader.read_to_end(&mut buffer).is_ok() {
        String::from_utf8_lossy(&buffer).to_string()
    } else {
        String::new()
    }
}

fn join_output(handle: Option<thread::JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.join().unwrap_or_default(),
        None => String::new(),
    }
}

// ── Scripted engine for tests ──────────────────────────────────────────────

/// Builder-configured engine double. No subprocesses; operations consume
/// scripted results and bump call counters so lifecycle tests can assert
/// "destroy ran exactly once" and friends.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    script: Mutex<Script>,
    init_calls: AtomicU32,
    apply_calls: AtomicU32,
    destroy_calls: AtomicU32,
    plan_calls: AtomicU32,
}

#[derive(Debug, Default)]
struct Script {
    apply_errors: VecDeque<String>,
    destroy_errors: VecDeque<String>,
    init_error: Option<String>,
    outputs: DeclaredOutputs,
    plan: PlanSummary,
    plan_exit_codes: VecDeque<i32>,
}

impl ScriptedEngine {
    pub fn builder() -> ScriptedEngineBuilder {
        ScriptedEngineBuilder::default()
    }

    pub fn init_calls(&self) -> u32 {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn apply_calls(&self) -> u32 {
        self.apply_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_calls(&self) -> u32 {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    pub fn plan_calls(&self) -> u32 {
        self.plan_calls.load(Ordering::SeqCst)
    }

    fn failed(operation: &str, stderr: String) -> EngineError {
        EngineError::Failed {
            operation: operation.to_string(),
            exit_code: 1,
            stderr,
        }
    }
}

impl ProvisioningEngine for ScriptedEngine {
    fn init(&self, _ctx: &DeploymentContext) -> Result<CommandResult, EngineError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().expect("script lock");
        if let Some(stderr) = script.init_error.clone() {
            return Err(Self::failed("init", stderr));
        }
        Ok(ok_result())
    }

    fn apply(&self, _ctx: &DeploymentContext) -> Result<DeclaredOutputs, EngineError> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().expect("script lock");
        if let Some(stderr) = script.apply_errors.pop_front() {
            return Err(Self::failed("apply", stderr));
        }
        Ok(script.outputs.clone())
    }

    fn destroy(&self, _ctx: &DeploymentContext) -> Result<CommandResult, EngineError> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().expect("script lock");
        if let Some(stderr) = script.destroy_errors.pop_front() {
            return Err(Self::failed("destroy", stderr));
        }
        Ok(ok_result())
    }

    fn plan(&self, _ctx: &DeploymentContext) -> Result<PlanSummary, EngineError> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().expect("script lock");
        Ok(script.plan.clone())
    }

    fn plan_exit_code(&self, _ctx: &DeploymentContext) -> Result<i32, EngineError> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().expect("script lock");
        Ok(script.plan_exit_codes.pop_front().unwrap_or(0))
    }

    fn outputs(&self, _ctx: &DeploymentContext) -> Result<DeclaredOutputs, EngineError> {
        let script = self.script.lock().expect("script lock");
        Ok(script.outputs.clone())
    }
}

fn ok_result() -> CommandResult {
    CommandResult {
        exit_code: 0,
        stdout: String::new(),
        stderr: String::new(),
        duration: Duration::from_millis(1),
    }
}

/// Builder for [`ScriptedEngine`].
#[derive(Debug, Default)]
pub struct ScriptedEngineBuilder {
    script: Script,
}

impl ScriptedEngineBuilder {
    /// Queue an apply failure with the given provider error text. Each
    /// queued error consumes one apply call; once drained, applies succeed.
    pub fn fail_apply(mut self, stderr: impl Into<String>) -> Self {
        self.script.apply_errors.push_back(stderr.into());
        self
    }

    /// Queue `count` identical apply failures.
    pub fn fail_applies(mut self, count: usize, stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        for _ in 0..count {
            self.script.apply_errors.push_back(stderr.clone());
        }
        self
    }

    pub fn fail_destroy(mut self, stderr: impl Into<String>) -> Self {
        self.script.destroy_errors.push_back(stderr.into());
        self
    }

    pub fn fail_init(mut self, stderr: impl Into<String>) -> Self {
        self.script.init_error = Some(stderr.into());
        self
    }

    pub fn output(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.script.outputs.insert(key, value);
        self
    }

    pub fn plan_change(mut self, address: impl Into<String>, kind: ChangeKind) -> Self {
        self.script.plan.insert(address, kind);
        self
    }

    /// Queue detailed plan exit codes; once drained, 0 (no changes).
    pub fn plan_exit_code(mut self, code: i32) -> Self {
        self.script.plan_exit_codes.push_back(code);
        self
    }

    pub fn build(self) -> ScriptedEngine {
        ScriptedEngine {
            script: Mutex::new(self.script),
            ..ScriptedEngine::default()
        }
    }
}
