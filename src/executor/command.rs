//! Command-driven executor.
//!
//! Runs a fixed list of commands per operation on the resource's host through
//! a [`Transport`]. Failures that look transient (connection drops, a locked
//! router configuration) are retried with growing delays up to a bounded
//! number of attempts; anything else ends the operation with an unsuccessful
//! outcome.

use async_trait::async_trait;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::transport::{CommandOutput, Transport, TransportError};
use super::{ExecutionOutcome, ExecutorAdapter, ExecutorError, ExecutorResult};
use crate::config::ExecutorConfig;
use crate::models::TaskContext;
use crate::state_machine::LifecycleOperation;

/// ssh exits with 255 when the connection itself failed
const SSH_CONNECTION_FAILURE: i32 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::constants::DEFAULT_EXECUTOR_MAX_ATTEMPTS,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay after the given failed attempt (1-based), doubling up to the cap
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Commands to run for each operation.
///
/// `{name}` in a command is replaced with the resource attribute `name`.
#[derive(Debug, Clone, Default)]
pub struct CommandPlan {
    commands: HashMap<LifecycleOperation, Vec<String>>,
    retryable_markers: Vec<String>,
}

impl CommandPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_commands<I, S>(mut self, operation: LifecycleOperation, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands
            .insert(operation, commands.into_iter().map(Into::into).collect());
        self
    }

    /// Output text that marks a failure as transient
    pub fn with_retryable_marker(mut self, marker: impl Into<String>) -> Self {
        self.retryable_markers.push(marker.into());
        self
    }

    pub fn commands_for(&self, operation: LifecycleOperation) -> Option<&[String]> {
        self.commands.get(&operation).map(Vec::as_slice)
    }

    fn is_retryable(&self, output: &CommandOutput) -> bool {
        if output.exit_code == Some(SSH_CONNECTION_FAILURE) {
            return true;
        }
        self.retryable_markers
            .iter()
            .any(|marker| output.stderr.contains(marker) || output.stdout.contains(marker))
    }
}

/// Substitute `{attribute}` placeholders from the task context.
///
/// Values are shell-quoted since the result runs in a remote shell. `{{` and
/// `}}` produce literal braces; braces around anything that is not an
/// attribute name are kept as written.
fn render(template: &str, context: &TaskContext) -> Result<String, ExecutorError> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find(|c: char| c == '{' || c == '}') {
        rendered.push_str(&rest[..start]);
        let tail = &rest[start..];
        if tail.starts_with("{{") || tail.starts_with("}}") {
            rendered.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }
        match placeholder(tail) {
            Some(name) => {
                rendered.push_str(&shell_quote(&attribute_value(name, context)?));
                rest = &tail[name.len() + 2..];
            }
            None => {
                rendered.push_str(&tail[..1]);
                rest = &tail[1..];
            }
        }
    }
    rendered.push_str(rest);
    Ok(rendered)
}

/// Name of the `{name}` placeholder `text` starts with, if any
fn placeholder(text: &str) -> Option<&str> {
    let body = text.strip_prefix('{')?;
    let name = &body[..body.find('}')?];
    let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then_some(name)
}

fn attribute_value(name: &str, context: &TaskContext) -> Result<String, ExecutorError> {
    match context.attributes.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Null) | None => Err(ExecutorError::MissingAttribute(name.to_string())),
        Some(other) => Ok(other.to_string()),
    }
}

/// Single-quote `value` for a POSIX shell unless every character is inert
fn shell_quote(value: &str) -> Cow<'_, str> {
    let inert = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./_-".contains(c));
    if inert {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(format!("'{}'", value.replace('\'', r"'\''")))
    }
}

pub struct CommandExecutor {
    name: String,
    transport: Arc<dyn Transport>,
    plan: CommandPlan,
    retry: RetryPolicy,
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("name", &self.name)
            .field("transport", &self.transport.name())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl CommandExecutor {
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        plan: CommandPlan,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            plan,
            retry,
        }
    }

    async fn run_operation(
        &self,
        operation: LifecycleOperation,
        context: &TaskContext,
    ) -> ExecutorResult {
        let commands = self
            .plan
            .commands_for(operation)
            .ok_or_else(|| ExecutorError::Unsupported {
                executor: self.name.clone(),
                operation,
            })?;
        let host = context
            .host_address
            .as_deref()
            .ok_or_else(|| ExecutorError::MissingAttribute("host_address".to_string()))?;

        let mut transcript = Vec::with_capacity(commands.len());
        for template in commands {
            let command = render(template, context)?;
            match self.run_with_retry(host, &command, context).await {
                Ok(output) => transcript.push(output.stdout),
                Err(reason) => {
                    return Ok(ExecutionOutcome::failed(transcript.join("\n"), vec![reason]));
                }
            }
        }

        info!(
            executor = %self.name,
            operation = %operation,
            resource_id = context.resource_id,
            commands = commands.len(),
            "Executor finished all commands"
        );
        Ok(ExecutionOutcome::succeeded(transcript.join("\n")))
    }

    /// Run one command; the error string describes the final failure
    async fn run_with_retry(
        &self,
        host: &str,
        command: &str,
        context: &TaskContext,
    ) -> Result<CommandOutput, String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let (retryable, reason) = match self.transport.run(host, command).await {
                Ok(output) if output.success() => return Ok(output),
                Ok(output) => {
                    let reason = format!(
                        "`{command}` on {host} exited with {:?}: {}",
                        output.exit_code,
                        output.stderr.trim()
                    );
                    (self.plan.is_retryable(&output), reason)
                }
                Err(e @ TransportError::Timeout { .. }) => (true, e.to_string()),
                Err(e) => (false, e.to_string()),
            };

            if !retryable || attempt >= self.retry.max_attempts {
                warn!(
                    executor = %self.name,
                    resource_id = context.resource_id,
                    attempt = attempt,
                    error = %reason,
                    "Remote command failed"
                );
                return Err(reason);
            }

            let delay = self.retry.delay_for(attempt);
            debug!(
                executor = %self.name,
                resource_id = context.resource_id,
                attempt = attempt,
                max_attempts = self.retry.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %reason,
                "Transient command failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ExecutorAdapter for CommandExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn build(&self, context: &TaskContext) -> ExecutorResult {
        self.run_operation(LifecycleOperation::Build, context).await
    }

    async fn quiesce(&self, context: &TaskContext) -> ExecutorResult {
        self.run_operation(LifecycleOperation::Quiesce, context).await
    }

    async fn scrub(&self, context: &TaskContext) -> ExecutorResult {
        self.run_operation(LifecycleOperation::Scrub, context).await
    }

    async fn restart(&self, context: &TaskContext) -> ExecutorResult {
        self.run_operation(LifecycleOperation::Restart, context).await
    }

    async fn update(&self, context: &TaskContext) -> ExecutorResult {
        self.run_operation(LifecycleOperation::Update, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::ResourceKind;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays scripted outputs and records every command
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<CommandOutput, TransportError>>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<CommandOutput, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn run(&self, host: &str, command: &str) -> Result<CommandOutput, TransportError> {
            self.calls.lock().push((host.to_string(), command.to_string()));
            self.replies.lock().pop_front().unwrap_or_else(|| Ok(ok("")))
        }
    }

    fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    fn failed(code: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    fn context() -> TaskContext {
        let mut context =
            TaskContext::new(LifecycleOperation::Build, ResourceKind::VirtualRouter, 7);
        context.host_address = Some("10.1.1.1".to_string());
        context
            .attributes
            .insert("name".to_string(), Value::String("vr-7".to_string()));
        context
            .attributes
            .insert("vlan".to_string(), serde_json::json!(1004));
        context
    }

    #[test]
    fn test_render_substitutes_attributes() {
        let rendered = render("create {name} vlan {vlan}", &context()).unwrap();
        assert_eq!(rendered, "create vr-7 vlan 1004");

        let err = render("create {missing}", &context()).unwrap_err();
        assert!(matches!(err, ExecutorError::MissingAttribute(name) if name == "missing"));
    }

    #[test]
    fn test_render_quotes_values_for_the_shell() {
        let mut context = context();
        context.attributes.insert(
            "name".to_string(),
            Value::String("vr-7; rm -rf /".to_string()),
        );
        context
            .attributes
            .insert("label".to_string(), Value::String("it's".to_string()));
        context
            .attributes
            .insert("note".to_string(), Value::String(String::new()));

        let rendered = render("create {name} --label {label} --note {note}", &context).unwrap();
        assert_eq!(
            rendered,
            r"create 'vr-7; rm -rf /' --label 'it'\''s' --note ''"
        );
    }

    #[test]
    fn test_render_keeps_literal_braces() {
        let rendered = render("awk '{print $1}' /etc/vr/{name}.conf", &context()).unwrap();
        assert_eq!(rendered, "awk '{print $1}' /etc/vr/vr-7.conf");

        let rendered = render("echo {{name}} {vlan} }", &context()).unwrap();
        assert_eq!(rendered, "echo {name} 1004 }");
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(16));
        assert_eq!(policy.delay_for(9), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_runs_commands_in_order() {
        let transport = ScriptedTransport::new(vec![Ok(ok("one")), Ok(ok("two"))]);
        let plan = CommandPlan::new()
            .with_commands(LifecycleOperation::Build, ["prepare {name}", "commit {name}"]);
        let executor = CommandExecutor::new("router", transport.clone(), plan, fast_retry(3));

        let outcome = executor.build(&context()).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.output, "one\ntwo");
        let calls = transport.calls.lock().clone();
        assert_eq!(
            calls,
            vec![
                ("10.1.1.1".to_string(), "prepare vr-7".to_string()),
                ("10.1.1.1".to_string(), "commit vr-7".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_config_lock_is_retried_until_success() {
        let transport = ScriptedTransport::new(vec![
            Ok(failed(1, "error: configuration database locked")),
            Ok(failed(1, "error: configuration database locked")),
            Ok(ok("committed")),
        ]);
        let plan = CommandPlan::new()
            .with_commands(LifecycleOperation::Update, ["commit"])
            .with_retryable_marker("configuration database locked");
        let executor = CommandExecutor::new("router", transport.clone(), plan, fast_retry(10));

        let outcome = executor.update(&context()).await.unwrap();
        assert!(outcome.success);
        assert_eq!(transport.calls.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let replies = (0..5).map(|_| Ok(failed(255, "connection refused"))).collect();
        let transport = ScriptedTransport::new(replies);
        let plan = CommandPlan::new().with_commands(LifecycleOperation::Restart, ["reboot"]);
        let executor = CommandExecutor::new("kvm", transport.clone(), plan, fast_retry(3));

        let outcome = executor.restart(&context()).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("connection refused"));
        assert_eq!(transport.calls.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let transport = ScriptedTransport::new(vec![Ok(failed(1, "no such domain"))]);
        let plan = CommandPlan::new().with_commands(LifecycleOperation::Scrub, ["undefine"]);
        let executor = CommandExecutor::new("kvm", transport.clone(), plan, fast_retry(10));

        let outcome = executor.scrub(&context()).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(transport.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_operation_and_missing_host() {
        let transport = ScriptedTransport::new(vec![]);
        let plan = CommandPlan::new().with_commands(LifecycleOperation::Build, ["create"]);
        let executor = CommandExecutor::new("kvm", transport, plan, fast_retry(1));

        let err = executor.quiesce(&context()).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Unsupported { .. }));

        let mut no_host = context();
        no_host.host_address = None;
        let err = executor.build(&no_host).await.unwrap_err();
        assert!(matches!(err, ExecutorError::MissingAttribute(_)));
    }
}
