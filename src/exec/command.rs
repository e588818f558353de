// src/exec/command.rs

//! Shell command execution unit.

use std::collections::VecDeque;
use std::process::Stdio;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::exec::unit::{ExecutionContext, ExecutionUnit, UnitFuture};
use crate::types::{parse_duration, Settings};

/// How many trailing stderr lines are kept for the failure message.
const STDERR_TAIL_LINES: usize = 20;

/// Runs `config.cmd` through the platform shell.
///
/// Recognised config keys:
/// - `cmd` (required): the command line.
/// - `timeout` (optional): duration string such as `"30s"`; the process is
///   killed and the run fails when it elapses.
///
/// The child sees `AGENTVISOR_USER`, `AGENTVISOR_UNIT`, `AGENTVISOR_INSTANCE`
/// and `AGENTVISOR_PARAMS` (params as JSON). The payload is
/// `{"exit_code": .., "stdout": ..}`.
#[derive(Debug, Clone, Default)]
pub struct CommandUnit;

impl CommandUnit {
    pub fn new() -> Self {
        Self
    }
}

impl ExecutionUnit for CommandUnit {
    fn execute(&self, ctx: ExecutionContext, params: Settings) -> UnitFuture<'_> {
        Box::pin(run_command(ctx, params))
    }
}

async fn run_command(ctx: ExecutionContext, params: Settings) -> Result<Value> {
    let cmd_line = match ctx.config.get("cmd") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        _ => bail!("unit '{}' has no `cmd` configured", ctx.unit_type),
    };
    let timeout = match ctx.config.get("timeout") {
        Some(Value::String(s)) => Some(parse_duration(s).map_err(|e| anyhow!(e))?),
        _ => None,
    };

    info!(
        instance = %ctx.instance_id,
        user = %ctx.user_id,
        unit = %ctx.unit_type,
        cmd = %cmd_line,
        "starting unit process"
    );

    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&cmd_line);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&cmd_line);
        c
    };

    cmd.env("AGENTVISOR_USER", &ctx.user_id)
        .env("AGENTVISOR_UNIT", &ctx.unit_type)
        .env("AGENTVISOR_INSTANCE", ctx.instance_id.to_string())
        .env("AGENTVISOR_PARAMS", Value::Object(params).to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for unit '{}'", ctx.unit_type))?;

    // Drain both pipes concurrently so neither buffer fills up.
    let stdout_task = child.stdout.take().map(|mut out| {
        let unit = ctx.unit_type.clone();
        let instance = ctx.instance_id;
        tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Err(e) = out.read_to_end(&mut buf).await {
                debug!(unit = %unit, instance = %instance, error = %e, "reading stdout failed");
            }
            String::from_utf8_lossy(&buf).into_owned()
        })
    });

    let stderr_task = child.stderr.take().map(|err| {
        let unit = ctx.unit_type.clone();
        let instance = ctx.instance_id;
        tokio::spawn(async move {
            let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut lines = BufReader::new(err).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(unit = %unit, instance = %instance, "stderr: {}", line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        })
    });

    let status = match timeout {
        Some(limit) => {
            let waited = tokio::time::timeout(limit, child.wait()).await;
            match waited {
                Ok(res) => res,
                Err(_) => {
                    warn!(unit = %ctx.unit_type, instance = %ctx.instance_id, ?limit, "unit process timed out; killing");
                    if let Err(e) = child.kill().await {
                        warn!(unit = %ctx.unit_type, error = %e, "failed to kill timed-out process");
                    }
                    bail!("command timed out after {:?}", limit);
                }
            }
        }
        None => child.wait().await,
    }
    .with_context(|| format!("waiting for process of unit '{}'", ctx.unit_type))?;

    let stdout = match stdout_task {
        Some(h) => h.await.unwrap_or_default(),
        None => String::new(),
    };
    let stderr_tail = match stderr_task {
        Some(h) => h.await.unwrap_or_default(),
        None => String::new(),
    };

    let code = status.code().unwrap_or(-1);
    info!(
        instance = %ctx.instance_id,
        unit = %ctx.unit_type,
        exit_code = code,
        success = status.success(),
        "unit process exited"
    );

    if !status.success() {
        if stderr_tail.is_empty() {
            bail!("command exited with code {code}");
        }
        bail!("command exited with code {code}: {stderr_tail}");
    }

    Ok(json!({
        "exit_code": code,
        "stdout": stdout.trim_end(),
    }))
}
