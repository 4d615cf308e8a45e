use anyhow::Context;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::stage::CommandSpec;

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Runs one external command to completion, streaming its output lines to
/// `output_callback`. No timeout is applied.
pub async fn execute_command<F>(
    command: &CommandSpec,
    mut output_callback: F,
) -> anyhow::Result<ExecutionResult>
where
    F: FnMut(OutputStream, String) + Send + 'static,
{
    let mut process = Command::new(&command.program);
    process
        .args(&command.args)
        .envs(&command.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if let Some(cwd) = &command.cwd {
        process.current_dir(cwd);
    }

    let mut child = process
        .spawn()
        .with_context(|| format!("Failed to spawn command: {}", command.program))?;

    let stdout = child.stdout.take().context("Failed to capture stdout")?;
    let stderr = child.stderr.take().context("Failed to capture stderr")?;

    let (tx, mut rx) = mpsc::unbounded_channel::<(OutputStream, String)>();

    let tx_clone = tx.clone();
    let stdout_task = tokio::spawn(async move {
        let mut reader = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            if tx_clone.send((OutputStream::Stdout, line)).is_err() {
                break;
            }
        }
    });

    let stderr_task = tokio::spawn(async move {
        let mut reader = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            if tx.send((OutputStream::Stderr, line)).is_err() {
                break;
            }
        }
    });

    let callback_task = tokio::spawn(async move {
        while let Some((stream, line)) = rx.recv().await {
            output_callback(stream, line);
        }
    });

    let status = child
        .wait()
        .await
        .context("Failed to wait for child process")?;

    stdout_task.await.context("stdout task panicked")?;
    stderr_task.await.context("stderr task panicked")?;
    callback_task.await.context("output task panicked")?;

    let exit_code = status.code();
    let mut failure_reason = None;

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;

        if let Some(signal) = status.signal() {
            failure_reason = Some(format!("Signal {} ({})", signal, signal_name(signal)));
        }
    }

    if failure_reason.is_none() && !status.success() {
        failure_reason = Some(match exit_code {
            Some(code) => format!("Exit code {}", code),
            None => "Abnormal termination".to_string(),
        });
    }

    Ok(ExecutionResult {
        success: status.success(),
        exit_code,
        failure_reason,
    })
}

#[cfg(unix)]
fn signal_name(signal: i32) -> &'static str {
    match signal {
        1 => "SIGHUP (Hangup)",
        2 => "SIGINT (Interrupt)",
        3 => "SIGQUIT (Quit)",
        4 => "SIGILL (Illegal instruction)",
        6 => "SIGABRT (Abort)",
        8 => "SIGFPE (Floating point exception)",
        9 => "SIGKILL (Killed)",
        11 => "SIGSEGV (Segmentation fault)",
        13 => "SIGPIPE (Broken pipe)",
        15 => "SIGTERM (Terminated)",
        _ => "Unknown signal",
    }
}
