/// Subprocess and remote-file primitives used by the job runners.
///
/// Commands are run either as structured argv (call_tool) or through a
/// shell (call_subprocess) for the pipelines that genuinely need pipes
/// and redirection. PATH is always threaded as an explicit argument and
/// set on the child only, never on the calling process environment.
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::anyhow;
use log::{debug, warn};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::defs::PipelineError;

fn apply_context(cmd: &mut Command, path: Option<&str>, workdir: Option<&Path>) {
    match path {
        Some(p) => {
            cmd.env("PATH", p);
        }
        None => {
            warn!("Subprocess calling external executable using inherited $PATH.");
        }
    }
    if let Some(dir) = workdir {
        cmd.current_dir(dir);
    }
}

fn collect_output(tool: &str, output: std::process::Output) -> Result<Vec<String>, PipelineError> {
    if !output.status.success() {
        let code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
        return Err(PipelineError::ToolExecution {
            tool: tool.to_string(),
            code,
            stderr,
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| line.to_string())
        .collect())
}

/// Runs a program with structured arguments and returns captured stdout
/// lines. Nonzero exit is a ToolExecution error carrying the exit code
/// and stderr.
pub async fn call_tool(
    program: &str,
    args: &[String],
    path: Option<&str>,
    workdir: Option<&Path>,
) -> Result<Vec<String>, PipelineError> {
    debug!("{} {}", program, args.join(" "));
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    apply_context(&mut cmd, path, workdir);
    let output = cmd
        .output()
        .await
        .map_err(|e| anyhow!("Failed to spawn {}: {}", program, e))?;
    collect_output(program, output)
}

/// Runs a full shell command line (sh -c). Reserved for the cases that
/// need shell features: pipes, redirection, && chains.
pub async fn call_subprocess(
    cmdline: &str,
    path: Option<&str>,
    workdir: Option<&Path>,
) -> Result<Vec<String>, PipelineError> {
    debug!("{}", cmdline);
    let tool = cmdline
        .split_whitespace()
        .next()
        .unwrap_or("sh")
        .to_string();
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(cmdline)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    apply_context(&mut cmd, path, workdir);
    let output = cmd
        .output()
        .await
        .map_err(|e| anyhow!("Failed to spawn shell for {}: {}", tool, e))?;
    collect_output(&tool, output)
}

/// Runs a program with the given content piped to its stdin.
pub async fn call_tool_with_stdin(
    program: &str,
    args: &[String],
    stdin_content: &str,
    path: Option<&str>,
    workdir: Option<&Path>,
) -> Result<Vec<String>, PipelineError> {
    debug!("{} {} <<stdin", program, args.join(" "));
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    apply_context(&mut cmd, path, workdir);
    let mut child = cmd
        .spawn()
        .map_err(|e| anyhow!("Failed to spawn {}: {}", program, e))?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("Failed to open stdin for {}", program))?;
    stdin.write_all(stdin_content.as_bytes()).await?;
    drop(stdin);
    let output = child
        .wait_with_output()
        .await
        .map_err(|e| anyhow!("Failed to wait for {}: {}", program, e))?;
    collect_output(program, output)
}

/// Writes text content to a path on a remote host over ssh. Used to push
/// generated batch scripts to the cluster head node before submission.
pub async fn write_remote_file(
    content: &str,
    remote_path: &str,
    user: &str,
    host: &str,
    port: u16,
    ssh_key: Option<&str>,
) -> Result<(), PipelineError> {
    let mut args: Vec<String> = Vec::new();
    if let Some(key) = ssh_key {
        args.push("-i".to_string());
        args.push(key.to_string());
    }
    args.push("-p".to_string());
    args.push(port.to_string());
    args.push(format!("{}@{}", user, host));
    args.push(format!("cat > {}", bash_quote(remote_path)));
    call_tool_with_stdin("ssh", &args, content, None, None).await?;
    Ok(())
}

/// Awaits a remote call with an optional timeout. None blocks
/// indefinitely, as the original remote calls did.
pub async fn with_timeout<T, F>(secs: Option<u64>, fut: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    match secs {
        Some(s) => tokio::time::timeout(Duration::from_secs(s), fut)
            .await
            .map_err(|_| PipelineError::RemoteTimeout(s))?,
        None => fut.await,
    }
}

/// Backslash-quotes a string for interpolation into a remote bash command
/// (scp/ssh targets, filenames inside submitted pipelines).
pub fn bash_quote(input: &str) -> String {
    let mut quoted = String::with_capacity(input.len());
    for ch in input.chars() {
        let safe = ch.is_ascii_alphanumeric()
            || matches!(ch, '-' | '+' | '_' | ',' | '.' | '/' | '\n');
        if !safe {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted
}
