use crate::error::Error;
use crate::models::CommandOutcome;
use crate::Result;

use hadrc::client::Command;
use hadrc::ssh::{SshSession, StreamLine};
use log::{debug, info, warn};
use std::time::Instant;

fn check_preconditions(session: &SshSession, command: &str) -> Result<()> {
    if command.trim().is_empty() {
        return Err(Error::Command("command must not be empty".into()));
    }
    if !session.is_connected() {
        return Err(Error::Command("SSH session is not connected".into()));
    }
    Ok(())
}

/// Run a command and return its trimmed standard output once the channel
/// has closed; if stdout is empty the (trimmed) standard error is returned
/// instead, since many remote tools report through stderr only.
pub async fn execute_buffered(session: &SshSession, command: &str) -> Result<String> {
    check_preconditions(session, command)?;

    let output = session.exec(&Command::new(command)).await?;

    let exit = output.status_code;
    debug!("executed command, exit status: {:?}", exit);

    if !output.success() && !output.stderr.is_empty() {
        warn!(
            "command produced error output: {}",
            output.stderr_lossy().trim()
        );
    }

    let stdout = output.stdout_lossy().trim().to_string();
    if stdout.is_empty() {
        Ok(output.stderr_lossy().trim().to_string())
    } else {
        Ok(stdout)
    }
}

/// Run a command, delivering output lines through the callbacks as they
/// arrive so a caller can render a live log. A nonzero exit code is a
/// failed [`CommandOutcome`], not an error; only transport faults raise.
pub async fn execute_streaming(
    session: &SshSession,
    command: &str,
    mut on_line: impl FnMut(&str),
    mut on_error_line: impl FnMut(&str),
) -> Result<CommandOutcome> {
    check_preconditions(session, command)?;

    let started = Instant::now();

    let output = session
        .exec_streamed(&Command::new(command), |line| match line {
            StreamLine::Out(text) => on_line(&text),
            StreamLine::Err(text) => on_error_line(&text),
        })
        .await?;

    let exit_code = output.status_code.map(|c| c as i32).unwrap_or(-1);
    let outcome = CommandOutcome::new(
        command,
        exit_code,
        output.stdout_lossy(),
        output.stderr_lossy(),
        started.elapsed(),
    );

    info!(
        "command finished, exit code: {}, took: {}ms",
        outcome.exit_code,
        outcome.duration.as_millis()
    );
    Ok(outcome)
}

/// Run commands in order, stopping after the first failed outcome. A
/// transport fault mid-sequence is recorded as a failed outcome for that
/// command and likewise stops the run.
pub async fn execute_sequence(
    session: &SshSession,
    commands: &[String],
    mut on_line: impl FnMut(&str),
    mut on_error_line: impl FnMut(&str),
) -> Vec<CommandOutcome> {
    info!("executing sequence of {} commands", commands.len());

    let mut outcomes = Vec::with_capacity(commands.len());

    for command in commands {
        let started = Instant::now();
        let outcome =
            match execute_streaming(session, command, &mut on_line, &mut on_error_line).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    on_error_line(&format!("command failed: {}", e));
                    CommandOutcome::failure(command, e.to_string(), started.elapsed())
                }
            };

        let stop = !outcome.success;
        outcomes.push(outcome);

        if stop {
            warn!("command failed, stopping remaining commands: {}", command);
            break;
        }
    }

    outcomes
}
