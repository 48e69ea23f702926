//! Runs the media worker in a child process.
//!
//! The daemon re-executes itself with the hidden `worker` subcommand. Commands
//! are written to the child's stdin and worker messages read from its stdout,
//! one JSON object per line. Both sides end up with the same four channels the
//! in-process worker uses.

use crate::error::App;
use crate::worker::engine::EngineFactory;
use crate::worker::handle::ExecutionContext;
use crate::worker::protocol::{
    channels, Command, ControlEndpoints, DiagnosticRecord, LivenessEvent, StatusReply,
    WorkerEndpoints, WorkerMessage,
};
use crate::worker::spawn_thread;
use log::{error, info, warn};
use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command as ProcessCommand};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task;

pub const WORKER_SUBCOMMAND: &str = "worker";

pub struct ProcessContext {
    child: Child,
    exited: bool,
}

impl ExecutionContext for ProcessContext {
    fn is_finished(&mut self) -> bool {
        if self.exited {
            return true;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                info!("Media worker process exited with {status}");
                self.exited = true;
                true
            }
            Ok(None) => false,
            Err(e) => {
                error!("Failed to query media worker process: {e}");
                true
            }
        }
    }

    fn terminate(&mut self) {
        if let Err(e) = self.child.start_kill() {
            error!("Failed to kill media worker process: {e}");
        }
    }
}

/// Starts `program worker` and bridges its stdio to a fresh set of channels.
pub fn spawn(program: &Path) -> Result<(ControlEndpoints, ProcessContext), App> {
    let mut child = ProcessCommand::new(program)
        .arg(WORKER_SUBCOMMAND)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| App::Worker("Media worker stdin is not piped".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| App::Worker("Media worker stdout is not piped".to_string()))?;
    info!("Media worker process started (pid {:?})", child.id());

    let (control, endpoints) = channels();
    let WorkerEndpoints {
        commands,
        status,
        liveness,
        diagnostics,
    } = endpoints;
    task::spawn(forward_commands(commands, stdin));
    task::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => route(&line, &status, &liveness, &diagnostics),
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read from media worker: {e}");
                    break;
                }
            }
        }
        info!("Media worker output closed");
    });

    Ok((
        control,
        ProcessContext {
            child,
            exited: false,
        },
    ))
}

async fn forward_commands(mut commands: UnboundedReceiver<Command>, mut stdin: ChildStdin) {
    while let Some(command) = commands.recv().await {
        let exit = command == Command::Exit;
        if let Err(e) = write_line(&mut stdin, &command).await {
            error!("Failed to send {} to media worker: {e}", command.name());
            break;
        }
        if exit {
            break;
        }
    }
}

fn route(
    line: &str,
    status: &UnboundedSender<StatusReply>,
    liveness: &UnboundedSender<LivenessEvent>,
    diagnostics: &UnboundedSender<DiagnosticRecord>,
) {
    // Send errors only mean the control side is gone.
    match serde_json::from_str::<WorkerMessage>(line) {
        Ok(WorkerMessage::Status(reply)) => {
            let _ = status.send(reply);
        }
        Ok(WorkerMessage::Liveness(event)) => {
            let _ = liveness.send(event);
        }
        Ok(WorkerMessage::Diagnostic(record)) => {
            let _ = diagnostics.send(record);
        }
        Err(e) => {
            warn!("Unreadable line from media worker: {e}");
            let _ = diagnostics.send(DiagnosticRecord::notification(
                "WorkerTransport",
                format!("Unreadable worker output: {line}"),
            ));
        }
    }
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> Result<(), App>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Entry point of the child process: runs the worker thread and serves it over stdio.
pub async fn serve_stdio<F: EngineFactory>(factory: F) -> Result<(), App> {
    let (control, context) = spawn_thread(factory)?;
    let ControlEndpoints {
        commands,
        mut status,
        mut liveness,
        mut diagnostics,
    } = control;
    task::spawn(read_commands(tokio::io::stdin(), commands));

    let mut stdout = tokio::io::stdout();
    loop {
        let message = tokio::select! {
            Some(reply) = status.recv() => WorkerMessage::Status(reply),
            Some(event) = liveness.recv() => WorkerMessage::Liveness(event),
            Some(record) = diagnostics.recv() => WorkerMessage::Diagnostic(record),
            else => break,
        };
        write_line(&mut stdout, &message).await?;
    }

    // All senders are gone, so the worker loop has returned.
    context.join();
    Ok(())
}

async fn read_commands<R: AsyncRead + Unpin>(input: R, commands: UnboundedSender<Command>) {
    let mut lines = BufReader::new(input).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match serde_json::from_str::<Command>(&line) {
                Ok(command) => {
                    if commands.send(command).is_err() {
                        return;
                    }
                }
                Err(e) => warn!("Ignoring malformed command: {e}"),
            },
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read commands: {e}");
                break;
            }
        }
    }
    // The daemon went away without saying goodbye.
    let _ = commands.send(Command::Exit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::protocol::{InfoKind, PlayerState};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_malformed_command_lines_are_skipped() {
        let input = b"{\"Play\":{\"history_key\":3}}\nnot json\n\"CheckAlive\"\n";
        let (sender, mut receiver) = mpsc::unbounded_channel();

        read_commands(&input[..], sender).await;

        assert_eq!(receiver.recv().await, Some(Command::Play { history_key: 3 }));
        assert_eq!(receiver.recv().await, Some(Command::CheckAlive));
        assert_eq!(receiver.recv().await, Some(Command::Exit));
        assert_eq!(receiver.recv().await, None);
    }

    #[tokio::test]
    async fn test_worker_output_is_routed_by_kind() {
        let (control, endpoints) = channels();
        let ControlEndpoints {
            mut status,
            mut liveness,
            mut diagnostics,
            ..
        } = control;

        let mut output = Vec::new();
        write_line(
            &mut output,
            &WorkerMessage::Status(StatusReply::StateAndVolume(PlayerState::Playing, 80)),
        )
        .await
        .unwrap();
        write_line(
            &mut output,
            &WorkerMessage::Liveness(LivenessEvent::PlayConfirmed { history_key: 9 }),
        )
        .await
        .unwrap();
        let text = String::from_utf8(output).unwrap();
        for line in text.lines().chain(std::iter::once("garbage")) {
            route(
                line,
                &endpoints.status,
                &endpoints.liveness,
                &endpoints.diagnostics,
            );
        }

        assert_eq!(
            status.try_recv().unwrap(),
            StatusReply::StateAndVolume(PlayerState::Playing, 80)
        );
        assert_eq!(
            liveness.try_recv().unwrap(),
            LivenessEvent::PlayConfirmed { history_key: 9 }
        );
        let record = diagnostics.try_recv().unwrap();
        assert!(record.is_notification);
        assert_eq!(record.category, "WorkerTransport");
    }

    #[tokio::test]
    async fn test_exit_is_seen_once_and_remembered() {
        let child = ProcessCommand::new("true")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let mut context = ProcessContext {
            child,
            exited: false,
        };
        context.child.wait().await.unwrap();

        assert!(context.is_finished());
        assert!(context.exited);
        assert!(context.is_finished());
    }

    #[tokio::test]
    async fn test_commands_are_written_one_per_line() {
        let mut output = Vec::new();
        write_line(&mut output, &Command::GetInfo { kind: InfoKind::Volume })
            .await
            .unwrap();
        write_line(&mut output, &Command::Exit).await.unwrap();

        let text = String::from_utf8(output).unwrap();
        let commands: Vec<Command> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(
            commands,
            vec![Command::GetInfo { kind: InfoKind::Volume }, Command::Exit]
        );
    }
}
