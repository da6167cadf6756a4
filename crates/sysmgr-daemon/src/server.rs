//! Control socket: boot status queries and subscriptions, application
//! launch and kill, suspend and resume, URL launches and listing, as JSON
//! lines.
//!
//! Every request is forwarded to the session loop as a
//! [`ControlCommand`] and answered from its oneshot reply, so connection
//! tasks never touch engine state.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use sysmgr_core::event::{ControlCommand, EventSink, LoopEvent};
use sysmgr_core::ipc::{ControlReply, ControlRequest, encode_line, params_to_string};
use sysmgr_core::process::SupervisorError;
use sysmgr_core::status::BootStatus;
use sysmgr_core::{ErrorKind, TransportError};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::line::read_line;

/// Socket permissions: owner and group.
const SOCKET_MODE: u32 = 0o660;

/// Binds the control socket, replacing a stale socket file.
pub fn bind(path: &Path) -> io::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed stale control socket"),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {},
        Err(error) => return Err(error),
    }
    let listener = UnixListener::bind(path)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))?;
    info!(path = %path.display(), "control socket listening");
    Ok(listener)
}

/// Accepts clients until the session loop stops.
pub async fn serve(listener: UnixListener, sink: EventSink) {
    while !sink.is_closed() {
        match listener.accept().await {
            Ok((stream, _)) => {
                let sink = sink.clone();
                tokio::spawn(async move {
                    if let Err(error) = handle_client(stream, sink).await {
                        debug!(%error, "control client finished with error");
                    }
                });
            },
            Err(error) => warn!(%error, "failed to accept control client"),
        }
    }
}

async fn ask<T>(
    sink: &EventSink,
    build: impl FnOnce(oneshot::Sender<T>) -> ControlCommand,
) -> Result<T, TransportError> {
    let (reply, response) = oneshot::channel();
    if !sink.send(LoopEvent::Control(build(reply))) {
        return Err(TransportError::unavailable("session"));
    }
    response
        .await
        .map_err(|_| TransportError::unavailable("session"))
}

async fn write_reply(write: &mut OwnedWriteHalf, reply: &ControlReply) -> Result<(), TransportError> {
    write.write_all(&encode_line(reply)?).await?;
    Ok(())
}

fn unit_reply(result: Result<(), SupervisorError>) -> ControlReply {
    match result {
        Ok(()) => ControlReply::ok(),
        Err(error) => ControlReply::from(&error),
    }
}

async fn handle_client(stream: UnixStream, sink: EventSink) -> Result<(), TransportError> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut line = Vec::new();

    loop {
        line.clear();
        if read_line(&mut reader, &mut line).await? == 0 {
            return Ok(());
        }

        let request = match ControlRequest::parse(&line) {
            Ok(request) => request,
            Err(error) => {
                let reply = ControlReply::error(
                    ErrorKind::TransportFailure,
                    format!("invalid request: {error}"),
                );
                write_reply(&mut write, &reply).await?;
                continue;
            },
        };

        match request {
            ControlRequest::GetStatus { subscribe } => {
                let status = ask(&sink, |reply| ControlCommand::Status { subscribe, reply }).await?;
                write_reply(&mut write, &ControlReply::status(status.status, subscribe)).await?;
                if let Some(updates) = status.updates {
                    return stream_updates(updates, reader, write).await;
                }
            },
            ControlRequest::Launch { app_id, params } => {
                let params = params_to_string(&params);
                let result = ask(&sink, |reply| ControlCommand::Launch {
                    app_id,
                    params,
                    reply,
                })
                .await?;
                let reply = match result {
                    Ok(process_id) => ControlReply::launched(process_id),
                    Err(error) => ControlReply::from(&error),
                };
                write_reply(&mut write, &reply).await?;
            },
            ControlRequest::KillApp { app_id } => {
                let result = ask(&sink, |reply| ControlCommand::Kill { app_id, reply }).await?;
                write_reply(&mut write, &unit_reply(result)).await?;
            },
            ControlRequest::SuspendApp { app_id } => {
                let result = ask(&sink, |reply| ControlCommand::Suspend { app_id, reply }).await?;
                write_reply(&mut write, &unit_reply(result)).await?;
            },
            ControlRequest::ResumeApp { app_id } => {
                let result = ask(&sink, |reply| ControlCommand::Resume { app_id, reply }).await?;
                write_reply(&mut write, &unit_reply(result)).await?;
            },
            ControlRequest::LaunchUrl {
                url,
                window_type,
                params,
            } => {
                let params = params_to_string(&params);
                let result = ask(&sink, |reply| ControlCommand::LaunchUrl {
                    url,
                    window_type,
                    params,
                    reply,
                })
                .await?;
                let reply = match result {
                    Ok(process_id) => ControlReply::launched(process_id),
                    Err(error) => ControlReply::from(&error),
                };
                write_reply(&mut write, &reply).await?;
            },
            ControlRequest::ListRunning => {
                let running = ask(&sink, |reply| ControlCommand::ListRunning { reply }).await?;
                write_reply(&mut write, &ControlReply::running(running)).await?;
            },
        }
    }
}

/// Pushes every status change until the client hangs up or the publisher
/// goes away. Anything the client sends meanwhile is ignored.
async fn stream_updates(
    mut updates: broadcast::Receiver<BootStatus>,
    mut reader: BufReader<OwnedReadHalf>,
    mut write: OwnedWriteHalf,
) -> Result<(), TransportError> {
    let mut ignored = Vec::new();
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(status) => write_reply(&mut write, &ControlReply::update(status)).await?,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "status subscriber fell behind");
                },
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
            read = read_line(&mut reader, &mut ignored) => {
                if read? == 0 {
                    return Ok(());
                }
                ignored.clear();
            },
        }
    }
}
