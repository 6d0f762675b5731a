//! IPC server implementation
//!
//! Listens on 127.0.0.1 only; connections from any other address are
//! dropped. Responses and pushed events share the connection, one JSON
//! object per line.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use ce_core::ipc::{IpcEvent, IpcRequest, IpcResponse};
use ce_protocol::{FacultyId, RequestId, RequesterId};

use crate::coordinator::Coordinator;

/// IPC server for the kiosk UI and admin tools
pub struct IpcServer {
    listener: TcpListener,
    coordinator: Arc<Coordinator>,
    event_tx: broadcast::Sender<IpcEvent>,
}

impl IpcServer {
    /// Bind the listening socket
    pub async fn bind(
        address: &str,
        coordinator: Arc<Coordinator>,
        event_tx: broadcast::Sender<IpcEvent>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("Failed to bind IPC server to {}", address))?;

        Ok(Self {
            listener,
            coordinator,
            event_tx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        tracing::info!("IPC server listening on {}", self.local_addr()?);

        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    if !peer_addr.ip().is_loopback() {
                        tracing::warn!("Rejected non-localhost connection from {}", peer_addr);
                        continue;
                    }

                    let coordinator = Arc::clone(&self.coordinator);
                    let event_rx = self.event_tx.subscribe();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, coordinator, event_rx, cancel).await {
                            tracing::warn!("IPC client error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept IPC connection: {}", e);
                }
            }
        }

        tracing::debug!("IPC server stopped");
        Ok(())
    }
}

async fn handle_client(
    stream: TcpStream,
    coordinator: Arc<Coordinator>,
    mut event_rx: broadcast::Receiver<IpcEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    // `next_line` keeps partial input across cancellation, so a pushed event
    // arriving mid-line does not cut the request short
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                    Ok(request) => handle_request(request, &coordinator).await,
                    Err(e) => IpcResponse::Error {
                        message: format!("Invalid request: {}", e),
                    },
                };

                let mut response_json = serde_json::to_string(&response)?;
                response_json.push('\n');
                writer.write_all(response_json.as_bytes()).await?;
            }

            result = event_rx.recv() => {
                match result {
                    Ok(event) => {
                        let mut event_json = serde_json::to_string(&event)?;
                        event_json.push('\n');
                        writer.write_all(event_json.as_bytes()).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("IPC client lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    Ok(())
}

async fn handle_request(request: IpcRequest, coordinator: &Coordinator) -> IpcResponse {
    match request {
        IpcRequest::CreateRequest {
            faculty_id,
            requester_id,
            message,
        } => {
            let created = coordinator
                .create_request(FacultyId(faculty_id), RequesterId::new(requester_id), message)
                .await;
            let id = match created {
                Ok(id) => id,
                Err(e) => return error(e),
            };
            match coordinator.request(id).await {
                Ok(Some(request)) => IpcResponse::RequestCreated { request },
                Ok(None) => error(format!("Request {} vanished after routing", id)),
                Err(e) => error(e),
            }
        }

        IpcRequest::CancelRequest { request_id } => {
            let Some(id) = RequestId::parse(&request_id) else {
                return error(format!("Invalid request id: {}", request_id));
            };
            match coordinator.cancel_request(id).await {
                Ok(_) => IpcResponse::Ok,
                Err(e) => error(e),
            }
        }

        IpcRequest::GetRequest { request_id } => {
            let Some(id) = RequestId::parse(&request_id) else {
                return error(format!("Invalid request id: {}", request_id));
            };
            match coordinator.request(id).await {
                Ok(Some(request)) => IpcResponse::Request { request },
                Ok(None) => error(format!("Request not found: {}", request_id)),
                Err(e) => error(e),
            }
        }

        IpcRequest::ListPending => match coordinator.list_pending().await {
            Ok(requests) => IpcResponse::Requests { requests },
            Err(e) => error(e),
        },

        IpcRequest::ListFaculty => IpcResponse::Faculty {
            faculty: coordinator.faculty_directory(),
        },

        IpcRequest::Ping => IpcResponse::Pong,
    }
}

fn error(message: impl std::fmt::Display) -> IpcResponse {
    IpcResponse::Error {
        message: message.to_string(),
    }
}
