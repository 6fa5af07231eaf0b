//! JSON-RPC server over Unix socket.
//!
//! Listens on a Unix domain socket, accepts connections, and dispatches
//! newline-delimited JSON-RPC calls to the command handlers. A
//! `subscribe_events` call turns its connection into a one-way stream of
//! event notifications.

use std::path::PathBuf;
use std::sync::Arc;

use ephemera_types::access::Denial;
use ephemera_types::{ConflictKind, ServiceError};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::commands;
use crate::events::EventFilter;
use crate::DaemonState;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    /// Method name.
    pub method: String,
    /// Parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    /// JSON-RPC version.
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Server-initiated message without an id.
#[derive(Debug, Serialize)]
pub struct RpcNotification<'a, T: Serialize> {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: &'a T,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RpcError {
    pub code: i32,
    /// Error name.
    pub message: String,
    /// Optional structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcError {
    fn new(code: i32, message: &str, data: Option<serde_json::Value>) -> Self {
        Self {
            code,
            message: message.to_string(),
            data,
        }
    }

    // Standard JSON-RPC errors

    /// Parse error (-32700).
    pub fn parse_error() -> Self {
        Self::new(-32700, "PARSE_ERROR", None)
    }

    /// Invalid request (-32600).
    pub fn invalid_request() -> Self {
        Self::new(-32600, "INVALID_REQUEST", None)
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self::new(-32601, "METHOD_NOT_FOUND", Some(serde_json::json!({"method": method})))
    }

    /// Invalid params (-32602).
    pub fn invalid_params(detail: &str) -> Self {
        Self::new(-32602, "INVALID_PARAMS", Some(serde_json::json!({"detail": detail})))
    }

    /// Internal error (-32603).
    pub fn internal_error(detail: &str) -> Self {
        Self::new(-32603, "INTERNAL_ERROR", Some(serde_json::json!({"detail": detail})))
    }

    // Domain errors

    /// Free views used up (-32010).
    pub fn limit_reached() -> Self {
        Self::new(-32010, "LIMIT_REACHED", None)
    }

    /// Membership precondition failed (-32011).
    pub fn not_member() -> Self {
        Self::new(-32011, "NOT_MEMBER", None)
    }

    /// The principal's payment was rejected (-32012).
    pub fn payment_rejected(payment_id: i64) -> Self {
        Self::new(
            -32012,
            "PAYMENT_REJECTED",
            Some(serde_json::json!({"payment_id": payment_id})),
        )
    }

    /// Unknown entity (-32020).
    pub fn not_found(entity: &str, id: &str) -> Self {
        Self::new(
            -32020,
            "NOT_FOUND",
            Some(serde_json::json!({"entity": entity, "id": id})),
        )
    }

    /// Payment already approved or rejected (-32030).
    pub fn already_decided(payment_id: i64, status: &str) -> Self {
        Self::new(
            -32030,
            "ALREADY_DECIDED",
            Some(serde_json::json!({"payment_id": payment_id, "status": status})),
        )
    }

    /// Another payment is still open (-32031).
    pub fn active_payment(payment_id: i64) -> Self {
        Self::new(
            -32031,
            "ACTIVE_PAYMENT",
            Some(serde_json::json!({"payment_id": payment_id})),
        )
    }

    /// Caller lacks the required role (-32040).
    pub fn forbidden(action: &str) -> Self {
        Self::new(-32040, "FORBIDDEN", Some(serde_json::json!({"action": action})))
    }

    /// A dependency is down; try again later (-32050).
    pub fn service_unavailable() -> Self {
        Self::new(-32050, "SERVICE_UNAVAILABLE", None)
    }

    /// Map an access denial.
    pub fn denied(reason: Denial) -> Self {
        match reason {
            Denial::LimitReached => Self::limit_reached(),
            Denial::NotMember => Self::not_member(),
        }
    }
}

impl From<ServiceError> for RpcError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(detail) => Self::invalid_params(&detail),
            ServiceError::NotFound { entity, id } => Self::not_found(entity, &id),
            ServiceError::Conflict(ConflictKind::AlreadyTerminal { payment_id, status }) => {
                Self::already_decided(payment_id, status.as_str())
            }
            ServiceError::Conflict(ConflictKind::ActivePayment { payment_id }) => {
                Self::active_payment(payment_id)
            }
            ServiceError::Conflict(ConflictKind::ConcurrentModification(_))
            | ServiceError::Dependency(_)
            | ServiceError::TransientDependency { .. } => Self::service_unavailable(),
            ServiceError::Authorization { action, .. } => Self::forbidden(&action),
        }
    }
}

/// The RPC server.
pub struct RpcServer {
    state: Arc<DaemonState>,
    socket_path: PathBuf,
}

impl RpcServer {
    /// Create a new RPC server.
    pub fn new(state: Arc<DaemonState>, socket_path: PathBuf) -> Self {
        Self { state, socket_path }
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) -> anyhow::Result<()> {
        // Remove stale socket file
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            warn!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Handle a single client connection.
async fn handle_connection(
    state: Arc<DaemonState>,
    stream: tokio::net::UnixStream,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break; // EOF
        }

        let request = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => request,
            Err(_) => {
                let response = RpcResponse::error(serde_json::Value::Null, RpcError::parse_error());
                write_line(&mut writer, &response).await?;
                continue;
            }
        };

        if request.method == "subscribe_events" && request.jsonrpc == "2.0" {
            let filter: EventFilter = match serde_json::from_value(request.params.clone()) {
                Ok(filter) => filter,
                Err(_) if request.params.is_null() => EventFilter::default(),
                Err(e) => {
                    let err = RpcError::invalid_params(&e.to_string());
                    write_line(&mut writer, &RpcResponse::error(request.id, err)).await?;
                    continue;
                }
            };
            // Subscribe before acknowledging so nothing emitted in between is lost.
            let mut events = state.event_bus.subscribe();
            let ack = RpcResponse::success(request.id, serde_json::json!({"subscribed": true}));
            write_line(&mut writer, &ack).await?;
            info!("event subscriber connected");

            loop {
                tokio::select! {
                    received = events.recv() => match received {
                        Ok(event) if filter.matches(&event) => {
                            let note = RpcNotification {
                                jsonrpc: "2.0",
                                method: "event",
                                params: &event,
                            };
                            write_line(&mut writer, &note).await?;
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "event subscriber lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    read = reader.read_line(&mut line) => {
                        // Input on a stream connection is ignored; EOF ends it.
                        if read? == 0 {
                            break;
                        }
                        line.clear();
                    }
                }
            }
            info!("event subscriber disconnected");
            break;
        }

        let response = dispatch_request(state.clone(), request).await;
        write_line(&mut writer, &response).await?;
    }

    Ok(())
}

async fn write_line<W, T>(writer: &mut W, message: &T) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut json = serde_json::to_string(message)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Dispatch a JSON-RPC request to the appropriate command handler.
async fn dispatch_request(state: Arc<DaemonState>, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    if request.jsonrpc != "2.0" {
        return RpcResponse::error(id, RpcError::invalid_request());
    }
    let method = request.method.as_str();

    debug!("Dispatching RPC method: {}", method);

    let result = match method {
        // Content
        "register_content" => commands::content::register_content(&state, &request.params).await,
        "revoke_content" => commands::content::revoke_content(&state, &request.params).await,
        "deliver_content" => commands::content::deliver_content(&state, &request.params).await,

        // Payments
        "list_tiers" => commands::payments::list_tiers(&state).await,
        "initiate_payment" => commands::payments::initiate_payment(&state, &request.params).await,
        "submit_proof" => commands::payments::submit_proof(&state, &request.params).await,
        "decide_payment" => commands::payments::decide_payment(&state, &request.params).await,
        "get_payment" => commands::payments::get_payment(&state, &request.params).await,
        "list_pending_payments" => {
            commands::payments::list_pending_payments(&state, &request.params).await
        }

        // Access
        "get_subscription" => commands::access::get_subscription(&state, &request.params).await,
        "get_access_status" => commands::access::get_access_status(&state, &request.params).await,
        "get_history" => commands::access::get_history(&state, &request.params).await,

        _ => Err(RpcError::method_not_found(method)),
    };

    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(err) => RpcResponse::error(id, err),
    }
}
