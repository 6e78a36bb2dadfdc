//! Command routing between the host transport and the alert manager.

use crate::alert::AlertKind;
use crate::error::{AlertError, Result};
use crate::host::contract::{CommandEnvelope, CommandName, ResponseEnvelope};
use crate::manager::AlertStatus;
use serde::Deserialize;
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};

/// Payload of `alerts.add`.
///
/// Instants are RFC 3339 strings and must carry a UTC offset.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AddAlertRequest {
    pub expiration: String,
    pub id: Option<String>,
    pub name: Option<String>,
    pub kind: Option<AlertKind>,
    pub priority: Option<u8>,
    /// Seconds between occurrences.
    pub repeat_frequency: Option<u64>,
    /// Weekday numbers, Monday = 0.
    pub repeat_days: Option<Vec<u8>>,
    pub end_repeat: Option<String>,
    pub audio_file: Option<String>,
    pub script_filename: Option<String>,
    pub user: Option<String>,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
}

/// Operations the command server dispatches to.
pub trait AlertCommandHandler: Send + Sync + 'static {
    /// Create and schedule an alert; returns the response payload.
    fn add_alert(&self, request: AddAlertRequest) -> Result<serde_json::Value>;
    fn remove_alert(&self, id: &str) -> Result<()>;
    fn dismiss_alert(&self, id: &str) -> Result<()>;
    fn make_missed(&self, id: &str) -> Result<()>;
    /// Clear one missed alert, or all of them when `id` is `None`.
    /// Returns how many were cleared.
    fn clear_missed(&self, id: Option<&str>) -> Result<usize>;
    fn alert_status(&self, id: &str) -> Result<Option<AlertStatus>>;
    /// List alerts, optionally only those owned by `user`.
    fn list_alerts(&self, user: Option<&str>) -> Result<serde_json::Value>;
    fn request_runtime_stop(&self) -> Result<()> {
        Ok(())
    }
}

struct HostCommandRequest {
    envelope: CommandEnvelope,
    response_tx: oneshot::Sender<ResponseEnvelope>,
}

#[derive(Clone)]
pub struct HostCommandClient {
    request_tx: mpsc::Sender<HostCommandRequest>,
}

impl HostCommandClient {
    pub async fn send(&self, envelope: CommandEnvelope) -> Result<ResponseEnvelope> {
        if let Err(e) = envelope.validate() {
            return Ok(ResponseEnvelope::error(envelope.request_id, e.to_string()));
        }

        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(HostCommandRequest {
                envelope,
                response_tx,
            })
            .await
            .map_err(|e| AlertError::Channel(format!("failed to send host command request: {e}")))?;

        response_rx
            .await
            .map_err(|e| AlertError::Channel(format!("host command response dropped: {e}")))
    }
}

pub struct HostCommandServer<H: AlertCommandHandler> {
    request_rx: mpsc::Receiver<HostCommandRequest>,
    handler: H,
}

/// Create a client/server pair routing commands to `handler`.
///
/// Events travel separately: the manager's expiry callback publishes them
/// on a broadcast sender owned by the host.
#[must_use]
pub fn command_channel<H: AlertCommandHandler>(
    request_capacity: usize,
    handler: H,
) -> (HostCommandClient, HostCommandServer<H>) {
    let (request_tx, request_rx) = mpsc::channel(request_capacity.max(1));

    (
        HostCommandClient { request_tx },
        HostCommandServer {
            request_rx,
            handler,
        },
    )
}

impl<H: AlertCommandHandler> HostCommandServer<H> {
    pub async fn run(mut self) {
        while let Some(request) = self.request_rx.recv().await {
            let response = match self.route(&request.envelope) {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(
                        request_id = %request.envelope.request_id,
                        command = request.envelope.command.as_str(),
                        error = %e,
                        "host command failed"
                    );
                    ResponseEnvelope::error(request.envelope.request_id.clone(), e.to_string())
                }
            };
            let _ = request.response_tx.send(response);
        }
    }

    /// Route a command envelope to the handler.
    pub fn route(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let request_id = envelope.request_id.clone();
        let payload = &envelope.payload;
        match envelope.command {
            CommandName::HostPing => Ok(ResponseEnvelope::ok(
                request_id,
                serde_json::json!({"pong": true}),
            )),
            CommandName::RuntimeStop => {
                self.handler.request_runtime_stop()?;
                Ok(ResponseEnvelope::ok(
                    request_id,
                    serde_json::json!({"accepted": true}),
                ))
            }
            CommandName::AlertsAdd => {
                let request = parse_add_request(payload)?;
                let added = self.handler.add_alert(request)?;
                Ok(ResponseEnvelope::ok(request_id, added))
            }
            CommandName::AlertsRemove => {
                let id = parse_non_empty_field(payload, "id", "alerts.remove")?;
                self.handler.remove_alert(&id)?;
                Ok(ResponseEnvelope::ok(
                    request_id,
                    serde_json::json!({"id": id, "removed": true}),
                ))
            }
            CommandName::AlertsDismiss => {
                let id = parse_non_empty_field(payload, "id", "alerts.dismiss")?;
                self.handler.dismiss_alert(&id)?;
                Ok(ResponseEnvelope::ok(
                    request_id,
                    serde_json::json!({"id": id, "dismissed": true}),
                ))
            }
            CommandName::AlertsMakeMissed => {
                let id = parse_non_empty_field(payload, "id", "alerts.make_missed")?;
                self.handler.make_missed(&id)?;
                Ok(ResponseEnvelope::ok(
                    request_id,
                    serde_json::json!({"id": id, "status": AlertStatus::Missed}),
                ))
            }
            CommandName::AlertsClearMissed => {
                let id = parse_optional_field(payload, "id", "alerts.clear_missed")?;
                let cleared = self.handler.clear_missed(id.as_deref())?;
                Ok(ResponseEnvelope::ok(
                    request_id,
                    serde_json::json!({"cleared": cleared}),
                ))
            }
            CommandName::AlertsStatus => {
                let id = parse_non_empty_field(payload, "id", "alerts.status")?;
                let status = self.handler.alert_status(&id)?;
                Ok(ResponseEnvelope::ok(
                    request_id,
                    serde_json::json!({"id": id, "status": status}),
                ))
            }
            CommandName::AlertsList => {
                let user = parse_optional_field(payload, "user", "alerts.list")?;
                let listed = self.handler.list_alerts(user.as_deref())?;
                Ok(ResponseEnvelope::ok(request_id, listed))
            }
        }
    }
}

fn parse_add_request(payload: &serde_json::Value) -> Result<AddAlertRequest> {
    if !payload.is_object() {
        return Err(AlertError::InvalidAlert(
            "alerts.add requires an object payload".to_owned(),
        ));
    }
    serde_json::from_value(payload.clone())
        .map_err(|e| AlertError::InvalidAlert(format!("alerts.add payload: {e}")))
}

fn parse_non_empty_field(
    payload: &serde_json::Value,
    field: &str,
    command: &str,
) -> Result<String> {
    let Some(raw) = payload.get(field).and_then(serde_json::Value::as_str) else {
        return Err(AlertError::InvalidAlert(format!(
            "{command} requires payload.{field}"
        )));
    };
    let value = raw.trim();
    if value.is_empty() {
        return Err(AlertError::InvalidAlert(format!(
            "{command} requires a non-empty payload.{field}"
        )));
    }
    Ok(value.to_owned())
}

fn parse_optional_field(
    payload: &serde_json::Value,
    field: &str,
    command: &str,
) -> Result<Option<String>> {
    match payload.get(field) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(raw)) => {
            let value = raw.trim();
            if value.is_empty() {
                return Err(AlertError::InvalidAlert(format!(
                    "{command} payload.{field} cannot be empty when provided"
                )));
            }
            Ok(Some(value.to_owned()))
        }
        Some(_) => Err(AlertError::InvalidAlert(format!(
            "{command} payload.{field} must be a string when provided"
        ))),
    }
}
