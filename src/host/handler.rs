//! Production command handler backed by an [`AlertManager`].

use crate::alert::{Alert, Recurrence, USER_KEY, parse_instant};
use crate::config::AlertDefaults;
use crate::error::{AlertError, Result};
use crate::host::channel::{AddAlertRequest, AlertCommandHandler};
use crate::host::contract::{EVENT_ALERT_EXPIRED, EventEnvelope};
use crate::manager::{AlertManager, AlertStatus, ExpiredCallback};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Dispatches host commands to a shared [`AlertManager`].
pub struct ManagerCommandHandler {
    manager: Arc<AlertManager>,
    defaults: AlertDefaults,
}

impl ManagerCommandHandler {
    pub fn new(manager: Arc<AlertManager>, defaults: AlertDefaults) -> Self {
        Self { manager, defaults }
    }

    fn build_alert(&self, request: AddAlertRequest) -> Result<Alert> {
        let expiration = parse_instant(&request.expiration)?;
        let recurrence = Recurrence::from_wire(request.repeat_frequency, request.repeat_days)?;
        let has_user = request.context.contains_key(USER_KEY);

        let mut builder = Alert::builder(expiration)
            .context(request.context)
            .kind(request.kind.unwrap_or_default())
            .priority(request.priority.unwrap_or(self.defaults.priority))
            .recurrence(recurrence);

        if let Some(id) = request.id {
            builder = builder.id(id);
        }
        if let Some(name) = request.name {
            builder = builder.name(name);
        }
        if let Some(end) = request.end_repeat {
            builder = builder.end_repeat(parse_instant(&end)?);
        }
        if let Some(audio) = request.audio_file {
            builder = builder.audio_file(audio);
        }
        if let Some(script) = request.script_filename {
            builder = builder.script_reference(script);
        }
        match request.user {
            Some(user) => builder = builder.user(user),
            None if !has_user => builder = builder.user(self.defaults.user.clone()),
            None => {}
        }

        builder.build()
    }
}

impl AlertCommandHandler for ManagerCommandHandler {
    fn add_alert(&self, request: AddAlertRequest) -> Result<serde_json::Value> {
        let alert = self.build_alert(request)?;
        let id = self.manager.add(alert)?;
        let next = self
            .manager
            .get(&id)
            .filter(|(status, _)| *status == AlertStatus::Pending)
            .map(|(_, alert)| alert.to_record().next_expiration_time);
        Ok(serde_json::json!({
            "id": id,
            "status": AlertStatus::Pending,
            "next_expiration": next,
        }))
    }

    fn remove_alert(&self, id: &str) -> Result<()> {
        if self.manager.remove(id) {
            Ok(())
        } else {
            Err(AlertError::UnknownAlertId(format!("{id} is not pending")))
        }
    }

    fn dismiss_alert(&self, id: &str) -> Result<()> {
        if self.manager.dismiss(id) {
            Ok(())
        } else {
            Err(AlertError::UnknownAlertId(format!("{id} is not active")))
        }
    }

    fn make_missed(&self, id: &str) -> Result<()> {
        if self.manager.make_missed(id) {
            Ok(())
        } else {
            Err(AlertError::UnknownAlertId(format!("{id} is not active")))
        }
    }

    fn clear_missed(&self, id: Option<&str>) -> Result<usize> {
        match id {
            Some(id) if self.manager.clear_missed(id) => Ok(1),
            Some(id) => Err(AlertError::UnknownAlertId(format!("{id} is not missed"))),
            None => Ok(self.manager.clear_all_missed()),
        }
    }

    fn alert_status(&self, id: &str) -> Result<Option<AlertStatus>> {
        Ok(self.manager.get_status(id))
    }

    fn list_alerts(&self, user: Option<&str>) -> Result<serde_json::Value> {
        let snapshot = self.manager.snapshot();
        let entries: Vec<serde_json::Value> = snapshot
            .iter()
            .filter(|(_, alert)| user.is_none_or(|u| alert.user() == u))
            .map(|(status, alert)| alert_json(status, alert))
            .collect();
        Ok(serde_json::json!({ "alerts": entries }))
    }

    fn request_runtime_stop(&self) -> Result<()> {
        info!("runtime.stop requested by collaborator");
        Ok(())
    }
}

/// JSON view of one alert for `alerts.list` and `alert.expired`.
#[must_use]
pub fn alert_json(status: AlertStatus, alert: &Alert) -> serde_json::Value {
    serde_json::json!({
        "id": alert.id(),
        "status": status,
        "name": alert.name(),
        "kind": alert.kind(),
        "priority": alert.priority(),
        "user": alert.user(),
        "recurring": alert.is_recurring(),
        "record": alert.to_record(),
    })
}

/// Build the `alert.expired` event for a fired occurrence.
#[must_use]
pub fn expired_event(alert: &Alert) -> EventEnvelope {
    EventEnvelope::new(
        uuid::Uuid::new_v4().to_string(),
        EVENT_ALERT_EXPIRED,
        alert_json(AlertStatus::Active, alert),
    )
}

/// Expiry callback that publishes [`expired_event`] on `event_tx`.
pub fn broadcast_expired(event_tx: broadcast::Sender<EventEnvelope>) -> ExpiredCallback {
    Box::new(move |alert: &Alert| {
        if event_tx.send(expired_event(alert)).is_err() {
            debug!(alert_id = %alert.id(), "no subscribers for alert.expired");
        }
    })
}
