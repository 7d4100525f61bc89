use crate::{
    bus::{EventSubscription, HassBus, ServiceCall, ServiceCallError},
    codes::{CodeQuery, CodeStore, CodesError},
    labels::sanitize_label,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, Weak};

pub const DOMAIN: &str = "hassbeam_connect";

/// Event type fired by ESPHome HassBeam devices when an IR code is received.
pub const IR_EVENT_TYPE: &str = "esphome.hassbeam.ir_received";

pub const CODE_SAVED_EVENT: &str = "hassbeam_connect_code_saved";
pub const CODES_RETRIEVED_EVENT: &str = "hassbeam_connect_codes_retrieved";
pub const CODE_DELETED_EVENT: &str = "hassbeam_connect_code_deleted";

pub const START_LISTENING_SERVICE: &str = "start_listening";
pub const GET_RECENT_CODES_SERVICE: &str = "get_recent_codes";
pub const SAVE_IR_CODE_SERVICE: &str = "save_ir_code";
pub const DELETE_IR_CODE_SERVICE: &str = "delete_ir_code";

/// Payload of [`CODE_SAVED_EVENT`]. Carries the raw labels the user typed,
/// not the sanitized storage keys, so cards display what was entered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CodeSavedEvent {
    pub device: String,
    pub action: String,
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingListen {
    device: String,
    action: String,
}

struct ConnectInner {
    store: Mutex<CodeStore>,
    pending: Mutex<Option<PendingListen>>,
}

/// The backend collaborator: owns the code store, registers the
/// `hassbeam_connect.*` services on the bus, and turns device IR events into
/// saved codes while a capture is armed.
pub struct ConnectService {
    inner: Arc<ConnectInner>,
    ir_subscription: Mutex<Option<EventSubscription>>,
}

impl ConnectService {
    /// Registers services and the device-event listener on the bus.
    ///
    /// Handlers hold only a weak bus reference; the bus stores the handlers,
    /// so a strong reference would keep it alive forever.
    pub fn setup(bus: &Arc<HassBus>, store: CodeStore) -> Self {
        let inner = Arc::new(ConnectInner {
            store: Mutex::new(store),
            pending: Mutex::new(None),
        });
        let bus_weak = Arc::downgrade(bus);

        {
            let inner = inner.clone();
            bus.register_service(
                DOMAIN,
                START_LISTENING_SERVICE,
                Arc::new(move |call: &ServiceCall| handle_start_listening(&inner, call)),
            );
        }
        {
            let inner = inner.clone();
            let bus_weak = bus_weak.clone();
            bus.register_service(
                DOMAIN,
                GET_RECENT_CODES_SERVICE,
                Arc::new(move |call: &ServiceCall| {
                    handle_get_recent_codes(&inner, &bus_weak, call)
                }),
            );
        }
        {
            let inner = inner.clone();
            let bus_weak = bus_weak.clone();
            bus.register_service(
                DOMAIN,
                SAVE_IR_CODE_SERVICE,
                Arc::new(move |call: &ServiceCall| handle_save_ir_code(&inner, &bus_weak, call)),
            );
        }
        {
            let inner = inner.clone();
            let bus_weak = bus_weak.clone();
            bus.register_service(
                DOMAIN,
                DELETE_IR_CODE_SERVICE,
                Arc::new(move |call: &ServiceCall| handle_delete_ir_code(&inner, &bus_weak, call)),
            );
        }

        let ir_subscription = {
            let inner = inner.clone();
            let bus_weak = bus_weak.clone();
            bus.subscribe(
                IR_EVENT_TYPE,
                Arc::new(move |data: &Value| {
                    // Device chatter with no armed capture is ignored.
                    let pending = inner.pending.lock().unwrap_or_else(|e| e.into_inner()).take();
                    let Some(pending) = pending else {
                        return;
                    };
                    let _ = save_and_notify(
                        &inner,
                        &bus_weak,
                        &pending.device,
                        &pending.action,
                        data.clone(),
                    );
                }),
            )
        };

        Self {
            inner,
            ir_subscription: Mutex::new(Some(ir_subscription)),
        }
    }

    /// Removes the registered services and the device-event listener,
    /// mirroring an integration unload.
    pub fn unload(&self, bus: &HassBus) {
        bus.remove_service(DOMAIN, START_LISTENING_SERVICE);
        bus.remove_service(DOMAIN, GET_RECENT_CODES_SERVICE);
        bus.remove_service(DOMAIN, SAVE_IR_CODE_SERVICE);
        bus.remove_service(DOMAIN, DELETE_IR_CODE_SERVICE);
        let subscription = self
            .ir_subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(subscription) = subscription {
            bus.unsubscribe(subscription);
        }
    }

    pub fn has_pending_capture(&self) -> bool {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn stored_code_count(&self) -> usize {
        self.inner
            .store
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

fn handle_start_listening(
    inner: &Arc<ConnectInner>,
    call: &ServiceCall,
) -> Result<Value, ServiceCallError> {
    let device = required_label(&call.data, "device", "Device is required")?;
    let action = required_label(&call.data, "action", "Action is required")?;

    // Last writer wins: a second start_listening re-arms the single slot.
    let mut pending = inner.pending.lock().unwrap_or_else(|e| e.into_inner());
    *pending = Some(PendingListen { device, action });
    Ok(json!({}))
}

fn handle_get_recent_codes(
    inner: &Arc<ConnectInner>,
    bus: &Weak<HassBus>,
    call: &ServiceCall,
) -> Result<Value, ServiceCallError> {
    let mut query: CodeQuery = serde_json::from_value(call.data.clone())
        .map_err(|err| ServiceCallError::Rejected(format!("Invalid query: {err}")))?;
    query.device = query.device.as_deref().map(sanitize_label);
    query.action = query.action.as_deref().map(sanitize_label);

    let records = inner
        .store
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .query(&query);
    let codes = serde_json::to_value(&records).unwrap_or(Value::Array(Vec::new()));

    if let Some(bus) = bus.upgrade() {
        bus.fire(CODES_RETRIEVED_EVENT, json!({ "codes": codes.clone() }));
    }
    Ok(json!({ "codes": codes }))
}

fn handle_save_ir_code(
    inner: &Arc<ConnectInner>,
    bus: &Weak<HassBus>,
    call: &ServiceCall,
) -> Result<Value, ServiceCallError> {
    let Some(device_raw) = optional_label(&call.data, "device") else {
        return Ok(failure_response("Device is required"));
    };
    let Some(action_raw) = optional_label(&call.data, "action") else {
        return Ok(failure_response("Action is required"));
    };
    let event_data = match call.data.get("eventData") {
        None | Some(Value::Null) => return Ok(failure_response("Event data is required")),
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(parsed) => parsed,
            Err(_) => return Ok(failure_response("Invalid JSON in event data")),
        },
        Some(other) => other.clone(),
    };

    Ok(save_and_notify(inner, bus, &device_raw, &action_raw, event_data))
}

fn handle_delete_ir_code(
    inner: &Arc<ConnectInner>,
    bus: &Weak<HassBus>,
    call: &ServiceCall,
) -> Result<Value, ServiceCallError> {
    let id = match call.data.get("id") {
        None | Some(Value::Null) => return Ok(failure_response("ID is required")),
        Some(Value::Number(number)) => match number.as_u64() {
            Some(id) => id,
            None => return Ok(failure_response("Invalid ID format")),
        },
        Some(Value::String(raw)) => match raw.trim().parse::<u64>() {
            Ok(id) => id,
            Err(_) => return Ok(failure_response("Invalid ID format")),
        },
        Some(_) => return Ok(failure_response("Invalid ID format")),
    };

    let deleted = inner
        .store
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .delete(id);
    let response = match deleted {
        Ok(true) => {
            fire(bus, CODE_DELETED_EVENT, json!({ "id": id, "success": true }));
            json!({ "success": true, "id": id })
        }
        Ok(false) => {
            let message = format!("No IR code found with ID {id}");
            fire(
                bus,
                CODE_DELETED_EVENT,
                json!({ "id": id, "success": false, "error": message }),
            );
            failure_response(&message)
        }
        Err(err) => {
            let message = err.to_string();
            fire(
                bus,
                CODE_DELETED_EVENT,
                json!({ "id": id, "success": false, "error": message }),
            );
            failure_response(&message)
        }
    };
    Ok(response)
}

/// Saves a code under sanitized labels and fires the saved event with the
/// raw labels, succeeding or not. Returns the service response payload.
fn save_and_notify(
    inner: &Arc<ConnectInner>,
    bus: &Weak<HassBus>,
    device_raw: &str,
    action_raw: &str,
    event_data: Value,
) -> Value {
    let device = sanitize_label(device_raw);
    let action = sanitize_label(action_raw);

    let saved = inner
        .store
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .save(&device, &action, event_data);
    match saved {
        Ok(_) => {
            fire(
                bus,
                CODE_SAVED_EVENT,
                json!({ "device": device_raw, "action": action_raw, "success": true }),
            );
            json!({ "success": true, "device": device_raw, "action": action_raw })
        }
        Err(err) => {
            let message = match err {
                CodesError::Duplicate { .. } => format!(
                    "IR code for {device_raw}.{action_raw} (sanitized: {device}.{action}) already exists"
                ),
                other => other.to_string(),
            };
            fire(
                bus,
                CODE_SAVED_EVENT,
                json!({
                    "device": device_raw,
                    "action": action_raw,
                    "success": false,
                    "error": message,
                }),
            );
            failure_response(&message)
        }
    }
}

fn fire(bus: &Weak<HassBus>, event_type: &str, data: Value) {
    if let Some(bus) = bus.upgrade() {
        bus.fire(event_type, data);
    }
}

fn failure_response(message: &str) -> Value {
    json!({ "success": false, "error": message })
}

fn required_label(
    data: &Value,
    key: &str,
    message: &str,
) -> Result<String, ServiceCallError> {
    optional_label(data, key).ok_or_else(|| ServiceCallError::Rejected(message.to_string()))
}

fn optional_label(data: &Value, key: &str) -> Option<String> {
    data.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
