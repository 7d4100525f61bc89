use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

/// In-process model of the host platform's service and event surface.
///
/// Cards call registered services and subscribe to broadcast events; the
/// connect service layer sits on the other side of the same bus. Event
/// dispatch is synchronous and unordered across listeners.
#[derive(Default)]
pub struct HassBus {
    next_listener_id: AtomicU64,
    listeners: Mutex<HashMap<String, Vec<(u64, EventListener)>>>,
    services: Mutex<HashMap<String, ServiceHandler>>,
}

pub type EventListener = Arc<dyn Fn(&Value) + Send + Sync>;
pub type ServiceHandler =
    Arc<dyn Fn(&ServiceCall) -> Result<Value, ServiceCallError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub data: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceCallError {
    #[error("service {domain}.{service} is not registered")]
    UnknownService { domain: String, service: String },
    #[error("{0}")]
    Rejected(String),
}

/// Live registration for one event type. Release it with
/// [`HassBus::unsubscribe`]; dropping the handle alone does not detach the
/// listener.
#[derive(Debug)]
pub struct EventSubscription {
    event_type: String,
    id: u64,
}

impl EventSubscription {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }
}

impl HassBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_service(&self, domain: &str, service: &str, handler: ServiceHandler) {
        let mut services = self.services.lock().unwrap_or_else(|e| e.into_inner());
        services.insert(service_key(domain, service), handler);
    }

    pub fn remove_service(&self, domain: &str, service: &str) {
        let mut services = self.services.lock().unwrap_or_else(|e| e.into_inner());
        services.remove(&service_key(domain, service));
    }

    /// Invokes a registered service handler and resolves with its response.
    ///
    /// The handler runs outside the service table lock so it may call back
    /// into the bus (fire events, call other services).
    pub fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: Value,
    ) -> Result<Value, ServiceCallError> {
        let handler = {
            let services = self.services.lock().unwrap_or_else(|e| e.into_inner());
            services.get(&service_key(domain, service)).cloned()
        };
        let Some(handler) = handler else {
            return Err(ServiceCallError::UnknownService {
                domain: domain.to_string(),
                service: service.to_string(),
            });
        };
        handler(&ServiceCall {
            domain: domain.to_string(),
            service: service.to_string(),
            data,
        })
    }

    pub fn subscribe(&self, event_type: &str, listener: EventListener) -> EventSubscription {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners
            .entry(event_type.to_string())
            .or_default()
            .push((id, listener));
        EventSubscription {
            event_type: event_type.to_string(),
            id,
        }
    }

    pub fn unsubscribe(&self, subscription: EventSubscription) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(rows) = listeners.get_mut(&subscription.event_type) {
            rows.retain(|(id, _)| *id != subscription.id);
            if rows.is_empty() {
                listeners.remove(&subscription.event_type);
            }
        }
    }

    /// Broadcasts an event to every live listener of its type.
    ///
    /// Listeners are cloned out of the table before invocation so a listener
    /// may re-enter the bus (the connect service fires follow-up events from
    /// inside its device-event listener).
    pub fn fire(&self, event_type: &str, data: Value) {
        let snapshot: Vec<EventListener> = {
            let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            listeners
                .get(event_type)
                .map(|rows| rows.iter().map(|(_, l)| l.clone()).collect())
                .unwrap_or_default()
        };
        for listener in snapshot {
            listener(&data);
        }
    }

    pub fn listener_count(&self, event_type: &str) -> usize {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.get(event_type).map(Vec::len).unwrap_or(0)
    }
}

fn service_key(domain: &str, service: &str) -> String {
    format!("{domain}.{service}")
}
