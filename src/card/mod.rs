use crate::{
    bus::{EventSubscription, HassBus},
    codes::IrCodeRecord,
    connect::{self, CodeSavedEvent},
    settings::CardConfig,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio_util::sync::CancellationToken;

pub mod render;

const VALIDATION_MESSAGE: &str = "Device and action are required.";
const TIMEOUT_MESSAGE: &str = "No IR code was received before the listen timeout expired.";
const SAVE_FAILED_MESSAGE: &str = "Saving the IR code failed.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CardState {
    Idle,
    Listening,
    Success,
    Error,
}

/// Opt-in behavior changes for a capture card.
///
/// The defaults reproduce the platform card faithfully: a listening card
/// waits forever, and a saved event is matched by type alone, so two cards
/// listening at once cannot tell their completions apart. Both knobs exist
/// only on this API, never on the dashboard configuration object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureOptions {
    pub listen_timeout: Option<Duration>,
    pub correlate_by_labels: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCapture {
    pub session_id: u64,
    pub device: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Validation failed; the message is already on the status line.
    Rejected,
    /// The start-listening call was accepted by the service bus.
    Dispatched(PendingCapture),
    /// The start-listening call rejected; the card shows the message.
    CallFailed {
        pending: PendingCapture,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IrCodeSummary {
    pub id: u64,
    pub device: String,
    pub action: String,
    pub created_at_utc_ms: u64,
}

impl From<&IrCodeRecord> for IrCodeSummary {
    fn from(record: &IrCodeRecord) -> Self {
        Self {
            id: record.id,
            device: record.device.clone(),
            action: record.action.clone(),
            created_at_utc_ms: record.created_at_utc_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum RecentCodes {
    #[default]
    NotLoaded,
    Loaded(Vec<IrCodeSummary>),
    Unavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecentView {
    pub available: bool,
    pub codes: Vec<IrCodeSummary>,
}

/// Pure snapshot of everything the card renders. Produced by
/// [`CaptureCard::view`] and consumed by [`render::render_card`], so the
/// state machine is testable without a DOM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CardView {
    pub title: String,
    pub state: CardState,
    pub device: String,
    pub action: String,
    pub status: String,
    pub submit_enabled: bool,
    pub recent: RecentView,
}

/// Capture card state machine.
///
/// All transitions are synchronous methods; the surrounding [`CardBinding`]
/// wires them to the service bus. One capture is in flight at most: the
/// submit control is disabled while `Listening`, and `Success`/`Error` are
/// terminal per attempt until the next submit or an explicit clear.
pub struct CaptureCard {
    config: CardConfig,
    options: CaptureOptions,
    state: CardState,
    device_input: String,
    action_input: String,
    status_line: String,
    pending: Option<PendingCapture>,
    recent: RecentCodes,
    session_counter: u64,
}

impl CaptureCard {
    pub fn new(config: CardConfig) -> Self {
        Self {
            config,
            options: CaptureOptions::default(),
            state: CardState::Idle,
            device_input: String::new(),
            action_input: String::new(),
            status_line: String::new(),
            pending: None,
            recent: RecentCodes::NotLoaded,
            session_counter: 0,
        }
    }

    pub fn with_options(mut self, options: CaptureOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    pub fn set_config(&mut self, config: CardConfig) {
        self.config = config;
    }

    pub fn set_input(&mut self, device: &str, action: &str) {
        self.device_input = device.to_string();
        self.action_input = action.to_string();
    }

    pub fn state(&self) -> &CardState {
        &self.state
    }

    /// Validates the input fields and, when both labels survive trimming,
    /// moves to `Listening` and hands back the request to dispatch. The
    /// transition happens before the remote call settles.
    pub fn begin_submit(&mut self) -> Option<PendingCapture> {
        if self.state == CardState::Listening {
            return None;
        }

        let device = self.device_input.trim().to_string();
        let action = self.action_input.trim().to_string();
        if device.is_empty() || action.is_empty() {
            self.state = CardState::Idle;
            self.status_line = VALIDATION_MESSAGE.to_string();
            return None;
        }

        self.session_counter += 1;
        let pending = PendingCapture {
            session_id: self.session_counter,
            device: device.clone(),
            action: action.clone(),
        };
        self.state = CardState::Listening;
        self.status_line = format!(
            "Listening for IR codes for {device}.{action}. Press the button on the remote now."
        );
        self.pending = Some(pending.clone());
        Some(pending)
    }

    /// The start-listening call rejected. The backend message is shown
    /// verbatim and no retry is attempted.
    pub fn call_failed(&mut self, message: &str) {
        if self.state != CardState::Listening {
            return;
        }
        self.state = CardState::Error;
        self.pending = None;
        self.status_line = message.to_string();
    }

    /// Handles a saved event from the bus. Completion is correlated by event
    /// type only, unless label correlation was opted in. Returns true when
    /// the event was consumed by this card.
    pub fn handle_event(&mut self, event: &CodeSavedEvent) -> bool {
        if self.state != CardState::Listening {
            return false;
        }
        if self.options.correlate_by_labels {
            let matches = self
                .pending
                .as_ref()
                .is_some_and(|pending| pending.device == event.device && pending.action == event.action);
            if !matches {
                return false;
            }
        }

        self.pending = None;
        if event.success {
            self.state = CardState::Success;
            // The device field stays put so several actions for the same
            // device can be captured back to back.
            self.action_input.clear();
            self.status_line = format!("IR code for {}.{} saved.", event.device, event.action);
        } else {
            self.state = CardState::Error;
            self.status_line = event
                .error
                .clone()
                .unwrap_or_else(|| SAVE_FAILED_MESSAGE.to_string());
        }
        true
    }

    /// Watchdog transition for the opt-in listen timeout. Returns true when
    /// the card was still waiting on the given session.
    pub fn on_listen_timeout(&mut self, session_id: u64) -> bool {
        let waiting = self.state == CardState::Listening
            && self
                .pending
                .as_ref()
                .is_some_and(|pending| pending.session_id == session_id);
        if !waiting {
            return false;
        }
        self.state = CardState::Error;
        self.pending = None;
        self.status_line = TIMEOUT_MESSAGE.to_string();
        true
    }

    /// Resets fields, status, and state locally. Never touches the backend.
    pub fn clear(&mut self) {
        self.state = CardState::Idle;
        self.device_input.clear();
        self.action_input.clear();
        self.status_line.clear();
        self.pending = None;
    }

    pub fn set_recent_codes(&mut self, records: &[IrCodeRecord]) {
        self.recent = RecentCodes::Loaded(records.iter().map(IrCodeSummary::from).collect());
    }

    pub fn set_recent_unavailable(&mut self) {
        self.recent = RecentCodes::Unavailable;
    }

    pub fn view(&self) -> CardView {
        let recent = match &self.recent {
            RecentCodes::NotLoaded => RecentView {
                available: true,
                codes: Vec::new(),
            },
            RecentCodes::Loaded(codes) => RecentView {
                available: true,
                codes: codes.clone(),
            },
            RecentCodes::Unavailable => RecentView {
                available: false,
                codes: Vec::new(),
            },
        };
        CardView {
            title: self.config.resolved_title().to_string(),
            state: self.state.clone(),
            device: self.device_input.clone(),
            action: self.action_input.clone(),
            status: self.status_line.clone(),
            submit_enabled: self.state != CardState::Listening,
            recent,
        }
    }
}

/// Owns the card's place on the service bus: the single saved-event
/// subscription, the start-listening dispatch, and the optional timeout
/// watchdog.
pub struct CardBinding {
    bus: Arc<HassBus>,
    card: Arc<Mutex<CaptureCard>>,
    subscription: Mutex<Option<EventSubscription>>,
    timeout_token: Arc<Mutex<Option<CancellationToken>>>,
}

impl CardBinding {
    pub fn new(bus: Arc<HassBus>, card: CaptureCard) -> Self {
        Self {
            bus,
            card: Arc::new(Mutex::new(card)),
            subscription: Mutex::new(None),
            timeout_token: Arc::new(Mutex::new(None)),
        }
    }

    /// Establishes the saved-event subscription. Attaching an already
    /// attached card first releases the previous registration, so re-entrant
    /// attach never stacks duplicate listeners.
    pub fn attach(&self) {
        self.release_subscription();

        let card = self.card.clone();
        let timeout_token = self.timeout_token.clone();
        let subscription = self.bus.subscribe(
            connect::CODE_SAVED_EVENT,
            Arc::new(move |data: &Value| {
                let Ok(event) = serde_json::from_value::<CodeSavedEvent>(data.clone()) else {
                    return;
                };
                let accepted = {
                    let mut card = card.lock().unwrap_or_else(|e| e.into_inner());
                    card.handle_event(&event)
                };
                if accepted {
                    let token = timeout_token
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .take();
                    if let Some(token) = token {
                        token.cancel();
                    }
                }
            }),
        );
        *self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(subscription);
    }

    /// Releases the event subscription. A detached card no longer reacts to
    /// saved events, synthetic or real.
    pub fn detach(&self) {
        self.release_subscription();
        self.cancel_timeout();
    }

    pub fn is_attached(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn set_config(&self, config: CardConfig) {
        self.lock_card().set_config(config);
    }

    pub fn set_input(&self, device: &str, action: &str) {
        self.lock_card().set_input(device, action);
    }

    /// Validates and dispatches one start-listening call. A rejected call
    /// reverts the card and shows the backend message; nothing is retried.
    /// The opt-in listen timeout spawns its watchdog on the ambient Tokio
    /// runtime, so callers using that option must run inside one.
    pub fn submit(&self) -> SubmitOutcome {
        let (pending, options) = {
            let mut card = self.lock_card();
            match card.begin_submit() {
                Some(pending) => (pending, card.options().clone()),
                None => return SubmitOutcome::Rejected,
            }
        };

        let payload = json!({
            "device": pending.device,
            "action": pending.action,
        });
        match self
            .bus
            .call_service(connect::DOMAIN, connect::START_LISTENING_SERVICE, payload)
        {
            Ok(_) => {
                if let Some(timeout) = options.listen_timeout {
                    self.arm_listen_timeout(pending.session_id, timeout);
                }
                SubmitOutcome::Dispatched(pending)
            }
            Err(err) => {
                let message = err.to_string();
                self.lock_card().call_failed(&message);
                SubmitOutcome::CallFailed { pending, message }
            }
        }
    }

    /// Refreshes the recent-codes list. A failing service call degrades the
    /// list to a placeholder instead of surfacing an error.
    pub fn load_recent(&self) {
        let response = self.bus.call_service(
            connect::DOMAIN,
            connect::GET_RECENT_CODES_SERVICE,
            json!({}),
        );
        let mut card = self.lock_card();
        match response {
            Ok(value) => {
                let codes = value.get("codes").cloned().unwrap_or(Value::Array(Vec::new()));
                match serde_json::from_value::<Vec<IrCodeRecord>>(codes) {
                    Ok(records) => card.set_recent_codes(&records),
                    Err(_) => card.set_recent_unavailable(),
                }
            }
            Err(_) => card.set_recent_unavailable(),
        }
    }

    pub fn clear(&self) {
        self.cancel_timeout();
        self.lock_card().clear();
    }

    pub fn view(&self) -> CardView {
        self.lock_card().view()
    }

    fn arm_listen_timeout(&self, session_id: u64, timeout: Duration) {
        let token = CancellationToken::new();
        {
            let mut slot = self.timeout_token.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(previous) = slot.replace(token.clone()) {
                previous.cancel();
            }
        }

        let card = self.card.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    let mut card = card.lock().unwrap_or_else(|e| e.into_inner());
                    card.on_listen_timeout(session_id);
                }
            }
        });
    }

    fn release_subscription(&self) {
        let previous = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(subscription) = previous {
            self.bus.unsubscribe(subscription);
        }
    }

    fn cancel_timeout(&self) {
        let token = self
            .timeout_token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(token) = token {
            token.cancel();
        }
    }

    fn lock_card(&self) -> MutexGuard<'_, CaptureCard> {
        self.card.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saved_event(device: &str, action: &str) -> CodeSavedEvent {
        CodeSavedEvent {
            device: device.to_string(),
            action: action.to_string(),
            success: true,
            error: None,
        }
    }

    #[test]
    fn empty_fields_reject_with_inline_message() {
        let mut card = CaptureCard::new(CardConfig::default());
        card.set_input("  ", "power");
        assert!(card.begin_submit().is_none());
        assert_eq!(*card.state(), CardState::Idle);
        assert_eq!(card.view().status, VALIDATION_MESSAGE);

        card.set_input("tv", "   ");
        assert!(card.begin_submit().is_none());
        assert_eq!(*card.state(), CardState::Idle);
    }

    #[test]
    fn submit_moves_to_listening_with_both_labels_in_status() {
        let mut card = CaptureCard::new(CardConfig::default());
        card.set_input("AC", "volume_up");
        let pending = card.begin_submit().expect("valid input dispatches");

        assert_eq!(pending.device, "AC");
        assert_eq!(pending.action, "volume_up");
        let view = card.view();
        assert_eq!(view.state, CardState::Listening);
        assert!(!view.submit_enabled);
        assert!(view.status.contains("AC"));
        assert!(view.status.contains("volume_up"));
    }

    #[test]
    fn submit_while_listening_is_ignored() {
        let mut card = CaptureCard::new(CardConfig::default());
        card.set_input("tv", "power");
        assert!(card.begin_submit().is_some());
        assert!(card.begin_submit().is_none());
        assert_eq!(*card.state(), CardState::Listening);
    }

    #[test]
    fn saved_event_clears_action_and_keeps_device() {
        let mut card = CaptureCard::new(CardConfig::default());
        card.set_input("tv", "power");
        card.begin_submit().expect("dispatch");

        assert!(card.handle_event(&saved_event("tv", "power")));
        let view = card.view();
        assert_eq!(view.state, CardState::Success);
        assert_eq!(view.device, "tv");
        assert_eq!(view.action, "");
        assert!(view.submit_enabled);
    }

    #[test]
    fn saved_event_is_ignored_unless_listening() {
        let mut card = CaptureCard::new(CardConfig::default());
        card.set_input("tv", "power");
        assert!(!card.handle_event(&saved_event("tv", "power")));
        assert_eq!(*card.state(), CardState::Idle);
    }

    #[test]
    fn failed_save_event_shows_backend_error_verbatim() {
        let mut card = CaptureCard::new(CardConfig::default());
        card.set_input("tv", "power");
        card.begin_submit().expect("dispatch");

        let event = CodeSavedEvent {
            device: "tv".to_string(),
            action: "power".to_string(),
            success: false,
            error: Some("IR code for tv.power already exists".to_string()),
        };
        assert!(card.handle_event(&event));
        let view = card.view();
        assert_eq!(view.state, CardState::Error);
        assert_eq!(view.status, "IR code for tv.power already exists");
        assert!(view.submit_enabled);
    }

    #[test]
    fn type_only_matching_accepts_foreign_labels_by_default() {
        let mut card = CaptureCard::new(CardConfig::default());
        card.set_input("tv", "power");
        card.begin_submit().expect("dispatch");

        // There is no request id on the wire: whatever saved event arrives
        // while listening completes the attempt.
        assert!(card.handle_event(&saved_event("soundbar", "mute")));
        assert_eq!(*card.state(), CardState::Success);
    }

    #[test]
    fn label_correlation_opt_in_filters_foreign_events() {
        let mut card = CaptureCard::new(CardConfig::default()).with_options(CaptureOptions {
            correlate_by_labels: true,
            ..CaptureOptions::default()
        });
        card.set_input("tv", "power");
        card.begin_submit().expect("dispatch");

        assert!(!card.handle_event(&saved_event("soundbar", "mute")));
        assert_eq!(*card.state(), CardState::Listening);
        assert!(card.handle_event(&saved_event("tv", "power")));
        assert_eq!(*card.state(), CardState::Success);
    }

    #[test]
    fn call_failure_reverts_to_error_with_message() {
        let mut card = CaptureCard::new(CardConfig::default());
        card.set_input("tv", "power");
        card.begin_submit().expect("dispatch");

        card.call_failed("service hassbeam_connect.start_listening is not registered");
        let view = card.view();
        assert_eq!(view.state, CardState::Error);
        assert_eq!(
            view.status,
            "service hassbeam_connect.start_listening is not registered"
        );
        assert!(view.submit_enabled);
    }

    #[test]
    fn clear_resets_everything_locally() {
        let mut card = CaptureCard::new(CardConfig::default());
        card.set_input("tv", "power");
        card.begin_submit().expect("dispatch");
        card.handle_event(&saved_event("tv", "power"));

        card.clear();
        let view = card.view();
        assert_eq!(view.state, CardState::Idle);
        assert_eq!(view.device, "");
        assert_eq!(view.action, "");
        assert_eq!(view.status, "");
    }

    #[test]
    fn listen_timeout_only_fires_for_the_pending_session() {
        let mut card = CaptureCard::new(CardConfig::default()).with_options(CaptureOptions {
            listen_timeout: Some(Duration::from_millis(50)),
            ..CaptureOptions::default()
        });
        card.set_input("tv", "power");
        let pending = card.begin_submit().expect("dispatch");

        assert!(!card.on_listen_timeout(pending.session_id + 1));
        assert_eq!(*card.state(), CardState::Listening);

        assert!(card.on_listen_timeout(pending.session_id));
        let view = card.view();
        assert_eq!(view.state, CardState::Error);
        assert_eq!(view.status, TIMEOUT_MESSAGE);
    }

    #[test]
    fn validation_failure_returns_terminal_states_to_idle() {
        let mut card = CaptureCard::new(CardConfig::default());
        card.set_input("tv", "power");
        card.begin_submit().expect("dispatch");
        card.handle_event(&saved_event("tv", "power"));
        assert_eq!(*card.state(), CardState::Success);

        // Action was cleared on success; submitting again without typing a
        // new action is a validation failure.
        assert!(card.begin_submit().is_none());
        assert_eq!(*card.state(), CardState::Idle);
    }
}
