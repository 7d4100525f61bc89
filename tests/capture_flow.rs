use hassbeam_connect_lib::{
    bus::HassBus,
    card::{CaptureCard, CardBinding, CardState, SubmitOutcome},
    codes::CodeStore,
    connect::{self, ConnectService},
    settings::CardConfig,
};
use serde_json::json;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};

fn temp_store(tag: &str) -> CodeStore {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be valid")
        .as_nanos();
    let path: PathBuf = std::env::temp_dir().join(format!("hassbeam-flow-{tag}-{ts}.json"));
    CodeStore::from_path(path).expect("store")
}

#[test]
fn capture_scenario_end_to_end() {
    let bus = Arc::new(HassBus::new());
    let service = ConnectService::setup(&bus, temp_store("scenario"));
    let binding = CardBinding::new(bus.clone(), CaptureCard::new(CardConfig::default()));
    binding.attach();

    binding.set_input("AC", "volume_up");
    let outcome = binding.submit();
    assert!(matches!(outcome, SubmitOutcome::Dispatched(_)));

    let view = binding.view();
    assert_eq!(view.state, CardState::Listening);
    assert!(!view.submit_enabled);
    assert!(view.status.contains("AC"));
    assert!(view.status.contains("volume_up"));
    assert!(service.has_pending_capture());

    // The user presses the remote button; the device broadcasts the raw code.
    bus.fire(
        connect::IR_EVENT_TYPE,
        json!({"protocol": "NEC", "rawData": [1000, 500, 1000, 500]}),
    );

    let view = binding.view();
    assert_eq!(view.state, CardState::Success);
    assert!(view.status.contains("AC"));
    assert!(view.status.contains("volume_up"));
    assert_eq!(view.device, "AC");
    assert_eq!(view.action, "");
    assert!(view.submit_enabled);
    assert_eq!(service.stored_code_count(), 1);
}

#[test]
fn valid_submit_issues_exactly_one_call_with_the_trimmed_pair() {
    let bus = Arc::new(HassBus::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_for_handler = calls.clone();
    bus.register_service(
        "hassbeam_connect",
        "start_listening",
        Arc::new(move |call| {
            calls_for_handler.fetch_add(1, Ordering::Relaxed);
            assert_eq!(call.data["device"], "AC");
            assert_eq!(call.data["action"], "volume_up");
            Ok(json!({}))
        }),
    );
    let binding = CardBinding::new(bus, CaptureCard::new(CardConfig::default()));
    binding.attach();

    binding.set_input("  AC  ", " volume_up ");
    let outcome = binding.submit();

    assert!(matches!(outcome, SubmitOutcome::Dispatched(_)));
    assert_eq!(calls.load(Ordering::Relaxed), 1);
    assert_eq!(binding.view().state, CardState::Listening);
}

#[test]
fn rejected_start_listening_reverts_the_card() {
    // No connect service on this bus: the start-listening call rejects.
    let bus = Arc::new(HassBus::new());
    let binding = CardBinding::new(bus, CaptureCard::new(CardConfig::default()));
    binding.attach();

    binding.set_input("tv", "power");
    let outcome = binding.submit();
    let SubmitOutcome::CallFailed { message, .. } = outcome else {
        panic!("expected the call to fail");
    };

    let view = binding.view();
    assert_eq!(view.state, CardState::Error);
    assert_eq!(view.status, message);
    assert!(view.submit_enabled);
}

#[test]
fn validation_failure_dispatches_nothing() {
    let bus = Arc::new(HassBus::new());
    let service = ConnectService::setup(&bus, temp_store("validation"));
    let binding = CardBinding::new(bus, CaptureCard::new(CardConfig::default()));
    binding.attach();

    binding.set_input("   ", "power");
    assert!(matches!(binding.submit(), SubmitOutcome::Rejected));

    let view = binding.view();
    assert_eq!(view.state, CardState::Idle);
    assert!(!view.status.is_empty());
    assert!(!service.has_pending_capture());
}

#[test]
fn recent_codes_degrade_to_a_placeholder_without_the_service() {
    let bus = Arc::new(HassBus::new());
    let binding = CardBinding::new(bus, CaptureCard::new(CardConfig::default()));
    binding.attach();

    binding.load_recent();

    let view = binding.view();
    assert!(!view.recent.available);
    assert!(view.recent.codes.is_empty());
}

#[test]
fn recent_codes_populate_after_a_capture() {
    let bus = Arc::new(HassBus::new());
    let _service = ConnectService::setup(&bus, temp_store("recent"));
    let binding = CardBinding::new(bus.clone(), CaptureCard::new(CardConfig::default()));
    binding.attach();

    binding.set_input("My TV", "Power");
    binding.submit();
    bus.fire(connect::IR_EVENT_TYPE, json!({"protocol": "NEC"}));

    binding.load_recent();
    let view = binding.view();
    assert!(view.recent.available);
    assert_eq!(view.recent.codes.len(), 1);
    // The store keys by sanitized labels.
    assert_eq!(view.recent.codes[0].device, "my_tv");
    assert_eq!(view.recent.codes[0].action, "power");
}

#[test]
fn two_cards_share_completions_without_correlation() {
    let bus = Arc::new(HassBus::new());
    let _service = ConnectService::setup(&bus, temp_store("crosstalk"));
    let first = CardBinding::new(bus.clone(), CaptureCard::new(CardConfig::default()));
    let second = CardBinding::new(bus.clone(), CaptureCard::new(CardConfig::default()));
    first.attach();
    second.attach();

    first.set_input("tv", "power");
    first.submit();
    second.set_input("soundbar", "mute");
    second.submit();

    bus.fire(connect::IR_EVENT_TYPE, json!({"protocol": "NEC"}));

    // Completion events carry no request id, so both listening cards take
    // the single completion as their own.
    assert_eq!(first.view().state, CardState::Success);
    assert_eq!(second.view().state, CardState::Success);
}
