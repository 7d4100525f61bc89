use crate::{
    bus::{EventSubscription, HassBus, ServiceCallError},
    card::{CaptureCard, CaptureOptions, CardBinding, CardView, SubmitOutcome},
    codes::{CodeStore, CodesError},
    connect::{self, CodeSavedEvent, ConnectService},
    diagnostics::{
        CaptureMetricRecord, CaptureOutcome, DiagnosticsError, DiagnosticsExportResult,
        DiagnosticsManager, DiagnosticsStatus,
    },
    registry,
    settings::{CardConfig, DashboardSettings, SettingsError, SettingsStore},
};
use serde_json::{json, Value};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::{Instant, SystemTime, UNIX_EPOCH},
};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),
    #[error("code store error: {0}")]
    Codes(#[from] CodesError),
    #[error("diagnostics error: {0}")]
    Diagnostics(#[from] DiagnosticsError),
    #[error("service call error: {0}")]
    ServiceCall(#[from] ServiceCallError),
    #[error("{0}")]
    Runtime(String),
}

#[derive(Debug, Clone)]
struct CaptureClock {
    session_id: u64,
    device: String,
    action: String,
    started: Instant,
}

/// Ties the pieces together for one dashboard process: the service bus, the
/// connect service, one attached capture card, persisted settings, and
/// capture diagnostics. The desktop command layer delegates here.
pub struct DashboardController {
    bus: Arc<HassBus>,
    connect: ConnectService,
    binding: CardBinding,
    settings_store: SettingsStore,
    settings: Mutex<DashboardSettings>,
    diagnostics: Arc<StdMutex<DiagnosticsManager>>,
    diagnostics_opt_in: Arc<AtomicBool>,
    capture_clock: Arc<StdMutex<Option<CaptureClock>>>,
    _metrics_subscription: EventSubscription,
}

impl DashboardController {
    pub fn new() -> Result<Self, ControllerError> {
        let settings_store = SettingsStore::new()?;
        let code_store = CodeStore::new()?;
        let diagnostics = DiagnosticsManager::new()?;
        Self::from_parts(settings_store, code_store, diagnostics, CaptureOptions::default())
    }

    /// Assembles a controller from explicit parts. Lets embedders and tests
    /// pick storage paths and opt into the capture enhancements.
    pub fn from_parts(
        settings_store: SettingsStore,
        code_store: CodeStore,
        diagnostics: DiagnosticsManager,
        options: CaptureOptions,
    ) -> Result<Self, ControllerError> {
        registry::register_capture_card();

        let settings = settings_store.load()?;
        let bus = Arc::new(HassBus::new());
        let connect = ConnectService::setup(&bus, code_store);

        let card = CaptureCard::new(settings.card.clone()).with_options(options);
        let binding = CardBinding::new(bus.clone(), card);
        binding.attach();

        let diagnostics = Arc::new(StdMutex::new(diagnostics));
        let diagnostics_opt_in = Arc::new(AtomicBool::new(settings.diagnostics_opt_in));
        let capture_clock: Arc<StdMutex<Option<CaptureClock>>> = Arc::new(StdMutex::new(None));

        let metrics_subscription = {
            let diagnostics = diagnostics.clone();
            let opt_in = diagnostics_opt_in.clone();
            let clock_slot = capture_clock.clone();
            bus.subscribe(
                connect::CODE_SAVED_EVENT,
                Arc::new(move |data: &Value| {
                    let Ok(event) = serde_json::from_value::<CodeSavedEvent>(data.clone()) else {
                        return;
                    };
                    // The clock is consumed even without opt-in so a later
                    // enable never attributes a stale attempt.
                    let clock = clock_slot.lock().unwrap_or_else(|e| e.into_inner()).take();
                    let Some(clock) = clock else {
                        return;
                    };
                    if !opt_in.load(Ordering::Relaxed) {
                        return;
                    }

                    let outcome = if event.success {
                        CaptureOutcome::Saved
                    } else {
                        CaptureOutcome::SaveFailed
                    };
                    let correlated =
                        clock.device == event.device && clock.action == event.action;
                    let record = CaptureMetricRecord {
                        session_id: clock.session_id,
                        timestamp_utc_ms: now_utc_ms(),
                        device: clock.device,
                        action: clock.action,
                        wait_ms: clock.started.elapsed().as_millis() as u64,
                        outcome,
                        correlated,
                    };
                    let mut manager = diagnostics.lock().unwrap_or_else(|e| e.into_inner());
                    if let Err(err) = manager.record_capture(record) {
                        eprintln!("capture diagnostics record failed: {err}");
                    }
                }),
            )
        };

        Ok(Self {
            bus,
            connect,
            binding,
            settings_store,
            settings: Mutex::new(settings),
            diagnostics,
            diagnostics_opt_in,
            capture_clock,
            _metrics_subscription: metrics_subscription,
        })
    }

    /// The bus this dashboard runs on, for embedders that feed device events
    /// or register further services.
    pub fn bus(&self) -> Arc<HassBus> {
        self.bus.clone()
    }

    pub fn connect_service(&self) -> &ConnectService {
        &self.connect
    }

    pub fn snapshot(&self) -> CardView {
        self.binding.view()
    }

    pub fn render_card(&self) -> String {
        crate::card::render::render_card(&self.binding.view())
    }

    pub async fn configure_card(&self, config_value: Value) -> Result<CardView, ControllerError> {
        let config = CardConfig::from_value(config_value)?;
        {
            let mut settings = self.settings.lock().await;
            settings.card = config.clone();
            self.settings_store.save(&settings)?;
        }
        self.binding.set_config(config);
        Ok(self.binding.view())
    }

    /// One user-triggered capture attempt: load the fields, validate, and
    /// dispatch start-listening. Failures surface on the card status line;
    /// this method never errors.
    pub fn submit_capture(&self, device: &str, action: &str) -> CardView {
        let started = Instant::now();
        self.binding.set_input(device, action);
        match self.binding.submit() {
            SubmitOutcome::Dispatched(pending) => {
                let mut clock = self.capture_clock.lock().unwrap_or_else(|e| e.into_inner());
                *clock = Some(CaptureClock {
                    session_id: pending.session_id,
                    device: pending.device,
                    action: pending.action,
                    started,
                });
            }
            SubmitOutcome::CallFailed { pending, .. } => {
                self.record_attempt(CaptureMetricRecord {
                    session_id: pending.session_id,
                    timestamp_utc_ms: now_utc_ms(),
                    device: pending.device,
                    action: pending.action,
                    wait_ms: started.elapsed().as_millis() as u64,
                    outcome: CaptureOutcome::CallFailed,
                    correlated: true,
                });
            }
            SubmitOutcome::Rejected => {}
        }
        self.binding.view()
    }

    pub fn clear_card(&self) -> CardView {
        let abandoned = self.capture_clock.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(clock) = abandoned {
            self.record_attempt(CaptureMetricRecord {
                session_id: clock.session_id,
                timestamp_utc_ms: now_utc_ms(),
                device: clock.device,
                action: clock.action,
                wait_ms: clock.started.elapsed().as_millis() as u64,
                outcome: CaptureOutcome::Cleared,
                correlated: true,
            });
        }
        self.binding.clear();
        self.binding.view()
    }

    pub fn load_recent_codes(&self) -> CardView {
        self.binding.load_recent();
        self.binding.view()
    }

    pub fn delete_code(&self, id: u64) -> Result<bool, ControllerError> {
        let response = self.bus.call_service(
            connect::DOMAIN,
            connect::DELETE_IR_CODE_SERVICE,
            json!({ "id": id }),
        )?;
        Ok(response
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    /// Feeds a device event into the bus, exactly as a HassBeam device
    /// would. The demo page and tests use this in place of hardware.
    pub fn inject_ir_event(&self, event_data: Value) {
        self.bus.fire(connect::IR_EVENT_TYPE, event_data);
    }

    pub fn attach_card(&self) {
        self.binding.attach();
    }

    pub fn detach_card(&self) {
        self.binding.detach();
    }

    pub async fn load_settings(&self) -> DashboardSettings {
        self.settings.lock().await.clone()
    }

    pub async fn update_settings(
        &self,
        settings: DashboardSettings,
    ) -> Result<DashboardSettings, ControllerError> {
        self.settings_store.save(&settings)?;
        {
            let mut current = self.settings.lock().await;
            *current = settings.clone();
        }
        self.diagnostics_opt_in
            .store(settings.diagnostics_opt_in, Ordering::Relaxed);
        self.binding.set_config(settings.card.clone());
        Ok(settings)
    }

    pub async fn get_diagnostics_status(&self) -> DiagnosticsStatus {
        let opt_in = self.settings.lock().await.diagnostics_opt_in;
        self.diagnostics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .status(opt_in)
    }

    pub async fn set_diagnostics_opt_in(
        &self,
        enabled: bool,
    ) -> Result<DiagnosticsStatus, ControllerError> {
        let mut settings = self.settings.lock().await.clone();
        settings.diagnostics_opt_in = enabled;
        self.settings_store.save(&settings)?;
        {
            let mut current = self.settings.lock().await;
            *current = settings;
        }
        self.diagnostics_opt_in.store(enabled, Ordering::Relaxed);
        Ok(self
            .diagnostics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .status(enabled))
    }

    pub async fn export_diagnostics_bundle(
        &self,
    ) -> Result<DiagnosticsExportResult, ControllerError> {
        let settings = self.settings.lock().await.clone();
        let result = self
            .diagnostics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .export_bundle(
                settings.diagnostics_opt_in,
                env!("CARGO_PKG_VERSION"),
                &settings,
            )?;
        Ok(result)
    }

    fn record_attempt(&self, record: CaptureMetricRecord) {
        if !self.diagnostics_opt_in.load(Ordering::Relaxed) {
            return;
        }
        let mut manager = self.diagnostics.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(err) = manager.record_capture(record) {
            eprintln!("capture diagnostics record failed: {err}");
        }
    }
}

fn now_utc_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
