pub mod bus;
pub mod card;
pub mod codes;
pub mod connect;
pub mod diagnostics;
pub mod labels;
pub mod registry;
pub mod settings;
pub mod state;

#[cfg(feature = "desktop")]
use card::CardView;
#[cfg(feature = "desktop")]
use diagnostics::{DiagnosticsExportResult, DiagnosticsStatus};
#[cfg(feature = "desktop")]
use registry::CardDescriptor;
#[cfg(feature = "desktop")]
use serde_json::Value;
#[cfg(feature = "desktop")]
use settings::DashboardSettings;
#[cfg(feature = "desktop")]
use state::DashboardController;
#[cfg(feature = "desktop")]
use std::sync::{Arc, Weak};
#[cfg(feature = "desktop")]
use tauri::{Emitter, Manager, State};

#[cfg(feature = "desktop")]
#[derive(Clone)]
struct RuntimeContext {
    controller: Arc<DashboardController>,
}

#[cfg(feature = "desktop")]
#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error("{0}")]
    Controller(#[from] state::ControllerError),
}

#[cfg(feature = "desktop")]
impl From<AppError> for String {
    fn from(value: AppError) -> Self {
        value.to_string()
    }
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn get_card_snapshot(runtime: State<'_, RuntimeContext>) -> Result<CardView, String> {
    Ok(runtime.controller.snapshot())
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn get_card_markup(runtime: State<'_, RuntimeContext>) -> Result<String, String> {
    Ok(runtime.controller.render_card())
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn configure_card(
    runtime: State<'_, RuntimeContext>,
    config: Value,
) -> Result<CardView, String> {
    runtime
        .controller
        .configure_card(config)
        .await
        .map_err(|err| AppError::Controller(err).into())
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn submit_capture(
    runtime: State<'_, RuntimeContext>,
    device: String,
    action: String,
) -> Result<CardView, String> {
    Ok(runtime.controller.submit_capture(&device, &action))
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn clear_card(runtime: State<'_, RuntimeContext>) -> Result<CardView, String> {
    Ok(runtime.controller.clear_card())
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn load_recent_codes(runtime: State<'_, RuntimeContext>) -> Result<CardView, String> {
    Ok(runtime.controller.load_recent_codes())
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn delete_code(runtime: State<'_, RuntimeContext>, id: u64) -> Result<bool, String> {
    runtime
        .controller
        .delete_code(id)
        .map_err(|err| AppError::Controller(err).into())
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn inject_ir_event(
    runtime: State<'_, RuntimeContext>,
    event_data: Value,
) -> Result<(), String> {
    runtime.controller.inject_ir_event(event_data);
    Ok(())
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn attach_card(runtime: State<'_, RuntimeContext>) -> Result<CardView, String> {
    runtime.controller.attach_card();
    Ok(runtime.controller.snapshot())
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn detach_card(runtime: State<'_, RuntimeContext>) -> Result<CardView, String> {
    runtime.controller.detach_card();
    Ok(runtime.controller.snapshot())
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn list_registered_cards() -> Result<Vec<CardDescriptor>, String> {
    Ok(registry::registered_cards())
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn load_settings(runtime: State<'_, RuntimeContext>) -> Result<DashboardSettings, String> {
    Ok(runtime.controller.load_settings().await)
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn update_settings(
    runtime: State<'_, RuntimeContext>,
    settings: DashboardSettings,
) -> Result<DashboardSettings, String> {
    runtime
        .controller
        .update_settings(settings)
        .await
        .map_err(|err| AppError::Controller(err).into())
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn get_diagnostics_status(
    runtime: State<'_, RuntimeContext>,
) -> Result<DiagnosticsStatus, String> {
    Ok(runtime.controller.get_diagnostics_status().await)
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn set_diagnostics_opt_in(
    runtime: State<'_, RuntimeContext>,
    enabled: bool,
) -> Result<DiagnosticsStatus, String> {
    runtime
        .controller
        .set_diagnostics_opt_in(enabled)
        .await
        .map_err(|err| AppError::Controller(err).into())
}

#[cfg(feature = "desktop")]
#[tauri::command]
async fn export_diagnostics_bundle(
    runtime: State<'_, RuntimeContext>,
) -> Result<DiagnosticsExportResult, String> {
    runtime
        .controller
        .export_diagnostics_bundle()
        .await
        .map_err(|err| AppError::Controller(err).into())
}

/// Forwards connect-service events to the webview so the card re-renders on
/// asynchronous completions, not only on command responses.
#[cfg(feature = "desktop")]
fn forward_bus_events(
    app: tauri::AppHandle,
    controller: &Arc<DashboardController>,
) {
    let bus = controller.bus();
    let forwards = [
        (connect::CODE_SAVED_EVENT, "hassbeam://code-saved"),
        (connect::CODES_RETRIEVED_EVENT, "hassbeam://codes-retrieved"),
        (connect::CODE_DELETED_EVENT, "hassbeam://code-deleted"),
    ];
    for (bus_event, app_event) in forwards {
        let app = app.clone();
        let controller: Weak<DashboardController> = Arc::downgrade(controller);
        let _ = bus.subscribe(
            bus_event,
            Arc::new(move |data: &Value| {
                let _ = app.emit(app_event, data.clone());
                if let Some(controller) = controller.upgrade() {
                    let _ = app.emit("hassbeam://card", controller.snapshot());
                }
            }),
        );
    }
}

#[cfg(feature = "desktop")]
pub fn run() {
    tauri::Builder::default()
        .setup(|app| {
            let controller = Arc::new(
                DashboardController::new()
                    .map_err(|err| -> Box<dyn std::error::Error> { Box::new(err) })?,
            );
            forward_bus_events(app.handle().clone(), &controller);
            app.manage(RuntimeContext { controller });
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            get_card_snapshot,
            get_card_markup,
            configure_card,
            submit_capture,
            clear_card,
            load_recent_codes,
            delete_code,
            inject_ir_event,
            attach_card,
            detach_card,
            list_registered_cards,
            load_settings,
            update_settings,
            get_diagnostics_status,
            set_diagnostics_opt_in,
            export_diagnostics_bundle
        ])
        .run(tauri::generate_context!())
        .expect("error while running hassbeam connect app");
}

#[cfg(not(feature = "desktop"))]
pub fn run() {
    panic!("desktop runtime requested without the 'desktop' feature enabled")
}
