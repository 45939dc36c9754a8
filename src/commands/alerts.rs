use crate::alerts::{target_progress, AlertDirection, AlertEdit, AlertSettingsView, TargetProgress};
use crate::error::AppError;
use crate::state::AppState;
use tauri::State;

#[tauri::command]
pub async fn alert_settings_get(state: State<'_, AppState>) -> Result<AlertSettingsView, AppError> {
    Ok(state.services.alerts().settings())
}

#[tauri::command]
pub async fn alert_settings_update(
    state: State<'_, AppState>,
    edit: AlertEdit,
) -> Result<AlertSettingsView, AppError> {
    state.services.alerts().edit(edit).await
}

#[tauri::command]
pub async fn alert_target_progress(
    state: State<'_, AppState>,
    direction: AlertDirection,
) -> Result<Option<TargetProgress>, AppError> {
    let latest = state.services.publisher.latest_snapshot().await;
    let config = state.services.alerts().settings().config;

    let (current, target) = match direction {
        AlertDirection::Buy => (latest.buying_rate, config.buy_target),
        AlertDirection::Sell => (latest.selling_rate, config.sell_target),
    };
    Ok(target_progress(direction, current, target))
}
