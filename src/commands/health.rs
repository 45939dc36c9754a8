use crate::runtime::HealthReport;
use crate::{error::AppError, state::AppState};
use tauri::State;

#[tauri::command]
pub async fn health(state: State<'_, AppState>) -> Result<HealthReport, AppError> {
    Ok(state.services.health().await)
}
