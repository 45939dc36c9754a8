use crate::error::AppError;
use crate::market::types::{FeedStatusSnapshot, PriceSnapshot};
use crate::state::AppState;
use tauri::State;

#[tauri::command]
pub async fn feed_status(state: State<'_, AppState>) -> Result<FeedStatusSnapshot, AppError> {
    Ok(state.services.publisher.status().await)
}

#[tauri::command]
pub async fn feed_latest(state: State<'_, AppState>) -> Result<PriceSnapshot, AppError> {
    Ok(state.services.publisher.latest_snapshot().await)
}

#[tauri::command]
pub async fn feed_resume(state: State<'_, AppState>) -> Result<bool, AppError> {
    Ok(state.services.feed().resume())
}
