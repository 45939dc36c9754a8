use crate::error::AppError;
use crate::notify::PermissionState;
use crate::state::AppState;
use tauri::State;

#[tauri::command]
pub async fn notification_permission_get(
    state: State<'_, AppState>,
) -> Result<PermissionState, AppError> {
    Ok(state.services.gateway.permission())
}

#[tauri::command]
pub async fn notification_permission_request(state: State<'_, AppState>) -> Result<bool, AppError> {
    Ok(state.services.gateway.request_permission().await)
}

/// The webview reports `Notification.permission` at startup and after
/// every prompt.
#[tauri::command]
pub async fn notification_permission_report(
    state: State<'_, AppState>,
    permission: PermissionState,
) -> Result<PermissionState, AppError> {
    state.webview.report_permission(permission);
    state.services.gateway.set_permission(permission);
    Ok(permission)
}
