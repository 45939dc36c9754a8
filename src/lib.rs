pub mod alerts;
#[cfg(feature = "desktop")]
mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod market;
pub mod notify;
pub mod runtime;
#[cfg(feature = "desktop")]
mod state;

use config::{load_dotenv, RuntimeConfig};
use logging::init_tracing;

/// `.env` has to be applied before the subscriber reads `RUST_LOG`.
fn init_environment() {
    let dotenv = load_dotenv();
    init_tracing();
    match dotenv {
        Ok(Some(path)) => tracing::debug!(path = %path.display(), "loaded .env"),
        Ok(None) => {}
        Err(error) => tracing::warn!(%error, "ignoring unreadable .env"),
    }
}

#[cfg(not(feature = "desktop"))]
async fn run_monitor() -> Result<(), error::AppError> {
    use notify::terminal::TerminalPlatform;
    use std::sync::Arc;

    let config = RuntimeConfig::from_env()?;
    runtime::run_headless(config, Arc::new(TerminalPlatform)).await
}

#[cfg(not(feature = "desktop"))]
pub fn run() {
    init_environment();

    let tokio_runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(tokio_runtime) => tokio_runtime,
        Err(error) => {
            tracing::error!(%error, "failed to start async runtime");
            std::process::exit(1);
        }
    };

    if let Err(error) = tokio_runtime.block_on(run_monitor()) {
        tracing::error!(%error, "gold watch stopped");
        std::process::exit(1);
    }
}

#[cfg(feature = "desktop")]
pub fn run() {
    use commands::{
        alerts::{alert_settings_get, alert_settings_update, alert_target_progress},
        feed::{feed_latest, feed_resume, feed_status},
        health::health,
        history::history_prices,
        notifications::{
            notification_permission_get, notification_permission_report,
            notification_permission_request,
        },
    };
    use market::{FEED_STATUS_EVENT, PRICE_UPDATE_EVENT};
    use notify::webview::WebviewPlatform;
    use state::AppState;
    use std::sync::Arc;
    use tauri::{Emitter, Manager};

    init_environment();

    let result = tauri::Builder::default()
        .setup(|app| {
            let mut config = RuntimeConfig::from_env()?;
            if std::env::var_os("APP_DATA_DIR").is_none() {
                config.data_dir = app.path().app_data_dir()?;
            }

            let webview = Arc::new(WebviewPlatform::new(app.handle().clone()));
            let services = tauri::async_runtime::block_on(runtime::MonitorServices::start(
                &config,
                webview.clone(),
            ))?;

            let mut snapshots = services.publisher.subscribe_snapshots();
            let mut statuses = services.publisher.subscribe_statuses();
            let app_handle = app.handle().clone();
            tauri::async_runtime::spawn(async move {
                loop {
                    tokio::select! {
                        snapshot = snapshots.recv() => match snapshot {
                            Ok(snapshot) => {
                                if let Err(error) = app_handle.emit(PRICE_UPDATE_EVENT, &snapshot) {
                                    tracing::warn!(%error, "failed to emit price update");
                                }
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        },
                        status = statuses.recv() => match status {
                            Ok(status) => {
                                if let Err(error) = app_handle.emit(FEED_STATUS_EVENT, &status) {
                                    tracing::warn!(%error, "failed to emit feed status");
                                }
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        },
                    }
                }
            });

            app.manage(AppState::new(services, webview));
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            health,
            alert_settings_get,
            alert_settings_update,
            alert_target_progress,
            feed_status,
            feed_latest,
            feed_resume,
            history_prices,
            notification_permission_get,
            notification_permission_request,
            notification_permission_report
        ])
        .build(tauri::generate_context!());

    match result {
        Ok(app) => app.run(|app_handle, event| {
            if let tauri::RunEvent::Exit = event {
                app_handle.state::<AppState>().services.cancel();
            }
        }),
        Err(error) => {
            tracing::error!(%error, "error while running tauri application");
            std::process::exit(1);
        }
    }
}
