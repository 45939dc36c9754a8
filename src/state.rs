use crate::notify::webview::WebviewPlatform;
use crate::runtime::MonitorServices;
use std::sync::Arc;

pub struct AppState {
    pub services: MonitorServices,
    pub webview: Arc<WebviewPlatform>,
}

impl AppState {
    pub fn new(services: MonitorServices, webview: Arc<WebviewPlatform>) -> Self {
        Self { services, webview }
    }
}
