// Application state for HTTP handlers
use crate::application::catalog::TelemetryCatalog;

#[derive(Clone)]
pub struct AppState {
    pub catalog: TelemetryCatalog,
}
