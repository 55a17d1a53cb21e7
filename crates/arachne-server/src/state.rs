use arachne_core::{Broker, FileExporter, Orchestrator};

/// Shared application state, available to all route handlers via `State<Arc<AppState<B>>>`.
pub struct AppState<B: Broker> {
    pub orchestrator: Orchestrator<B, FileExporter>,
}

impl<B: Broker> AppState<B> {
    pub fn new(orchestrator: Orchestrator<B, FileExporter>) -> Self {
        Self { orchestrator }
    }
}
