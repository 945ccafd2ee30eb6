use std::sync::Arc;

use chomp_core::Config;
use chomp_engine::Engine;
use chomp_notify::ErrorSink;
use chomp_store::StateStore;

pub struct AppState {
    pub engine: Arc<Engine>,
    pub config: Config,
    pub error_sink: Arc<ErrorSink>,
}

impl AppState {
    pub fn store(&self) -> &Arc<dyn StateStore> {
        self.engine.store()
    }
}
