use std::sync::Arc;

use sqlgate_core::Settings;
use sqlgate_otel::PrometheusHandle;

use crate::orchestrator::Orchestrator;

#[derive(Clone)]
pub(crate) struct AppState {
    orchestrator: Arc<Orchestrator>,
    settings: Arc<Settings>,
    endpoints: Arc<Vec<String>>,
    metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        settings: Arc<Settings>,
        endpoints: Arc<Vec<String>>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            orchestrator,
            settings,
            endpoints,
            metrics,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn metrics(&self) -> Option<&PrometheusHandle> {
        self.metrics.as_ref()
    }
}
