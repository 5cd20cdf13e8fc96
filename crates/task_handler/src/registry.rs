use std::collections::HashMap;
use std::sync::Arc;

use reflection_worker_job::AnalysisType;

use crate::handler::AnalysisHandler;

/// One handler per analysis type.
#[derive(Clone, Default)]
pub struct AnalysisHandlers {
    handlers: HashMap<AnalysisType, Arc<dyn AnalysisHandler>>,
}

impl AnalysisHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `analysis_type`, replacing any previous one.
    pub fn insert(
        &mut self,
        analysis_type: AnalysisType,
        handler: Arc<dyn AnalysisHandler>,
    ) -> &mut Self {
        self.handlers.insert(analysis_type, handler);
        self
    }

    /// Registers the same handler for every analysis type.
    pub fn insert_all(&mut self, handler: Arc<dyn AnalysisHandler>) -> &mut Self {
        for analysis_type in AnalysisType::ALL {
            self.handlers.insert(analysis_type, handler.clone());
        }
        self
    }

    pub fn get(&self, analysis_type: AnalysisType) -> Option<Arc<dyn AnalysisHandler>> {
        self.handlers.get(&analysis_type).cloned()
    }

    /// Analysis types that have no handler.
    pub fn missing(&self) -> Vec<AnalysisType> {
        AnalysisType::ALL
            .into_iter()
            .filter(|t| !self.handlers.contains_key(t))
            .collect()
    }
}
