use crate::config::formats::FormatTable;
use crate::modules::video::repository::JobStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn JobStore>,
    pub formats: FormatTable,
}

impl AppState {
    pub fn new(jobs: Arc<dyn JobStore>, formats: FormatTable) -> Self {
        Self { jobs, formats }
    }
}
