use std::sync::Arc;

use crate::{config::AppConfig, rag::RetrievalContext};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub context: Arc<RetrievalContext>,
}
