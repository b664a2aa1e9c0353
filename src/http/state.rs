use std::sync::Arc;

use crate::proxy::ProxyDispatcher;
use crate::resolver::ModelResolver;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<ProxyDispatcher>,
    pub resolver: Arc<ModelResolver>,
}

impl AppState {
    pub fn new(dispatcher: Arc<ProxyDispatcher>, resolver: Arc<ModelResolver>) -> Self {
        Self {
            dispatcher,
            resolver,
        }
    }
}
