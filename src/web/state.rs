use crate::services::dispatcher::Dispatcher;
use crate::services::publisher::Publisher;
use crate::{Config, Database};
use std::sync::Arc;

pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub publisher: Publisher,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(config: Config, db: Database, publisher: Publisher, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            config,
            db,
            publisher,
            dispatcher,
        }
    }
}
