use std::sync::Arc;

use shared::config::Config;
use shared::repositories::store::Store;
use shared::services::match_service::MatchService;
use shared::services::move_validator::MoveValidator;
use shared::services::ticket_service::TicketService;

#[derive(Clone)]
pub struct AppState {
    pub ticket_service: Arc<TicketService>,
    pub match_service: Arc<MatchService>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: &Config) -> Self {
        AppState {
            ticket_service: Arc::new(TicketService::new(store.clone(), config)),
            match_service: Arc::new(MatchService::new(
                store,
                MoveValidator::from_config(config),
            )),
        }
    }
}
