use std::sync::Arc;

use common::storage::FilesystemUploadStore;
use media::Transcoder;
use sea_orm::DatabaseConnection;

use crate::cache::Cache;
use crate::config::AppConfig;
use crate::events::EventEmitter;
use crate::hub::Hub;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<AppConfig>,
    pub hub: Hub,
    pub cache: Arc<Cache>,
    pub store: Arc<FilesystemUploadStore>,
    pub transcoder: Arc<dyn Transcoder>,
    pub events: EventEmitter,
}
