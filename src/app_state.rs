use std::sync::Arc;

use crate::browser::manager::BrowserManager;
use crate::platforms::ProcessorFactory;
use crate::services::{
    accounts::AccountStore, events::JobEventLogger, images::ImageStager, queue::JobQueue,
    vault::CredentialVault,
};

/// Collaborators shared by every job run in the worker process.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn JobQueue>,
    pub events: JobEventLogger,
    pub vault: Arc<dyn CredentialVault>,
    pub accounts: Arc<dyn AccountStore>,
    pub browsers: Arc<BrowserManager>,
    pub processors: Arc<dyn ProcessorFactory>,
    pub images: Arc<ImageStager>,
}
