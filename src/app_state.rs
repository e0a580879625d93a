use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use crate::{config::AppConfig, session::Connector};

/// Estado compartido del servidor. No guarda credenciales ni clientes: cada
/// petición crea los suyos a través del `connector`.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub connector: Arc<dyn Connector>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl AppState {
    pub fn new(config: AppConfig, connector: Arc<dyn Connector>, shutdown_tx: oneshot::Sender<()>) -> Self {
        Self {
            config,
            connector,
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
        }
    }
}
