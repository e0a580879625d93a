//! Sesión por petición: credenciales recibidas del frontend, inicialización de
//! los clientes (Neo4j + LLM) y los avisos que se devuelven al usuario.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{
    config::{AppConfig, LlmProvider},
    llm::{ChatModel, RigChatModel},
    neo4j_client::{GraphStore, Neo4jGraph},
};

/// Credenciales introducidas en el frontend. Llegan con cada petición y no se guardan.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub neo4j_uri: String,
    pub neo4j_username: String,
    pub neo4j_password: String,
    pub llm_provider: LlmProvider,
    pub api_key: String,
}

impl Credentials {
    /// Las tres credenciales de Neo4j están rellenas.
    pub fn has_graph_credentials(&self) -> bool {
        !self.neo4j_uri.is_empty() && !self.neo4j_username.is_empty() && !self.neo4j_password.is_empty()
    }

    pub fn has_llm_credentials(&self) -> bool {
        !self.api_key.is_empty()
    }
}

// Nunca se imprimen contraseñas ni API keys.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |s: &str| if s.is_empty() { "<vacío>" } else { "***" };
        f.debug_struct("Credentials")
            .field("neo4j_uri", &mask(&self.neo4j_uri))
            .field("neo4j_username", &mask(&self.neo4j_username))
            .field("neo4j_password", &mask(&self.neo4j_password))
            .field("llm_provider", &self.llm_provider)
            .field("api_key", &mask(&self.api_key))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

/// Mensaje para el usuario (equivalente a un aviso verde/rojo en pantalla).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Avisos acumulados durante una petición, en orden.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Notices(Vec<Notice>);

impl Notices {
    pub fn success(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.0.push(Notice { level: NoticeLevel::Success, message });
    }

    pub fn info(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.0.push(Notice { level: NoticeLevel::Info, message });
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.0.push(Notice { level: NoticeLevel::Error, message });
    }

    #[cfg(test)]
    pub fn has_errors(&self) -> bool {
        self.0.iter().any(|n| n.level == NoticeLevel::Error)
    }

    #[cfg(test)]
    pub fn as_slice(&self) -> &[Notice] {
        &self.0
    }
}

/// Construye los clientes externos. Es la costura que permite sustituir
/// Neo4j y el LLM por dobles en las pruebas.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect_graph(&self, uri: &str, username: &str, password: &str) -> Result<Arc<dyn GraphStore>>;

    fn build_llm(&self, provider: LlmProvider, api_key: &str) -> Result<Arc<dyn ChatModel>>;
}

/// Conector real: Neo4j vía `neo4rs` y LLMs vía Rig.
pub struct LiveConnector {
    config: AppConfig,
}

impl LiveConnector {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for LiveConnector {
    async fn connect_graph(&self, uri: &str, username: &str, password: &str) -> Result<Arc<dyn GraphStore>> {
        let graph = Neo4jGraph::connect(uri, username, password).await?;
        Ok(Arc::new(graph))
    }

    fn build_llm(&self, provider: LlmProvider, api_key: &str) -> Result<Arc<dyn ChatModel>> {
        let (model, temperature) = self.config.chat_model_for(provider);
        let llm = RigChatModel::new(provider, api_key, &model, temperature)?;
        Ok(Arc::new(llm))
    }
}

/// Clientes disponibles en esta petición. `None` significa "servicio no disponible".
#[derive(Clone, Default)]
pub struct Services {
    pub graph: Option<Arc<dyn GraphStore>>,
    pub llm: Option<Arc<dyn ChatModel>>,
}

impl Services {
    pub fn is_ready(&self) -> bool {
        self.graph.is_some() && self.llm.is_some()
    }
}

/// Intenta crear ambos clientes. Ningún fallo es fatal: se informa y se sigue.
pub async fn initialize(connector: &dyn Connector, credentials: &Credentials, notices: &mut Notices) -> Services {
    let mut services = Services::default();

    if credentials.has_graph_credentials() {
        match connector
            .connect_graph(
                &credentials.neo4j_uri,
                &credentials.neo4j_username,
                &credentials.neo4j_password,
            )
            .await
        {
            Ok(graph) => {
                services.graph = Some(graph);
                notices.success("¡Conectado a Neo4j!");
            }
            Err(e) => notices.error(format!("No se pudo conectar a Neo4j: {e:#}")),
        }
    }

    if credentials.has_llm_credentials() {
        let provider = credentials.llm_provider;
        match connector.build_llm(provider, &credentials.api_key) {
            Ok(llm) => {
                services.llm = Some(llm);
                notices.success(format!("¡LLM de {} inicializado!", provider.display_name()));
            }
            Err(e) => notices.error(format!("No se pudo inicializar {}: {e:#}", provider.display_name())),
        }
    }

    services
}

#[cfg(test)]
pub mod fakes {
    use super::*;
    use crate::testing::{FakeChatModel, InMemoryGraph};
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Conector de pruebas: cuenta los intentos y entrega dobles preparados.
    #[derive(Default)]
    pub struct FakeConnector {
        pub graph: Option<Arc<InMemoryGraph>>,
        pub llm: Option<Arc<FakeChatModel>>,
        pub graph_attempts: AtomicUsize,
        pub llm_attempts: AtomicUsize,
        pub providers: Mutex<Vec<LlmProvider>>,
    }

    impl FakeConnector {
        pub fn new(graph: Arc<InMemoryGraph>, llm: Arc<FakeChatModel>) -> Self {
            Self {
                graph: Some(graph),
                llm: Some(llm),
                ..Self::default()
            }
        }

        pub fn graph_attempts(&self) -> usize {
            self.graph_attempts.load(Ordering::SeqCst)
        }

        pub fn llm_attempts(&self) -> usize {
            self.llm_attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect_graph(&self, _uri: &str, _username: &str, _password: &str) -> Result<Arc<dyn GraphStore>> {
            self.graph_attempts.fetch_add(1, Ordering::SeqCst);
            match &self.graph {
                Some(graph) => Ok(graph.clone() as Arc<dyn GraphStore>),
                None => Err(anyhow!("Unable to retrieve routing information")),
            }
        }

        fn build_llm(&self, provider: LlmProvider, _api_key: &str) -> Result<Arc<dyn ChatModel>> {
            self.llm_attempts.fetch_add(1, Ordering::SeqCst);
            self.providers.lock().unwrap().push(provider);
            match &self.llm {
                Some(llm) => Ok(llm.clone() as Arc<dyn ChatModel>),
                None => Err(anyhow!("invalid api key")),
            }
        }
    }

    pub fn full_credentials() -> Credentials {
        Credentials {
            neo4j_uri: "neo4j+s://demo.databases.neo4j.io".to_string(),
            neo4j_username: "neo4j".to_string(),
            neo4j_password: "secreto".to_string(),
            llm_provider: LlmProvider::OpenAI,
            api_key: "sk-test".to_string(),
        }
    }
}
