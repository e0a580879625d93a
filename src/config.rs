//! Carga y gestión de configuración del servidor (dirección, modelos LLM, frontend).
//!
//! Las credenciales de Neo4j y las API keys NO se leen nunca del entorno: llegan
//! con cada petición desde el frontend (ver `session::Credentials`).

use std::env;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LlmProvider {
    #[default]
    #[serde(alias = "openai")]
    OpenAI,
    #[serde(alias = "groq")]
    Groq,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "groq" => Ok(Self::Groq),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }

    /// Nombre tal y como se muestra en el desplegable del frontend.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::OpenAI => "OpenAI",
            Self::Groq => "Groq",
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub frontend_dir: String,
    pub open_browser: bool,

    pub default_llm_provider: LlmProvider,
    pub openai_chat_model: String,
    pub groq_chat_model: String,
    pub qa_top_k: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:3322".to_string(),
            frontend_dir: "frontend".to_string(),
            open_browser: true,
            default_llm_provider: LlmProvider::OpenAI,
            openai_chat_model: "gpt-4-turbo".to_string(),
            groq_chat_model: "gemma2-9b-it".to_string(),
            qa_top_k: 10,
        }
    }
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env`, pero con una función de búsqueda inyectable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let server_addr = lookup("SERVER_ADDR").unwrap_or(defaults.server_addr);
        let frontend_dir = lookup("FRONTEND_DIR").unwrap_or(defaults.frontend_dir);

        let open_browser = match lookup("OPEN_BROWSER") {
            Some(raw) => parse_bool(&raw)
                .ok_or_else(|| anyhow!("OPEN_BROWSER debe ser true/false, recibido: {raw}"))?,
            None => defaults.open_browser,
        };

        let default_llm_provider = match lookup("DEFAULT_LLM_PROVIDER") {
            Some(raw) => LlmProvider::from_str(&raw)?,
            None => defaults.default_llm_provider,
        };

        let openai_chat_model = lookup("OPENAI_CHAT_MODEL")
            .filter(|m| !m.is_empty())
            .unwrap_or(defaults.openai_chat_model);
        let groq_chat_model = lookup("GROQ_CHAT_MODEL")
            .filter(|m| !m.is_empty())
            .unwrap_or(defaults.groq_chat_model);

        let qa_top_k = match lookup("QA_TOP_K") {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("QA_TOP_K no es un número válido: {raw}"))?,
            None => defaults.qa_top_k,
        };

        Ok(Self {
            server_addr,
            frontend_dir,
            open_browser,
            default_llm_provider,
            openai_chat_model,
            groq_chat_model,
            qa_top_k,
        })
    }

    /// Modelo de chat y temperatura para el proveedor elegido.
    /// Groq usa la temperatura por defecto del proveedor.
    pub fn chat_model_for(&self, provider: LlmProvider) -> (String, Option<f64>) {
        match provider {
            LlmProvider::OpenAI => (self.openai_chat_model.clone(), Some(0.0)),
            LlmProvider::Groq => (self.groq_chat_model.clone(), None),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
