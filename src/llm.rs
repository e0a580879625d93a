//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! Se soportan OpenAI y Groq; el resto de la aplicación sólo ve `ChatModel`.

use std::fmt;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rig::completion::Prompt;
use tracing::debug;

use crate::config::LlmProvider;

/// Capacidad mínima que necesitamos de un LLM: una generación de un solo turno.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Genera una respuesta a `prompt` usando `preamble` como mensaje de sistema.
    async fn complete(&self, preamble: &str, prompt: &str) -> Result<String>;

    /// Nombre legible (proveedor/modelo) para logs y mensajes.
    fn describe(&self) -> String;
}

/// Cliente de chat respaldado por Rig. La API key llega en cada petición.
#[derive(Clone)]
pub struct RigChatModel {
    provider: LlmProvider,
    api_key: String,
    model: String,
    temperature: Option<f64>,
}

// La API key nunca debe aparecer en los logs.
impl fmt::Debug for RigChatModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RigChatModel")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}

impl RigChatModel {
    pub fn new(
        provider: LlmProvider,
        api_key: &str,
        model: &str,
        temperature: Option<f64>,
    ) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(anyhow!("La API key de {} está vacía", provider.display_name()));
        }
        if model.trim().is_empty() {
            return Err(anyhow!("No hay modelo configurado para {}", provider.display_name()));
        }
        Ok(Self {
            provider,
            api_key: api_key.trim().to_string(),
            model: model.to_string(),
            temperature,
        })
    }

    async fn complete_with_openai(&self, preamble: &str, prompt: &str) -> Result<String> {
        use rig::providers::openai;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        let client = openai::Client::new(&self.api_key);
        let mut builder = client.agent(&self.model).preamble(preamble);
        if let Some(temperature) = self.temperature {
            builder = builder.temperature(temperature);
        }
        let agent = builder.build();

        let answer = agent.prompt(prompt).await?;
        Ok(answer)
    }

    async fn complete_with_groq(&self, preamble: &str, prompt: &str) -> Result<String> {
        use rig::providers::groq;
        use rig::client::CompletionClient as _;

        let client = groq::Client::new(&self.api_key);
        let mut builder = client.agent(&self.model).preamble(preamble);
        if let Some(temperature) = self.temperature {
            builder = builder.temperature(temperature);
        }
        let agent = builder.build();

        let answer = agent.prompt(prompt).await?;
        Ok(answer)
    }
}

#[async_trait]
impl ChatModel for RigChatModel {
    async fn complete(&self, preamble: &str, prompt: &str) -> Result<String> {
        debug!("Llamando a {} ({} caracteres de prompt)", self.describe(), prompt.len());
        match self.provider {
            LlmProvider::OpenAI => self.complete_with_openai(preamble, prompt).await,
            LlmProvider::Groq => self.complete_with_groq(preamble, prompt).await,
        }
    }

    fn describe(&self) -> String {
        format!("{}/{}", self.provider.display_name(), self.model)
    }
}

/// Limpia la respuesta del LLM para quedarnos sólo con el contenido de un
/// bloque ```lang ... ``` si lo hay.
pub fn strip_code_fence(response: &str, lang: &str) -> String {
    let trimmed = response.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed.to_string();
    };

    let after_fence = &trimmed[start + 3..];
    let body = after_fence
        .strip_prefix(lang)
        .or_else(|| after_fence.strip_prefix(&lang.to_uppercase()))
        .unwrap_or(after_fence);

    match body.find("```") {
        Some(end) => body[..end].trim().to_string(),
        None => body.trim().to_string(),
    }
}
