//! Conversión de documentos de texto en grafos (nodos + relaciones) usando un LLM.

use std::collections::HashSet;

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    llm::{strip_code_fence, ChatModel},
    models::{Document, GraphDocument, Node, Relationship},
};

const EXTRACTION_PROMPT: &str = r#"
Tu tarea es analizar el texto y extraer información estructurada para construir un grafo de conocimiento.
- Nodos: entidades y conceptos. Usa como "id" el nombre tal y como aparece en el texto (nunca enteros inventados) y como "type" una categoría básica y general en inglés (p.ej. 'Person', 'Organization', 'Location', 'Concept').
- Sé consistente: si una entidad aparece varias veces con nombres distintos, usa siempre el nombre más completo.
- Relaciones: conexiones entre nodos. El "type" debe ser un identificador general y atemporal en mayúsculas (p.ej. 'WORKS_AT', 'LOCATED_IN', 'PART_OF'), no uno específico como 'BECAME_PROFESSOR'.

La salida DEBE ser un único objeto JSON válido con dos claves: "nodes" y "relationships".
- "nodes": lista de objetos con "id" y "type".
- "relationships": lista de objetos con "source", "source_type", "target", "target_type" y "type".

Si no encuentras nada, devuelve listas vacías. No incluyas explicaciones, solo el JSON.
"#;

#[derive(Debug, Clone, Deserialize, Default)]
struct JsonNode {
    #[serde(default)]
    id: Value,
    #[serde(default, rename = "type")]
    node_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct JsonRelationship {
    #[serde(default)]
    source: Value,
    #[serde(default)]
    source_type: Option<String>,
    #[serde(default)]
    target: Value,
    #[serde(default)]
    target_type: Option<String>,
    #[serde(default, rename = "type")]
    rel_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct JsonExtraction {
    #[serde(default)]
    nodes: Vec<JsonNode>,
    #[serde(default)]
    relationships: Vec<JsonRelationship>,
}

/// Transforma documentos en `GraphDocument` con una llamada al LLM por documento.
pub struct GraphTransformer<'a> {
    llm: &'a dyn ChatModel,
}

impl<'a> GraphTransformer<'a> {
    pub fn new(llm: &'a dyn ChatModel) -> Self {
        Self { llm }
    }

    pub async fn convert_to_graph_documents(&self, documents: &[Document]) -> Result<Vec<GraphDocument>> {
        let mut graph_documents = Vec::with_capacity(documents.len());
        for (i, doc) in documents.iter().enumerate() {
            info!(
                "Extrayendo grafo del documento {}/{} con {}...",
                i + 1,
                documents.len(),
                self.llm.describe()
            );
            graph_documents.push(self.process_document(doc).await?);
        }
        Ok(graph_documents)
    }

    async fn process_document(&self, doc: &Document) -> Result<GraphDocument> {
        let response = self.llm.complete(EXTRACTION_PROMPT, &doc.page_content).await?;
        let json_response = strip_code_fence(&response, "json");

        match serde_json::from_str::<JsonExtraction>(&json_response) {
            Ok(extraction) => {
                let graph_doc = build_graph_document(extraction, doc.clone());
                info!(
                    "Extraídos {} nodos y {} relaciones",
                    graph_doc.nodes.len(),
                    graph_doc.relationships.len()
                );
                Ok(graph_doc)
            }
            Err(e) => {
                warn!("No se pudo parsear el JSON de extracción del grafo. Error: {}. Respuesta LLM: '{}'", e, response);
                // Documento vacío para no detener la construcción del grafo.
                Ok(GraphDocument::empty(doc.clone()))
            }
        }
    }
}

fn build_graph_document(extraction: JsonExtraction, source: Document) -> GraphDocument {
    let mut seen = HashSet::new();
    let mut nodes = Vec::new();
    let mut push_node = |node: Node, nodes: &mut Vec<Node>| {
        if seen.insert(node.clone()) {
            nodes.push(node);
        }
    };

    for raw in extraction.nodes {
        if let Some(node) = format_node(&raw.id, raw.node_type.as_deref()) {
            push_node(node, &mut nodes);
        }
    }

    let mut relationships = Vec::new();
    let mut seen_rels = HashSet::new();
    for raw in extraction.relationships {
        let (Some(source_node), Some(target_node)) = (
            format_node(&raw.source, raw.source_type.as_deref()),
            format_node(&raw.target, raw.target_type.as_deref()),
        ) else {
            continue;
        };
        let rel_type = format_rel_type(raw.rel_type.as_deref().unwrap_or_default());
        if rel_type.is_empty() {
            continue;
        }

        push_node(source_node.clone(), &mut nodes);
        push_node(target_node.clone(), &mut nodes);

        let rel = Relationship {
            source: source_node,
            target: target_node,
            rel_type,
        };
        if seen_rels.insert(rel.clone()) {
            relationships.push(rel);
        }
    }

    GraphDocument {
        nodes,
        relationships,
        source,
    }
}

fn format_node(id: &Value, node_type: Option<&str>) -> Option<Node> {
    let id = match id {
        Value::String(s) => title_case(s.trim()),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let node_type = capitalize(node_type.unwrap_or_default().trim());
    if id.is_empty() || node_type.is_empty() {
        return None;
    }
    Some(Node { id, node_type })
}

fn format_rel_type(raw: &str) -> String {
    raw.trim().replace(' ', "_").to_uppercase()
}

/// Mayúscula al inicio de cada palabra, minúsculas en el resto ("acme corp." -> "Acme Corp.").
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
