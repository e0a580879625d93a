//! Dobles de prueba compartidos: un LLM con respuestas guionizadas y un grafo en memoria.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::llm::ChatModel;
use crate::models::{GraphDocument, GraphSchema, Node, Relationship};
use crate::neo4j_client::{GraphStore, DELETE_ALL_QUERY};

/// LLM falso: devuelve las respuestas en orden y registra los prompts recibidos.
#[derive(Default)]
pub struct FakeChatModel {
    responses: Mutex<VecDeque<String>>,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeChatModel {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for FakeChatModel {
    async fn complete(&self, _preamble: &str, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("FakeChatModel sin respuestas"))
    }

    fn describe(&self) -> String {
        "Fake/guion".to_string()
    }
}

/// Grafo en memoria con el comportamiento justo para las pruebas.
#[derive(Default)]
pub struct InMemoryGraph {
    nodes: Mutex<BTreeSet<Node>>,
    relationships: Mutex<Vec<Relationship>>,
    schema: Mutex<GraphSchema>,
    /// Filas devueltas por cualquier consulta que no sea el borrado total.
    pub query_rows: Mutex<Vec<Value>>,
    pub executed: Mutex<Vec<String>>,
    pub fail_queries: bool,
    remote_calls: AtomicUsize,
}

impl InMemoryGraph {
    pub fn with_rows(rows: Vec<Value>) -> Self {
        Self {
            query_rows: Mutex::new(rows),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_queries: true,
            ..Self::default()
        }
    }

    pub fn remote_calls(&self) -> usize {
        self.remote_calls.load(Ordering::SeqCst)
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.lock().unwrap().iter().map(|n| n.id.clone()).collect()
    }

    pub fn relationships(&self) -> Vec<Relationship> {
        self.relationships.lock().unwrap().clone()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraph {
    async fn query(&self, cypher: &str) -> Result<Vec<Value>> {
        self.remote_calls.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().unwrap().push(cypher.to_string());
        if self.fail_queries {
            return Err(anyhow!("Neo4j.ClientError.Statement.SyntaxError"));
        }
        if cypher.trim() == DELETE_ALL_QUERY {
            self.nodes.lock().unwrap().clear();
            self.relationships.lock().unwrap().clear();
            return Ok(Vec::new());
        }
        Ok(self.query_rows.lock().unwrap().clone())
    }

    async fn add_graph_documents(&self, documents: &[GraphDocument]) -> Result<()> {
        self.remote_calls.fetch_add(1, Ordering::SeqCst);
        let mut nodes = self.nodes.lock().unwrap();
        let mut relationships = self.relationships.lock().unwrap();
        for doc in documents {
            nodes.extend(doc.nodes.iter().cloned());
            for rel in &doc.relationships {
                nodes.insert(rel.source.clone());
                nodes.insert(rel.target.clone());
                relationships.push(rel.clone());
            }
        }
        Ok(())
    }

    async fn refresh_schema(&self) -> Result<GraphSchema> {
        self.remote_calls.fetch_add(1, Ordering::SeqCst);
        let mut schema = GraphSchema::default();
        for node in self.nodes.lock().unwrap().iter() {
            schema.add_node_property(&node.node_type, "id", "STRING");
        }
        for rel in self.relationships.lock().unwrap().iter() {
            schema.add_relationship(&rel.source.node_type, &rel.rel_type, &rel.target.node_type);
        }
        *self.schema.lock().unwrap() = schema.clone();
        Ok(schema)
    }

    fn schema(&self) -> GraphSchema {
        self.schema.lock().unwrap().clone()
    }
}
