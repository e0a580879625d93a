//! Acciones del usuario sobre el grafo: construir y mostrar el esquema,
//! borrar todos los datos y responder preguntas.
//!
//! Cada acción es una frontera de errores: nada se propaga hacia arriba, todo
//! fallo se convierte en un aviso para el usuario.

use anyhow::Result;
use tracing::info;

use crate::{
    cypher_qa::{GraphCypherQaChain, QaResponse},
    graph_transformer::GraphTransformer,
    models::{Document, GraphSchema},
    neo4j_client::DELETE_ALL_QUERY,
    session::{Notices, Services},
};

/// "Show Graph Schema": extrae el grafo de los documentos, lo persiste y
/// muestra el esquema resultante. Sin ambos clientes no hace nada.
pub async fn show_graph_schema(
    services: &Services,
    documents: &[Document],
    notices: &mut Notices,
) -> Option<GraphSchema> {
    let (Some(graph), Some(llm)) = (&services.graph, &services.llm) else {
        return None;
    };

    let result: Result<GraphSchema> = async {
        let graph_documents = GraphTransformer::new(llm.as_ref())
            .convert_to_graph_documents(documents)
            .await?;
        graph.add_graph_documents(&graph_documents).await?;
        graph.refresh_schema().await
    }
    .await;

    match result {
        Ok(schema) => {
            notices.success(schema.to_string());
            Some(schema)
        }
        Err(e) => {
            notices.error(format!("No se pudo mostrar el esquema del grafo: {e:#}"));
            None
        }
    }
}

/// "Delete graph data": borra todos los nodos y relaciones de la base de datos.
pub async fn delete_graph_data(services: &Services, notices: &mut Notices) -> Option<GraphSchema> {
    let Some(graph) = &services.graph else {
        notices.error("No hay una conexión activa al grafo para borrar datos.");
        return None;
    };

    let result: Result<GraphSchema> = async {
        graph.query(DELETE_ALL_QUERY).await?;
        graph.refresh_schema().await
    }
    .await;

    match result {
        Ok(schema) => {
            notices.success("¡Todos los nodos y relaciones se han borrado correctamente!");
            Some(schema)
        }
        Err(e) => {
            notices.error(format!("No se pudieron borrar los datos: {e:#}"));
            None
        }
    }
}

/// "Get Answer": pregunta en lenguaje natural contra el grafo.
/// Sin pregunta o sin ambos clientes no hace nada.
pub async fn get_answer(
    services: &Services,
    question: &str,
    allow_dangerous_queries: bool,
    top_k: usize,
    notices: &mut Notices,
) -> Option<QaResponse> {
    if question.is_empty() {
        return None;
    }
    let (Some(graph), Some(llm)) = (&services.graph, &services.llm) else {
        return None;
    };

    info!("Pregunta recibida ({} caracteres)", question.len());
    if allow_dangerous_queries {
        notices.info("Consultas peligrosas permitidas: el Cypher generado se ejecutará sin restricciones.");
    }
    let chain = GraphCypherQaChain::from_llm(graph.clone(), llm.clone(), allow_dangerous_queries)
        .with_top_k(top_k);

    match chain.invoke(question).await {
        Ok(response) => {
            notices.success(response.result.clone());
            Some(response)
        }
        Err(e) => {
            notices.error(format!("No se pudo obtener una respuesta: {e:#}"));
            None
        }
    }
}
