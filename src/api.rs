use axum::{
    extract::{DefaultBodyLimit, Json, Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    actions,
    app_state::AppState,
    config::LlmProvider,
    cypher_qa::QaResponse,
    ingest::{self, IngestOutcome},
    models::Document,
    session::{self, Credentials, Notices},
};

/// Tamaño máximo de un fichero subido.
const UPLOAD_LIMIT_BYTES: usize = 50 * 1024 * 1024;

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct ConnectPayload {
    #[serde(default)]
    credentials: Credentials,
}

#[derive(Deserialize)]
pub struct BuildGraphPayload {
    #[serde(default)]
    credentials: Credentials,
    #[serde(default)]
    documents: Vec<Document>,
}

#[derive(Deserialize)]
pub struct AnswerPayload {
    #[serde(default)]
    credentials: Credentials,
    #[serde(default)]
    question: String,
    #[serde(default)]
    allow_dangerous_queries: bool,
}

#[derive(Serialize)]
pub struct SettingsResponse {
    providers: Vec<&'static str>,
    default_provider: &'static str,
    openai_model: String,
    groq_model: String,
    upload_types: [&'static str; 2],
}

#[derive(Serialize)]
pub struct ConnectResponse {
    notices: Notices,
    graph: bool,
    llm: bool,
    ready: bool,
}

#[derive(Serialize)]
pub struct UploadResponse {
    notices: Notices,
    #[serde(flatten)]
    outcome: IngestOutcome,
}

#[derive(Serialize)]
pub struct SchemaResponse {
    notices: Notices,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<String>,
}

#[derive(Serialize)]
pub struct AnswerResponse {
    notices: Notices,
    #[serde(skip_serializing_if = "Option::is_none")]
    answer: Option<QaResponse>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/settings", get(settings_handler))
        .route("/api/connect", post(connect_handler))
        .route("/api/upload", post(upload_handler))
        .route("/api/graph/schema", post(graph_schema_handler))
        .route("/api/graph/delete", post(delete_graph_handler))
        .route("/api/answer", post(answer_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn settings_handler(State(state): State<AppState>) -> Json<SettingsResponse> {
    Json(SettingsResponse {
        providers: vec![LlmProvider::OpenAI.display_name(), LlmProvider::Groq.display_name()],
        default_provider: state.config.default_llm_provider.display_name(),
        openai_model: state.config.openai_chat_model.clone(),
        groq_model: state.config.groq_chat_model.clone(),
        upload_types: ["txt", "csv"],
    })
}

/// Reproduce la inicialización que ocurre en cada interacción y devuelve qué
/// servicios quedaron disponibles, para habilitar los botones del frontend.
#[axum::debug_handler]
async fn connect_handler(
    State(state): State<AppState>,
    Json(payload): Json<ConnectPayload>,
) -> Json<ConnectResponse> {
    let mut notices = Notices::default();
    let services = session::initialize(state.connector.as_ref(), &payload.credentials, &mut notices).await;

    Json(ConnectResponse {
        notices,
        graph: services.graph.is_some(),
        llm: services.llm.is_some(),
        ready: services.is_ready(),
    })
}

#[axum::debug_handler]
async fn upload_handler(mut multipart: Multipart) -> Json<UploadResponse> {
    let mut notices = Notices::default();
    let mut outcome = IngestOutcome::default();

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some("file") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                match field.bytes().await {
                    Ok(bytes) => {
                        info!("Fichero recibido: {} ({} bytes)", file_name, bytes.len());
                        outcome = ingest::ingest_upload(&file_name, &bytes, &mut notices);
                    }
                    Err(e) => notices.error(format!("No se pudo procesar el fichero subido: {e}")),
                }
                break;
            }
            Ok(Some(field)) => debug!("Ignorando campo multipart {:?}", field.name()),
            Ok(None) => break,
            Err(e) => {
                notices.error(format!("No se pudo procesar el fichero subido: {e}"));
                break;
            }
        }
    }

    Json(UploadResponse { notices, outcome })
}

#[axum::debug_handler]
async fn graph_schema_handler(
    State(state): State<AppState>,
    Json(payload): Json<BuildGraphPayload>,
) -> Json<SchemaResponse> {
    let mut notices = Notices::default();
    let services = session::initialize(state.connector.as_ref(), &payload.credentials, &mut notices).await;

    let schema = actions::show_graph_schema(&services, &payload.documents, &mut notices).await;

    Json(SchemaResponse {
        notices,
        schema: schema.map(|s| s.to_string()),
    })
}

#[axum::debug_handler]
async fn delete_graph_handler(
    State(state): State<AppState>,
    Json(payload): Json<ConnectPayload>,
) -> Json<SchemaResponse> {
    let mut notices = Notices::default();
    let services = session::initialize(state.connector.as_ref(), &payload.credentials, &mut notices).await;

    let schema = actions::delete_graph_data(&services, &mut notices).await;

    Json(SchemaResponse {
        notices,
        schema: schema.map(|s| s.to_string()),
    })
}

#[axum::debug_handler]
async fn answer_handler(
    State(state): State<AppState>,
    Json(payload): Json<AnswerPayload>,
) -> Json<AnswerResponse> {
    let mut notices = Notices::default();
    let services = session::initialize(state.connector.as_ref(), &payload.credentials, &mut notices).await;

    let answer = actions::get_answer(
        &services,
        &payload.question,
        payload.allow_dangerous_queries,
        state.config.qa_top_k,
        &mut notices,
    )
    .await;

    Json(AnswerResponse { notices, answer })
}

// --- Handler de Apagado ---

#[axum::debug_handler]
async fn shutdown_handler(
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Ok(mut sender) = state.shutdown_sender.lock() {
        if let Some(sender) = sender.take() {
            let _ = sender.send(());
        }
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::session::fakes::{full_credentials, FakeConnector};
    use crate::testing::{FakeChatModel, InMemoryGraph};
    use axum::{body::Body, http::{header, Request}};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tokio::sync::oneshot;
    use tower::ServiceExt;

    fn credentials_json() -> Value {
        let creds = full_credentials();
        json!({
            "neo4j_uri": creds.neo4j_uri,
            "neo4j_username": creds.neo4j_username,
            "neo4j_password": creds.neo4j_password,
            "llm_provider": "OpenAI",
            "api_key": creds.api_key,
        })
    }

    fn app(connector: Arc<FakeConnector>) -> (Router, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (create_router(AppState::new(AppConfig::default(), connector, tx)), rx)
    }

    async fn post_json(app: Router, uri: &str, payload: Value) -> Value {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::to_vec(&payload).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn settings_lists_both_providers() {
        let (app, _rx) = app(Arc::new(FakeConnector::default()));
        let response = app
            .oneshot(Request::builder().uri("/api/settings").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["providers"], json!(["OpenAI", "Groq"]));
        assert_eq!(json["openai_model"], "gpt-4-turbo");
        assert_eq!(json["upload_types"], json!(["txt", "csv"]));
    }

    #[tokio::test]
    async fn connect_without_credentials_attempts_nothing() {
        let connector = Arc::new(FakeConnector::default());
        let (app, _rx) = app(connector.clone());

        let json = post_json(app, "/api/connect", json!({})).await;

        assert_eq!(json["graph"], false);
        assert_eq!(json["llm"], false);
        assert_eq!(json["notices"], json!([]));
        assert_eq!(connector.graph_attempts(), 0);
        assert_eq!(connector.llm_attempts(), 0);
    }

    #[tokio::test]
    async fn delete_without_graph_reports_error() {
        let (app, _rx) = app(Arc::new(FakeConnector::default()));

        let json = post_json(app, "/api/graph/delete", json!({"credentials": {}})).await;

        assert_eq!(json["notices"][0]["level"], "error");
        assert!(json.get("schema").is_none());
    }

    #[tokio::test]
    async fn schema_and_answer_round() {
        let graph = Arc::new(InMemoryGraph::with_rows(vec![json!({"o.id": "Acme Corp."})]));
        let llm = Arc::new(FakeChatModel::new([
            r#"{"nodes": [{"id": "Alice", "type": "Person"}, {"id": "Acme Corp.", "type": "Organization"}],
                "relationships": [{"source": "Alice", "source_type": "Person", "target": "Acme Corp.", "target_type": "Organization", "type": "WORKS_AT"}]}"#,
            "MATCH (p:Person)-[:WORKS_AT]->(o:Organization) RETURN o.id",
            "Alice works at Acme Corp.",
        ]));
        let connector = Arc::new(FakeConnector::new(graph, llm));

        let (app1, _rx1) = app(connector.clone());
        let json = post_json(
            app1,
            "/api/graph/schema",
            json!({"credentials": credentials_json(), "documents": [{"page_content": "Alice works at Acme Corp."}]}),
        )
        .await;
        assert_eq!(json["notices"][0]["message"], "¡Conectado a Neo4j!");
        assert!(json["schema"].as_str().unwrap().contains("(:Person)-[:WORKS_AT]->(:Organization)"));

        let (app2, _rx2) = app(connector.clone());
        let json = post_json(
            app2,
            "/api/answer",
            json!({"credentials": credentials_json(), "question": "Where does Alice work?"}),
        )
        .await;
        assert_eq!(json["answer"]["query"], "Where does Alice work?");
        assert!(json["answer"]["result"].as_str().unwrap().contains("Acme Corp."));
        // Cada petición vuelve a inicializar los servicios.
        assert_eq!(connector.graph_attempts(), 2);
    }

    #[tokio::test]
    async fn upload_accepts_multipart_text_file() {
        let (app, _rx) = app(Arc::new(FakeConnector::default()));
        let boundary = "XBOUNDARYX";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"abc.txt\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             Alice works at Acme Corp.\r\n\
             --{boundary}--\r\n"
        );

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/upload")
                    .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["documents"][0]["page_content"], "Alice works at Acme Corp.");
        assert_eq!(json["notices"][0]["level"], "success");
        assert!(json.get("table").is_none());
    }

    #[tokio::test]
    async fn shutdown_fires_the_channel() {
        let (app, rx) = app(Arc::new(FakeConnector::default()));
        let json_app = app.oneshot(
            Request::builder().method("POST").uri("/api/shutdown").body(Body::empty()).unwrap(),
        );
        let response = json_app.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        tokio_test::assert_ok!(rx.await);
    }
}
