//! Preguntas en lenguaje natural sobre el grafo: el LLM genera Cypher a partir
//! del esquema, se ejecuta contra Neo4j y el LLM redacta la respuesta final.
//!
//! Flujo:
//!   1. Generación de Cypher con el esquema actual como contexto.
//!   2. Limpieza del bloque de código y control de sentencias de escritura.
//!   3. Ejecución de la consulta (máximo `top_k` filas).
//!   4. El LLM responde usando las filas como información autoritativa.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    llm::{strip_code_fence, ChatModel},
    neo4j_client::GraphStore,
};

const CYPHER_GENERATION_PREAMBLE: &str = "You translate questions into Cypher statements for a Neo4j graph database.";

const CYPHER_GENERATION_TEMPLATE: &str = r"Task: Generate Cypher statement to query a graph database.
Instructions:
Use only the provided relationship types and properties in the schema.
Do not use any other relationship types or properties that are not provided.
Schema:
{schema}
Note: Do not include any explanations or apologies in your responses.
Do not respond to any questions that might ask anything else than for you to construct a Cypher statement.
Do not include any text except the generated Cypher statement.

The question is:
{question}";

const CYPHER_QA_PREAMBLE: &str = "You are an assistant that helps to form nice and human understandable answers.";

const CYPHER_QA_TEMPLATE: &str = r"The information part contains the provided information that you must use to construct an answer.
The provided information is authoritative, you must never doubt it or try to use your internal knowledge to correct it.
Make the answer sound as a response to the question. Do not mention that you based the result on the given information.
If the provided information is empty, say that you don't know the answer.
Information:
{context}

Question: {question}
Helpful Answer:";

/// Cláusulas que modifican datos o administran la base de datos.
const WRITE_KEYWORDS: [&str; 16] = [
    "CREATE", "MERGE", "DELETE", "DETACH", "SET", "REMOVE", "DROP", "FOREACH",
    "LOAD", "ALTER", "GRANT", "DENY", "REVOKE", "RENAME", "TERMINATE", "ENABLE",
];

/// Paso intermedio de la cadena, devuelto junto a la respuesta.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum IntermediateStep {
    Cypher(String),
    Context(Value),
    QueryError(String),
}

/// Respuesta de la cadena tal y como se muestra al usuario.
#[derive(Debug, Clone, Serialize)]
pub struct QaResponse {
    pub query: String,
    pub result: String,
    pub intermediate_steps: Vec<IntermediateStep>,
}

/// Cadena pregunta -> Cypher -> respuesta sobre un grafo concreto.
pub struct GraphCypherQaChain {
    graph: Arc<dyn GraphStore>,
    llm: Arc<dyn ChatModel>,
    graph_schema: String,
    top_k: usize,
    allow_dangerous_requests: bool,
}

impl GraphCypherQaChain {
    /// Construye la cadena con el esquema actual del grafo.
    ///
    /// Con `allow_dangerous_requests = false` la cadena sólo ejecuta consultas de
    /// lectura; con `true` cualquier Cypher generado se ejecuta tal cual contra la
    /// base de datos, y se deja constancia en el log.
    pub fn from_llm(
        graph: Arc<dyn GraphStore>,
        llm: Arc<dyn ChatModel>,
        allow_dangerous_requests: bool,
    ) -> Self {
        if allow_dangerous_requests {
            warn!(
                "Cadena Cypher QA creada con consultas peligrosas permitidas: el Cypher generado por {} se ejecutará sin restricciones",
                llm.describe()
            );
        }
        let graph_schema = graph.schema().to_string();
        Self {
            graph,
            llm,
            graph_schema,
            top_k: 10,
            allow_dangerous_requests,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub async fn invoke(&self, question: &str) -> Result<QaResponse> {
        let mut intermediate_steps = Vec::new();

        // 1) Generar Cypher
        let cypher_prompt = CYPHER_GENERATION_TEMPLATE
            .replace("{schema}", &self.graph_schema)
            .replace("{question}", question);
        let generated = self.llm.complete(CYPHER_GENERATION_PREAMBLE, &cypher_prompt).await?;
        let cypher = strip_code_fence(&generated, "cypher");
        info!("Cypher generado: {}", cypher);

        // 2) Control de escritura
        if !self.allow_dangerous_requests {
            if let Some(keyword) = find_write_clause(&cypher) {
                return Err(anyhow!(
                    "La consulta generada contiene una cláusula no permitida en modo lectura ({keyword}) y las consultas peligrosas no están permitidas: {cypher}"
                ));
            }
        }
        intermediate_steps.push(IntermediateStep::Cypher(cypher.clone()));

        // 3) Ejecutar
        let context = if cypher.is_empty() {
            Value::Array(Vec::new())
        } else {
            match self.graph.query(&cypher).await {
                Ok(rows) => Value::Array(rows.into_iter().take(self.top_k).collect()),
                Err(e) => {
                    warn!("Error ejecutando el Cypher generado: {e}");
                    intermediate_steps.push(IntermediateStep::QueryError(e.to_string()));
                    Value::Array(Vec::new())
                }
            }
        };
        info!("Contexto completo: {}", context);
        intermediate_steps.push(IntermediateStep::Context(context.clone()));

        // 4) Redactar la respuesta
        let qa_prompt = CYPHER_QA_TEMPLATE
            .replace("{context}", &context.to_string())
            .replace("{question}", question);
        let result = self.llm.complete(CYPHER_QA_PREAMBLE, &qa_prompt).await?;

        Ok(QaResponse {
            query: question.to_string(),
            result: result.trim().to_string(),
            intermediate_steps,
        })
    }
}

/// Procedimientos de sólo lectura que se pueden invocar con `CALL` sin
/// permitir consultas peligrosas. Se comparan en minúsculas.
const READ_PROCEDURES: [&str; 7] = [
    "db.labels",
    "db.relationshiptypes",
    "db.propertykeys",
    "db.schema.nodetypeproperties",
    "db.schema.reltypeproperties",
    "db.schema.visualization",
    "dbms.components",
];

/// Devuelve la primera cláusula no permitida en modo lectura: una palabra
/// clave de escritura o un `CALL` a un procedimiento fuera de `READ_PROCEDURES`.
///
/// Las palabras precedidas de `:`, `.` o `$` son etiquetas, propiedades o
/// parámetros y no cuentan como cláusulas.
pub fn find_write_clause(cypher: &str) -> Option<&'static str> {
    let stripped = strip_literals(cypher);
    let words = words(&stripped);

    let mut i = 0;
    while i < words.len() {
        let word = &words[i];
        i += 1;
        if matches!(word.before, Some(':' | '.' | '$')) {
            continue;
        }
        let upper = word.text.to_uppercase();
        if upper == "CALL" {
            // `CALL { ... }` es una subconsulta y se revisa palabra a palabra.
            if word.after == Some('{') {
                continue;
            }
            let mut procedure = String::new();
            while let Some(part) = words.get(i) {
                procedure.push_str(part.text);
                i += 1;
                if part.after != Some('.') {
                    break;
                }
                procedure.push('.');
            }
            if !READ_PROCEDURES.contains(&procedure.to_lowercase().as_str()) {
                return Some("CALL");
            }
            continue;
        }
        if let Some(keyword) = WRITE_KEYWORDS.iter().copied().find(|k| *k == upper) {
            return Some(keyword);
        }
    }
    None
}

/// Palabra del Cypher junto al carácter no blanco que la precede y la sigue.
struct Word<'a> {
    text: &'a str,
    before: Option<char>,
    after: Option<char>,
}

fn words(cypher: &str) -> Vec<Word<'_>> {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let mut words = Vec::new();
    let mut start: Option<(usize, Option<char>)> = None;
    let mut last = None;

    for (idx, c) in cypher.char_indices().chain(std::iter::once((cypher.len(), ' '))) {
        match (start, is_word(c)) {
            (None, true) => start = Some((idx, last)),
            (Some((begin, before)), false) => {
                let after = cypher[idx..].chars().find(|c| !c.is_whitespace());
                words.push(Word { text: &cypher[begin..idx], before, after });
                start = None;
            }
            _ => {}
        }
        if !c.is_whitespace() {
            last = Some(c);
        }
    }
    words
}

/// Elimina literales de texto, identificadores entre backticks y comentarios.
fn strip_literals(cypher: &str) -> String {
    let mut out = String::with_capacity(cypher.len());
    let mut chars = cypher.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                let quote = c;
                while let Some(inner) = chars.next() {
                    if inner == '\\' && quote != '`' {
                        chars.next();
                    } else if inner == quote {
                        break;
                    }
                }
                out.push(' ');
            }
            '/' if chars.peek() == Some(&'/') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        break;
                    }
                }
                out.push(' ');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for inner in chars.by_ref() {
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}
