//! Acceso a Neo4j: conexión, escritura de grafos extraídos, consultas Cypher
//! arbitrarias y lectura del esquema.

use std::sync::RwLock;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use neo4rs::{query, ConfigBuilder, Graph};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::models::{GraphDocument, GraphSchema};

pub const DELETE_ALL_QUERY: &str = "MATCH (n) DETACH DELETE n";

const NODE_PROPERTIES_QUERY: &str = "CALL db.schema.nodeTypeProperties()
     YIELD nodeLabels, propertyName, propertyTypes
     RETURN nodeLabels, propertyName, propertyTypes";

const REL_PROPERTIES_QUERY: &str = "CALL db.schema.relTypeProperties()
     YIELD relType, propertyName, propertyTypes
     RETURN relType, propertyName, propertyTypes";

/// Patrones `(:A)-[:T]->(:B)` a partir de una muestra acotada de relaciones
/// por tipo, para no recorrer el grafo entero en cada conexión.
const REL_PATTERNS_QUERY: &str = "CALL db.relationshipTypes() YIELD relationshipType
     CALL {
       WITH relationshipType
       MATCH (a)-[r]->(b) WHERE type(r) = relationshipType
       WITH a, b LIMIT 1000
       UNWIND labels(a) AS source
       UNWIND labels(b) AS target
       RETURN DISTINCT source, target
     }
     RETURN DISTINCT source, relationshipType AS rel_type, target";

const SUPPORTED_SCHEMES: [&str; 6] = ["bolt", "bolt+s", "bolt+ssc", "neo4j", "neo4j+s", "neo4j+ssc"];

/// Operaciones que la aplicación necesita de una base de datos de grafos.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Ejecuta Cypher y devuelve cada fila como un objeto JSON.
    async fn query(&self, cypher: &str) -> Result<Vec<Value>>;

    /// Persiste nodos y relaciones. No es transaccional: si algo falla a mitad,
    /// lo ya escrito se queda en la base de datos.
    async fn add_graph_documents(&self, documents: &[GraphDocument]) -> Result<()>;

    /// Vuelve a leer el esquema de la base de datos y lo guarda.
    async fn refresh_schema(&self) -> Result<GraphSchema>;

    /// Último esquema leído con `refresh_schema`.
    fn schema(&self) -> GraphSchema;
}

/// Cliente Neo4j sobre `neo4rs`.
pub struct Neo4jGraph {
    graph: Graph,
    schema: RwLock<GraphSchema>,
}

impl Neo4jGraph {
    /// Conecta, comprueba la conexión con `RETURN 1` y carga el esquema inicial.
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let scheme = validate_uri(uri)?;

        let config = ConfigBuilder::default()
            .uri(uri)
            .user(user)
            .password(password)
            .build()
            .context("Configuración de Neo4j inválida")?;

        info!("Conectando a Neo4j ({scheme})...");
        let graph = Graph::connect(config)
            .await
            .context("No se pudo crear el pool de conexiones de Neo4j")?;

        // neo4rs abre las conexiones de forma perezosa: forzamos el handshake aquí.
        graph
            .run(query("RETURN 1"))
            .await
            .context("Neo4j no responde")?;
        info!("Conexión a Neo4j OK");

        let client = Self {
            graph,
            schema: RwLock::new(GraphSchema::default()),
        };
        client.refresh_schema().await?;
        Ok(client)
    }

    async fn fetch_rows(&self, cypher: &str) -> Result<Vec<neo4rs::Row>> {
        let mut cursor = self.graph.execute(query(cypher)).await?;
        let mut rows = Vec::new();
        while let Some(row) = cursor.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn read_schema(&self) -> Result<GraphSchema> {
        let mut schema = GraphSchema::default();

        for row in self.fetch_rows(NODE_PROPERTIES_QUERY).await? {
            let labels: Vec<String> = row.get("nodeLabels").unwrap_or_default();
            let property: Option<String> = row.get("propertyName").unwrap_or_default();
            let types: Option<Vec<String>> = row.get("propertyTypes").unwrap_or_default();

            for label in labels.iter().filter(|l| !is_internal_label(l)) {
                match &property {
                    Some(name) => schema.add_node_property(label, name, &format_property_types(types.as_deref())),
                    None => schema.add_node_label(label),
                }
            }
        }

        for row in self.fetch_rows(REL_PROPERTIES_QUERY).await? {
            let rel_type: String = row.get("relType").unwrap_or_default();
            let property: Option<String> = row.get("propertyName").unwrap_or_default();
            let types: Option<Vec<String>> = row.get("propertyTypes").unwrap_or_default();

            if let Some(name) = property {
                schema.add_rel_property(&strip_rel_type(&rel_type), &name, &format_property_types(types.as_deref()));
            }
        }

        for row in self.fetch_rows(REL_PATTERNS_QUERY).await? {
            if let (Ok(source), Ok(rel_type), Ok(target)) = (
                row.get::<String>("source"),
                row.get::<String>("rel_type"),
                row.get::<String>("target"),
            ) {
                if !is_internal_label(&source) && !is_internal_label(&target) {
                    schema.add_relationship(&source, &rel_type, &target);
                }
            }
        }

        Ok(schema)
    }
}

#[async_trait]
impl GraphStore for Neo4jGraph {
    async fn query(&self, cypher: &str) -> Result<Vec<Value>> {
        let rows = self.fetch_rows(cypher).await?;
        rows.iter()
            .map(|row| {
                row.to::<Value>()
                    .map_err(|e| anyhow!("No se pudo convertir una fila de Neo4j a JSON: {e}"))
            })
            .collect()
    }

    async fn add_graph_documents(&self, documents: &[GraphDocument]) -> Result<()> {
        for doc in documents {
            for node in &doc.nodes {
                let cypher = format!("MERGE (n:{} {{id: $id}})", escape_identifier(&node.node_type));
                self.graph
                    .run(query(&cypher).param("id", node.id.clone()))
                    .await
                    .with_context(|| format!("Error creando el nodo '{}'", node.id))?;
            }

            for rel in &doc.relationships {
                let cypher = format!(
                    "MERGE (s:{} {{id: $source}})
                     MERGE (t:{} {{id: $target}})
                     MERGE (s)-[:{}]->(t)",
                    escape_identifier(&rel.source.node_type),
                    escape_identifier(&rel.target.node_type),
                    escape_identifier(&rel.rel_type),
                );
                self.graph
                    .run(
                        query(&cypher)
                            .param("source", rel.source.id.clone())
                            .param("target", rel.target.id.clone()),
                    )
                    .await
                    .with_context(|| {
                        format!(
                            "Error creando la relación {} -[{}]-> {}",
                            rel.source.id, rel.rel_type, rel.target.id
                        )
                    })?;
            }

            debug!(
                "Persistido documento con {} nodos y {} relaciones",
                doc.nodes.len(),
                doc.relationships.len()
            );
        }
        Ok(())
    }

    async fn refresh_schema(&self) -> Result<GraphSchema> {
        let schema = self.read_schema().await?;
        *self
            .schema
            .write()
            .map_err(|_| anyhow!("El esquema en memoria está envenenado"))? = schema.clone();
        Ok(schema)
    }

    fn schema(&self) -> GraphSchema {
        self.schema
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

/// Comprueba la URI y devuelve su esquema. La URI es una credencial: no aparece
/// en los mensajes de error.
fn validate_uri(uri: &str) -> Result<String> {
    let url = Url::parse(uri).context("URI de Neo4j inválida")?;
    if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
        return Err(anyhow!(
            "Esquema '{}' no soportado en la URI de Neo4j (usa uno de: {})",
            url.scheme(),
            SUPPORTED_SCHEMES.join(", ")
        ));
    }
    if url.host_str().is_none() {
        return Err(anyhow!("La URI de Neo4j no tiene host"));
    }
    Ok(url.scheme().to_string())
}

/// Escapa una etiqueta/tipo para interpolarlo en Cypher entre backticks.
pub fn escape_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// `db.schema.relTypeProperties` devuelve los tipos como ":`WORKS_AT`".
fn strip_rel_type(raw: &str) -> String {
    raw.trim_start_matches(':').trim_matches('`').to_string()
}

/// Las etiquetas de Neo4j Bloom no forman parte del modelo de datos.
fn is_internal_label(label: &str) -> bool {
    label.starts_with("_Bloom")
}

fn format_property_types(types: Option<&[String]>) -> String {
    let Some(types) = types else {
        return "UNKNOWN".to_string();
    };
    let mapped: Vec<String> = types
        .iter()
        .map(|t| match t.as_str() {
            "String" => "STRING".to_string(),
            "Long" => "INTEGER".to_string(),
            "Double" => "FLOAT".to_string(),
            "Boolean" => "BOOLEAN".to_string(),
            "StringArray" => "LIST".to_string(),
            other => other.to_uppercase(),
        })
        .collect();
    if mapped.is_empty() {
        "UNKNOWN".to_string()
    } else {
        mapped.join("|")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_backtick_escaped() {
        assert_eq!(escape_identifier("Person"), "`Person`");
        assert_eq!(escape_identifier("WORKS_AT"), "`WORKS_AT`");
        assert_eq!(escape_identifier("Bad`) DETACH DELETE (x"), "`Bad``) DETACH DELETE (x`");
    }

    #[test]
    fn rel_types_from_procedures_are_cleaned() {
        assert_eq!(strip_rel_type(":`WORKS_AT`"), "WORKS_AT");
        assert_eq!(strip_rel_type("KNOWS"), "KNOWS");
    }

    #[test]
    fn property_types_use_cypher_names() {
        let types = vec!["String".to_string()];
        assert_eq!(format_property_types(Some(&types)), "STRING");
        let types = vec!["Long".to_string(), "Double".to_string()];
        assert_eq!(format_property_types(Some(&types)), "INTEGER|FLOAT");
        assert_eq!(format_property_types(None), "UNKNOWN");
    }

    #[test]
    fn uri_schemes_are_validated() {
        assert!(validate_uri("neo4j+s://abcd1234.databases.neo4j.io").is_ok());
        assert!(validate_uri("bolt://localhost:7687").is_ok());
        assert!(validate_uri("http://localhost:7474").is_err());
        assert!(validate_uri("no es una uri").is_err());
        assert_eq!(validate_uri("bolt://localhost:7687").unwrap(), "bolt");
    }

    #[test]
    fn uri_errors_do_not_echo_the_uri() {
        for uri in ["http://cuenta-privada.databases.neo4j.io:7474", "cuenta-privada sin esquema"] {
            let err = validate_uri(uri).unwrap_err();
            assert!(!format!("{err:#}").contains("cuenta-privada"), "{err:#}");
        }
    }

    #[test]
    fn bloom_labels_are_internal() {
        assert!(is_internal_label("_Bloom_Perspective_"));
        assert!(!is_internal_label("Person"));
    }
}
