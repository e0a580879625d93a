//! Modelos de dominio: documentos subidos, grafos extraídos y esquema de Neo4j.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Documento de texto listo para convertirse en grafo.
/// Un fichero subido produce siempre un único documento (también los CSV).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub page_content: String,
}

impl Document {
    pub fn new(page_content: impl Into<String>) -> Self {
        Self { page_content: page_content.into() }
    }
}

/// Nodo extraído del texto: se persiste como (:`node_type` {id}).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub node_type: String,
}

/// Relación dirigida entre dos nodos extraídos.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub source: Node,
    pub target: Node,
    pub rel_type: String,
}

/// Resultado de la extracción para un documento: nodos + relaciones + origen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub nodes: Vec<Node>,
    pub relationships: Vec<Relationship>,
    pub source: Document,
}

impl GraphDocument {
    pub fn empty(source: Document) -> Self {
        Self {
            nodes: Vec::new(),
            relationships: Vec::new(),
            source,
        }
    }
}

/// Propiedad de una etiqueta o tipo de relación, p.ej. `id: STRING`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct PropertyDef {
    pub property: String,
    pub prop_type: String,
}

/// Patrón de relación presente en la base de datos: (:start)-[:rel_type]->(:end).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct RelationshipPattern {
    pub start: String,
    pub rel_type: String,
    pub end: String,
}

/// Esquema del grafo tal y como existe ahora mismo en Neo4j.
///
/// Se usa `BTreeMap`/`BTreeSet` para que la representación textual sea estable
/// (el texto se muestra al usuario y se envía al LLM para generar Cypher).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphSchema {
    pub node_props: BTreeMap<String, BTreeSet<PropertyDef>>,
    pub rel_props: BTreeMap<String, BTreeSet<PropertyDef>>,
    pub relationships: BTreeSet<RelationshipPattern>,
}

impl GraphSchema {
    /// Sin etiquetas de nodo ni tipos de relación.
    pub fn is_empty(&self) -> bool {
        self.node_props.is_empty() && self.rel_props.is_empty() && self.relationships.is_empty()
    }

    pub fn add_node_label(&mut self, label: &str) {
        self.node_props.entry(label.to_string()).or_default();
    }

    pub fn add_node_property(&mut self, label: &str, property: &str, prop_type: &str) {
        self.node_props
            .entry(label.to_string())
            .or_default()
            .insert(PropertyDef {
                property: property.to_string(),
                prop_type: prop_type.to_string(),
            });
    }

    pub fn add_rel_property(&mut self, rel_type: &str, property: &str, prop_type: &str) {
        self.rel_props
            .entry(rel_type.to_string())
            .or_default()
            .insert(PropertyDef {
                property: property.to_string(),
                prop_type: prop_type.to_string(),
            });
    }

    pub fn add_relationship(&mut self, start: &str, rel_type: &str, end: &str) {
        self.relationships.insert(RelationshipPattern {
            start: start.to_string(),
            rel_type: rel_type.to_string(),
            end: end.to_string(),
        });
    }
}

fn write_props(f: &mut fmt::Formatter<'_>, name: &str, props: &BTreeSet<PropertyDef>) -> fmt::Result {
    let rendered: Vec<String> = props
        .iter()
        .map(|p| format!("{}: {}", p.property, p.prop_type))
        .collect();
    writeln!(f, "{} {{{}}}", name, rendered.join(", "))
}

impl fmt::Display for GraphSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Node properties:")?;
        for (label, props) in &self.node_props {
            write_props(f, label, props)?;
        }
        writeln!(f, "Relationship properties:")?;
        for (rel_type, props) in &self.rel_props {
            write_props(f, rel_type, props)?;
        }
        write!(f, "The relationships:")?;
        for rel in &self.relationships {
            write!(f, "\n(:{})-[:{}]->(:{})", rel.start, rel.rel_type, rel.end)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_schema_renders_only_headers() {
        let schema = GraphSchema::default();
        assert!(schema.is_empty());
        assert_eq!(
            schema.to_string(),
            "Node properties:\nRelationship properties:\nThe relationships:"
        );
    }

    #[test]
    fn schema_lists_labels_and_patterns() {
        let mut schema = GraphSchema::default();
        schema.add_node_property("Person", "id", "STRING");
        schema.add_node_property("Organization", "id", "STRING");
        schema.add_relationship("Person", "WORKS_AT", "Organization");

        let text = schema.to_string();
        assert!(!schema.is_empty());
        assert!(text.contains("Person {id: STRING}"));
        assert!(text.contains("Organization {id: STRING}"));
        assert!(text.ends_with("(:Person)-[:WORKS_AT]->(:Organization)"));
    }

    #[test]
    fn label_without_properties_is_still_listed() {
        let mut schema = GraphSchema::default();
        schema.add_node_label("Orphan");
        assert!(schema.to_string().contains("Orphan {}"));
    }
}
