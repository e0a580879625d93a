//! Ingesta de un fichero subido (txt o csv) en un único `Document`.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tracing::info;

use crate::{models::Document, session::Notices};

/// Tabla leída de un CSV, para mostrarla al usuario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Resultado de la ingesta de un fichero.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestOutcome {
    pub documents: Vec<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<CsvTable>,
}

/// Convierte el fichero subido en documentos. Cualquier error se informa en
/// `notices` y deja la lista de documentos vacía.
pub fn ingest_upload(file_name: &str, bytes: &[u8], notices: &mut Notices) -> IngestOutcome {
    match read_upload(file_name, bytes) {
        Ok(Some(outcome)) => {
            if outcome.table.is_some() {
                notices.success("¡Contenido del CSV preparado para la conversión a grafo!");
            } else {
                notices.success("¡Fichero de texto subido correctamente!");
            }
            outcome
        }
        Ok(None) => IngestOutcome::default(),
        Err(e) => {
            notices.error(format!("No se pudo procesar el fichero subido: {e:#}"));
            IngestOutcome::default()
        }
    }
}

fn read_upload(file_name: &str, bytes: &[u8]) -> Result<Option<IngestOutcome>> {
    // Igual que un split por '.' quedándose con el último trozo.
    let extension = file_name.rsplit('.').next().unwrap_or("");

    match extension {
        "txt" => {
            let text = std::str::from_utf8(bytes).context("El fichero no es UTF-8 válido")?;
            Ok(Some(IngestOutcome {
                documents: vec![Document::new(text)],
                table: None,
            }))
        }
        "csv" => {
            let table = parse_csv(bytes)?;
            let csv_content = table_to_csv(&table)?;
            Ok(Some(IngestOutcome {
                documents: vec![Document::new(csv_content)],
                table: Some(table),
            }))
        }
        _ => {
            info!("Saltando fichero con extensión no soportada ('.{}'): {}", extension, file_name);
            Ok(None)
        }
    }
}

/// Lee un CSV con cabecera. Las filas cortas se completan con celdas vacías;
/// las filas con más campos que la cabecera son un error.
pub fn parse_csv(bytes: &[u8]) -> Result<CsvTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .context("No se pudo leer la cabecera del CSV")?
        .iter()
        .map(str::to_string)
        .collect();
    if headers.is_empty() {
        return Err(anyhow!("No hay columnas que leer en el fichero"));
    }

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Error leyendo la fila {} del CSV", index + 1))?;
        if record.len() > headers.len() {
            let line = record.position().map(|p| p.line()).unwrap_or(index as u64 + 2);
            return Err(anyhow!(
                "Error de formato: se esperaban {} campos en la línea {}, hay {}",
                headers.len(),
                line,
                record.len()
            ));
        }
        let mut row: Vec<String> = record.iter().map(str::to_string).collect();
        row.resize(headers.len(), String::new());
        rows.push(row);
    }

    Ok(CsvTable { headers, rows })
}

/// Serializa la tabla de nuevo a texto CSV (cabecera incluida, sin índice).
pub fn table_to_csv(table: &CsvTable) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer.write_record(&table.headers)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow!("No se pudo volcar el CSV: {e}"))?;
    Ok(String::from_utf8(bytes)?)
}
