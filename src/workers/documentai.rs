//! Document AI online processing client and payload shaping

use crate::workers::{DocumentAiMode, ProcessorBinding, WorkerError};
use base64::Engine;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use url::Url;

/// Resolve the regional Document AI base URL for `location`.
pub fn regional_endpoint(template: &str, location: &str) -> Result<Url, url::ParseError> {
    let mut endpoint = template.replace("{location}", location);
    if !endpoint.ends_with('/') {
        endpoint.push('/');
    }
    Url::parse(&endpoint)
}

/// Response of `processors/*:process`
#[derive(Debug, Deserialize)]
pub struct ProcessResponse {
    #[serde(default)]
    pub document: ProcessedDocument,
}

/// The subset of a processed document the workers report
#[derive(Debug, Default, Deserialize)]
pub struct ProcessedDocument {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub pages: Vec<Page>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub tables: Vec<Table>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    #[serde(default)]
    pub layout: Layout,
    #[serde(default)]
    pub header_rows: Vec<TableRow>,
    #[serde(default)]
    pub body_rows: Vec<TableRow>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TableRow {
    #[serde(default)]
    pub cells: Vec<TableCell>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TableCell {
    #[serde(default)]
    pub layout: Layout,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layout {
    #[serde(default)]
    pub text_anchor: Option<TextAnchor>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub bounding_poly: Option<BoundingPoly>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextAnchor {
    #[serde(default)]
    pub text_segments: Vec<TextSegment>,
}

/// Character range into the document text. Offsets are int64 and arrive as
/// JSON strings; a zero offset is omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextSegment {
    #[serde(default, deserialize_with = "int64")]
    pub start_index: usize,
    #[serde(default, deserialize_with = "int64")]
    pub end_index: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct BoundingPoly {
    #[serde(default)]
    pub vertices: Vec<Vertex>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
pub struct Vertex {
    #[serde(default)]
    pub x: i64,
    #[serde(default)]
    pub y: i64,
}

fn int64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(usize),
        Text(String),
    }
    match Repr::deserialize(deserializer)? {
        Repr::Number(n) => Ok(n),
        Repr::Text(text) => text.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    #[serde(rename = "type", default)]
    pub entity_type: String,
    #[serde(default)]
    pub mention_text: String,
    #[serde(default)]
    pub confidence: f64,
}

/// Client for the online `:process` call
#[derive(Debug, Clone)]
pub struct DocumentAiClient {
    http: reqwest::Client,
    endpoint_template: String,
    access_token: Option<String>,
}

impl DocumentAiClient {
    pub fn new(
        http: reqwest::Client,
        endpoint_template: impl Into<String>,
        access_token: Option<String>,
    ) -> Self {
        Self {
            http,
            endpoint_template: endpoint_template.into(),
            access_token,
        }
    }

    /// Send a single-page PDF to the processor and return the parsed document.
    pub async fn process(
        &self,
        binding: &ProcessorBinding,
        pdf: &[u8],
    ) -> Result<ProcessedDocument, WorkerError> {
        let base = regional_endpoint(&self.endpoint_template, &binding.location)
            .map_err(|e| WorkerError::Other(format!("invalid endpoint: {}", e)))?;
        let url = base
            .join(&format!("{}:process", binding.resource_name()))
            .map_err(|e| WorkerError::Other(format!("invalid endpoint: {}", e)))?;

        let body = json!({
            "rawDocument": {
                "content": base64::engine::general_purpose::STANDARD.encode(pdf),
                "mimeType": "application/pdf",
            }
        });

        let mut request = self.http.post(url).json(&body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::Status {
                status: status.as_u16(),
                body: truncate(&body, 512),
            });
        }

        let parsed: ProcessResponse = response.json().await?;
        Ok(parsed.document)
    }
}

/// Shape a processed document into the payload for `mode`.
pub fn shape_payload(
    mode: DocumentAiMode,
    worker: &str,
    file_name: &str,
    document: &ProcessedDocument,
) -> Value {
    match mode {
        DocumentAiMode::Entities => entities_payload(worker, file_name, document),
        DocumentAiMode::Classify => classification_payload(worker, file_name, document),
        DocumentAiMode::Tables => tables_payload(worker, file_name, document),
    }
}

fn entities_payload(worker: &str, file_name: &str, document: &ProcessedDocument) -> Value {
    if document.entities.is_empty() {
        tracing::debug!(worker, file_name, "No entities found in document");
    }
    let entities: Vec<Value> = document
        .entities
        .iter()
        .map(|e| {
            json!({
                "entity_type": e.entity_type,
                "entity_text": e.mention_text,
                "entity_confidence": e.confidence,
            })
        })
        .collect();

    json!({
        "processor": worker,
        "file_name": file_name,
        "document_entities": entities,
    })
}

fn classification_payload(worker: &str, file_name: &str, document: &ProcessedDocument) -> Value {
    // First entity wins a tie
    let best = document.entities.iter().fold(None, |best: Option<&Entity>, entity| match best {
        Some(current) if current.confidence >= entity.confidence => Some(current),
        _ => Some(entity),
    });

    let (category, confidence) = match best {
        Some(entity) => (entity.entity_type.clone(), entity.confidence),
        None => ("No category found".to_string(), 0.0),
    };

    json!({
        "processor": worker,
        "file_name": file_name,
        "category_prediction": category,
        "confidence": confidence,
    })
}

/// Report every table on every page. Column, row and cell entries carry the
/// document-wide `table_index` of the table they belong to.
fn tables_payload(worker: &str, file_name: &str, document: &ProcessedDocument) -> Value {
    let text: Vec<char> = document.text.chars().collect();
    let tables = document.pages.iter().flat_map(|page| page.tables.iter());

    let mut table_data = Vec::new();
    let mut column_data = Vec::new();
    let mut row_data = Vec::new();
    let mut content_data = Vec::new();

    for (table_index, table) in tables.enumerate() {
        let total_cols = table
            .header_rows
            .iter()
            .chain(table.body_rows.iter())
            .map(|row| row.cells.len())
            .max()
            .unwrap_or(0);
        table_data.push(json!({
            "table_index": table_index,
            "total_rows": table.header_rows.len() + table.body_rows.len(),
            "total_cols": total_cols,
            "table_limits": table.layout.bounding_poly.as_ref().and_then(boundary_limits),
        }));

        let header = table.header_rows.first();
        let body_cols = table.body_rows.iter().map(|row| row.cells.len()).max().unwrap_or(0);
        for col_index in 0..body_cols {
            let header_cell = header.and_then(|row| row.cells.get(col_index));
            let column = header_cell
                .into_iter()
                .chain(table.body_rows.iter().filter_map(|row| row.cells.get(col_index)));
            column_data.push(json!({
                "table_index": table_index,
                "col_index": col_index,
                "col_cell_text": header_cell.map(|cell| anchor_text(&cell.layout, &text)),
                "col_limits": span_limits(column),
            }));
        }

        for (row_index, row) in table.body_rows.iter().enumerate() {
            row_data.push(json!({
                "table_index": table_index,
                "row_index": row_index,
                "row_first_cell_text": row.cells.first().map(|cell| anchor_text(&cell.layout, &text)),
                "row_limits": span_limits(row.cells.iter()),
            }));
        }

        let header_count = table.header_rows.len();
        let labelled = table
            .header_rows
            .iter()
            .enumerate()
            .map(|(i, row)| ("header", i, row))
            .chain(
                table
                    .body_rows
                    .iter()
                    .enumerate()
                    .map(move |(i, row)| ("body", header_count + i, row)),
            );
        for (row_type, row_index, row) in labelled {
            for (col_index, cell) in row.cells.iter().enumerate() {
                content_data.push(json!({
                    "table_index": table_index,
                    "row_type": row_type,
                    "row_index": row_index,
                    "col_index": col_index,
                    "cell_data": {
                        "cell_content": anchor_text(&cell.layout, &text),
                        "cell_extraction_confidence": cell.layout.confidence,
                        "cell_limits": cell.layout.bounding_poly.as_ref().and_then(boundary_limits),
                    },
                }));
            }
        }
    }

    if table_data.is_empty() {
        tracing::debug!(worker, file_name, "No tables found in document");
    }

    json!({
        "processor": worker,
        "file_name": file_name,
        "table_entities": {
            "table_data": table_data,
            "column_data": column_data,
            "row_data": row_data,
            "content_data": content_data,
        },
    })
}

/// Text covered by a layout's anchor, with newlines flattened to spaces.
fn anchor_text(layout: &Layout, text: &[char]) -> Value {
    let segments = layout
        .text_anchor
        .as_ref()
        .map(|anchor| anchor.text_segments.as_slice())
        .unwrap_or_default();

    let mut extracted = String::new();
    for segment in segments {
        let end = segment.end_index.min(text.len());
        let start = segment.start_index.min(end);
        extracted.extend(&text[start..end]);
    }

    json!({
        "text": extracted.trim().replace('\n', " "),
        "start_index": segments.iter().map(|s| s.start_index).min(),
        "end_index": segments.iter().map(|s| s.end_index).max(),
    })
}

/// Axis-aligned rectangle of a polygon, read from its first four vertices
/// in top-left, top-right, bottom-right, bottom-left order.
#[derive(Debug, Clone, Copy)]
struct Rect {
    top_left: Vertex,
    top_right: Vertex,
    bottom_right: Vertex,
    bottom_left: Vertex,
}

impl Rect {
    fn of(poly: &BoundingPoly) -> Option<Self> {
        match poly.vertices.as_slice() {
            [top_left, top_right, bottom_right, bottom_left, ..] => Some(Self {
                top_left: *top_left,
                top_right: *top_right,
                bottom_right: *bottom_right,
                bottom_left: *bottom_left,
            }),
            _ => None,
        }
    }
}

fn boundary_limits(poly: &BoundingPoly) -> Option<Value> {
    let r = Rect::of(poly)?;
    Some(json!({
        "left_limit": {
            "x_position": r.top_left.x,
            "vertical_extent": {"top": r.top_left.y, "bottom": r.bottom_left.y},
        },
        "right_limit": {
            "x_position": r.top_right.x,
            "vertical_extent": {"top": r.top_right.y, "bottom": r.bottom_right.y},
        },
        "top_limit": {
            "y_position": r.top_left.y,
            "horizontal_extent": {"left": r.top_left.x, "right": r.top_right.x},
        },
        "bottom_limit": {
            "y_position": r.bottom_left.y,
            "horizontal_extent": {"left": r.bottom_left.x, "right": r.bottom_right.x},
        },
    }))
}

/// Outer limits of a group of cells. Cells without a usable polygon are
/// ignored; all limits are null when none has one.
fn span_limits<'a>(cells: impl Iterator<Item = &'a TableCell>) -> Value {
    let rects: Vec<Rect> = cells
        .filter_map(|cell| cell.layout.bounding_poly.as_ref().and_then(Rect::of))
        .collect();
    json!({
        "left_limit": rects.iter().map(|r| r.top_left.x).min(),
        "right_limit": rects.iter().map(|r| r.top_right.x).max(),
        "top_limit": rects.iter().map(|r| r.top_left.y).min(),
        "bottom_limit": rects.iter().map(|r| r.bottom_left.y).max(),
    })
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn document() -> ProcessedDocument {
        let response: ProcessResponse = serde_json::from_str(
            r#"{"document": {"text": "...", "entities": [
                {"type": "invoice", "mentionText": "INV-1", "confidence": 0.42},
                {"type": "receipt", "mentionText": "R-9", "confidence": 0.91}
            ]}}"#,
        )
        .unwrap();
        response.document
    }

    #[test]
    fn test_regional_endpoint() {
        let url = regional_endpoint("https://{location}-documentai.googleapis.com/v1", "eu").unwrap();
        assert_eq!(url.as_str(), "https://eu-documentai.googleapis.com/v1/");
        let joined = url
            .join("projects/p/locations/eu/processors/1:process")
            .unwrap();
        assert_eq!(
            joined.as_str(),
            "https://eu-documentai.googleapis.com/v1/projects/p/locations/eu/processors/1:process"
        );
    }

    #[test]
    fn test_entities_payload() {
        let payload = shape_payload(DocumentAiMode::Entities, "kv", "doc1-p1.pdf", &document());
        assert_eq!(payload["processor"], "kv");
        assert_eq!(payload["document_entities"].as_array().unwrap().len(), 2);
        assert_eq!(payload["document_entities"][1]["entity_text"], "R-9");
    }

    #[test]
    fn test_classification_picks_highest_confidence() {
        let payload = shape_payload(DocumentAiMode::Classify, "cat", "doc1-p1.pdf", &document());
        assert_eq!(
            payload,
            json!({
                "processor": "cat",
                "file_name": "doc1-p1.pdf",
                "category_prediction": "receipt",
                "confidence": 0.91,
            })
        );
    }

    #[test]
    fn test_classification_tie_keeps_first_entity() {
        let response: ProcessResponse = serde_json::from_str(
            r#"{"document": {"entities": [
                {"type": "invoice", "confidence": 0.8},
                {"type": "receipt", "confidence": 0.8},
                {"type": "letter", "confidence": 0.3}
            ]}}"#,
        )
        .unwrap();
        let payload = shape_payload(DocumentAiMode::Classify, "cat", "doc1-p1.pdf", &response.document);
        assert_eq!(payload["category_prediction"], "invoice");
    }

    fn two_table_document() -> ProcessedDocument {
        let response: ProcessResponse = serde_json::from_str(
            r#"{"document": {
                "text": "Item\nQty\nPen\n2\nTotal\n9\n",
                "pages": [
                    {"tables": [{
                        "layout": {"boundingPoly": {"vertices": [
                            {"x": 10, "y": 10}, {"x": 90, "y": 10}, {"x": 90, "y": 30}, {"x": 10, "y": 30}
                        ]}},
                        "headerRows": [{"cells": [
                            {"layout": {
                                "textAnchor": {"textSegments": [{"endIndex": "4"}]},
                                "confidence": 0.98,
                                "boundingPoly": {"vertices": [
                                    {"x": 10, "y": 10}, {"x": 50, "y": 10}, {"x": 50, "y": 20}, {"x": 10, "y": 20}
                                ]}
                            }},
                            {"layout": {
                                "textAnchor": {"textSegments": [{"startIndex": "5", "endIndex": "8"}]},
                                "boundingPoly": {"vertices": [
                                    {"x": 50, "y": 10}, {"x": 90, "y": 10}, {"x": 90, "y": 20}, {"x": 50, "y": 20}
                                ]}
                            }}
                        ]}],
                        "bodyRows": [{"cells": [
                            {"layout": {
                                "textAnchor": {"textSegments": [{"startIndex": "9", "endIndex": "12"}]},
                                "boundingPoly": {"vertices": [
                                    {"x": 10, "y": 20}, {"x": 50, "y": 20}, {"x": 50, "y": 30}, {"x": 10, "y": 30}
                                ]}
                            }},
                            {"layout": {
                                "textAnchor": {"textSegments": [{"startIndex": "13", "endIndex": "14"}]},
                                "boundingPoly": {"vertices": [
                                    {"x": 50, "y": 20}, {"x": 90, "y": 20}, {"x": 90, "y": 30}, {"x": 50, "y": 30}
                                ]}
                            }}
                        ]}]
                    }]},
                    {"tables": [{
                        "bodyRows": [{"cells": [
                            {"layout": {"textAnchor": {"textSegments": [{"startIndex": "15", "endIndex": "20"}]}}},
                            {"layout": {"textAnchor": {"textSegments": [{"startIndex": 21, "endIndex": 22}]}}}
                        ]}]
                    }]}
                ]
            }}"#,
        )
        .unwrap();
        response.document
    }

    #[test]
    fn test_tables_payload_reports_every_table() {
        let payload = shape_payload(DocumentAiMode::Tables, "tab", "doc1-p2.pdf", &two_table_document());
        assert_eq!(payload["processor"], "tab");
        let tables = &payload["table_entities"];

        let table_data = tables["table_data"].as_array().unwrap();
        assert_eq!(table_data.len(), 2);
        assert_eq!(table_data[0]["total_rows"], 2);
        assert_eq!(table_data[0]["total_cols"], 2);
        assert_eq!(table_data[0]["table_limits"]["left_limit"]["x_position"], 10);
        assert_eq!(table_data[0]["table_limits"]["bottom_limit"]["y_position"], 30);
        assert_eq!(table_data[1]["table_index"], 1);
        assert_eq!(table_data[1]["total_rows"], 1);
        assert_eq!(table_data[1]["table_limits"], Value::Null);

        let columns = tables["column_data"].as_array().unwrap();
        assert_eq!(columns.len(), 4);
        assert_eq!(
            columns[0]["col_cell_text"],
            json!({"text": "Item", "start_index": 0, "end_index": 4})
        );
        assert_eq!(
            columns[1]["col_limits"],
            json!({"left_limit": 50, "right_limit": 90, "top_limit": 10, "bottom_limit": 30})
        );
        assert_eq!(columns[2]["table_index"], 1);
        assert_eq!(columns[2]["col_cell_text"], Value::Null);
        assert_eq!(columns[2]["col_limits"]["left_limit"], Value::Null);

        let rows = tables["row_data"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["row_first_cell_text"]["text"], "Pen");
        assert_eq!(rows[0]["row_limits"]["right_limit"], 90);
        assert_eq!(
            rows[1]["row_first_cell_text"],
            json!({"text": "Total", "start_index": 15, "end_index": 20})
        );

        let cells = tables["content_data"].as_array().unwrap();
        assert_eq!(cells.len(), 6);
        assert_eq!(cells[0]["row_type"], "header");
        assert_eq!(cells[0]["cell_data"]["cell_extraction_confidence"], 0.98);
        assert_eq!(cells[2]["row_type"], "body");
        assert_eq!(cells[2]["row_index"], 1);
        assert_eq!(cells[2]["cell_data"]["cell_content"]["text"], "Pen");
        assert_eq!(cells[5]["table_index"], 1);
        assert_eq!(cells[5]["row_index"], 0);
        assert_eq!(cells[5]["col_index"], 1);
        assert_eq!(cells[5]["cell_data"]["cell_content"]["text"], "9");
        assert_eq!(cells[5]["cell_data"]["cell_limits"], Value::Null);
    }

    #[test]
    fn test_tables_payload_without_tables() {
        let payload = shape_payload(
            DocumentAiMode::Tables,
            "tab",
            "blank.pdf",
            &ProcessedDocument::default(),
        );
        assert_eq!(
            payload["table_entities"],
            json!({"table_data": [], "column_data": [], "row_data": [], "content_data": []})
        );
    }

    #[test]
    fn test_classification_without_entities() {
        let payload = shape_payload(
            DocumentAiMode::Classify,
            "cat",
            "blank.pdf",
            &ProcessedDocument::default(),
        );
        assert_eq!(payload["category_prediction"], "No category found");
        assert_eq!(payload["confidence"], 0.0);
    }
}
