//! Result normalisation and rendering.
//!
//! The service reports results as a loosely shaped JSON object discriminated
//! by `resultType`. [`ExecOutput::from_payload`] folds every shape into one
//! closed enum; [`render`] turns that into text for the selected
//! [`OutputMode`]. Unknown shapes become [`ExecOutput::Error`] so a newer
//! service never crashes an older client.

use base64::Engine;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::command::CommandStatus;

/// Rows shown in human mode before the rest is summarised.
pub const HUMAN_ROW_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputMode {
    #[default]
    #[value(alias = "text")]
    Human,
    #[value(alias = "json")]
    Structured,
    #[value(alias = "csv")]
    Delimited,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecOutput {
    Text(String),
    Table {
        columns: Vec<Column>,
        rows: Vec<Vec<Value>>,
        truncated: bool,
    },
    Error {
        summary: String,
        detail: String,
    },
    Image(Vec<Vec<u8>>),
}

impl ExecOutput {
    pub fn is_error(&self) -> bool {
        matches!(self, ExecOutput::Error { .. })
    }

    /// Normalises the `results` object of a terminal status payload.
    pub fn from_payload(status: CommandStatus, results: Option<&Value>) -> Self {
        let results = match results {
            Some(Value::Object(map)) => map,
            Some(Value::Null) | None => {
                return if status == CommandStatus::Error {
                    ExecOutput::Error { summary: "Unknown error".into(), detail: String::new() }
                } else {
                    ExecOutput::Text(String::new())
                };
            }
            Some(other) => {
                return ExecOutput::Error {
                    summary: "Unrecognised result payload".into(),
                    detail: other.to_string(),
                };
            }
        };

        let kind = results.get("resultType").and_then(Value::as_str).unwrap_or("");
        if status == CommandStatus::Error || kind == "error" {
            return error_from(results);
        }

        match kind {
            "text" => ExecOutput::Text(data_as_text(results.get("data"))),
            "table" => table_from(results),
            "images" | "image" => images_from(results),
            other => ExecOutput::Error {
                summary: format!("Unrecognised result type {:?}", other),
                detail: Value::Object(results.clone()).to_string(),
            },
        }
    }
}

fn data_as_text(v: Option<&Value>) -> String {
    match v {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn error_from(results: &Map<String, Value>) -> ExecOutput {
    let summary = results
        .get("summary")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("Unknown error")
        .to_string();
    let detail = data_as_text(results.get("cause"));
    ExecOutput::Error { summary, detail }
}

fn table_from(results: &Map<String, Value>) -> ExecOutput {
    let columns = results
        .get("schema")
        .and_then(Value::as_array)
        .map(|cols| {
            cols.iter()
                .enumerate()
                .map(|(i, c)| Column {
                    name: c
                        .get("name")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("col{}", i)),
                    ty: c.get("type").map(|t| data_as_text(Some(t))).unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();
    let rows = results
        .get("data")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .map(|r| match r {
                    Value::Array(cells) => cells.clone(),
                    other => vec![other.clone()],
                })
                .collect()
        })
        .unwrap_or_default();
    let truncated = results.get("truncated").and_then(Value::as_bool).unwrap_or(false);
    ExecOutput::Table { columns, rows, truncated }
}

fn images_from(results: &Map<String, Value>) -> ExecOutput {
    let encoded: Vec<&str> = match results.get("fileNames").or_else(|| results.get("data")) {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        Some(Value::String(s)) => vec![s.as_str()],
        _ => Vec::new(),
    };
    let mut images = Vec::with_capacity(encoded.len());
    for item in encoded {
        let raw = item.split_once("base64,").map(|(_, b)| b).unwrap_or(item);
        match base64::engine::general_purpose::STANDARD.decode(raw.trim()) {
            Ok(bytes) => images.push(bytes),
            Err(e) => {
                return ExecOutput::Error {
                    summary: "Image result is not valid base64".into(),
                    detail: e.to_string(),
                }
            }
        }
    }
    ExecOutput::Image(images)
}

/// Renders one result. Text and errors come back as-is in human mode and as
/// single-field records otherwise.
pub fn render(output: &ExecOutput, mode: OutputMode) -> String {
    match (output, mode) {
        (ExecOutput::Text(t), OutputMode::Human) => {
            if t.is_empty() { "(No output)".to_string() } else { t.clone() }
        }
        (ExecOutput::Text(t), OutputMode::Structured) => pretty(&json!({ "text": t })),
        (ExecOutput::Text(t), OutputMode::Delimited) => {
            let mut out = String::from("text");
            out.push('\n');
            out.push_str(&csv_field(t));
            out
        }

        (ExecOutput::Error { summary, detail }, OutputMode::Human) => {
            if detail.is_empty() {
                format!("ERROR: {}", summary)
            } else {
                format!("ERROR: {}\n{}", summary, detail)
            }
        }
        (ExecOutput::Error { summary, detail }, OutputMode::Structured) => {
            pretty(&json!({ "error": { "summary": summary, "cause": detail } }))
        }
        (ExecOutput::Error { summary, detail }, OutputMode::Delimited) => {
            format!("error,cause\n{},{}", csv_field(summary), csv_field(detail))
        }

        (ExecOutput::Table { columns, rows, truncated }, mode) => render_table(columns, rows, *truncated, mode),

        (ExecOutput::Image(images), OutputMode::Structured) => {
            let encoded: Vec<String> = images
                .iter()
                .map(|b| base64::engine::general_purpose::STANDARD.encode(b))
                .collect();
            pretty(&json!({ "images": encoded }))
        }
        (ExecOutput::Image(images), _) => {
            let sizes: Vec<String> = images.iter().map(|b| format!("{} bytes", b.len())).collect();
            format!(
                "[{} image(s) - not displayable in terminal: {}]",
                images.len(),
                sizes.join(", ")
            )
        }
    }
}

fn render_table(columns: &[Column], rows: &[Vec<Value>], truncated: bool, mode: OutputMode) -> String {
    match mode {
        OutputMode::Structured => pretty(&json!({
            "schema": columns,
            "data": rows,
            "truncated": truncated,
        })),
        OutputMode::Delimited => {
            let mut lines = Vec::with_capacity(rows.len() + 1);
            lines.push(columns.iter().map(|c| csv_field(&c.name)).collect::<Vec<_>>().join(","));
            for row in rows {
                lines.push(
                    row.iter()
                        .map(|v| csv_field(&cell_text(v, "")))
                        .collect::<Vec<_>>()
                        .join(","),
                );
            }
            // delimited output has no room for a flag; the caller reports
            // truncation on stderr via `truncation_notice`
            lines.join("\n")
        }
        OutputMode::Human => {
            if columns.is_empty() && rows.is_empty() {
                return "(No output)".to_string();
            }
            let mut lines = Vec::new();
            lines.push(columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join("\t"));
            lines.push("-".repeat(60));
            for row in rows.iter().take(HUMAN_ROW_LIMIT) {
                lines.push(row.iter().map(|v| cell_text(v, "NULL")).collect::<Vec<_>>().join("\t"));
            }
            if rows.len() > HUMAN_ROW_LIMIT {
                lines.push(format!("... ({} more rows)", rows.len() - HUMAN_ROW_LIMIT));
            }
            if truncated {
                lines.push(TRUNCATED_NOTE.to_string());
            }
            lines.join("\n")
        }
    }
}

const TRUNCATED_NOTE: &str = "[result truncated by the service: rows shown are incomplete]";

/// Notice for outputs whose rendering cannot carry the truncation flag itself.
pub fn truncation_notice(output: &ExecOutput, mode: OutputMode) -> Option<&'static str> {
    match (output, mode) {
        (ExecOutput::Table { truncated: true, .. }, OutputMode::Delimited) => Some(TRUNCATED_NOTE),
        _ => None,
    }
}

fn cell_text(v: &Value, null: &str) -> String {
    match v {
        Value::Null => null.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn pretty(v: &Value) -> String {
    serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(truncated: bool) -> ExecOutput {
        ExecOutput::from_payload(
            CommandStatus::Finished,
            Some(&json!({
                "resultType": "table",
                "schema": [{"name": "id", "type": "int"}, {"name": "name", "type": "string"}],
                "data": [[1, "a,b"], [2, null]],
                "truncated": truncated,
            })),
        )
    }

    #[test]
    fn text_payload() {
        let out = ExecOutput::from_payload(
            CommandStatus::Finished,
            Some(&json!({"resultType": "text", "data": "2"})),
        );
        assert_eq!(out, ExecOutput::Text("2".into()));
        assert_eq!(render(&out, OutputMode::Human), "2");
    }

    #[test]
    fn error_payload_keeps_summary_and_cause() {
        let out = ExecOutput::from_payload(
            CommandStatus::Error,
            Some(&json!({
                "resultType": "error",
                "summary": "ArithmeticException: / by zero",
                "cause": "java.lang.ArithmeticException ...",
            })),
        );
        let ExecOutput::Error { summary, detail } = &out else { panic!("expected error, got {:?}", out) };
        assert!(summary.contains("by zero"));
        assert!(detail.starts_with("java.lang"));
        assert!(render(&out, OutputMode::Human).starts_with("ERROR: ArithmeticException"));
    }

    #[test]
    fn error_status_without_results_still_has_summary() {
        let out = ExecOutput::from_payload(CommandStatus::Error, None);
        assert!(matches!(out, ExecOutput::Error { ref summary, .. } if !summary.is_empty()));
    }

    #[test]
    fn unknown_discriminant_degrades_to_error() {
        let out = ExecOutput::from_payload(
            CommandStatus::Finished,
            Some(&json!({"resultType": "hologram", "data": 42})),
        );
        assert!(matches!(out, ExecOutput::Error { ref summary, .. } if summary.contains("hologram")));
    }

    #[test]
    fn non_object_results_degrade_to_error() {
        let out = ExecOutput::from_payload(CommandStatus::Finished, Some(&json!([1, 2])));
        assert!(out.is_error());
    }

    #[test]
    fn structured_table_carries_truncation_flag() {
        let rendered = render(&table(true), OutputMode::Structured);
        let v: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(v["truncated"], true);
        assert_eq!(v["schema"][1]["name"], "name");
        assert_eq!(v["data"][0][1], "a,b");
    }

    #[test]
    fn human_table_reports_truncation() {
        assert!(render(&table(true), OutputMode::Human).contains("truncated"));
        assert!(!render(&table(false), OutputMode::Human).contains("truncated"));
        assert!(truncation_notice(&table(true), OutputMode::Delimited).is_some());
        assert!(truncation_notice(&table(true), OutputMode::Structured).is_none());
    }

    #[test]
    fn delimited_table_quotes_and_blanks_nulls() {
        let rendered = render(&table(false), OutputMode::Delimited);
        assert_eq!(rendered, "id,name\n1,\"a,b\"\n2,");
    }

    #[test]
    fn human_table_caps_rows() {
        let rows: Vec<Value> = (0..150).map(|i| json!([i])).collect();
        let out = ExecOutput::from_payload(
            CommandStatus::Finished,
            Some(&json!({"resultType": "table", "schema": [{"name": "n"}], "data": rows})),
        );
        let rendered = render(&out, OutputMode::Human);
        assert!(rendered.ends_with("... (50 more rows)"));
        assert_eq!(rendered.lines().count(), 2 + HUMAN_ROW_LIMIT + 1);
    }

    #[test]
    fn images_decode_base64() {
        let out = ExecOutput::from_payload(
            CommandStatus::Finished,
            Some(&json!({"resultType": "images", "fileNames": ["data:image/png;base64,aGVsbG8="]})),
        );
        assert_eq!(out, ExecOutput::Image(vec![b"hello".to_vec()]));
        assert!(render(&out, OutputMode::Human).contains("5 bytes"));
    }

    #[test]
    fn text_in_structured_mode_is_a_record() {
        let rendered = render(&ExecOutput::Text("hi".into()), OutputMode::Structured);
        let v: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(v, json!({"text": "hi"}));
    }
}
