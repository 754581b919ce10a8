use std::collections::BTreeSet;
use std::io::{self, Write};

use anyhow::Result;
use clap::ValueEnum;
use serde_json::Value;
use tabled::builder::Builder;
use tabled::settings::Style;

/// Keys whose array value is treated as the rows of a listing response
/// (search results, paged lists).
const LIST_KEYS: &[&str] = &["issues", "values", "results"];

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
    Raw,
}

pub struct OutputRenderer {
    format: OutputFormat,
}

impl OutputRenderer {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Writes a response body to stdout in the configured format.
    pub fn render_bytes(&self, body: &[u8]) -> Result<()> {
        let rendered = self.render_to_vec(body)?;
        let mut stdout = io::stdout().lock();
        stdout.write_all(&rendered)?;
        stdout.flush()?;
        Ok(())
    }

    /// Formats a response body. Bodies that are not JSON pass through
    /// untouched whatever the format.
    pub fn render_to_vec(&self, body: &[u8]) -> Result<Vec<u8>> {
        if body.is_empty() || self.format == OutputFormat::Raw {
            return Ok(body.to_vec());
        }

        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(_) => return Ok(body.to_vec()),
        };

        let text = match self.format {
            OutputFormat::Table => match Self::render_table(&value) {
                Some(table) => table,
                None => serde_json::to_string_pretty(&value)?,
            },
            OutputFormat::Yaml => serde_yaml::to_string(&value)?,
            OutputFormat::Json | OutputFormat::Raw => serde_json::to_string_pretty(&value)?,
        };

        let mut out = text.into_bytes();
        if out.last() != Some(&b'\n') {
            out.push(b'\n');
        }
        Ok(out)
    }

    fn render_table(value: &Value) -> Option<String> {
        let (headers, rows) = Self::coerce_rows(Self::listing(value))?;

        let mut builder = Builder::default();
        builder.push_record(headers);
        for row in rows {
            builder.push_record(row);
        }

        Some(builder.build().with(Style::rounded()).to_string())
    }

    /// Picks the rows out of a listing response, or the value itself.
    fn listing(value: &Value) -> &Value {
        if let Value::Object(obj) = value {
            for key in LIST_KEYS {
                if let Some(rows @ Value::Array(_)) = obj.get(*key) {
                    return rows;
                }
            }
        }
        value
    }

    fn coerce_rows(value: &Value) -> Option<(Vec<String>, Vec<Vec<String>>)> {
        let rows = match value {
            Value::Array(rows) if !rows.is_empty() => rows,
            _ => return None,
        };

        let mut headers = BTreeSet::new();
        for row in rows {
            if let Value::Object(obj) = row {
                headers.extend(obj.keys().cloned());
            }
        }

        if headers.is_empty() {
            return None;
        }

        let headers_vec: Vec<String> = headers.into_iter().collect();
        let data: Vec<Vec<String>> = rows
            .iter()
            .map(|row| {
                headers_vec
                    .iter()
                    .map(|header| {
                        row.get(header)
                            .map(Self::value_to_string)
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .collect();

        Some((headers_vec, data))
    }

    fn value_to_string(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => String::new(),
            other => serde_json::to_string(other).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(format: OutputFormat, body: &str) -> String {
        let out = OutputRenderer::new(format)
            .render_to_vec(body.as_bytes())
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_output_format_default() {
        assert_eq!(OutputFormat::default(), OutputFormat::Table);
    }

    #[test]
    fn test_empty_body_renders_nothing() {
        for format in [OutputFormat::Table, OutputFormat::Json, OutputFormat::Raw] {
            assert!(OutputRenderer::new(format).render_to_vec(b"").unwrap().is_empty());
        }
    }

    #[test]
    fn test_raw_passes_bytes_through() {
        assert_eq!(render(OutputFormat::Raw, r#"{"key":"X"}"#), r#"{"key":"X"}"#);
    }

    #[test]
    fn test_non_json_passes_through() {
        assert_eq!(render(OutputFormat::Json, "plain text"), "plain text");
        assert_eq!(render(OutputFormat::Table, "plain text"), "plain text");
    }

    #[test]
    fn test_json_pretty() {
        let out = render(OutputFormat::Json, r#"{"key":"X"}"#);
        assert_eq!(out, "{\n  \"key\": \"X\"\n}\n");
    }

    #[test]
    fn test_yaml() {
        let out = render(OutputFormat::Yaml, r#"{"key":"X"}"#);
        assert_eq!(out, "key: X\n");
    }

    #[test]
    fn test_table_from_listing_key() {
        let body = json!({
            "total": 2,
            "issues": [
                {"key": "TEST-1", "id": "10001"},
                {"key": "TEST-2", "id": "10002"}
            ]
        })
        .to_string();

        let out = render(OutputFormat::Table, &body);
        assert!(out.contains("TEST-1"));
        assert!(out.contains("TEST-2"));
        assert!(out.contains("key"));
        assert!(!out.contains("total"));
    }

    #[test]
    fn test_table_falls_back_to_json_for_objects() {
        let out = render(OutputFormat::Table, r#"{"key":"X"}"#);
        assert!(out.contains("\"key\": \"X\""));
    }

    #[test]
    fn test_coerce_rows_empty_array() {
        let value = json!([]);
        assert!(OutputRenderer::coerce_rows(&value).is_none());
    }

    #[test]
    fn test_coerce_rows_mixed_keys() {
        let value = json!([
            {"id": "1", "name": "Alice"},
            {"id": "2", "email": "bob@example.com"}
        ]);

        let (headers, rows) = OutputRenderer::coerce_rows(&value).unwrap();
        assert_eq!(headers, vec!["email", "id", "name"]);
        assert_eq!(rows[0], vec!["", "1", "Alice"]);
        assert_eq!(rows[1], vec!["bob@example.com", "2", ""]);
    }

    #[test]
    fn test_coerce_rows_array_of_primitives() {
        let value = json!(["one", "two", "three"]);
        assert!(OutputRenderer::coerce_rows(&value).is_none());
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(OutputRenderer::value_to_string(&json!("hello")), "hello");
        assert_eq!(OutputRenderer::value_to_string(&json!(42)), "42");
        assert_eq!(OutputRenderer::value_to_string(&json!(true)), "true");
        assert_eq!(OutputRenderer::value_to_string(&json!(null)), "");
        assert_eq!(
            OutputRenderer::value_to_string(&json!({"name": "Open"})),
            r#"{"name":"Open"}"#
        );
    }
}
