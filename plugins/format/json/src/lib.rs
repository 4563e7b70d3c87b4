use chrono::DateTime;
use serde::Deserialize;

use logpipe_api::{LogRecord, PluginError, RawLine, RecordParser};

// ═══════════════════════════════════════════════════════════════
//  Config
// ═══════════════════════════════════════════════════════════════

fn default_timestamp_format() -> String {
    // nginx `$time_local`, e.g. "17/May/2015:08:05:32 +0000"
    "%d/%b/%Y:%H:%M:%S %z".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonParserConfig {
    /// Field holding the per-message timestamp. None = broker assigns it.
    #[serde(default)]
    pub timestamp_field: Option<String>,
    /// chrono format of `timestamp_field` when it is a string.
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
    /// Objects missing any of these fields are rejected.
    #[serde(default)]
    pub required_fields: Vec<String>,
}

impl Default for JsonParserConfig {
    fn default() -> Self {
        Self {
            timestamp_field: None,
            timestamp_format: default_timestamp_format(),
            required_fields: Vec::new(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  JsonRecordParser
// ═══════════════════════════════════════════════════════════════

/// Parses newline-delimited JSON: one object per line.
///
/// Blank lines, invalid UTF-8, invalid JSON and non-object values are all
/// `Format` errors. A timestamp field that is present but unreadable is not
/// an error, the record just carries no timestamp override.
#[derive(Debug, Clone, Default)]
pub struct JsonRecordParser {
    config: JsonParserConfig,
}

impl JsonRecordParser {
    pub fn new(config: JsonParserConfig) -> Self {
        Self { config }
    }

    fn timestamp_of(&self, fields: &serde_json::Map<String, serde_json::Value>) -> Option<i64> {
        let field = self.config.timestamp_field.as_deref()?;
        match fields.get(field)? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => DateTime::parse_from_str(s, &self.config.timestamp_format)
                .or_else(|_| DateTime::parse_from_rfc3339(s))
                .ok()
                .map(|dt| dt.timestamp_millis()),
            _ => None,
        }
    }
}

impl RecordParser for JsonRecordParser {
    fn parse(&self, line: &RawLine) -> Result<LogRecord, PluginError> {
        if line.is_blank() {
            return Err(PluginError::format_err("empty line"));
        }
        let text = std::str::from_utf8(&line.bytes)?;
        let value: serde_json::Value = serde_json::from_str(text)?;

        let fields = match value {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(PluginError::format_err(format!(
                    "expected JSON object, got {}",
                    json_type(&other)
                )));
            }
        };

        if let Some(missing) = self.config.required_fields.iter().find(|f| !fields.contains_key(*f)) {
            return Err(PluginError::format_err(format!("missing required field '{missing}'")));
        }

        let timestamp_ms = self.timestamp_of(&fields);
        Ok(LogRecord { line_no: line.line_no, fields, timestamp_ms })
    }
}

fn json_type(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logpipe_api::ErrorKind;
    use proptest::prelude::*;

    fn line(s: &str) -> RawLine {
        RawLine::new(7, s)
    }

    #[test]
    fn parses_nginx_json_line() {
        let parser = JsonRecordParser::default();
        let rec = parser
            .parse(&line(r#"{"time": "17/May/2015:08:05:32 +0000", "remote_ip": "93.180.71.3", "request": "GET /downloads/product_1 HTTP/1.1", "response": 304, "bytes": 0}"#))
            .unwrap();
        assert_eq!(rec.line_no, 7);
        assert_eq!(rec.get("response"), Some(&serde_json::json!(304)));
        assert_eq!(rec.timestamp_ms, None);
    }

    #[test]
    fn rejects_malformed_input() {
        let parser = JsonRecordParser::default();
        for bad in ["not-json", "", "   ", "[1,2]", "\"str\"", "{\"a\":"] {
            let err = parser.parse(&line(bad)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Format, "input {bad:?}");
        }
        let err = parser.parse(&RawLine::new(1, vec![0xff, 0xfe])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn enforces_required_fields() {
        let parser = JsonRecordParser::new(JsonParserConfig {
            required_fields: vec!["status".into(), "path".into()],
            ..Default::default()
        });
        assert!(parser.parse(&line(r#"{"status":"200","path":"/a"}"#)).is_ok());
        let err = parser.parse(&line(r#"{"status":"200"}"#)).unwrap_err();
        assert!(err.message().contains("path"));
    }

    #[test]
    fn extracts_timestamp_override() {
        let parser = JsonRecordParser::new(JsonParserConfig {
            timestamp_field: Some("time".into()),
            ..Default::default()
        });
        let rec = parser.parse(&line(r#"{"time":"17/May/2015:08:05:32 +0000"}"#)).unwrap();
        assert_eq!(rec.timestamp_ms, Some(1_431_849_932_000));

        let rec = parser.parse(&line(r#"{"time":"2015-05-17T08:05:32Z"}"#)).unwrap();
        assert_eq!(rec.timestamp_ms, Some(1_431_849_932_000));

        let rec = parser.parse(&line(r#"{"time":1431849932000}"#)).unwrap();
        assert_eq!(rec.timestamp_ms, Some(1_431_849_932_000));

        let rec = parser.parse(&line(r#"{"time":"yesterday"}"#)).unwrap();
        assert_eq!(rec.timestamp_ms, None);
    }

    proptest! {
        #[test]
        fn parse_is_deterministic(input in ".{0,64}") {
            let parser = JsonRecordParser::default();
            let raw = line(&input);
            let a = parser.parse(&raw);
            let b = parser.parse(&raw);
            prop_assert_eq!(a, b);
        }

        #[test]
        fn objects_roundtrip_to_identical_payloads(
            entries in proptest::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..8)
        ) {
            let text = serde_json::to_string(&entries).unwrap();
            let parser = JsonRecordParser::default();
            let first = parser.parse(&line(&text)).unwrap().to_payload().unwrap();
            let second = parser.parse(&line(&text)).unwrap().to_payload().unwrap();
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first, text.into_bytes());
        }
    }
}
