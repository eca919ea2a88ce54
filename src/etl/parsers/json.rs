/// JSON Line Decoder
///
/// Decodes one line of a JSON export into a row. Every line must be a JSON object;
/// optionally a set of fields must be present (e.g. the table's primary key).
use crate::error::DecodeError;
use crate::etl::transform::Decoder;
use crate::models::Row;
use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct JsonLineDecoder {
    required: Vec<String>,
}

impl JsonLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject rows that do not carry `field`
    pub fn require(mut self, field: impl Into<String>) -> Self {
        self.required.push(field.into());
        self
    }
}

impl Decoder for JsonLineDecoder {
    fn decode(&self, line: &str) -> Result<Row, DecodeError> {
        let value: Value = serde_json::from_str(line)?;

        let object = match &value {
            Value::Object(map) => map,
            other => return Err(DecodeError::NotAnObject(json_kind(other))),
        };

        if let Some(missing) = self.required.iter().find(|field| !object.contains_key(field.as_str())) {
            return Err(DecodeError::MissingField(missing.clone()));
        }

        Ok(value)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
