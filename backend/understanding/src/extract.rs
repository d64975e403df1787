//! Turning free-form model output into a `Receipt`.

use serde_json::Value;
use slipscan_core::{Receipt, SlipError, SlipResult};

/// Remove markdown code fences such as ```` ```json ```` that models like to
/// wrap around JSON.
pub fn strip_code_fences(text: &str) -> String {
    text.trim()
        .replace("```json", "")
        .replace("```JSON", "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// Slice from the first `{` to the last `}`.
fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse model output into a receipt.
///
/// Accepts bare JSON, fenced JSON, JSON surrounded by prose, and a one-element
/// array holding the receipt object.
pub fn parse_receipt_json(text: &str) -> SlipResult<Receipt> {
    let cleaned = strip_code_fences(text);

    let value = match serde_json::from_str::<Value>(&cleaned) {
        Ok(v) => v,
        Err(_) => {
            let object = outermost_object(&cleaned)
                .ok_or_else(|| SlipError::Parse("no JSON object in model response".to_string()))?;
            serde_json::from_str(object)
                .map_err(|e| SlipError::Parse(format!("malformed JSON in model response: {e}")))?
        }
    };

    let value = match value {
        Value::Array(items) => items
            .into_iter()
            .find(Value::is_object)
            .ok_or_else(|| SlipError::Parse("model returned an array without a receipt".to_string()))?,
        Value::Object(_) => value,
        other => {
            return Err(SlipError::Parse(format!(
                "expected a JSON object, got {}",
                type_name(&other)
            )))
        }
    };

    serde_json::from_value(value)
        .map_err(|e| SlipError::Parse(format!("response does not match receipt schema: {e}")))
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
