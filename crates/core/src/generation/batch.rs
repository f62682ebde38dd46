use serde_json::Value;
use thiserror::Error;

use crate::model::GeneratedQuestion;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("response is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("expected a JSON array of questions, got {found}")]
    NotAnArray { found: &'static str },
}

/// Items decoded from one provider response, in response order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedBatch {
    pub items: Vec<GeneratedQuestion>,
    pub expected: usize,
}

impl ParsedBatch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.items.len() == self.expected
    }

    pub fn into_items(self) -> Vec<GeneratedQuestion> {
        self.items
    }
}

/// Removes a surrounding markdown fence. The opening line (with any language
/// tag) and the final line are dropped when the text starts with a fence.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }

    let Some(first_newline) = trimmed.find('\n') else {
        return "";
    };
    let body = &trimmed[first_newline + 1..];
    match body.rfind('\n') {
        Some(last_newline) => body[..last_newline].trim(),
        None if body.trim_start().starts_with("```") => "",
        None => body.trim(),
    }
}

/// Decodes a provider response into questions. A length different from
/// `expected` is not an error here; elements that are not usable question
/// objects become empty questions so positions are preserved.
pub fn parse_batch(raw: &str, expected: usize) -> Result<ParsedBatch, FormatError> {
    let body = strip_code_fence(raw);
    let value: Value = serde_json::from_str(body).map_err(FormatError::InvalidJson)?;

    let Value::Array(elements) = value else {
        return Err(FormatError::NotAnArray {
            found: json_kind(&value),
        });
    };

    let items = elements
        .into_iter()
        .map(|element| match element {
            Value::Object(_) => serde_json::from_value(element).unwrap_or_default(),
            _ => GeneratedQuestion::default(),
        })
        .collect();

    Ok(ParsedBatch { items, expected })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
