//! Decoding seam between opaque wire blobs and store-ready documents.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// A decoded, destination-ready entity keyed by its identity field.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub key: String,
    pub body: Value,
}

/// Turns opaque blobs into documents and ordering timestamps.
///
/// The two operations are deliberately separate: re-pagination only needs
/// the ordering timestamp of the first and last blob in a page, so the
/// fetcher never pays for a full decode.
pub trait EntityCodec: Send + Sync {
    /// Extracts the ordering timestamp the remote API sorted this blob by.
    fn timestamp(&self, raw: &[u8]) -> Result<DateTime<Utc>>;

    /// Decodes a blob into a document, deriving its key from `key_field`.
    fn decode(&self, raw: &[u8], key_field: &str) -> Result<Document>;
}

/// Reference codec for APIs that ship entities as JSON objects with an
/// RFC 3339 ordering field.
#[derive(Debug, Clone)]
pub struct JsonEntityCodec {
    order_field: String,
}

impl JsonEntityCodec {
    pub fn new(order_field: impl Into<String>) -> Self {
        Self {
            order_field: order_field.into(),
        }
    }

    fn parse(&self, raw: &[u8]) -> Result<Value> {
        serde_json::from_slice(raw).context("entity blob is not valid JSON")
    }
}

impl EntityCodec for JsonEntityCodec {
    fn timestamp(&self, raw: &[u8]) -> Result<DateTime<Utc>> {
        let body = self.parse(raw)?;
        let field = body
            .get(&self.order_field)
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("entity is missing ordering field {:?}", self.order_field))?;
        let parsed = DateTime::parse_from_rfc3339(field)
            .with_context(|| format!("ordering field {:?} is not RFC 3339", self.order_field))?;
        Ok(parsed.with_timezone(&Utc))
    }

    fn decode(&self, raw: &[u8], key_field: &str) -> Result<Document> {
        let body = self.parse(raw)?;
        let key = match body.get(key_field) {
            Some(Value::String(key)) => key.clone(),
            Some(Value::Number(key)) => key.to_string(),
            Some(other) => {
                return Err(anyhow!(
                    "identity field {key_field:?} has non-scalar value {other}"
                ))
            }
            None => return Err(anyhow!("entity is missing identity field {key_field:?}")),
        };
        if key.is_empty() {
            return Err(anyhow!("identity field {key_field:?} is empty"));
        }
        Ok(Document { key, body })
    }
}
