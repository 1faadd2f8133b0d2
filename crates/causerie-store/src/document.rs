use serde_json::Value;

/// A stored document: an opaque string id plus JSON fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Document id, unique within its collection.
    pub id: String,
    /// The document body.
    pub fields: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Value) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

/// The query surface the external store offers: match everything, equality
/// on one field, or membership in one array field.  Nothing richer — callers
/// sort and post-filter in process.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    FieldEq { field: String, value: Value },
    ArrayContains { field: String, value: Value },
}

impl Filter {
    pub fn field_eq(field: impl Into<String>, value: Value) -> Self {
        Self::FieldEq {
            field: field.into(),
            value,
        }
    }

    pub fn array_contains(field: impl Into<String>, value: Value) -> Self {
        Self::ArrayContains {
            field: field.into(),
            value,
        }
    }

    /// Whether a document body matches this filter.
    pub fn matches(&self, fields: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::FieldEq { field, value } => fields.get(field) == Some(value),
            Filter::ArrayContains { field, value } => fields
                .get(field)
                .and_then(Value::as_array)
                .is_some_and(|arr| arr.contains(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_eq_matches() {
        let filter = Filter::field_eq("conversationId", json!("c1"));
        assert!(filter.matches(&json!({ "conversationId": "c1" })));
        assert!(!filter.matches(&json!({ "conversationId": "c2" })));
        assert!(!filter.matches(&json!({})));
    }

    #[test]
    fn test_array_contains_matches() {
        let filter = Filter::array_contains("participants", json!("u1"));
        assert!(filter.matches(&json!({ "participants": ["u1", "operator"] })));
        assert!(!filter.matches(&json!({ "participants": ["u2", "operator"] })));
        // Non-array field never matches
        assert!(!filter.matches(&json!({ "participants": "u1" })));
    }

    #[test]
    fn test_all_matches_everything() {
        assert!(Filter::All.matches(&json!({})));
        assert!(Filter::All.matches(&json!({ "x": 1 })));
    }
}
