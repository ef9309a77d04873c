use serde_json::Value;
use vds_types::{Document, ID_FIELD};

/// How a [`Filter`] constrains the `_id` field.
#[derive(Clone, Debug, PartialEq)]
pub enum IdMatch {
    /// Any document.
    Any,
    /// Exactly this `_id`.
    Exact(String),
    /// Any `_id` starting with this string.
    Prefix(String),
}

/// A conjunctive document filter: an `_id` constraint plus field equalities.
///
/// This is the whole query language the store needs. Drivers translate it
/// into their native form, or evaluate it with [`Filter::matches`].
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    id: IdMatch,
    fields: Vec<(String, Value)>,
}

impl Filter {
    /// Match every document.
    pub fn all() -> Self {
        Self {
            id: IdMatch::Any,
            fields: Vec::new(),
        }
    }

    /// Match the document with exactly this `_id`.
    pub fn id(id: impl Into<String>) -> Self {
        Self {
            id: IdMatch::Exact(id.into()),
            fields: Vec::new(),
        }
    }

    /// Match documents whose `_id` starts with `prefix`.
    pub fn id_prefix(prefix: impl Into<String>) -> Self {
        Self {
            id: IdMatch::Prefix(prefix.into()),
            fields: Vec::new(),
        }
    }

    /// Additionally require `field == value`.
    pub fn field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((field.into(), value.into()));
        self
    }

    pub fn id_match(&self) -> &IdMatch {
        &self.id
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// Evaluate the filter against a document.
    pub fn matches(&self, document: &Document) -> bool {
        let id = document.get(ID_FIELD).and_then(Value::as_str);
        let id_ok = match (&self.id, id) {
            (IdMatch::Any, _) => true,
            (IdMatch::Exact(want), Some(id)) => id == want,
            (IdMatch::Prefix(prefix), Some(id)) => id.starts_with(prefix.as_str()),
            (_, None) => false,
        };
        id_ok
            && self
                .fields
                .iter()
                .all(|(name, value)| document.get(name) == Some(value))
    }
}
