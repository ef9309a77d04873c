use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TypeError;
use crate::names::ObjectHash;

/// Field holding a document's primary key.
pub const ID_FIELD: &str = "_id";

/// A schemaless backend document.
pub type Document = Map<String, Value>;

/// An immutable object: a document whose `_id` is a valid [`ObjectHash`].
///
/// The object never interprets its other fields. They are whatever payload
/// the versioned-graph layer decided to store under this hash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Document", into = "Document")]
pub struct Object {
    hash: ObjectHash,
    document: Document,
}

impl Object {
    /// Build an object from a hash and its payload fields.
    ///
    /// Any `_id` already present in `fields` is overwritten by `hash`.
    pub fn new(hash: ObjectHash, mut fields: Document) -> Self {
        fields.insert(ID_FIELD.to_string(), Value::String(hash.as_str().to_string()));
        Self {
            hash,
            document: fields,
        }
    }

    /// Wrap a raw document, validating its `_id` field.
    pub fn from_document(document: Document) -> Result<Self, TypeError> {
        let hash = match document.get(ID_FIELD) {
            Some(Value::String(id)) => ObjectHash::parse(id)?,
            Some(other) => {
                return Err(TypeError::InvalidDocument(format!(
                    "{ID_FIELD} must be a string, got {other}"
                )))
            }
            None => {
                return Err(TypeError::InvalidDocument(format!(
                    "missing {ID_FIELD} field"
                )))
            }
        };
        Ok(Self { hash, document })
    }

    pub fn hash(&self) -> &ObjectHash {
        &self.hash
    }

    /// The full document, including `_id`.
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Look up a payload field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.document.get(field)
    }

    /// Payload fields without `_id`, in key order.
    pub fn payload(&self) -> Document {
        self.document
            .iter()
            .filter(|(k, _)| k.as_str() != ID_FIELD)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn into_document(self) -> Document {
        self.document
    }
}

impl TryFrom<Document> for Object {
    type Error = TypeError;

    fn try_from(document: Document) -> Result<Self, Self::Error> {
        Self::from_document(document)
    }
}

impl From<Object> for Document {
    fn from(object: Object) -> Self {
        object.document
    }
}
