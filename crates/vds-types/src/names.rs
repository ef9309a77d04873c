//! Identifier syntax for projects, objects, and branches.
//!
//! All three identifiers share one alphabet (`[0-9A-Za-z_]`) and differ in
//! their leading sigil:
//!
//! | Identifier | Pattern |
//! |---|---|
//! | [`ProjectName`] | `^[0-9A-Za-z_]*$`, not prefixed `system.` |
//! | [`ObjectHash`] | `^#[0-9A-Za-z_]*$` |
//! | [`BranchName`] | `^\*[0-9A-Za-z_]*$` |
//!
//! Objects and branches live in the same collection; the sigil keeps their
//! `_id` spaces disjoint.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Collection names starting with this prefix belong to the backend itself.
pub const RESERVED_PREFIX: &str = "system.";

fn is_word(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---------------------------------------------------------------------------
// ProjectName
// ---------------------------------------------------------------------------

/// Name of a project, which is also the name of its backend collection.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectName(String);

impl ProjectName {
    /// Validate and wrap a project name.
    ///
    /// ```
    /// use vds_types::ProjectName;
    ///
    /// assert!(ProjectName::parse("my_project").is_ok());
    /// assert!(ProjectName::parse("system.users").is_err());
    /// assert!(ProjectName::parse("has-dash").is_err());
    /// ```
    pub fn parse(name: &str) -> Result<Self, TypeError> {
        if name.starts_with(RESERVED_PREFIX) {
            return Err(TypeError::InvalidProjectName {
                name: name.to_string(),
                reason: format!("prefix {RESERVED_PREFIX:?} is reserved"),
            });
        }
        if !is_word(name) {
            return Err(TypeError::InvalidProjectName {
                name: name.to_string(),
                reason: "only [0-9A-Za-z_] are allowed".into(),
            });
        }
        Ok(Self(name.to_string()))
    }

    /// Returns `true` if `name` would be accepted by [`ProjectName::parse`].
    pub fn is_valid(name: &str) -> bool {
        !name.starts_with(RESERVED_PREFIX) && is_word(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// ObjectHash
// ---------------------------------------------------------------------------

/// Hash-shaped identifier of an immutable object.
///
/// Only the syntax is checked. The store trusts callers that identical hashes
/// denote identical content.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectHash(String);

impl ObjectHash {
    /// Leading character of every object hash.
    pub const SIGIL: char = '#';

    /// Validate and wrap an object hash.
    pub fn parse(hash: &str) -> Result<Self, TypeError> {
        if Self::is_valid(hash) {
            Ok(Self(hash.to_string()))
        } else {
            Err(TypeError::InvalidObjectHash(hash.to_string()))
        }
    }

    /// Parse a hash where the empty string spells "absent".
    ///
    /// ```
    /// use vds_types::ObjectHash;
    ///
    /// assert_eq!(ObjectHash::parse_optional("").unwrap(), None);
    /// assert!(ObjectHash::parse_optional("#abc").unwrap().is_some());
    /// assert!(ObjectHash::parse_optional("abc").is_err());
    /// ```
    pub fn parse_optional(hash: &str) -> Result<Option<Self>, TypeError> {
        if hash.is_empty() {
            Ok(None)
        } else {
            Self::parse(hash).map(Some)
        }
    }

    /// Returns `true` if `hash` matches `^#[0-9A-Za-z_]*$`.
    pub fn is_valid(hash: &str) -> bool {
        hash.strip_prefix(Self::SIGIL).is_some_and(is_word)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hash digits without the leading sigil.
    pub fn digits(&self) -> &str {
        &self.0[1..]
    }
}

// ---------------------------------------------------------------------------
// BranchName
// ---------------------------------------------------------------------------

/// Name of a mutable branch pointer.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// Leading character of every branch name.
    pub const SIGIL: char = '*';

    /// Validate and wrap a branch name.
    pub fn parse(name: &str) -> Result<Self, TypeError> {
        if Self::is_valid(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(TypeError::InvalidBranchName(name.to_string()))
        }
    }

    /// Returns `true` if `name` matches `^\*[0-9A-Za-z_]*$`.
    pub fn is_valid(name: &str) -> bool {
        name.strip_prefix(Self::SIGIL).is_some_and(is_word)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Shared trait impls
// ---------------------------------------------------------------------------

macro_rules! string_identifier {
    ($ty:ident) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:?})", stringify!($ty), self.0)
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $ty {
            type Error = TypeError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.0
            }
        }

        impl std::str::FromStr for $ty {
            type Err = TypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

string_identifier!(ProjectName);
string_identifier!(ObjectHash);
string_identifier!(BranchName);

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn valid_project_names() {
        assert!(ProjectName::parse("project").is_ok());
        assert!(ProjectName::parse("Project_42").is_ok());
        assert!(ProjectName::parse("").is_ok());
    }

    #[test]
    fn reject_reserved_project_prefix() {
        let err = ProjectName::parse("system.indexes").unwrap_err();
        assert!(matches!(err, TypeError::InvalidProjectName { .. }));
        assert!(!ProjectName::is_valid("system.namespaces"));
    }

    #[test]
    fn reject_project_punctuation() {
        assert!(ProjectName::parse("a.b").is_err());
        assert!(ProjectName::parse("a-b").is_err());
        assert!(ProjectName::parse("a b").is_err());
        assert!(ProjectName::parse("#abc").is_err());
    }

    #[test]
    fn object_hash_requires_sigil() {
        assert!(ObjectHash::parse("#abc_123").is_ok());
        assert!(ObjectHash::parse("#").is_ok());
        assert!(ObjectHash::parse("abc").is_err());
        assert!(ObjectHash::parse("").is_err());
        assert!(ObjectHash::parse("*abc").is_err());
        assert!(ObjectHash::parse("#ab-c").is_err());
    }

    #[test]
    fn object_hash_digits_strip_sigil() {
        let hash = ObjectHash::parse("#cafe").unwrap();
        assert_eq!(hash.digits(), "cafe");
        assert_eq!(hash.as_str(), "#cafe");
    }

    #[test]
    fn branch_name_requires_sigil() {
        assert!(BranchName::parse("*master").is_ok());
        assert!(BranchName::parse("*").is_ok());
        assert!(BranchName::parse("master").is_err());
        assert!(BranchName::parse("#master").is_err());
        assert!(BranchName::parse("*a/b").is_err());
    }

    #[test]
    fn serde_rejects_invalid_identifiers() {
        let ok: ObjectHash = serde_json::from_str("\"#abc\"").unwrap();
        assert_eq!(ok.as_str(), "#abc");

        let bad: Result<ObjectHash, _> = serde_json::from_str("\"abc\"");
        assert!(bad.is_err());

        let json = serde_json::to_string(&BranchName::parse("*main").unwrap()).unwrap();
        assert_eq!(json, "\"*main\"");
    }

    #[test]
    fn display_is_raw_string() {
        let name = BranchName::parse("*main").unwrap();
        assert_eq!(name.to_string(), "*main");
        assert_eq!(format!("{name:?}"), "BranchName(\"*main\")");
    }

    proptest! {
        #[test]
        fn word_strings_are_valid_everywhere(s in "[0-9A-Za-z_]{0,24}") {
            prop_assert!(ProjectName::is_valid(&s));
            let hash = format!("#{s}");
            let branch = format!("*{s}");
            prop_assert!(ObjectHash::is_valid(&hash));
            prop_assert!(BranchName::is_valid(&branch));
        }

        #[test]
        fn foreign_characters_are_rejected(
            head in "[0-9A-Za-z_]{0,8}",
            bad in "[-. /#*@:]",
            tail in "[0-9A-Za-z_]{0,8}",
        ) {
            let s = format!("{head}{bad}{tail}");
            prop_assert!(!ProjectName::is_valid(&s));
            let hash = format!("#{s}");
            let branch = format!("*{s}");
            prop_assert!(!ObjectHash::is_valid(&hash));
            prop_assert!(!BranchName::is_valid(&branch));
        }
    }
}
