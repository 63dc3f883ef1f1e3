use std::{fmt, str::FromStr};

use serde::{
    de::{Error as SerdeDeError, Unexpected},
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
};

use crate::error::{Error, Result};

/// A struct modeling the canonical name for a collection in MongoDB.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    /// The name of the database associated with this namespace.
    pub db: String,

    /// The name of the collection this namespace corresponds to.
    pub coll: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }

    pub(crate) fn from_str(s: &str) -> Option<Self> {
        let mut parts = s.splitn(2, '.');

        let db = parts.next();
        let coll = parts.next();

        match (db, coll) {
            (Some(db), Some(coll)) if !db.is_empty() && !coll.is_empty() => Some(Self {
                db: db.to_string(),
                coll: coll.to_string(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}.{}", self.db, self.coll)
    }
}

impl FromStr for Namespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Namespace::from_str(s).ok_or_else(|| {
            Error::invalid_argument(format!("namespace {s:?} is not of the form <db>.<coll>"))
        })
    }
}

impl<'de> Deserialize<'de> for Namespace {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Self::from_str(&s)
            .ok_or_else(|| D::Error::invalid_value(Unexpected::Str(&s), &"a namespace string"))
    }
}

impl Serialize for Namespace {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::Namespace;

    #[test]
    fn parses_first_dot_only() {
        let ns: Namespace = "db.coll.with.dots".parse().unwrap();
        assert_eq!(ns, Namespace::new("db", "coll.with.dots"));
        assert!("nodot".parse::<Namespace>().is_err());
        assert_eq!(ns.to_string(), "db.coll.with.dots");
    }
}
