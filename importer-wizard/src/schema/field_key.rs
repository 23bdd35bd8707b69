use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Identity of a selectable field.
///
/// Parent fields are keyed by `fieldname`; child-table fields by the owning table field and
/// the child's own `fieldname`. The dotted string form exists only at the wire/config
/// boundary, so a parent field literally named `items.qty` can never collide with the
/// child key `Child { table: "items", field: "qty" }` in memory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldKey {
    Parent(String),
    Child { table: String, field: String },
}

impl FieldKey {
    pub fn parent(field: impl Into<String>) -> Self {
        FieldKey::Parent(field.into())
    }

    pub fn child(table: impl Into<String>, field: impl Into<String>) -> Self {
        FieldKey::Child {
            table: table.into(),
            field: field.into(),
        }
    }

    /// Parse the wire form: `fieldname` or `table.fieldname`.
    pub fn parse(raw: &str) -> Option<Self> {
        let s = raw.trim();
        if s.is_empty() {
            return None;
        }
        match s.split_once('.') {
            Some((table, field)) => {
                let (table, field) = (table.trim(), field.trim());
                if table.is_empty() || field.is_empty() || field.contains('.') {
                    return None;
                }
                Some(FieldKey::child(table, field))
            }
            None => Some(FieldKey::parent(s)),
        }
    }

    pub fn to_wire(&self) -> String {
        self.to_string()
    }

    pub fn fieldname(&self) -> &str {
        match self {
            FieldKey::Parent(f) => f,
            FieldKey::Child { field, .. } => field,
        }
    }

    pub fn table(&self) -> Option<&str> {
        match self {
            FieldKey::Parent(_) => None,
            FieldKey::Child { table, .. } => Some(table),
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKey::Parent(field) => write!(f, "{}", field),
            FieldKey::Child { table, field } => write!(f, "{}.{}", table, field),
        }
    }
}

impl Serialize for FieldKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_wire())
    }
}

impl<'de> Deserialize<'de> for FieldKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        FieldKey::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid field key '{}'", raw)))
    }
}
