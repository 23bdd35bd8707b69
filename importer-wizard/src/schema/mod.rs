//! Schema model: normalizes the backend's multi-document schema payload.
//!
//! The payload is `{"docs": [parent, child, child, ...]}`. Entry 0 is the selected target
//! type; every other entry is the schema of a child table, matched by `name` against the
//! parent table field's `options`.

pub mod catalog;
pub mod field_key;

pub use catalog::{catalog, CatalogEntry, FieldCatalog};
pub use field_key::FieldKey;

use crate::error::{ImporterError, Result};
use crate::models::de_flag;
use log::debug;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const FIELDTYPE_TABLE: &str = "Table";

/// Field types that never carry importable data.
pub const NON_SELECTABLE_FIELDTYPES: [&str; 5] = [
    "Section Break",
    "Column Break",
    "Tab Break",
    FIELDTYPE_TABLE,
    "Read Only",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub fieldname: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "de_nullable_string")]
    pub fieldtype: String,
    #[serde(default)]
    pub options: Option<String>,
    #[serde(default, deserialize_with = "de_flag")]
    pub hidden: bool,
    #[serde(default, rename = "read_only", deserialize_with = "de_flag")]
    pub read_only: bool,
    #[serde(default, rename = "reqd", deserialize_with = "de_flag")]
    pub required: bool,
}

fn de_nullable_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl FieldDescriptor {
    pub fn new(fieldname: impl Into<String>, fieldtype: impl Into<String>) -> Self {
        Self {
            fieldname: fieldname.into(),
            label: None,
            fieldtype: fieldtype.into(),
            options: None,
            hidden: false,
            read_only: false,
            required: false,
        }
    }

    pub fn is_table(&self) -> bool {
        self.fieldtype == FIELDTYPE_TABLE
    }

    pub fn is_selectable(&self) -> bool {
        !self.hidden
            && !self.read_only
            && !NON_SELECTABLE_FIELDTYPES.contains(&self.fieldtype.as_str())
    }

    /// Label if the backend sent one, otherwise the fieldname.
    pub fn display_label(&self) -> &str {
        self.label
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(&self.fieldname)
    }

    pub fn options_text(&self) -> Option<&str> {
        self.options.as_deref().map(str::trim).filter(|o| !o.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocEntry {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
}

/// Normalized schema. Always has a parent entry at index 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDocument {
    entries: Vec<DocEntry>,
}

/// A parent `Table` field and the child schema its `options` resolves to (if any).
#[derive(Debug, Clone, Copy)]
pub struct ChildTable<'a> {
    pub table_field: &'a FieldDescriptor,
    pub schema: Option<&'a DocEntry>,
}

impl<'a> ChildTable<'a> {
    /// Selectable child fields in form order; empty when the schema did not resolve.
    pub fn selectable_fields(&self) -> Vec<&'a FieldDescriptor> {
        self.schema
            .map(|doc| doc.fields.iter().filter(|f| f.is_selectable()).collect())
            .unwrap_or_default()
    }
}

impl SchemaDocument {
    pub fn from_entries(entries: Vec<DocEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(ImporterError::SchemaMalformed(
                "schema has no parent document".to_string(),
            ));
        }
        Ok(Self { entries })
    }

    pub fn parent(&self) -> &DocEntry {
        &self.entries[0]
    }

    pub fn entries(&self) -> &[DocEntry] {
        &self.entries
    }

    /// Child schema lookup by doc name (the parent entry itself is never a child).
    pub fn child_entry(&self, name: &str) -> Option<&DocEntry> {
        self.entries.iter().skip(1).find(|e| e.name == name)
    }
}

/// Normalize the raw `{"docs": [...]}` payload.
///
/// Only a missing parent document is an error; unknown fieldtypes, missing labels and
/// missing `fields` arrays pass through. Field entries without a `fieldname` are skipped.
pub fn normalize(raw: &Value) -> Result<SchemaDocument> {
    let docs = raw.get("docs").and_then(Value::as_array).ok_or_else(|| {
        ImporterError::SchemaMalformed("payload has no 'docs' list".to_string())
    })?;

    match docs.first() {
        Some(Value::Object(_)) => {}
        _ => {
            return Err(ImporterError::SchemaMalformed(
                "payload has no parent document".to_string(),
            ))
        }
    }

    let entries = docs
        .iter()
        .enumerate()
        .filter_map(|(idx, doc)| {
            if !doc.is_object() {
                debug!("[PHASE: schema] [STEP: normalize] skipping non-object doc at index {}", idx);
                return None;
            }
            Some(normalize_entry(doc))
        })
        .collect();

    SchemaDocument::from_entries(entries)
}

fn normalize_entry(doc: &Value) -> DocEntry {
    let name = doc
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let fields = doc
        .get("fields")
        .and_then(Value::as_array)
        .map(|raw_fields| {
            raw_fields
                .iter()
                .filter_map(|f| match serde_json::from_value::<FieldDescriptor>(f.clone()) {
                    Ok(field) if !field.fieldname.trim().is_empty() => Some(field),
                    Ok(_) => None,
                    Err(e) => {
                        debug!(
                            "[PHASE: schema] [STEP: normalize] skipping unreadable field in '{}': {}",
                            name, e
                        );
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    DocEntry { name, fields }
}

/// Parent fields passing the selectability predicate, in backend order.
pub fn selectable_fields(doc: &SchemaDocument) -> Vec<&FieldDescriptor> {
    doc.parent()
        .fields
        .iter()
        .filter(|f| f.is_selectable())
        .collect()
}

/// Parent `Table` fields with their resolved child schema, in backend order.
pub fn child_tables_of(doc: &SchemaDocument) -> Vec<ChildTable<'_>> {
    doc.parent()
        .fields
        .iter()
        .filter(|f| f.is_table())
        .map(|table_field| ChildTable {
            table_field,
            schema: table_field
                .options_text()
                .and_then(|name| doc.child_entry(name)),
        })
        .collect()
}
