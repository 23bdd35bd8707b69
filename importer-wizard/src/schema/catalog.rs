use super::{child_tables_of, selectable_fields, FieldDescriptor, FieldKey, SchemaDocument};
use log::warn;
use std::collections::HashSet;

/// One selectable field, flattened out of the two-level schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub key: FieldKey,
    pub field: FieldDescriptor,
    /// Label of the owning table field for child entries.
    pub table_label: Option<String>,
}

impl CatalogEntry {
    /// `Label` for parent fields, `Table / Label` for child fields.
    pub fn display_label(&self) -> String {
        match &self.table_label {
            Some(table) => format!("{} / {}", table, self.field.display_label()),
            None => self.field.display_label().to_string(),
        }
    }

    pub fn is_required(&self) -> bool {
        self.field.required
    }
}

/// Ordered catalog: parent fields in form order, then each table's child fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldCatalog {
    entries: Vec<CatalogEntry>,
}

impl FieldCatalog {
    pub fn from_document(doc: &SchemaDocument) -> Self {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        let mut push = |entry: CatalogEntry| {
            if seen.insert(entry.key.clone()) {
                entries.push(entry);
            } else {
                warn!(
                    "[PHASE: schema] [STEP: catalog] duplicate field key '{}' ignored",
                    entry.key
                );
            }
        };

        for field in selectable_fields(doc) {
            push(CatalogEntry {
                key: FieldKey::parent(&field.fieldname),
                field: field.clone(),
                table_label: None,
            });
        }

        for table in child_tables_of(doc) {
            if table.table_field.hidden || table.table_field.read_only {
                continue;
            }
            let label = table.table_field.display_label().to_string();
            for child in table.selectable_fields() {
                push(CatalogEntry {
                    key: FieldKey::child(&table.table_field.fieldname, &child.fieldname),
                    field: child.clone(),
                    table_label: Some(label.clone()),
                });
            }
        }

        Self { entries }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &FieldKey> {
        self.entries.iter().map(|e| &e.key)
    }

    pub fn get(&self, key: &FieldKey) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| &e.key == key)
    }

    pub fn contains(&self, key: &FieldKey) -> bool {
        self.get(key).is_some()
    }

    pub fn position(&self, key: &FieldKey) -> Option<usize> {
        self.entries.iter().position(|e| &e.key == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Flatten a schema into its catalog.
pub fn catalog(doc: &SchemaDocument) -> FieldCatalog {
    FieldCatalog::from_document(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fixtures::customer_schema;
    use crate::schema::normalize;
    use serde_json::json;

    #[test]
    fn catalog_lists_parents_then_children() {
        let doc = normalize(&customer_schema()).unwrap();
        let cat = catalog(&doc);
        let wire: Vec<String> = cat.keys().map(FieldKey::to_wire).collect();
        assert_eq!(
            wire,
            vec![
                "customer_name",
                "customer_type",
                "customer_group",
                "territory",
                "tax_id",
                "address.address_line1",
                "address.city",
                "address.is_primary_address",
            ]
        );

        let city = cat.get(&FieldKey::child("address", "city")).unwrap();
        assert_eq!(city.table_label.as_deref(), Some("Addresses"));
        assert_eq!(city.display_label(), "Addresses / City");
    }

    #[test]
    fn hidden_table_children_are_excluded() {
        let doc = normalize(&json!({
            "docs": [
                {"name": "Item", "fields": [
                    {"fieldname": "item_code", "fieldtype": "Data", "reqd": 1},
                    {"fieldname": "barcodes", "fieldtype": "Table", "options": "Item Barcode", "hidden": 1}
                ]},
                {"name": "Item Barcode", "fields": [
                    {"fieldname": "barcode", "fieldtype": "Data"}
                ]}
            ]
        }))
        .unwrap();
        let cat = catalog(&doc);
        assert_eq!(cat.len(), 1);
        assert!(!cat.contains(&FieldKey::child("barcodes", "barcode")));
    }

    #[test]
    fn duplicate_fieldnames_keep_first_occurrence() {
        let doc = normalize(&json!({
            "docs": [{"name": "Item", "fields": [
                {"fieldname": "item_name", "label": "First", "fieldtype": "Data"},
                {"fieldname": "item_name", "label": "Second", "fieldtype": "Data"}
            ]}]
        }))
        .unwrap();
        let cat = catalog(&doc);
        assert_eq!(cat.len(), 1);
        assert_eq!(cat.entries()[0].field.display_label(), "First");
    }
}
