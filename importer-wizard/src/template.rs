//! Template column headers.
//!
//! The backend writes one header per selected field: `fieldname [Type]`, or
//! `fieldname [Link] [Target]` for link fields. Child fields use the dotted key. Uploaded
//! files may also number child rows as `table.<row>.field`.

use crate::schema::{FieldDescriptor, FieldKey, FieldCatalog};
use crate::utils::validation::sanitize_file_stem;
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnHeader {
    pub name: String,
    pub fieldtype: Option<String>,
    pub options: Option<String>,
}

/// Header the backend generates for `key`.
pub fn column_header(key: &FieldKey, field: &FieldDescriptor) -> String {
    let fieldtype = field.fieldtype.trim();
    if fieldtype.ends_with("Link") {
        format!(
            "{} [{}] [{}]",
            key,
            fieldtype,
            field.options_text().unwrap_or_default()
        )
    } else {
        format!("{} [{}]", key, fieldtype)
    }
}

/// Headers for `keys` in the given order; keys missing from the catalog are skipped.
pub fn preview_headers(catalog: &FieldCatalog, keys: &[FieldKey]) -> Vec<String> {
    keys.iter()
        .filter_map(|k| catalog.get(k).map(|e| column_header(&e.key, &e.field)))
        .collect()
}

fn header_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([^\[\]]+?)\s*(?:\[([^\[\]]*)\])?\s*(?:\[([^\[\]]*)\])?\s*$").ok()
    })
    .as_ref()
}

/// Parse `name [Type] [Options]`; both bracket groups are optional.
pub fn parse_column_header(raw: &str) -> Option<ColumnHeader> {
    let caps = header_regex()?.captures(raw)?;
    let group = |i: usize| {
        caps.get(i)
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    };
    Some(ColumnHeader {
        name: group(1)?,
        fieldtype: group(2),
        options: group(3),
    })
}

/// Field key a column name refers to. Accepts `field`, `table.field` and `table.<row>.field`.
pub fn column_field_key(name: &str) -> Option<FieldKey> {
    let parts: Vec<&str> = name.trim().split('.').map(str::trim).collect();
    match parts.as_slice() {
        [table, row, field] if row.parse::<u32>().is_ok() => {
            FieldKey::parse(&format!("{}.{}", table, field))
        }
        _ => FieldKey::parse(name),
    }
}

pub fn template_file_name(doctype: &str) -> String {
    format!("{}_template.xlsx", sanitize_file_stem(doctype))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_follow_backend_format() {
        let mut link = FieldDescriptor::new("territory", "Link");
        link.options = Some("Territory".to_string());
        assert_eq!(
            column_header(&FieldKey::parent("territory"), &link),
            "territory [Link] [Territory]"
        );

        let data = FieldDescriptor::new("city", "Data");
        assert_eq!(
            column_header(&FieldKey::child("address", "city"), &data),
            "address.city [Data]"
        );
    }

    #[test]
    fn parse_header_variants() {
        assert_eq!(
            parse_column_header("territory [Link] [Territory]"),
            Some(ColumnHeader {
                name: "territory".to_string(),
                fieldtype: Some("Link".to_string()),
                options: Some("Territory".to_string()),
            })
        );
        let plain = parse_column_header("  Customer Name ").unwrap();
        assert_eq!(plain.name, "Customer Name");
        assert!(plain.fieldtype.is_none());

        assert!(parse_column_header("[Data]").is_none());
        assert!(parse_column_header("").is_none());
    }

    #[test]
    fn column_keys_accept_numbered_child_rows() {
        assert_eq!(
            column_field_key("address.1.city"),
            Some(FieldKey::child("address", "city"))
        );
        assert_eq!(
            column_field_key("address.city"),
            Some(FieldKey::child("address", "city"))
        );
        assert_eq!(column_field_key("tax_id"), Some(FieldKey::parent("tax_id")));
        assert_eq!(column_field_key("a.b.c"), None);
    }

    #[test]
    fn template_file_name_is_sanitized() {
        assert_eq!(template_file_name("Customer"), "Customer_template.xlsx");
        assert_eq!(
            template_file_name("Sales Invoice"),
            "Sales_Invoice_template.xlsx"
        );
    }
}
