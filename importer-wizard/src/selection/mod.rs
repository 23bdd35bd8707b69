//! Field selection engine.
//!
//! Owns the selected key set and the active subset tab. Subsets are computed over the
//! catalog of the currently loaded schema; the select-all control only ever adds or removes
//! members of the active subset.

use crate::schema::{catalog, CatalogEntry, FieldCatalog, FieldKey, SchemaDocument};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subset {
    #[default]
    Mandatory,
    Recommended,
    All,
}

impl Subset {
    pub const TABS: [Subset; 3] = [Subset::Mandatory, Subset::Recommended, Subset::All];

    pub fn label(&self) -> &'static str {
        match self {
            Subset::Mandatory => "Mandatory",
            Subset::Recommended => "Recommended",
            Subset::All => "All",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectAllState {
    Checked,
    Indeterminate,
    Unchecked,
}

impl SelectAllState {
    pub fn glyph(&self) -> &'static str {
        match self {
            SelectAllState::Checked => "[x]",
            SelectAllState::Indeterminate => "[-]",
            SelectAllState::Unchecked => "[ ]",
        }
    }
}

/// Static target type -> recommended field keys mapping, loaded from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recommendations {
    by_target: HashMap<String, Vec<FieldKey>>,
}

impl Recommendations {
    /// Build from the configured wire strings. Unparseable keys are dropped with a warning.
    pub fn from_config(raw: &HashMap<String, Vec<String>>) -> Self {
        let by_target = raw
            .iter()
            .map(|(target, keys)| {
                let parsed = keys
                    .iter()
                    .filter_map(|k| {
                        let key = FieldKey::parse(k);
                        if key.is_none() {
                            warn!(
                                "[PHASE: config] [STEP: recommended_fields] ignoring invalid key '{}' for '{}'",
                                k, target
                            );
                        }
                        key
                    })
                    .collect();
                (target.clone(), parsed)
            })
            .collect();
        Self { by_target }
    }

    /// Empty when the target type has no entry. Falls back to a case-insensitive match.
    pub fn for_target(&self, target: &str) -> &[FieldKey] {
        self.by_target
            .get(target)
            .or_else(|| {
                self.by_target
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(target))
                    .map(|(_, keys)| keys)
            })
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Members of `subset` evaluated over `catalog`.
pub fn subset_members(
    catalog: &FieldCatalog,
    subset: Subset,
    recommended: &[FieldKey],
) -> HashSet<FieldKey> {
    catalog
        .iter()
        .filter(|entry| in_subset(entry, subset, recommended))
        .map(|entry| entry.key.clone())
        .collect()
}

fn in_subset(entry: &CatalogEntry, subset: Subset, recommended: &[FieldKey]) -> bool {
    match subset {
        Subset::All => true,
        Subset::Mandatory => entry.is_required(),
        Subset::Recommended => recommended.contains(&entry.key),
    }
}

#[derive(Debug, Clone, Default)]
pub struct FieldSelectionEngine {
    target: Option<String>,
    catalog: FieldCatalog,
    recommended: Vec<FieldKey>,
    selected: HashSet<FieldKey>,
    active: Subset,
}

impl FieldSelectionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn catalog(&self) -> &FieldCatalog {
        &self.catalog
    }

    pub fn active_subset(&self) -> Subset {
        self.active
    }

    pub fn selected_keys(&self) -> &HashSet<FieldKey> {
        &self.selected
    }

    pub fn is_selected(&self, key: &FieldKey) -> bool {
        self.selected.contains(key)
    }

    /// Switch target type: empties the selection, drops the old catalog and goes back to
    /// the mandatory tab.
    pub fn reset_for_target(&mut self, target: impl Into<String>) {
        let target = target.into();
        debug!(
            "[PHASE: selection] [STEP: reset] target {:?} -> '{}'",
            self.target, target
        );
        self.target = Some(target);
        self.catalog = FieldCatalog::default();
        self.recommended.clear();
        self.selected.clear();
        self.active = Subset::Mandatory;
    }

    /// Install the schema for `target`, replacing any earlier catalog.
    ///
    /// Loading a different target than the current one resets first. Reloading the same
    /// target keeps the selected keys that still exist in the new catalog.
    pub fn load_schema(
        &mut self,
        target: &str,
        doc: &SchemaDocument,
        recommendations: &Recommendations,
    ) {
        if self.target.as_deref() != Some(target) {
            self.reset_for_target(target);
        }
        self.catalog = catalog(doc);
        self.recommended = recommendations.for_target(target).to_vec();
        let catalog = &self.catalog;
        self.selected.retain(|k| catalog.contains(k));
        info!(
            "[PHASE: selection] [STEP: load_schema] '{}' catalog has {} fields ({} recommended)",
            target,
            self.catalog.len(),
            self.recommended.len()
        );
    }

    /// Flip one key. Keys outside the catalog are ignored; returns whether anything changed.
    pub fn toggle_field(&mut self, key: &FieldKey) -> bool {
        if !self.catalog.contains(key) {
            warn!(
                "[PHASE: selection] [STEP: toggle] ignoring unknown field '{}'",
                key
            );
            return false;
        }
        if !self.selected.remove(key) {
            self.selected.insert(key.clone());
        }
        true
    }

    pub fn set_select_all_for_active_subset(&mut self, checked: bool) {
        let members = self.members(self.active);
        if checked {
            self.selected.extend(members);
        } else {
            self.selected.retain(|k| !members.contains(k));
        }
    }

    /// Tabs are views only; the selection is untouched.
    pub fn set_active_subset(&mut self, subset: Subset) {
        self.active = subset;
    }

    pub fn members(&self, subset: Subset) -> HashSet<FieldKey> {
        subset_members(&self.catalog, subset, &self.recommended)
    }

    pub fn select_all_state(&self) -> SelectAllState {
        let members = self.members(self.active);
        let picked = members.iter().filter(|k| self.selected.contains(*k)).count();
        if !members.is_empty() && picked == members.len() {
            SelectAllState::Checked
        } else if picked > 0 {
            SelectAllState::Indeterminate
        } else {
            SelectAllState::Unchecked
        }
    }

    /// Catalog entries of the active subset, in catalog order.
    pub fn visible_entries(&self) -> Vec<&CatalogEntry> {
        self.catalog
            .iter()
            .filter(|e| in_subset(e, self.active, &self.recommended))
            .collect()
    }

    pub fn selected_in_display_order(&self) -> Vec<FieldKey> {
        self.catalog
            .keys()
            .filter(|k| self.selected.contains(*k))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fixtures::customer_schema;
    use crate::schema::normalize;

    fn customer_recommendations() -> Recommendations {
        let mut raw = HashMap::new();
        raw.insert(
            "Customer".to_string(),
            vec![
                "customer_name".to_string(),
                "territory".to_string(),
                "address.city".to_string(),
                "address.country".to_string(),
                "..bad".to_string(),
            ],
        );
        Recommendations::from_config(&raw)
    }

    fn loaded_engine() -> FieldSelectionEngine {
        let doc = normalize(&customer_schema()).unwrap();
        let mut engine = FieldSelectionEngine::new();
        engine.load_schema("Customer", &doc, &customer_recommendations());
        engine
    }

    #[test]
    fn subsets_are_evaluated_over_catalog() {
        let engine = loaded_engine();

        let mandatory = engine.members(Subset::Mandatory);
        assert_eq!(mandatory.len(), 3);
        assert!(mandatory.contains(&FieldKey::parent("customer_name")));
        assert!(mandatory.contains(&FieldKey::child("address", "address_line1")));

        // address.country is recommended but not in the schema.
        let recommended = engine.members(Subset::Recommended);
        assert_eq!(recommended.len(), 3);
        assert!(recommended.contains(&FieldKey::child("address", "city")));

        assert_eq!(engine.members(Subset::All).len(), engine.catalog().len());
    }

    #[test]
    fn toggling_members_matches_select_all() {
        for subset in Subset::TABS {
            let mut one_by_one = loaded_engine();
            one_by_one.set_active_subset(subset);
            for key in one_by_one.members(subset) {
                assert!(one_by_one.toggle_field(&key));
            }

            let mut bulk = loaded_engine();
            bulk.set_active_subset(subset);
            bulk.set_select_all_for_active_subset(true);

            assert_eq!(one_by_one.selected_keys(), bulk.selected_keys());
            assert_eq!(bulk.select_all_state(), SelectAllState::Checked);
        }
    }

    #[test]
    fn selections_survive_tab_switches() {
        let mut engine = loaded_engine();
        engine.set_select_all_for_active_subset(true);
        let mandatory_selection = engine.selected_keys().clone();

        engine.set_active_subset(Subset::Recommended);
        engine.toggle_field(&FieldKey::parent("territory"));
        engine.set_active_subset(Subset::Mandatory);

        assert!(mandatory_selection.is_subset(engine.selected_keys()));
        assert!(engine.is_selected(&FieldKey::parent("territory")));
        assert_eq!(engine.select_all_state(), SelectAllState::Checked);
    }

    #[test]
    fn select_all_off_keeps_keys_outside_subset() {
        let mut engine = loaded_engine();
        engine.toggle_field(&FieldKey::parent("tax_id"));
        engine.set_select_all_for_active_subset(true);
        engine.set_select_all_for_active_subset(false);

        assert_eq!(
            engine.selected_in_display_order(),
            vec![FieldKey::parent("tax_id")]
        );
        assert_eq!(engine.select_all_state(), SelectAllState::Unchecked);
    }

    #[test]
    fn select_all_state_is_tri_state() {
        let mut engine = loaded_engine();
        assert_eq!(engine.select_all_state(), SelectAllState::Unchecked);

        engine.toggle_field(&FieldKey::parent("customer_name"));
        assert_eq!(engine.select_all_state(), SelectAllState::Indeterminate);
        assert_eq!(engine.select_all_state().glyph(), "[-]");

        engine.set_select_all_for_active_subset(true);
        assert_eq!(engine.select_all_state().glyph(), "[x]");
    }

    #[test]
    fn empty_recommended_subset_is_never_checked() {
        let doc = normalize(&customer_schema()).unwrap();
        let mut engine = FieldSelectionEngine::new();
        engine.load_schema("Customer", &doc, &Recommendations::default());
        engine.set_active_subset(Subset::Recommended);
        engine.set_select_all_for_active_subset(true);

        assert!(engine.selected_keys().is_empty());
        assert_eq!(engine.select_all_state(), SelectAllState::Unchecked);
    }

    #[test]
    fn changing_target_empties_selection() {
        let mut engine = loaded_engine();
        engine.set_active_subset(Subset::All);
        engine.set_select_all_for_active_subset(true);
        assert!(!engine.selected_keys().is_empty());

        engine.reset_for_target("Item");
        assert!(engine.selected_keys().is_empty());
        assert_eq!(engine.active_subset(), Subset::Mandatory);
        assert!(engine.catalog().is_empty());

        // load_schema for a new target resets too.
        let mut engine = loaded_engine();
        engine.set_select_all_for_active_subset(true);
        let doc = normalize(&customer_schema()).unwrap();
        engine.load_schema("Supplier", &doc, &customer_recommendations());
        assert!(engine.selected_keys().is_empty());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut engine = loaded_engine();
        assert!(!engine.toggle_field(&FieldKey::parent("naming_series")));
        assert!(!engine.toggle_field(&FieldKey::child("sales_team", "sales_person")));
        assert!(engine.selected_keys().is_empty());
    }

    #[test]
    fn display_order_follows_catalog() {
        let mut engine = loaded_engine();
        engine.toggle_field(&FieldKey::child("address", "city"));
        engine.toggle_field(&FieldKey::parent("tax_id"));
        engine.toggle_field(&FieldKey::parent("customer_name"));

        assert_eq!(
            engine.selected_in_display_order(),
            vec![
                FieldKey::parent("customer_name"),
                FieldKey::parent("tax_id"),
                FieldKey::child("address", "city"),
            ]
        );
    }
}
