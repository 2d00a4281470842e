//! Taxonomy term selections.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TaxonomyOperator {
    #[default]
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "NOT IN")]
    NotIn,
    #[serde(rename = "AND")]
    And,
}

/// Terms selected for one taxonomy.
///
/// `taxonomy` may be omitted in stored state; it then defaults to the slug
/// the selection is filed under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxonomySelection {
    #[serde(default)]
    pub taxonomy: String,
    #[serde(default)]
    pub terms: Vec<u64>,
    #[serde(default)]
    pub operator: TaxonomyOperator,
}

impl TaxonomySelection {
    pub fn new(taxonomy: impl Into<String>, terms: Vec<u64>, operator: TaxonomyOperator) -> Self {
        Self {
            taxonomy: taxonomy.into(),
            terms,
            operator,
        }
    }

    pub fn joined_terms(&self) -> String {
        self.terms
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Selections keyed by taxonomy slug. Never holds an empty selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, TaxonomySelection>")]
pub struct TaxonomyFilters(BTreeMap<String, TaxonomySelection>);

impl TaxonomyFilters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a selection; an empty term list removes the slug instead.
    pub fn set(&mut self, slug: impl Into<String>, selection: TaxonomySelection) {
        let slug = slug.into();
        if selection.terms.is_empty() {
            self.0.remove(&slug);
        } else {
            self.0.insert(slug, selection);
        }
    }

    pub fn remove(&mut self, slug: &str) -> Option<TaxonomySelection> {
        self.0.remove(slug)
    }

    pub fn get(&self, slug: &str) -> Option<&TaxonomySelection> {
        self.0.get(slug)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TaxonomySelection)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, TaxonomySelection>> for TaxonomyFilters {
    fn from(map: BTreeMap<String, TaxonomySelection>) -> Self {
        let mut filters = TaxonomyFilters::new();
        for (slug, mut selection) in map {
            if selection.taxonomy.is_empty() {
                selection.taxonomy.clone_from(&slug);
            }
            filters.set(slug, selection);
        }
        filters
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn empty_selection_removes_key() {
        let mut filters = TaxonomyFilters::new();
        filters.set(
            "category",
            TaxonomySelection::new("category", vec![3], TaxonomyOperator::In),
        );
        assert_eq!(filters.len(), 1);

        filters.set(
            "category",
            TaxonomySelection::new("category", Vec::new(), TaxonomyOperator::In),
        );
        assert!(filters.is_empty());
    }

    #[test]
    fn deserialization_drops_empty_selections() {
        let filters: TaxonomyFilters = serde_json::from_value(json!({
            "category": { "taxonomy": "category", "terms": [3, 7], "operator": "NOT IN" },
            "post_tag": { "taxonomy": "post_tag", "terms": [] }
        }))
        .expect("deserialize");

        assert_eq!(filters.len(), 1);
        let category = filters.get("category").expect("category kept");
        assert_eq!(category.operator, TaxonomyOperator::NotIn);
        assert_eq!(category.joined_terms(), "3,7");
    }

    #[test]
    fn omitted_fields_default_from_the_slug() {
        let filters: TaxonomyFilters = serde_json::from_value(json!({
            "category": { "terms": [3, 7] },
            "post_tag": { "operator": "AND" }
        }))
        .expect("deserialize");

        assert_eq!(filters.len(), 1, "selection without terms dropped");
        let category = filters.get("category").expect("category kept");
        assert_eq!(category.taxonomy, "category");
        assert_eq!(category.operator, TaxonomyOperator::In);
        assert_eq!(category.joined_terms(), "3,7");
    }
}
