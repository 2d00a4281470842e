//! Compiles loop query state into content API query parameters.
//!
//! Compilation is pure: the same state and the same `now` always produce the
//! same parameters, so the canonical cache key derived from them is stable.
//! Relative dates are resolved at whole-minute precision, so repeated
//! compilations within one minute also agree.

use chrono_tz::Tz;
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

use crate::cache::ParamMap;
use crate::domain::conditions::{Condition, ConditionGroup};
use crate::domain::dates::{DateBounds, DateFilter};
use crate::domain::query::{DEFAULT_ORDER_BY, PaginationType, QueryState};
use crate::domain::taxonomy::{TaxonomyFilters, TaxonomyOperator};
use crate::util::timezone;

pub const PARAM_PER_PAGE: &str = "per_page";
pub const PARAM_PAGE: &str = "page";
pub const PARAM_ORDER_BY: &str = "orderby";
pub const PARAM_ORDER: &str = "order";
pub const PARAM_SEARCH: &str = "search";
pub const PARAM_SEARCH_COLUMNS: &str = "search_columns";
pub const PARAM_AFTER: &str = "after";
pub const PARAM_BEFORE: &str = "before";
pub const PARAM_TAX_RELATION: &str = "tax_relation";
pub const PARAM_META_QUERY: &str = "meta_query";

/// `per_page` value asking for every matching item at once.
pub const ALL_ITEMS: i64 = -1;

/// REST parameter for a taxonomy slug. Built-in taxonomies are exposed under
/// plural names; everything else passes through unchanged.
pub fn taxonomy_param(slug: &str) -> &str {
    match slug {
        "category" => "categories",
        "post_tag" => "tags",
        other => other,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueryCompiler {
    tz: Tz,
}

impl Default for QueryCompiler {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

impl QueryCompiler {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Compile against the current wall clock of the configured timezone.
    pub fn compile(&self, state: &QueryState) -> ParamMap {
        self.compile_at(state, timezone::local_now(self.tz))
    }

    /// Compile with relative dates resolved against `now`.
    pub fn compile_at(&self, state: &QueryState, now: OffsetDateTime) -> ParamMap {
        let now = truncate_to_minute(timezone::localize(now, self.tz));
        let mut params = ParamMap::new();

        push_pagination(&mut params, state);
        push_search(&mut params, state);
        push_taxonomies(&mut params, &state.taxonomy_filters);
        push_dates(&mut params, &state.date_filter, now, self.tz);

        if let Some(payload) = meta_query_payload(&state.condition_groups) {
            params.insert(PARAM_META_QUERY, payload.to_string());
        }

        debug!(
            post_type = %state.post_type,
            params = params.len(),
            "compiled loop query"
        );
        params
    }
}

fn push_pagination(params: &mut ParamMap, state: &QueryState) {
    let per_page = match state.pagination_type {
        PaginationType::None => ALL_ITEMS,
        _ => i64::from(state.posts_per_page.max(1)),
    };
    params.insert(PARAM_PER_PAGE, per_page);
    params.insert(PARAM_PAGE, state.current_page.max(1));

    let order_by = state.order_by.trim();
    let order_by = if order_by.is_empty() {
        DEFAULT_ORDER_BY
    } else {
        order_by
    };
    params.insert(PARAM_ORDER_BY, order_by);
    params.insert(PARAM_ORDER, state.order.as_str());
}

fn push_search(params: &mut ParamMap, state: &QueryState) {
    let query = state.search_query.trim();
    if query.is_empty() {
        return;
    }
    params.insert(PARAM_SEARCH, query);

    let mut columns: Vec<&str> = state.search_in.iter().map(|field| field.column()).collect();
    columns.sort_unstable();
    columns.dedup();
    if !columns.is_empty() {
        params.insert(PARAM_SEARCH_COLUMNS, columns.join(","));
    }
}

fn push_taxonomies(params: &mut ParamMap, filters: &TaxonomyFilters) {
    let mut applied = 0usize;

    for (slug, selection) in filters.iter() {
        if selection.terms.is_empty() {
            continue;
        }
        let param = taxonomy_param(slug);
        let terms = selection.joined_terms();

        match selection.operator {
            TaxonomyOperator::In => params.insert(param, terms),
            TaxonomyOperator::NotIn => params.insert(format!("{param}_exclude"), terms),
            TaxonomyOperator::And => {
                params.insert(param, terms);
                params.insert(format!("{param}_operator"), "AND");
            }
        }
        applied += 1;
    }

    if applied > 1 {
        params.insert(PARAM_TAX_RELATION, "AND");
    }
}

fn truncate_to_minute(now: OffsetDateTime) -> OffsetDateTime {
    now.replace_second(0)
        .and_then(|now| now.replace_nanosecond(0))
        .unwrap_or(now)
}

fn push_dates(params: &mut ParamMap, filter: &DateFilter, now: OffsetDateTime, tz: Tz) {
    match filter {
        DateFilter::None | DateFilter::Relative { relative: None } => {}
        DateFilter::Relative {
            relative: Some(period),
        } => {
            let DateBounds { after, before } = period.resolve(now, tz);
            if let Some(after) = after.and_then(|instant| format_instant(PARAM_AFTER, instant)) {
                params.insert(PARAM_AFTER, after);
            }
            if let Some(before) = before.and_then(|instant| format_instant(PARAM_BEFORE, instant)) {
                params.insert(PARAM_BEFORE, before);
            }
        }
        DateFilter::Absolute {
            start_date,
            end_date,
            ..
        } => {
            if let Some(start) = non_blank(start_date.as_deref()) {
                params.insert(PARAM_AFTER, start);
            }
            if let Some(end) = non_blank(end_date.as_deref()) {
                params.insert(PARAM_BEFORE, end);
            }
        }
    }
}

fn format_instant(param: &'static str, instant: OffsetDateTime) -> Option<String> {
    match instant.format(&Rfc3339) {
        Ok(formatted) => Some(formatted),
        Err(err) => {
            warn!(param, error = %err, "date bound not representable; dropped");
            None
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Serialized field-condition payload, or `None` when no group has any
/// condition left.
///
/// Shape: `{"groups":[{"id","relation","combine"?,"conditions":[...]}]}`.
/// `combine` is omitted on the first emitted group, which has nothing to
/// combine with.
pub fn meta_query_payload(groups: &[ConditionGroup]) -> Option<Value> {
    let groups: Vec<Value> = groups
        .iter()
        .filter(|group| !group.is_empty())
        .enumerate()
        .map(|(index, group)| {
            let mut entry = Map::new();
            entry.insert("id".into(), Value::from(group.id.as_str()));
            entry.insert("relation".into(), Value::from(group.relation.as_str()));
            if index > 0 {
                entry.insert(
                    "combine".into(),
                    Value::from(group.combine_with_previous.as_str()),
                );
            }
            entry.insert(
                "conditions".into(),
                Value::Array(group.conditions.iter().map(condition_payload).collect()),
            );
            Value::Object(entry)
        })
        .collect();

    if groups.is_empty() {
        None
    } else {
        Some(json!({ "groups": groups }))
    }
}

fn condition_payload(condition: &Condition) -> Value {
    let mut entry = Map::new();
    entry.insert("key".into(), Value::from(condition.field()));
    if let Some(value) = condition.value().to_payload(condition.value_type()) {
        entry.insert("value".into(), value);
    }
    entry.insert("compare".into(), Value::from(condition.compare().as_str()));
    entry.insert("type".into(), Value::from(condition.value_type().as_str()));
    Value::Object(entry)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::Duration;
    use time::macros::datetime;

    use super::*;
    use crate::cache::{ParamValue, canonicalize};
    use crate::domain::conditions::{Operator, Relation, ValueType};
    use crate::domain::dates::RelativePeriod;
    use crate::domain::query::{SearchField, SortOrder};
    use crate::domain::taxonomy::TaxonomySelection;

    const NOW: OffsetDateTime = datetime!(2024-03-13 15:30:00 +9);

    fn compiler() -> QueryCompiler {
        QueryCompiler::new(chrono_tz::Asia::Tokyo)
    }

    fn text<'a>(params: &'a ParamMap, key: &str) -> Option<&'a str> {
        params.get(key).and_then(ParamValue::as_text)
    }

    #[test]
    fn default_state_sets_pagination_and_order() {
        let params = compiler().compile_at(&QueryState::default(), NOW);

        assert_eq!(params.get(PARAM_PER_PAGE), Some(&ParamValue::Int(12)));
        assert_eq!(params.get(PARAM_PAGE), Some(&ParamValue::Int(1)));
        assert_eq!(text(&params, PARAM_ORDER_BY), Some("date"));
        assert_eq!(text(&params, PARAM_ORDER), Some("desc"));
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn pagination_none_requests_everything() {
        let state = QueryState {
            pagination_type: PaginationType::None,
            current_page: 3,
            order: SortOrder::Asc,
            ..QueryState::default()
        };
        let params = compiler().compile_at(&state, NOW);

        assert_eq!(params.get(PARAM_PER_PAGE), Some(&ParamValue::Int(ALL_ITEMS)));
        assert_eq!(params.get(PARAM_PAGE), Some(&ParamValue::Int(3)));
        assert_eq!(text(&params, PARAM_ORDER), Some("asc"));
    }

    #[test]
    fn search_is_trimmed_and_carries_columns() {
        let state = QueryState {
            search_query: "  lamp ".to_string(),
            search_in: vec![SearchField::Title, SearchField::Excerpt, SearchField::Title],
            ..QueryState::default()
        };
        let params = compiler().compile_at(&state, NOW);

        assert_eq!(text(&params, PARAM_SEARCH), Some("lamp"));
        assert_eq!(
            text(&params, PARAM_SEARCH_COLUMNS),
            Some("post_excerpt,post_title")
        );
    }

    #[test]
    fn blank_search_sets_nothing() {
        let state = QueryState {
            search_query: "   ".to_string(),
            ..QueryState::default()
        };
        let params = compiler().compile_at(&state, NOW);
        assert!(!params.contains(PARAM_SEARCH));
        assert!(!params.contains(PARAM_SEARCH_COLUMNS));
    }

    #[test]
    fn category_in_and_not_in_are_remapped() {
        let mut state = QueryState::default();
        state.taxonomy_filters.set(
            "category",
            TaxonomySelection::new("category", vec![3, 7], TaxonomyOperator::In),
        );
        let params = compiler().compile_at(&state, NOW);
        assert_eq!(text(&params, "categories"), Some("3,7"));
        assert!(!params.contains("categories_exclude"));

        state.taxonomy_filters.set(
            "category",
            TaxonomySelection::new("category", vec![3, 7], TaxonomyOperator::NotIn),
        );
        let params = compiler().compile_at(&state, NOW);
        assert_eq!(text(&params, "categories_exclude"), Some("3,7"));
        assert!(!params.contains("categories"));
    }

    #[test]
    fn and_operator_requests_all_terms() {
        let mut state = QueryState::default();
        state.taxonomy_filters.set(
            "post_tag",
            TaxonomySelection::new("post_tag", vec![4, 5], TaxonomyOperator::And),
        );
        let params = compiler().compile_at(&state, NOW);

        assert_eq!(text(&params, "tags"), Some("4,5"));
        assert_eq!(text(&params, "tags_operator"), Some("AND"));
        assert!(!params.contains(PARAM_TAX_RELATION));
    }

    #[test]
    fn several_taxonomies_are_combined_with_and() {
        let mut state = QueryState::default();
        state.taxonomy_filters.set(
            "category",
            TaxonomySelection::new("category", vec![1], TaxonomyOperator::In),
        );
        state.taxonomy_filters.set(
            "genre",
            TaxonomySelection::new("genre", vec![9], TaxonomyOperator::In),
        );
        let params = compiler().compile_at(&state, NOW);

        assert_eq!(text(&params, "genre"), Some("9"));
        assert_eq!(text(&params, PARAM_TAX_RELATION), Some("AND"));
    }

    #[test]
    fn last_7_days_resolves_against_now() {
        let state = QueryState {
            date_filter: DateFilter::relative(RelativePeriod::Last7Days),
            ..QueryState::default()
        };
        let params = compiler().compile_at(&state, NOW);

        assert_eq!(text(&params, PARAM_AFTER), Some("2024-03-06T15:30:00+09:00"));
        assert!(!params.contains(PARAM_BEFORE));

        let bounds = RelativePeriod::Last7Days.resolve(NOW, chrono_tz::Asia::Tokyo);
        let edge = NOW - Duration::days(7);
        assert!(!bounds.contains(edge), "after is exclusive");
        assert!(bounds.contains(edge + Duration::seconds(1)));
        assert!(bounds.contains(NOW));
    }

    #[test]
    fn relative_dates_are_stable_within_a_minute() {
        let state = QueryState {
            date_filter: DateFilter::relative(RelativePeriod::Last7Days),
            ..QueryState::default()
        };
        let early = compiler().compile_at(&state, datetime!(2024-03-13 15:30:00.5 +9));
        let late = compiler().compile_at(&state, datetime!(2024-03-13 15:30:59.999 +9));

        assert_eq!(canonicalize(&early), canonicalize(&late));
        assert_eq!(text(&early, PARAM_AFTER), Some("2024-03-06T15:30:00+09:00"));

        let next = compiler().compile_at(&state, datetime!(2024-03-13 15:31:00 +9));
        assert_eq!(text(&next, PARAM_AFTER), Some("2024-03-06T15:31:00+09:00"));
    }

    #[test]
    fn now_is_localized_to_the_configured_timezone() {
        let state = QueryState {
            date_filter: DateFilter::relative(RelativePeriod::Today),
            ..QueryState::default()
        };
        // 16:00 UTC on the 12th is already the 13th in Tokyo.
        let params = compiler().compile_at(&state, datetime!(2024-03-12 16:00:00 UTC));
        assert_eq!(text(&params, PARAM_AFTER), Some("2024-03-13T00:00:00+09:00"));
    }

    #[test]
    fn closed_period_emits_both_bounds() {
        let state = QueryState {
            date_filter: DateFilter::relative(RelativePeriod::Yesterday),
            ..QueryState::default()
        };
        let params = compiler().compile_at(&state, NOW);

        assert_eq!(text(&params, PARAM_AFTER), Some("2024-03-12T00:00:00+09:00"));
        assert_eq!(text(&params, PARAM_BEFORE), Some("2024-03-13T00:00:00+09:00"));
    }

    #[test]
    fn absolute_dates_pass_through_and_blanks_are_ignored() {
        let state = QueryState {
            date_filter: DateFilter::absolute(Some("2024-01-01T00:00:00"), Some("  ")),
            ..QueryState::default()
        };
        let params = compiler().compile_at(&state, NOW);

        assert_eq!(text(&params, PARAM_AFTER), Some("2024-01-01T00:00:00"));
        assert!(!params.contains(PARAM_BEFORE));
    }

    #[test]
    fn relative_filter_without_period_is_ignored() {
        let state = QueryState {
            date_filter: DateFilter::Relative { relative: None },
            ..QueryState::default()
        };
        let params = compiler().compile_at(&state, NOW);
        assert!(!params.contains(PARAM_AFTER));
    }

    #[test]
    fn condition_groups_serialize_as_one_payload() {
        let price = Condition::new("c1", "price", Operator::Between, "10,20", ValueType::Numeric)
            .expect("valid condition");
        let featured = Condition::new("c2", "featured", Operator::Exists, "", ValueType::Char)
            .expect("valid condition");
        let color = Condition::new("c3", "color", Operator::In, "red, blue", ValueType::Char)
            .expect("valid condition");

        let state = QueryState {
            condition_groups: vec![
                ConditionGroup::new("g1", Relation::And)
                    .with_condition(price)
                    .with_condition(featured),
                ConditionGroup::new("empty", Relation::Or),
                ConditionGroup::new("g2", Relation::And)
                    .combined_with(Relation::Or)
                    .with_condition(color),
            ],
            ..QueryState::default()
        };
        let params = compiler().compile_at(&state, NOW);

        let raw = text(&params, PARAM_META_QUERY).expect("meta_query present");
        let payload: Value = serde_json::from_str(raw).expect("valid JSON");
        assert_eq!(
            payload,
            json!({
                "groups": [
                    {
                        "id": "g1",
                        "relation": "AND",
                        "conditions": [
                            {"key": "price", "value": [10, 20], "compare": "BETWEEN", "type": "NUMERIC"},
                            {"key": "featured", "compare": "EXISTS", "type": "CHAR"}
                        ]
                    },
                    {
                        "id": "g2",
                        "relation": "AND",
                        "combine": "OR",
                        "conditions": [
                            {"key": "color", "value": ["red", "blue"], "compare": "IN", "type": "CHAR"}
                        ]
                    }
                ]
            })
        );
    }

    #[test]
    fn only_empty_groups_leave_meta_query_absent() {
        let state = QueryState {
            condition_groups: vec![ConditionGroup::new("g1", Relation::And)],
            ..QueryState::default()
        };
        let params = compiler().compile_at(&state, NOW);
        assert!(!params.contains(PARAM_META_QUERY));
    }

    #[test]
    fn legacy_single_relation_drives_both_roles() {
        // Older payloads carry one `relation` per group. It is used both inside
        // the group and to join the group with the ones before it.
        let groups: Vec<ConditionGroup> = serde_json::from_value(json!([
            {"id": "a", "relation": "AND", "conditions": [
                {"field": "size", "compare": "=", "value": "L"}
            ]},
            {"id": "b", "relation": "OR", "conditions": [
                {"field": "stock", "compare": ">", "value": "0", "type": "NUMERIC"},
                {"field": "preorder", "compare": "=", "value": "yes", "type": "BINARY"}
            ]}
        ]))
        .expect("groups");

        let payload = meta_query_payload(&groups).expect("payload");
        assert_eq!(payload["groups"][1]["relation"], "OR");
        assert_eq!(payload["groups"][1]["combine"], "OR");
        assert_eq!(payload["groups"][1]["conditions"][0]["value"], 0);
        assert_eq!(payload["groups"][1]["conditions"][1]["value"], "1");
    }

    #[test]
    fn compilation_is_deterministic() {
        let mut state = QueryState {
            search_query: "lamp".to_string(),
            date_filter: DateFilter::relative(RelativePeriod::LastMonth),
            ..QueryState::default()
        };
        state.taxonomy_filters.set(
            "category",
            TaxonomySelection::new("category", vec![2], TaxonomyOperator::In),
        );

        let first = compiler().compile_at(&state, NOW);
        let second = compiler().compile_at(&state.clone(), NOW);
        assert_eq!(canonicalize(&first), canonicalize(&second));
    }

    #[test]
    fn custom_taxonomy_passes_through() {
        assert_eq!(taxonomy_param("category"), "categories");
        assert_eq!(taxonomy_param("post_tag"), "tags");
        assert_eq!(taxonomy_param("product_cat"), "product_cat");
    }
}
