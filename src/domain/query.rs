//! Full loop-view query state as supplied by the editor on every cycle.

use serde::{Deserialize, Serialize};

use super::conditions::ConditionGroup;
use super::dates::DateFilter;
use super::taxonomy::TaxonomyFilters;

pub const DEFAULT_POST_TYPE: &str = "post";
pub const DEFAULT_POSTS_PER_PAGE: u32 = 12;
pub const DEFAULT_ORDER_BY: &str = "date";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationType {
    /// Numbered page links; each page replaces the result set.
    #[default]
    Numbers,
    /// A button appends the next page.
    LoadMore,
    /// A sentinel near the end of the list appends the next page.
    Infinite,
    /// Everything in one request.
    None,
}

/// Searchable post columns offered by the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchField {
    Title,
    Content,
    Excerpt,
}

impl SearchField {
    pub fn column(self) -> &'static str {
        match self {
            SearchField::Title => "post_title",
            SearchField::Content => "post_content",
            SearchField::Excerpt => "post_excerpt",
        }
    }
}

fn default_post_type() -> String {
    DEFAULT_POST_TYPE.to_string()
}

fn default_posts_per_page() -> u32 {
    DEFAULT_POSTS_PER_PAGE
}

fn default_order_by() -> String {
    DEFAULT_ORDER_BY.to_string()
}

fn default_current_page() -> u32 {
    1
}

fn default_search_in() -> Vec<SearchField> {
    vec![SearchField::Title, SearchField::Content, SearchField::Excerpt]
}

/// Compiler input. Treated as an immutable value on every compile/fetch cycle;
/// every field is optional on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryState {
    #[serde(default = "default_post_type")]
    pub post_type: String,
    #[serde(default = "default_posts_per_page")]
    pub posts_per_page: u32,
    #[serde(default = "default_order_by")]
    pub order_by: String,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default = "default_current_page")]
    pub current_page: u32,
    #[serde(default)]
    pub search_query: String,
    #[serde(default = "default_search_in")]
    pub search_in: Vec<SearchField>,
    #[serde(default)]
    pub taxonomy_filters: TaxonomyFilters,
    #[serde(default)]
    pub condition_groups: Vec<ConditionGroup>,
    #[serde(default)]
    pub date_filter: DateFilter,
    #[serde(default)]
    pub pagination_type: PaginationType,
}

impl Default for QueryState {
    fn default() -> Self {
        Self {
            post_type: default_post_type(),
            posts_per_page: DEFAULT_POSTS_PER_PAGE,
            order_by: default_order_by(),
            order: SortOrder::default(),
            current_page: 1,
            search_query: String::new(),
            search_in: default_search_in(),
            taxonomy_filters: TaxonomyFilters::default(),
            condition_groups: Vec::new(),
            date_filter: DateFilter::default(),
            pagination_type: PaginationType::default(),
        }
    }
}

impl QueryState {
    pub fn with_page(&self, page: u32) -> Self {
        Self {
            current_page: page.max(1),
            ..self.clone()
        }
    }

    /// REST collection serving this post type. Built-in types use their
    /// plural route; custom types are routed under their own name.
    pub fn collection(&self) -> &str {
        match self.post_type.trim() {
            "" | "post" => "posts",
            "page" => "pages",
            "attachment" => "media",
            other => other,
        }
    }
}
