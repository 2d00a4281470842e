//! Numbered page links with a sliding window.

use std::collections::BTreeSet;

use serde::{Serialize, Serializer};

/// Pages shown on each side of the current page.
pub const WINDOW_RADIUS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLink {
    Page(u32),
    /// One or more skipped pages.
    Ellipsis,
}

impl PageLink {
    pub fn page(self) -> Option<u32> {
        match self {
            PageLink::Page(page) => Some(page),
            PageLink::Ellipsis => None,
        }
    }
}

impl Serialize for PageLink {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PageLink::Page(page) => serializer.serialize_u32(*page),
            PageLink::Ellipsis => serializer.serialize_str("..."),
        }
    }
}

/// Page sequence for numbered pagination.
///
/// Always includes the first and last page plus the window around `current`;
/// any run of omitted pages collapses into a single ellipsis. `current` is
/// clamped into `1..=total`, and no pages yields an empty sequence.
pub fn page_links(total: u32, current: u32) -> Vec<PageLink> {
    if total == 0 {
        return Vec::new();
    }
    let current = current.clamp(1, total);

    let mut pages = BTreeSet::from([1, total]);
    let start = current.saturating_sub(WINDOW_RADIUS).max(1);
    let end = current.saturating_add(WINDOW_RADIUS).min(total);
    pages.extend(start..=end);

    let mut links = Vec::with_capacity(pages.len() + 2);
    let mut previous: Option<u32> = None;
    for page in pages {
        if previous.is_some_and(|prev| page > prev + 1) {
            links.push(PageLink::Ellipsis);
        }
        links.push(PageLink::Page(page));
        previous = Some(page);
    }
    links
}
