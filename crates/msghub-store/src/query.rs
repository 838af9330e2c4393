// SPDX-License-Identifier: MIT OR Apache-2.0
//! Whitelisted query surface over the message list.
//!
//! No general predicate language: `where` filters on a fixed set of
//! fields, sorting is limited to the same whitelist plus a few timing
//! fields, and paging is 1-based with `size = 0` meaning "everything".
//! Sorting is stable with ties broken by ref so pagination never
//! shuffles.

use msghub_core::model::{LifecycleState, Message, MsgKind};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// An `in`-list filter over one field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InClause<T> {
    /// Accepted values; empty accepts everything.
    #[serde(rename = "in", default = "Vec::new")]
    pub values: Vec<T>,
}

impl<T: PartialEq> InClause<T> {
    /// Returns `true` when `value` passes this clause.
    fn accepts(&self, value: &T) -> bool {
        self.values.is_empty() || self.values.contains(value)
    }
}

/// The whitelisted filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WhereClause {
    /// Filter on message kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<InClause<MsgKind>>,
    /// Filter on lifecycle state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<InClause<LifecycleState>>,
    /// Filter on severity code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<InClause<i64>>,
    /// Filter on origin system.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_system: Option<InClause<String>>,
    /// Filter on details location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<InClause<String>>,
}

impl WhereClause {
    fn accepts(&self, message: &Message) -> bool {
        self.kind.as_ref().is_none_or(|c| c.accepts(&message.kind))
            && self
                .state
                .as_ref()
                .is_none_or(|c| c.accepts(&message.lifecycle.state))
            && self
                .level
                .as_ref()
                .is_none_or(|c| c.accepts(&message.level.code()))
            && self
                .origin_system
                .as_ref()
                .is_none_or(|c| c.accepts(&message.origin.system))
            && self.location.as_ref().is_none_or(|c| {
                message
                    .details
                    .location
                    .as_ref()
                    .is_some_and(|location| c.accepts(location))
            })
    }
}

/// Sortable fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    /// Message title (lexicographic).
    Title,
    /// Creation instant.
    CreatedAt,
    /// Last content change.
    UpdatedAt,
    /// Progress percentage.
    Percentage,
    /// Message kind.
    Kind,
    /// Lifecycle state.
    State,
    /// Severity code.
    Level,
    /// Origin system.
    OriginSystem,
    /// Details location.
    Location,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    /// Ascending (default).
    #[default]
    Asc,
    /// Descending.
    Desc,
}

/// One sort criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    /// Field to sort on.
    pub field: SortField,
    /// Direction.
    #[serde(default)]
    pub dir: SortDir,
}

/// Paging parameters. `index` is 1-based; `size = 0` returns the full
/// result set as a single page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Page {
    /// 1-based page index.
    pub index: usize,
    /// Page size; `0` disables paging.
    pub size: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self { index: 1, size: 0 }
    }
}

/// A query over the message list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageQuery {
    /// Filter.
    #[serde(rename = "where")]
    pub where_: WhereClause,
    /// Paging.
    pub page: Page,
    /// Sort criteria, applied in order.
    pub sort: Vec<SortKey>,
}

/// Result metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMeta {
    /// Epoch ms the result was generated at.
    pub generated_at: i64,
    /// Server UTC offset (e.g. `+01:00`).
    pub tz: String,
}

/// A page of query results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// The selected page of messages.
    pub items: Vec<Message>,
    /// Matching messages before paging.
    pub total: usize,
    /// Number of pages at the requested size.
    pub pages: usize,
    /// Metadata.
    pub meta: QueryMeta,
}

/// Run `query` over `messages`.
#[must_use]
pub fn run_query(
    messages: &[Message],
    query: &MessageQuery,
    generated_at: i64,
    tz: String,
) -> QueryResult {
    let mut matched: Vec<&Message> = messages
        .iter()
        .filter(|m| query.where_.accepts(m))
        .collect();

    matched.sort_by(|a, b| compare(a, b, &query.sort));

    let total = matched.len();
    let (items, pages) = if query.page.size == 0 {
        (matched, 1)
    } else {
        let pages = total.div_ceil(query.page.size).max(1);
        let index = query.page.index.clamp(1, pages);
        let start = (index - 1) * query.page.size;
        let end = (start + query.page.size).min(total);
        (matched.get(start..end).unwrap_or(&[]).to_vec(), pages)
    };

    QueryResult {
        items: items.into_iter().cloned().collect(),
        total,
        pages,
        meta: QueryMeta { generated_at, tz },
    }
}

fn compare(a: &Message, b: &Message, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ordering = compare_field(a, b, key.field);
        let ordering = match key.dir {
            SortDir::Asc => ordering,
            SortDir::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.ref_key.cmp(&b.ref_key)
}

fn compare_field(a: &Message, b: &Message, field: SortField) -> Ordering {
    match field {
        SortField::Title => a.title.cmp(&b.title),
        SortField::CreatedAt => a.timing.created_at.cmp(&b.timing.created_at),
        SortField::UpdatedAt => cmp_opt(a.timing.updated_at, b.timing.updated_at),
        SortField::Percentage => cmp_opt(a.progress.percentage, b.progress.percentage),
        SortField::Kind => a.kind.as_str().cmp(b.kind.as_str()),
        SortField::State => a.state().as_str().cmp(b.state().as_str()),
        SortField::Level => a.level.code().cmp(&b.level.code()),
        SortField::OriginSystem => a.origin.system.cmp(&b.origin.system),
        SortField::Location => cmp_opt(
            a.details.location.as_deref(),
            b.details.location.as_deref(),
        ),
    }
}

/// `None` sorts after `Some` so unset fields land at the end ascending.
fn cmp_opt<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parses_from_control_surface_json() {
        let query: MessageQuery = serde_json::from_str(
            r#"{
                "where": {"kind": {"in": ["task"]}, "level": {"in": [20, 30]}},
                "page": {"index": 2, "size": 10},
                "sort": [{"field": "createdAt", "dir": "desc"}]
            }"#,
        )
        .unwrap();
        assert_eq!(query.where_.kind.unwrap().values, vec![MsgKind::Task]);
        assert_eq!(query.page.index, 2);
        assert_eq!(query.sort[0].field, SortField::CreatedAt);
        assert_eq!(query.sort[0].dir, SortDir::Desc);
    }

    #[test]
    fn default_query_is_match_all() {
        let query: MessageQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.page, Page { index: 1, size: 0 });
        assert!(query.sort.is_empty());
    }
}
