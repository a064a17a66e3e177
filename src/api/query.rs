//! Raw query-string parameters for course listing.
//!
//! Everything arrives as strings and is parsed leniently: an unparsable
//! numeric filter is ignored rather than rejected, matching the behavior the
//! web clients were written against.

use std::collections::HashSet;

use serde::Deserialize;

use crate::db::courses::{CourseFilter, Page, Sort, SortField};
use crate::services::ListQuery;

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 50;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawListParams {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub title: Option<String>,
    pub code: Option<String>,
    pub instructor_id: Option<String>,
    pub department: Option<String>,
    pub min_credits: Option<String>,
    pub max_credits: Option<String>,
    pub min_capacity: Option<String>,
    pub max_capacity: Option<String>,
    pub enrolled: Option<String>,
    pub sort: Option<String>,
    pub fields: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
    pub enrolled_only: Option<String>,
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn number(raw: Option<String>) -> Option<i64> {
    raw.and_then(|s| s.trim().parse().ok())
}

fn parse_sort(raw: Option<String>) -> Option<Sort> {
    let raw = non_empty(raw)?;
    let (field, descending) = match raw.strip_prefix('-') {
        Some(rest) => (rest, true),
        None => (raw.as_str(), false),
    };
    SortField::parse(field).map(|field| Sort { field, descending })
}

fn parse_fields(raw: Option<String>) -> Option<HashSet<String>> {
    let raw = non_empty(raw)?;
    let mut fields: HashSet<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if fields.is_empty() {
        return None;
    }
    // The projection always keeps the identifier.
    fields.insert("id".to_string());
    Some(fields)
}

impl RawListParams {
    pub fn into_query(self) -> ListQuery {
        // Pagination kicks in only when the caller asked for it; otherwise
        // the endpoint returns the full set as it always has.
        let page = if self.page.is_some() || self.limit.is_some() {
            let number_of = |raw: Option<String>, default| number(raw).unwrap_or(default);
            Some(Page {
                page: number_of(self.page.clone(), 1).max(1),
                limit: number_of(self.limit.clone(), DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            })
        } else {
            None
        };

        ListQuery {
            filter: CourseFilter {
                kind: non_empty(self.kind),
                title: non_empty(self.title),
                code: non_empty(self.code),
                instructor_id: non_empty(self.instructor_id),
                department: non_empty(self.department),
                min_credits: number(self.min_credits),
                max_credits: number(self.max_credits),
                min_capacity: number(self.min_capacity),
                max_capacity: number(self.max_capacity),
                enrolled: number(self.enrolled),
            },
            sort: parse_sort(self.sort),
            page,
            fields: parse_fields(self.fields),
            enrolled_only: matches!(self.enrolled_only.as_deref(), Some("true") | Some("1")),
        }
    }
}
