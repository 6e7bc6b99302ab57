//! Paging for history reads.

use serde::{Deserialize, Serialize};

/// Resolved page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: i64,
    pub offset: i64,
}

impl PageRequest {
    /// Resolve caller-supplied values.
    ///
    /// Absent or non-positive limits fall back to `default_limit`, limits
    /// above `max_limit` are capped and negative offsets become zero.
    pub fn resolve(
        limit: Option<i64>,
        offset: Option<i64>,
        default_limit: i64,
        max_limit: i64,
    ) -> Self {
        let limit = match limit {
            Some(limit) if limit > 0 => limit.min(max_limit),
            _ => default_limit,
        };
        let offset = offset.filter(|offset| *offset > 0).unwrap_or(0);
        Self { limit, offset }
    }
}

/// One page of results plus the size of the full result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub limit: i64,
    pub offset: i64,
    pub total_count: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total_count: i64) -> Self {
        Self {
            items,
            limit: request.limit,
            offset: request.offset,
            total_count,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            limit: self.limit,
            offset: self.offset,
            total_count: self.total_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_defaults() {
        assert_eq!(
            PageRequest::resolve(None, None, 10, 100),
            PageRequest { limit: 10, offset: 0 }
        );
        assert_eq!(PageRequest::resolve(Some(0), Some(-5), 10, 100).limit, 10);
        assert_eq!(PageRequest::resolve(Some(-3), Some(-5), 10, 100).offset, 0);
    }

    #[test]
    fn test_resolve_caps_limit() {
        assert_eq!(PageRequest::resolve(Some(5000), Some(20), 10, 100).limit, 100);
        assert_eq!(PageRequest::resolve(Some(2), Some(20), 10, 100).offset, 20);
    }
}
