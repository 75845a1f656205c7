//! REST envelope types shared by the mock server and its clients.

use serde::{Deserialize, Serialize};

use crate::MatchPhase;

/// Every REST response is wrapped in this envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub status_code: u16,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status_code: 200,
            message: "OK".into(),
            data: Some(data),
        }
    }

    pub fn error(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current: u32,
    pub page_size: u32,
    pub total_page: u32,
    pub total_item: u32,
}

impl Pagination {
    /// `current` is 1-based. A zero page size is treated as one.
    pub fn new(current: u32, page_size: u32, total_item: u32) -> Self {
        let page_size = page_size.max(1);
        Self {
            current: current.max(1),
            page_size,
            total_page: total_item.div_ceil(page_size),
            total_item,
        }
    }

    pub fn has_next(&self) -> bool {
        self.current < self.total_page
    }

    /// Index range of this page within the full item list.
    pub fn range(&self) -> std::ops::Range<usize> {
        let start = ((self.current - 1) as usize).saturating_mul(self.page_size as usize);
        let start = start.min(self.total_item as usize);
        let end = start
            .saturating_add(self.page_size as usize)
            .min(self.total_item as usize);
        start..end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

/// Item counts past `u32::MAX` are reported as `u32::MAX`.
fn item_count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

impl<T: Clone> Page<T> {
    /// Cut one page out of `all`.
    pub fn slice(all: &[T], current: u32, page_size: u32) -> Self {
        let pagination = Pagination::new(current, page_size, item_count(all.len()));
        Self {
            items: all[pagination.range()].to_vec(),
            pagination,
        }
    }
}

/// GET /api/status response data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub queued: usize,
    pub active_matches: usize,
    pub connections: usize,
}

/// One entry of GET /api/matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSummary {
    pub match_id: String,
    pub opponent: String,
    pub phase: MatchPhase,
    pub round: u32,
}
