//! List-endpoint pagination shape shared by every service (§6 Pagination).

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub page_token: Option<String>,
}

impl PageRequest {
    pub fn effective_page_size(&self) -> u32 {
        self.page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE)
            .max(1)
    }

    /// Opaque tokens here are simply the offset into a stable (id-sorted)
    /// listing; stability across sorts is guaranteed because callers always
    /// sort by id before paginating.
    pub fn offset(&self) -> usize {
        self.page_token
            .as_deref()
            .and_then(|t| t.parse().ok())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
    pub total_count: usize,
}

/// Slices `all` (already sorted for stable tokens) according to `req`.
pub fn paginate<T: Clone>(all: &[T], req: &PageRequest) -> PageResponse<T> {
    let offset = req.offset();
    let size = req.effective_page_size() as usize;
    let total_count = all.len();
    let end = (offset + size).min(total_count);
    let items = if offset >= total_count {
        Vec::new()
    } else {
        all[offset..end].to_vec()
    };
    let next_page_token = if end < total_count {
        Some(end.to_string())
    } else {
        None
    };
    PageResponse {
        items,
        next_page_token,
        total_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_page_size_is_twenty() {
        let req = PageRequest::default();
        assert_eq!(req.effective_page_size(), 20);
    }

    #[test]
    fn page_size_is_capped_at_max() {
        let req = PageRequest {
            page_size: Some(1000),
            page_token: None,
        };
        assert_eq!(req.effective_page_size(), MAX_PAGE_SIZE);
    }

    #[test]
    fn pagination_walks_to_completion() {
        let all: Vec<u32> = (0..45).collect();
        let mut req = PageRequest {
            page_size: Some(20),
            page_token: None,
        };
        let mut seen = Vec::new();
        loop {
            let page = paginate(&all, &req);
            seen.extend(page.items.iter().copied());
            match page.next_page_token {
                Some(tok) => req.page_token = Some(tok),
                None => break,
            }
        }
        assert_eq!(seen, all);
    }
}
