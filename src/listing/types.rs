//! Listing walk state

use crate::error::ScraperError;

/// Paginator states. `Done` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkState {
    Loading,
    Extracting,
    AdvancingNext,
    AdvancingJump,
    Done,
}

/// Pagination state of the page currently displayed.
///
/// Built fresh from the live page after each extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationCursor {
    /// 1-based
    pub page_index: usize,
    pub has_next: bool,
    pub has_jump: bool,
}

impl PaginationCursor {
    /// "next" wins when both controls are present.
    pub fn next_state(&self) -> WalkState {
        if self.has_next {
            WalkState::AdvancingNext
        } else if self.has_jump {
            WalkState::AdvancingJump
        } else {
            WalkState::Done
        }
    }
}

/// Outcome of a listing walk.
#[derive(Debug)]
pub struct ListingWalk {
    /// Absolute detail-page URLs in discovery order.
    pub urls: Vec<String>,
    pub pages_visited: usize,
    /// Failure that cut the walk short; `urls` is still valid.
    pub interrupted: Option<ScraperError>,
}

impl ListingWalk {
    /// True when the walk ran until no pagination control was left.
    pub fn is_complete(&self) -> bool {
        self.interrupted.is_none()
    }
}
