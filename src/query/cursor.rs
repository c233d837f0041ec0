//! Pagination cursor formats.
//!
//! Offset cursors are the product's `per_page:page:is_prev` text. Sync
//! cursors are opaque: URL-safe base64 over a small JSON object holding the
//! boundary `(updated_at, id)` and the direction of travel.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{IssueError, Result};

/// Position in an offset-paginated listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetCursor {
    pub per_page: usize,
    pub page: usize,
    pub is_prev: bool,
}

impl OffsetCursor {
    #[must_use]
    pub const fn first(per_page: usize) -> Self {
        Self {
            per_page,
            page: 0,
            is_prev: false,
        }
    }

    #[must_use]
    pub const fn offset(&self) -> usize {
        self.page.saturating_mul(self.per_page)
    }

    #[must_use]
    pub const fn next(&self) -> Self {
        Self {
            per_page: self.per_page,
            page: self.page.saturating_add(1),
            is_prev: false,
        }
    }

    /// The previous page; page 0 points at itself.
    #[must_use]
    pub const fn prev(&self) -> Self {
        Self {
            per_page: self.per_page,
            page: self.page.saturating_sub(1),
            is_prev: true,
        }
    }
}

impl fmt::Display for OffsetCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.per_page,
            self.page,
            u8::from(self.is_prev)
        )
    }
}

impl FromStr for OffsetCursor {
    type Err = IssueError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| IssueError::invalid_cursor(s, reason);
        let parts: Vec<&str> = s.trim().split(':').collect();
        let [per_page, page, is_prev] = parts.as_slice() else {
            return Err(invalid("expected per_page:page:is_prev"));
        };
        let per_page: usize = per_page
            .parse()
            .map_err(|_| invalid("per_page is not a number"))?;
        if per_page == 0 {
            return Err(invalid("per_page must be positive"));
        }
        let page: usize = page.parse().map_err(|_| invalid("page is not a number"))?;
        // Offsets are bound as SQLite integers.
        let in_range = page
            .checked_mul(per_page)
            .and_then(|offset| i64::try_from(offset).ok())
            .is_some();
        if !in_range {
            return Err(invalid("page is out of range"));
        }
        let is_prev = match *is_prev {
            "0" | "false" | "False" => false,
            "1" | "true" | "True" => true,
            _ => return Err(invalid("is_prev must be 0 or 1")),
        };
        Ok(Self {
            per_page,
            page,
            is_prev,
        })
    }
}

/// Which side of the boundary a sync page reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Next,
    Prev,
}

/// Keyset position in the `updated_at, id` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    #[serde(rename = "k")]
    pub updated_at: DateTime<Utc>,
    pub id: Uuid,
    #[serde(rename = "d")]
    pub direction: Direction,
}

impl SyncCursor {
    /// Opaque token for this position.
    #[must_use]
    pub fn encode(&self) -> String {
        // A struct of a timestamp, a UUID and an enum always serializes.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// # Errors
    ///
    /// Returns `IssueError::InvalidCursor` if `token` is not a token produced
    /// by [`SyncCursor::encode`].
    pub fn decode(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| IssueError::invalid_cursor(token, format!("not base64: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| IssueError::invalid_cursor(token, format!("malformed payload: {e}")))
    }

    /// True when `(updated_at, id)` lies strictly past this boundary in the
    /// cursor's direction.
    #[must_use]
    pub fn admits(&self, updated_at: &DateTime<Utc>, id: &Uuid) -> bool {
        let key = (updated_at, id);
        let boundary = (&self.updated_at, &self.id);
        match self.direction {
            Direction::Next => key > boundary,
            Direction::Prev => key < boundary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_cursor_text_format() {
        let cursor: OffsetCursor = "25:3:0".parse().unwrap();
        assert_eq!(cursor.offset(), 75);
        assert_eq!(cursor.next().to_string(), "25:4:0");
        assert_eq!(cursor.prev().to_string(), "25:2:1");
        assert_eq!(OffsetCursor::first(10).prev().to_string(), "10:0:1");
    }

    #[test]
    fn offset_cursor_rejects_garbage() {
        for bad in ["", "abc", "10:1", "10:x:0", "0:1:0", "10:1:2", "10:-1:0", "1:2:3:4"] {
            let err = bad.parse::<OffsetCursor>().unwrap_err();
            assert!(matches!(err, IssueError::InvalidCursor { .. }), "{bad}");
        }
    }

    #[test]
    fn offset_cursor_rejects_pages_past_the_integer_range() {
        for bad in ["10:18446744073709551615:0", "2:4611686018427387904:0"] {
            let err = bad.parse::<OffsetCursor>().unwrap_err();
            assert!(matches!(err, IssueError::InvalidCursor { .. }), "{bad}");
        }
        let last: OffsetCursor = format!("1:{}:0", i64::MAX).parse().unwrap();
        assert_eq!(last.next().page, last.page + 1);
        let edge = OffsetCursor {
            per_page: 1,
            page: usize::MAX,
            is_prev: false,
        };
        assert_eq!(edge.next().page, usize::MAX);
    }

    #[test]
    fn sync_cursor_token_is_url_safe() {
        let cursor = SyncCursor {
            updated_at: crate::util::time::parse_timestamp("2024-02-03T04:05:06.123456Z", "t")
                .unwrap(),
            id: Uuid::from_u128(0xfeed),
            direction: Direction::Next,
        };
        let token = cursor.encode();
        assert!(!token.contains(['+', '/', '=']));
        assert_eq!(SyncCursor::decode(&token).unwrap(), cursor);
    }

    #[test]
    fn sync_cursor_rejects_garbage() {
        assert!(matches!(
            SyncCursor::decode("%%%"),
            Err(IssueError::InvalidCursor { .. })
        ));
        let not_json = URL_SAFE_NO_PAD.encode(b"hello");
        assert!(matches!(
            SyncCursor::decode(&not_json),
            Err(IssueError::InvalidCursor { .. })
        ));
    }

    #[test]
    fn admits_is_strict() {
        let at = Utc::now();
        let cursor = SyncCursor {
            updated_at: at,
            id: Uuid::from_u128(5),
            direction: Direction::Next,
        };
        assert!(!cursor.admits(&at, &Uuid::from_u128(5)));
        assert!(cursor.admits(&at, &Uuid::from_u128(6)));
        assert!(!cursor.admits(&at, &Uuid::from_u128(4)));
    }
}
