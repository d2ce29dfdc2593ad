use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{parse_timestamp, BlobRecord, LogicalFile};

/// Share token model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ShareToken {
    pub id: String,
    pub logical_file_id: String,
    pub token: String,
    pub is_active: bool,
    pub expires_at: Option<String>,
    pub max_downloads: Option<i64>,
    pub download_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Lifecycle state of a share, always derived from the stored fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareState {
    Active,
    Expired,
    Exhausted,
    Disabled,
}

impl ShareToken {
    /// Compute the share's state at `now`.
    ///
    /// Disabled wins over everything, then expiry, then the download limit.
    /// An unreadable expiry is treated as already expired.
    pub fn state_at(&self, now: DateTime<Utc>) -> ShareState {
        if !self.is_active {
            return ShareState::Disabled;
        }
        if let Some(expires_at) = &self.expires_at {
            match parse_timestamp(expires_at) {
                Some(expiry) if now < expiry => {}
                _ => return ShareState::Expired,
            }
        }
        if let Some(max) = self.max_downloads {
            if self.download_count >= max {
                return ShareState::Exhausted;
            }
        }
        ShareState::Active
    }

    pub fn state(&self) -> ShareState {
        self.state_at(Utc::now())
    }
}

/// One successful retrieval through a share token
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DownloadEvent {
    pub id: String,
    pub share_token_id: String,
    pub client_address: Option<String>,
    pub client_agent: Option<String>,
    pub occurred_at: String,
}

/// Request to create a share
#[derive(Debug, Deserialize)]
pub struct CreateShareRequest {
    pub file_id: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_downloads: Option<i64>,
}

/// Owner update of an existing share; absent fields stay unchanged
#[derive(Debug, Default, Deserialize)]
pub struct UpdateShareRequest {
    pub is_active: Option<bool>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_downloads: Option<i64>,
}

/// Public share info (safe to return to anyone with the token)
#[derive(Debug, Serialize)]
pub struct PublicShareInfo {
    pub token: String,
    pub file_name: String,
    pub file_size: i64,
    pub mime_type: String,
    pub expires_at: Option<String>,
    pub downloads_remaining: Option<i64>,
    pub created_at: String,
}

impl PublicShareInfo {
    pub fn new(share: &ShareToken, file: &LogicalFile) -> Self {
        Self {
            token: share.token.clone(),
            file_name: file.display_name.clone(),
            file_size: file.size_bytes,
            mime_type: file.media_type.clone(),
            expires_at: share.expires_at.clone(),
            downloads_remaining: share
                .max_downloads
                .map(|max| (max - share.download_count).max(0)),
            created_at: share.created_at.clone(),
        }
    }
}

/// Share item for listing (includes file name and computed state)
#[derive(Debug, Serialize)]
pub struct ShareListItem {
    #[serde(flatten)]
    pub share: ShareToken,
    pub file_name: String,
    pub state: ShareState,
}

/// A token that resolved to an active share
#[derive(Debug, Clone)]
pub struct ResolvedShare {
    pub share: ShareToken,
    pub file: LogicalFile,
    pub blob: BlobRecord,
}

/// Who is retrieving through a share
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub address: Option<String>,
    pub agent: Option<String>,
}

/// Bookkeeping that failed after the bytes were already fetched.
/// The download still goes out; the failure is reported, not swallowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeWarning {
    CountNotRecorded(String),
    EventNotRecorded(String),
}

/// Bytes and framing metadata for one share download
#[derive(Debug)]
pub struct ShareDownload {
    pub data: Bytes,
    pub file_name: String,
    pub media_type: String,
    pub size_bytes: i64,
    pub warnings: Vec<ConsumeWarning>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::format_timestamp;
    use chrono::Duration;

    fn share() -> ShareToken {
        ShareToken {
            id: "s1".to_string(),
            logical_file_id: "f1".to_string(),
            token: "tok".to_string(),
            is_active: true,
            expires_at: None,
            max_downloads: None,
            download_count: 0,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_unbounded_share_is_active() {
        assert_eq!(share().state_at(Utc::now()), ShareState::Active);
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let mut s = share();
        s.expires_at = Some(format_timestamp(now));
        assert_eq!(s.state_at(now), ShareState::Expired);
        assert_eq!(s.state_at(now - Duration::seconds(1)), ShareState::Active);
    }

    #[test]
    fn test_exhausted() {
        let mut s = share();
        s.max_downloads = Some(2);
        s.download_count = 1;
        assert_eq!(s.state_at(Utc::now()), ShareState::Active);
        s.download_count = 2;
        assert_eq!(s.state_at(Utc::now()), ShareState::Exhausted);
    }

    #[test]
    fn test_disabled_takes_precedence() {
        let mut s = share();
        s.is_active = false;
        s.max_downloads = Some(1);
        s.download_count = 5;
        s.expires_at = Some(format_timestamp(Utc::now() - Duration::days(1)));
        assert_eq!(s.state_at(Utc::now()), ShareState::Disabled);
    }

    #[test]
    fn test_expired_with_downloads_left() {
        let mut s = share();
        s.max_downloads = Some(10);
        s.download_count = 1;
        s.expires_at = Some(format_timestamp(Utc::now() - Duration::minutes(5)));
        assert_eq!(s.state_at(Utc::now()), ShareState::Expired);
    }

    #[test]
    fn test_unparseable_expiry_fails_closed() {
        let mut s = share();
        s.expires_at = Some("tomorrow".to_string());
        assert_eq!(s.state_at(Utc::now()), ShareState::Expired);
    }

    #[test]
    fn test_list_item_serializes_flat() {
        let mut s = share();
        s.max_downloads = Some(1);
        s.download_count = 1;
        let item = ShareListItem {
            state: s.state_at(Utc::now()),
            share: s,
            file_name: "a.txt".to_string(),
        };
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["token"], "tok");
        assert_eq!(value["file_name"], "a.txt");
        assert_eq!(value["state"], "exhausted");
    }
}
