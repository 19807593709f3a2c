use crate::config::CacheConfig;
use crate::db;
use crate::schema::BillDetail;
use anyhow::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;

/// Cached detail snapshot. Replaced wholesale on refetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub bill_detail: BillDetail,
    pub timestamp: i64, // epoch millis at write time
}

impl CacheEntry {
    pub fn is_fresh(&self, now_ms: i64, ttl_ms: i64) -> bool {
        now_ms
            .checked_sub(self.timestamp)
            .is_some_and(|age| age < ttl_ms)
    }
}

pub fn epoch_ms(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

/// The cached detail for `key` if present, well-formed and younger than the TTL.
pub fn read_fresh(
    conn: &Connection,
    config: &CacheConfig,
    key: &str,
    now: OffsetDateTime,
) -> Result<Option<BillDetail>> {
    let Some(raw) = db::get_document(conn, &config.collection, key)? else {
        return Ok(None);
    };

    let entry: CacheEntry = match serde_json::from_value(raw) {
        Ok(entry) => entry,
        Err(err) => {
            warn!("ignoring unreadable cache entry {key}: {err}");
            return Ok(None);
        }
    };

    if entry.is_fresh(epoch_ms(now), config.ttl_ms()) {
        Ok(Some(entry.bill_detail))
    } else {
        Ok(None)
    }
}

pub fn write(
    conn: &Connection,
    config: &CacheConfig,
    key: &str,
    detail: &BillDetail,
    now: OffsetDateTime,
) -> Result<()> {
    let entry = CacheEntry {
        bill_detail: detail.clone(),
        timestamp: epoch_ms(now),
    };
    db::put_document(conn, &config.collection, key, &serde_json::to_value(&entry)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BillMeta, LastAction};
    use serde_json::json;
    use time::Duration;
    use time::macros::datetime;

    fn detail(title: &str) -> BillDetail {
        BillDetail {
            text_html: String::new(),
            text_plain: "text".to_string(),
            meta: BillMeta {
                identifier: "HR 1".to_string(),
                congress: "118th Congress".to_string(),
                title: title.to_string(),
                status: "Introduced".to_string(),
                sponsor: "N/A".to_string(),
                sponsor_party: "N/A".to_string(),
                sponsor_state: "N/A".to_string(),
                sponsor_district: "N/A".to_string(),
                introduced_date: "2023-01-03".to_string(),
                last_action: LastAction {
                    date: "N/A".to_string(),
                    description: "No recent action".to_string(),
                },
                key_text: "text".to_string(),
            },
            amendment_list: Vec::new(),
        }
    }

    #[test]
    fn entry_expires_after_ttl() {
        let conn = db::open_in_memory().unwrap();
        let config = CacheConfig::default();
        let written = datetime!(2024-03-01 12:00 UTC);
        write(&conn, &config, "118-hr-1", &detail("first"), written).unwrap();

        let almost = written + Duration::hours(23) + Duration::minutes(59);
        assert!(read_fresh(&conn, &config, "118-hr-1", almost).unwrap().is_some());

        let expired = written + Duration::hours(24);
        assert!(read_fresh(&conn, &config, "118-hr-1", expired).unwrap().is_none());
    }

    #[test]
    fn rewrite_replaces_snapshot() {
        let conn = db::open_in_memory().unwrap();
        let config = CacheConfig::default();
        let now = datetime!(2024-03-01 12:00 UTC);
        write(&conn, &config, "k", &detail("first"), now).unwrap();
        write(&conn, &config, "k", &detail("second"), now).unwrap();

        let cached = read_fresh(&conn, &config, "k", now).unwrap().unwrap();
        assert_eq!(cached.meta.title, "second");
    }

    #[test]
    fn extreme_timestamps_are_stale() {
        let mut entry = CacheEntry {
            bill_detail: detail("x"),
            timestamp: i64::MIN,
        };
        assert!(!entry.is_fresh(1_700_000_000_000, 86_400_000));

        entry.timestamp = i64::MAX;
        assert!(!entry.is_fresh(i64::MIN, 86_400_000));
    }

    #[test]
    fn malformed_entry_is_a_miss() {
        let conn = db::open_in_memory().unwrap();
        let config = CacheConfig::default();
        db::put_document(&conn, &config.collection, "k", &json!({"timestamp": 1})).unwrap();
        let now = datetime!(2024-03-01 12:00 UTC);
        assert!(read_fresh(&conn, &config, "k", now).unwrap().is_none());
    }
}
