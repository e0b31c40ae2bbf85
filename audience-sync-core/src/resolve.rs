//! Audience resolution: which custom audiences already exist on the ad account.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tracing::{debug, info};

use crate::contract::{AdsPlatform, AudienceField, AudienceSummary};
use crate::error::SyncError;

/// Audiences created on or before this date are ignored.
pub const DEFAULT_CREATED_AFTER: &str = "2023-07-01";

const LISTED_FIELDS: [AudienceField; 3] = [
    AudienceField::Name,
    AudienceField::Id,
    AudienceField::TimeCreated,
];

/// Parse a `YYYY-MM-DD` date into midnight UTC of that day.
pub fn parse_created_after(date: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")?;
    Ok(day.and_time(NaiveTime::MIN).and_utc())
}

/// Audience name to audience id, for audiences created after a cutoff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudienceIndex {
    ids_by_name: HashMap<String, String>,
}

impl AudienceIndex {
    /// Keep audiences created strictly after `created_after`. On duplicate
    /// names the audience listed last wins.
    pub fn from_audiences<I>(audiences: I, created_after: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = AudienceSummary>,
    {
        let mut index = Self::default();
        for audience in audiences {
            if audience.time_created > created_after {
                index.insert(audience.name, audience.id);
            } else {
                debug!(
                    audience_id = %audience.id,
                    time_created = %audience.time_created,
                    "[RESOLVE] Ignoring audience created before cutoff"
                );
            }
        }
        index
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.ids_by_name.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ids_by_name.contains_key(name)
    }

    pub fn insert(&mut self, name: String, id: String) -> Option<String> {
        self.ids_by_name.insert(name, id)
    }

    pub fn len(&self) -> usize {
        self.ids_by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids_by_name.is_empty()
    }
}

/// Fetch the ad account's audiences and index those created after `created_after`.
pub async fn resolve_existing_audiences<A>(
    ads: &A,
    ad_account_id: &str,
    created_after: DateTime<Utc>,
) -> Result<AudienceIndex, SyncError>
where
    A: AdsPlatform + ?Sized,
{
    let audiences = ads
        .list_custom_audiences(ad_account_id, &LISTED_FIELDS)
        .await
        .map_err(|e| SyncError::ads(format!("list custom audiences of {ad_account_id}"), e))?;
    let listed = audiences.len();

    let index = AudienceIndex::from_audiences(audiences, created_after);
    if index.is_empty() {
        info!(ad_account_id, created_after = %created_after, "[RESOLVE] No reusable audiences");
        return Ok(index);
    }
    info!(
        ad_account_id,
        listed,
        indexed = index.len(),
        created_after = %created_after,
        "[RESOLVE] Indexed existing audiences"
    );
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn audience(id: &str, name: &str, created: DateTime<Utc>) -> AudienceSummary {
        AudienceSummary {
            id: id.to_string(),
            name: name.to_string(),
            time_created: created,
        }
    }

    fn cutoff() -> DateTime<Utc> {
        parse_created_after(DEFAULT_CREATED_AFTER).unwrap()
    }

    #[test]
    fn parses_default_cutoff_as_midnight_utc() {
        assert_eq!(
            cutoff(),
            Utc.with_ymd_and_hms(2023, 7, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn rejects_malformed_cutoff() {
        assert!(parse_created_after("01/07/2023").is_err());
        assert!(parse_created_after("").is_err());
    }

    #[test]
    fn cutoff_is_strict() {
        let at_cutoff = audience("1", "AT CUTOFF O2O", cutoff());
        let one_second_after = audience(
            "2",
            "AFTER O2O",
            Utc.with_ymd_and_hms(2023, 7, 1, 0, 0, 1).unwrap(),
        );
        let before = audience(
            "3",
            "BEFORE O2O",
            Utc.with_ymd_and_hms(2022, 12, 31, 23, 59, 59).unwrap(),
        );

        let index = AudienceIndex::from_audiences(vec![at_cutoff, one_second_after, before], cutoff());

        assert_eq!(index.len(), 1);
        assert_eq!(index.get("AFTER O2O"), Some("2"));
        assert!(!index.contains("AT CUTOFF O2O"));
        assert!(!index.contains("BEFORE O2O"));
    }

    #[test]
    fn only_old_audiences_leave_index_empty() {
        let index = AudienceIndex::from_audiences(
            vec![audience("1", "OLD O2O", cutoff())],
            cutoff(),
        );
        assert!(index.is_empty());
        assert!(!AudienceIndex::from_audiences(
            vec![audience("2", "NEW O2O", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())],
            cutoff(),
        )
        .is_empty());
    }

    #[test]
    fn later_duplicate_name_wins() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let index = AudienceIndex::from_audiences(
            vec![
                audience("10", "DUP O2O", created),
                audience("20", "DUP O2O", created),
            ],
            cutoff(),
        );
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("DUP O2O"), Some("20"));
    }
}
