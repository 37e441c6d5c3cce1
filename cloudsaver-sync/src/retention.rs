//! Autosave retention ladder.
//!
//! Retained = the last `keep_last` autosaves, plus the latest autosave of each
//! of the last `keep_hourly` hours not already retained, plus the latest of
//! each of the last `keep_daily` days not already retained. Everything else is
//! deleted from the save directory.
//!
//! Only the daily representatives of days before today (at most
//! `sync_daily` of them) are mirrored to the fragment store. Hour and day
//! buckets use the wall-clock time the autosave was taken in.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, FixedOffset, Local, NaiveDate, Timelike};

use cloudsaver_core::{AutosaveKind, Fingerprint, SaveName, Settings};

/// One autosave and when it was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutosaveRecord {
    pub name: SaveName,
    pub timestamp: DateTime<FixedOffset>,
}

/// Decision for one set of autosaves.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetentionPlan {
    pub retain: BTreeSet<SaveName>,
    /// Oldest first.
    pub delete: Vec<SaveName>,
    /// Subset of `retain` mirrored to the fragment store.
    pub sync: BTreeSet<SaveName>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_last: usize,
    pub keep_hourly: usize,
    pub keep_daily: usize,
    pub sync_daily: usize,
}

impl RetentionPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            keep_last: settings.keep_last,
            keep_hourly: settings.keep_hourly,
            keep_daily: settings.keep_daily,
            sync_daily: settings.sync_daily,
        }
    }

    pub fn plan(&self, records: &[AutosaveRecord], today: NaiveDate) -> RetentionPlan {
        let mut sorted = records.to_vec();
        sorted.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.name.cmp(&b.name))
        });

        let hourly = latest_per_bucket(&sorted, |r| {
            let local = r.timestamp.naive_local();
            (local.date(), local.hour())
        });
        let daily = latest_per_bucket(&sorted, |r| r.timestamp.naive_local().date());

        let newest = sorted.len().saturating_sub(self.keep_last)..sorted.len();
        let mut retained: BTreeSet<usize> = newest.collect();
        take_latest(&hourly, self.keep_hourly, &mut retained);
        take_latest(&daily, self.keep_daily, &mut retained);

        let sync = daily
            .iter()
            .rev()
            .filter(|&&i| {
                sorted[i].timestamp.naive_local().date() < today && retained.contains(&i)
            })
            .take(self.sync_daily)
            .map(|&i| sorted[i].name.clone())
            .collect();

        let mut plan = RetentionPlan {
            sync,
            ..RetentionPlan::default()
        };
        for (i, record) in sorted.into_iter().enumerate() {
            if retained.contains(&i) {
                plan.retain.insert(record.name);
            } else {
                plan.delete.push(record.name);
            }
        }
        plan
    }
}

/// Index of the latest record in each bucket, in chronological order.
fn latest_per_bucket<K: Ord>(
    sorted: &[AutosaveRecord],
    key: impl Fn(&AutosaveRecord) -> K,
) -> Vec<usize> {
    let mut latest = BTreeMap::new();
    for (i, record) in sorted.iter().enumerate() {
        latest.insert(key(record), i);
    }
    let mut indices: Vec<usize> = latest.into_values().collect();
    indices.sort_unstable();
    indices
}

/// Retain up to `n` of the newest `candidates` not already retained.
fn take_latest(candidates: &[usize], n: usize, retained: &mut BTreeSet<usize>) {
    let fresh: Vec<usize> = candidates
        .iter()
        .rev()
        .filter(|&&i| !retained.contains(&i))
        .take(n)
        .copied()
        .collect();
    retained.extend(fresh);
}

/// Autosave records for the saves in a scan; saves without an embedded
/// timestamp fall back to their mtime in local time.
pub fn autosave_records(
    saves: &BTreeMap<SaveName, Fingerprint>,
    prefix: &str,
) -> Vec<AutosaveRecord> {
    saves
        .iter()
        .filter_map(|(name, fingerprint)| {
            let timestamp = match AutosaveKind::classify(name, prefix)? {
                AutosaveKind::Stamped(timestamp) => timestamp,
                AutosaveKind::Numbered(_) | AutosaveKind::Unstamped => {
                    DateTime::<Local>::from(fingerprint.mtime).fixed_offset()
                }
            };
            Some(AutosaveRecord {
                name: name.clone(),
                timestamp,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn record(name: &str, y: i32, m: u32, d: u32, h: u32, min: u32) -> AutosaveRecord {
        AutosaveRecord {
            name: SaveName::from(name),
            timestamp: utc().with_ymd_and_hms(y, m, d, h, min, 0).unwrap(),
        }
    }

    fn policy(
        keep_last: usize,
        keep_hourly: usize,
        keep_daily: usize,
        sync_daily: usize,
    ) -> RetentionPolicy {
        RetentionPolicy {
            keep_last,
            keep_hourly,
            keep_daily,
            sync_daily,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    #[test]
    fn keep_last_retains_newest_records() {
        let records = vec![
            record("a", 2026, 10, 18, 10, 0),
            record("b", 2026, 10, 18, 10, 5),
            record("c", 2026, 10, 18, 10, 10),
        ];
        let plan = policy(2, 0, 0, 0).plan(&records, today());
        assert_eq!(plan.delete, vec![SaveName::from("a")]);
        assert!(plan.retain.contains(&SaveName::from("c")));
    }

    #[test]
    fn hourly_representative_is_latest_in_hour() {
        let records = vec![
            record("h9a", 2026, 10, 18, 9, 0),
            record("h9b", 2026, 10, 18, 9, 30),
            record("h10", 2026, 10, 18, 10, 0),
        ];
        let plan = policy(1, 1, 0, 0).plan(&records, today());
        let retained: Vec<&str> = plan.retain.iter().map(SaveName::as_str).collect();
        assert_eq!(retained, vec!["h10", "h9b"]);
        assert_eq!(plan.delete, vec![SaveName::from("h9a")]);
    }

    #[test]
    fn windows_do_not_double_count() {
        // One record per hour for two days: keep_last already covers the
        // newest hourly representative, so keep_hourly reaches further back.
        let base = utc().with_ymd_and_hms(2026, 10, 16, 0, 30, 0).unwrap();
        let records: Vec<AutosaveRecord> = (0..48)
            .map(|h| AutosaveRecord {
                name: SaveName(format!("s{h:02}")),
                timestamp: base + Duration::hours(h),
            })
            .collect();
        let plan = policy(2, 3, 0, 0).plan(&records, today());
        let retained: Vec<&str> = plan.retain.iter().map(SaveName::as_str).collect();
        assert_eq!(retained, vec!["s43", "s44", "s45", "s46", "s47"]);
    }

    #[test]
    fn sync_set_skips_today_and_is_capped() {
        let records = vec![
            record("d14", 2026, 10, 14, 20, 0),
            record("d15", 2026, 10, 15, 20, 0),
            record("d16a", 2026, 10, 16, 8, 0),
            record("d16b", 2026, 10, 16, 21, 0),
            record("d17", 2026, 10, 17, 20, 0),
            record("d18", 2026, 10, 18, 9, 0),
        ];
        let plan = policy(1, 0, 10, 2).plan(&records, today());
        let synced: Vec<&str> = plan.sync.iter().map(SaveName::as_str).collect();
        assert_eq!(synced, vec!["d16b", "d17"]);
        assert!(plan.retain.contains(&SaveName::from("d18")));
        assert_eq!(plan.delete, vec![SaveName::from("d16a")]);
    }

    #[test]
    fn empty_input_is_empty_plan() {
        assert_eq!(policy(5, 5, 5, 5).plan(&[], today()), RetentionPlan::default());
    }

    #[test]
    fn records_use_embedded_stamp_or_mtime() {
        let mut saves = BTreeMap::new();
        let mtime = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_760_000_000);
        saves.insert(
            SaveName::from("_autosave-20261018T142530+0200"),
            Fingerprint { size: 1, mtime },
        );
        saves.insert(SaveName::from("_autosave2"), Fingerprint { size: 1, mtime });
        saves.insert(SaveName::from("base"), Fingerprint { size: 1, mtime });

        let records = autosave_records(&saves, "_autosave");
        assert_eq!(records.len(), 2);
        let stamped = records
            .iter()
            .find(|r| r.name.as_str().starts_with("_autosave-"))
            .unwrap();
        assert_eq!(stamped.timestamp.naive_local().to_string(), "2026-10-18 14:25:30");
        let numbered = records.iter().find(|r| r.name.as_str() == "_autosave2").unwrap();
        assert_eq!(numbered.timestamp.timestamp(), 1_760_000_000);
    }
}
