//! Grandfather-father-son retention decisions.
//!
//! Everything here is pure: the local and remote engines feed in the records
//! they found and perform whatever copies and deletes the decisions call for.
//! Record collections are always ordered youngest first.

use crate::naming::join_segments;
use chrono::{Days, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Age after which the youngest weekly backup is replaced.
pub const WEEKLY_PROMOTION_DAYS: u64 = 7;

/// Age after which the youngest monthly backup is replaced.
pub const MONTHLY_PROMOTION_DAYS: u64 = 30;

/// Retention tier. Also the literal name of its folder or key segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Generation {
    Daily,
    Weekly,
    Monthly,
}

impl Generation {
    pub const ALL: [Generation; 3] = [Generation::Daily, Generation::Weekly, Generation::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Generation::Daily => "daily",
            Generation::Weekly => "weekly",
            Generation::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A backup file on disk or an object in the bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    /// Base name, without folder or key prefix
    pub name: String,

    /// Absolute local path, or full object key
    pub location: String,

    /// Generation folder, or generation key prefix
    pub container: String,

    /// Date embedded in the name
    pub date: NaiveDate,

    pub generation: Generation,
}

impl BackupRecord {
    pub fn new(generation: Generation, container: &str, name: &str, date: NaiveDate) -> Self {
        Self {
            name: name.to_string(),
            location: join_segments(&[container, name]),
            container: container.to_string(),
            date,
            generation,
        }
    }

    /// The record a copy of this backup would have in another generation.
    pub fn promoted(&self, generation: Generation, container: &str) -> Self {
        Self::new(generation, container, &self.name, self.date)
    }
}

/// How many backups each generation keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionCounts {
    pub daily: usize,
    pub weekly: usize,
    pub monthly: usize,
}

impl RetentionCounts {
    pub fn quota(&self, generation: Generation) -> usize {
        match generation {
            Generation::Daily => self.daily,
            Generation::Weekly => self.weekly,
            Generation::Monthly => self.monthly,
        }
    }
}

/// "Today", fixed once at the start of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RunAnchor(NaiveDate);

impl RunAnchor {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// The local calendar date right now.
    pub fn today() -> Self {
        Self(Local::now().date_naive())
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    pub fn days_ago(&self, days: u64) -> NaiveDate {
        self.0.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN)
    }
}

impl fmt::Display for RunAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The daily record to copy into each older generation, if any.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Promotions<'a> {
    pub weekly: Option<&'a BackupRecord>,
    pub monthly: Option<&'a BackupRecord>,
}

impl Promotions<'_> {
    pub fn is_empty(&self) -> bool {
        self.weekly.is_none() && self.monthly.is_none()
    }
}

/// Stable sort, youngest first.
pub fn sort_youngest_first(records: &mut [BackupRecord]) {
    records.sort_by(|a, b| b.date.cmp(&a.date));
}

/// Youngest record of a generation in a youngest-first collection.
pub fn youngest(records: &[BackupRecord], generation: Generation) -> Option<&BackupRecord> {
    records.iter().find(|r| r.generation == generation)
}

/// Number of records per generation, in `Generation::ALL` order.
pub fn count_by_generation(records: &[BackupRecord]) -> [usize; 3] {
    let mut counts = [0; 3];
    for record in records {
        counts[generation_index(record.generation)] += 1;
    }
    counts
}

/// A new daily backup is due unless one already exists for the anchor date.
pub fn is_due_today(anchor: RunAnchor, records: &[BackupRecord]) -> bool {
    match youngest(records, Generation::Daily) {
        None => true,
        Some(daily) => daily.date < anchor.date(),
    }
}

/// Decide which generations need the youngest daily backup copied in.
///
/// Both targets use the same source. A generation is stale once its youngest
/// record is at least 7 (weekly) or 30 (monthly) days older than the anchor.
/// At most one promotion per generation is returned; missed periods are not
/// caught up.
pub fn promotions<'a>(
    anchor: RunAnchor,
    counts: &RetentionCounts,
    records: &'a [BackupRecord],
) -> Promotions<'a> {
    let youngest_daily = match youngest(records, Generation::Daily) {
        Some(daily) if counts.weekly != 0 && counts.monthly != 0 => daily,
        _ => return Promotions::default(),
    };

    let stale = |generation: Generation, days: u64| match youngest(records, generation) {
        None => true,
        Some(record) => record.date <= anchor.days_ago(days),
    };

    let need_weekly = counts.weekly != 0 && stale(Generation::Weekly, WEEKLY_PROMOTION_DAYS);
    let need_monthly = counts.monthly != 0 && stale(Generation::Monthly, MONTHLY_PROMOTION_DAYS);

    Promotions {
        weekly: need_weekly.then_some(youngest_daily),
        monthly: need_monthly.then_some(youngest_daily),
    }
}

/// For each record, whether it falls beyond its generation's quota.
fn expired_mask(counts: &RetentionCounts, records: &[BackupRecord]) -> Vec<bool> {
    let mut seen = [0usize; 3];

    records
        .iter()
        .map(|record| {
            let slot = &mut seen[generation_index(record.generation)];
            *slot += 1;
            *slot > counts.quota(record.generation)
        })
        .collect()
}

/// Records beyond quota: the oldest surplus of each generation, independently.
pub fn expired<'a>(counts: &RetentionCounts, records: &'a [BackupRecord]) -> Vec<&'a BackupRecord> {
    records
        .iter()
        .zip(expired_mask(counts, records))
        .filter_map(|(record, expired)| expired.then_some(record))
        .collect()
}

/// Split into `(kept, expired)`, both still youngest first.
pub fn split_expired(
    counts: &RetentionCounts,
    records: Vec<BackupRecord>,
) -> (Vec<BackupRecord>, Vec<BackupRecord>) {
    let mask = expired_mask(counts, &records);
    let mut kept = Vec::with_capacity(records.len());
    let mut expired = Vec::new();

    for (record, is_expired) in records.into_iter().zip(mask) {
        if is_expired {
            expired.push(record);
        } else {
            kept.push(record);
        }
    }

    (kept, expired)
}

fn generation_index(generation: Generation) -> usize {
    match generation {
        Generation::Daily => 0,
        Generation::Weekly => 1,
        Generation::Monthly => 2,
    }
}
