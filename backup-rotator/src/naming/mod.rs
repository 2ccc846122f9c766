//! Backup name templates.
//!
//! A template is a file name containing exactly one `[DATE]` placeholder,
//! e.g. `app-db-[DATE].sql.gz`. Concrete names replace the placeholder with
//! the zero-padded `YYYYMMDD` date, which is how every backup record gets
//! its date back when the storage is scanned.

use crate::retention::{BackupRecord, Generation};
use crate::utils::errors::{Result, RotatorError};
use chrono::NaiveDate;
use regex::Regex;
use std::fmt;

/// Placeholder substituted with the backup date.
pub const DATE_TOKEN: &str = "[DATE]";

/// Separator used for local sub-folders and remote key prefixes alike.
pub const SEPARATOR: char = '/';

/// A validated name template with its compiled matcher.
#[derive(Debug, Clone)]
pub struct NameFormat {
    template: String,
    pattern: Regex,
}

impl NameFormat {
    /// Parse a template. It must contain `[DATE]` exactly once.
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();

        let occurrences = template.matches(DATE_TOKEN).count();
        if occurrences != 1 {
            return Err(RotatorError::Configuration(format!(
                "name format {:?} must contain {} exactly once (found {})",
                template, DATE_TOKEN, occurrences
            )));
        }

        let pattern = to_regex(&template)?;
        Ok(Self { template, pattern })
    }

    /// The raw template string.
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Append a file extension, e.g. `tar.gz`.
    pub fn with_extension(&self, extension: &str) -> Result<Self> {
        Self::new(format!("{}.{}", self.template, extension))
    }

    /// The same template nested under a key prefix, used to match full object keys.
    pub fn prefixed(&self, prefix: &str) -> Result<Self> {
        Self::new(join_segments(&[prefix, self.template.as_str()]))
    }

    /// Anchored matcher for concrete names produced by this template.
    pub fn regex(&self) -> &Regex {
        &self.pattern
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.pattern.is_match(name)
    }

    /// Substitute the placeholder with `YYYYMMDD`.
    pub fn to_concrete_name(&self, date: NaiveDate) -> String {
        self.template
            .replacen(DATE_TOKEN, &date.format("%Y%m%d").to_string(), 1)
    }

    /// Parse the date embedded in a concrete name.
    pub fn parse_date(&self, name: &str) -> Result<NaiveDate> {
        let malformed = || RotatorError::MalformedName {
            format: self.template.clone(),
            name: name.to_string(),
        };

        let captures = self.pattern.captures(name).ok_or_else(malformed)?;
        let field = |i: usize| -> Result<u32> {
            captures
                .get(i)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .ok_or_else(malformed)
        };

        let year = field(1)? as i32;
        let (month, day) = (field(2)?, field(3)?);

        NaiveDate::from_ymd_opt(year, month, day).ok_or_else(malformed)
    }

    /// Turn a raw file or object name found under `container` into a record.
    ///
    /// Callers filter with [`NameFormat::is_match`] first, so a failure here
    /// means the name embeds an impossible date such as `20190231`.
    pub fn decode(
        &self,
        generation: Generation,
        container: &str,
        raw_name: &str,
    ) -> Result<BackupRecord> {
        let date = self.parse_date(raw_name)?;
        Ok(BackupRecord::new(generation, container, raw_name, date))
    }
}

impl fmt::Display for NameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

/// Build the anchored pattern for a template: literal text around the token,
/// eight digits captured as year, month and day in place of it.
pub fn to_regex(template: &str) -> Result<Regex> {
    let (before, after) = template.split_once(DATE_TOKEN).ok_or_else(|| {
        RotatorError::Configuration(format!(
            "name format {:?} does not contain {}",
            template, DATE_TOKEN
        ))
    })?;

    let source = format!(
        "^{}([0-9]{{4}})([0-9]{{2}})([0-9]{{2}}){}$",
        regex::escape(before),
        regex::escape(after)
    );

    Regex::new(&source).map_err(|e| RotatorError::Configuration(e.to_string()))
}

/// Join path-like segments with exactly one separator between neighbours.
///
/// Trailing separators are dropped from all but the last segment and leading
/// separators from all but the first, so `("db/", "/daily")` and
/// `("db", "daily")` both give `db/daily`. A lone segment is returned as is.
pub fn join_segments<S: AsRef<str>>(segments: &[S]) -> String {
    if segments.len() == 1 {
        return segments[0].as_ref().to_string();
    }

    let last = segments.len().saturating_sub(1);
    let mut joined = String::new();

    for (i, segment) in segments.iter().enumerate() {
        let mut segment = segment.as_ref();
        if i != last {
            segment = segment.trim_end_matches(SEPARATOR);
        }
        if i != 0 {
            segment = segment.trim_start_matches(SEPARATOR);
            joined.push(SEPARATOR);
        }
        joined.push_str(segment);
    }

    joined
}
