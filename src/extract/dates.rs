use std::fs::Metadata;
use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;

fn filename_date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\d{4})-(0[1-9]|1[0-2])-([0-2][1-9]|[1-3]0|3[01])$").expect("static regex")
    })
}

/// `YYYY-MM-DD` at the end of the file stem, read as noon UTC so the day
/// survives any timezone shift a viewer applies.
pub fn filename_date(path: &Path) -> Option<DateTime<Utc>> {
    let stem = path.file_stem()?.to_str()?;
    let caps = filename_date_pattern().captures(stem)?;

    let year = caps[1].parse().ok()?;
    let month = caps[2].parse().ok()?;
    let day = caps[3].parse().ok()?;

    Some(NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(12, 0, 0)?.and_utc())
}

/// EXIF dates are `YYYY:MM:DD HH:MM:SS`, but cameras and editing tools also
/// write dashes, a `T` separator, trailing NULs or sub-seconds.
pub fn parse_exif_date(raw: &str) -> Option<DateTime<Utc>> {
    let cleaned: String = raw.replace('\0', "").replace('-', ":").replace('T', " ");
    let cleaned = cleaned.trim();
    let head = cleaned.get(..19)?;
    NaiveDateTime::parse_from_str(head, "%Y:%m:%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn modified(metadata: &Metadata) -> Option<DateTime<Utc>> {
    metadata.modified().ok().map(DateTime::<Utc>::from)
}

pub fn earliest<I>(candidates: I) -> Option<DateTime<Utc>>
where
    I: IntoIterator<Item = Option<DateTime<Utc>>>,
{
    candidates.into_iter().flatten().min()
}
