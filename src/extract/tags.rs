//! EXIF tags relevant to the timeline, and their interpretation.
//!
//! Reading keeps raw values only ([`ExifTags`]); everything that turns them into
//! coordinates, dates and rotations lives in [`interpret`], which is pure and
//! can be tested without image fixtures.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tracing::warn;

use super::dates;
use crate::entry::LocationAttributes;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum ExifValue {
    Text(String),
    Integers(Vec<u32>),
    /// (numerator, denominator) pairs, kept raw so a zero denominator can be
    /// reported instead of silently becoming NaN
    Rationals(Vec<(u32, u32)>),
}

/// Raw tag values keyed by EXIF tag name ("GPSLatitude", "Make", ...)
pub type ExifTags = BTreeMap<String, ExifValue>;

const TAGS: &[(::exif::Tag, &str)] = &[
    (::exif::Tag::Make, "Make"),
    (::exif::Tag::Model, "Model"),
    (::exif::Tag::Orientation, "Orientation"),
    (::exif::Tag::DateTimeOriginal, "DateTimeOriginal"),
    (::exif::Tag::DateTime, "DateTime"),
    (::exif::Tag::GPSLatitude, "GPSLatitude"),
    (::exif::Tag::GPSLatitudeRef, "GPSLatitudeRef"),
    (::exif::Tag::GPSLongitude, "GPSLongitude"),
    (::exif::Tag::GPSLongitudeRef, "GPSLongitudeRef"),
    (::exif::Tag::GPSAltitude, "GPSAltitude"),
    (::exif::Tag::GPSAltitudeRef, "GPSAltitudeRef"),
    (::exif::Tag::GPSImgDirection, "GPSImgDirection"),
    (::exif::Tag::GPSDestBearing, "GPSDestBearing"),
    (::exif::Tag::GPSDateStamp, "GPSDateStamp"),
    (::exif::Tag::GPSTimeStamp, "GPSTimeStamp"),
];

/// Containers the EXIF reader understands. Other images (GIF, BMP) have no
/// EXIF block worth reading.
pub fn has_exif_container(mimetype: &str) -> bool {
    matches!(
        mimetype,
        "image/jpeg" | "image/tiff" | "image/png" | "image/webp" | "image/heic" | "image/heif"
    )
}

pub fn read_exif(path: &Path) -> Result<ExifTags> {
    let file = File::open(path).map_err(|e| Error::file(path, e))?;
    let mut reader = BufReader::new(file);

    let exif = match ::exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        // no EXIF block at all is normal for screenshots and edited images
        Err(::exif::Error::NotFound(_)) => return Ok(ExifTags::new()),
        Err(e) => {
            return Err(Error::Exif {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let mut tags = ExifTags::new();
    for field in exif.fields() {
        if field.ifd_num != ::exif::In::PRIMARY {
            continue;
        }
        let Some((_, name)) = TAGS.iter().find(|(tag, _)| *tag == field.tag) else {
            continue;
        };
        if let Some(value) = convert(&field.value) {
            tags.insert((*name).to_string(), value);
        }
    }

    Ok(tags)
}

fn convert(value: &::exif::Value) -> Option<ExifValue> {
    use ::exif::Value;

    match value {
        Value::Ascii(parts) => {
            let text = parts
                .iter()
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .collect::<Vec<_>>()
                .join(" ");
            Some(ExifValue::Text(text))
        }
        Value::Byte(v) => Some(ExifValue::Integers(v.iter().map(|b| u32::from(*b)).collect())),
        Value::Short(v) => Some(ExifValue::Integers(v.iter().map(|s| u32::from(*s)).collect())),
        Value::Long(v) => Some(ExifValue::Integers(v.clone())),
        Value::Rational(v) => Some(ExifValue::Rationals(v.iter().map(|r| (r.num, r.denom)).collect())),
        _ => None,
    }
}

/// What the timeline keeps from an image's EXIF block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExifMetadata {
    /// "Make Model"
    pub camera: Option<String>,
    pub location: Option<LocationAttributes>,
    /// Clockwise degrees
    pub orientation: Option<u16>,
    pub creation_date: Option<DateTime<Utc>>,
}

pub fn interpret(tags: &ExifTags) -> ExifMetadata {
    let mut location = LocationAttributes::default();

    if let Some(dms) = rationals(tags, "GPSLatitude") {
        match dms_to_decimal(dms, text(tags, "GPSLatitudeRef")) {
            Some(lat) => location.latitude = Some(lat),
            None => warn!(value = ?dms, "skipping unreadable GPSLatitude"),
        }
    }
    if let Some(dms) = rationals(tags, "GPSLongitude") {
        match dms_to_decimal(dms, text(tags, "GPSLongitudeRef")) {
            Some(lon) => location.longitude = Some(lon),
            None => warn!(value = ?dms, "skipping unreadable GPSLongitude"),
        }
    }
    if let Some(altitude) = single_rational(tags, "GPSAltitude") {
        // ref 1 means below sea level
        let below = integer(tags, "GPSAltitudeRef").is_some_and(|r| r != 0);
        location.altitude = Some(if below { -altitude } else { altitude });
    }
    location.direction = single_rational(tags, "GPSImgDirection");
    location.bearing = single_rational(tags, "GPSDestBearing");

    ExifMetadata {
        camera: camera(tags),
        location: (!location.is_empty()).then_some(location),
        orientation: integer(tags, "Orientation").and_then(orientation_degrees),
        creation_date: gps_date(tags)
            .or_else(|| text(tags, "DateTimeOriginal").and_then(dates::parse_exif_date))
            .or_else(|| text(tags, "DateTime").and_then(dates::parse_exif_date)),
    }
}

/// Degrees/minutes/seconds to signed decimal degrees, rounded to 5 places.
/// `None` when any component has a zero denominator.
pub fn dms_to_decimal(dms: &[(u32, u32)], reference: Option<&str>) -> Option<f64> {
    let mut parts = [0.0f64; 3];
    for (slot, &(num, denom)) in parts.iter_mut().zip(dms.iter()) {
        if denom == 0 {
            return None;
        }
        *slot = f64::from(num) / f64::from(denom);
    }

    let decimal = parts[0] + parts[1] / 60.0 + parts[2] / 3600.0;
    if decimal.is_nan() {
        return None;
    }

    let decimal = (decimal * 100_000.0).round() / 100_000.0;
    match reference.map(str::trim) {
        Some("S") | Some("W") => Some(-decimal),
        _ => Some(decimal),
    }
}

/// EXIF orientation code to clockwise rotation. Mirrored variants have no
/// rotation we can express and map to `None`.
pub fn orientation_degrees(code: u32) -> Option<u16> {
    match code {
        0 | 1 => Some(0),
        3 => Some(180),
        6 => Some(270),
        8 => Some(90),
        _ => None,
    }
}

fn camera(tags: &ExifTags) -> Option<String> {
    let make = text(tags, "Make").unwrap_or("");
    let model = text(tags, "Model").unwrap_or("");
    let camera = format!("{make} {model}").replace('\0', "");
    let camera = camera.trim();
    (!camera.is_empty()).then(|| camera.to_string())
}

fn gps_date(tags: &ExifTags) -> Option<DateTime<Utc>> {
    let stamp = text(tags, "GPSDateStamp")?;
    let date = NaiveDate::parse_from_str(stamp.trim_matches('\0').trim(), "%Y:%m:%d").ok()?;

    let hms = rationals(tags, "GPSTimeStamp")?;
    if hms.len() < 3 || hms.iter().any(|&(_, d)| d == 0) {
        return None;
    }
    let time = NaiveTime::from_hms_opt(hms[0].0 / hms[0].1, hms[1].0 / hms[1].1, hms[2].0 / hms[2].1)?;

    Some(date.and_time(time).and_utc())
}

fn text<'a>(tags: &'a ExifTags, name: &str) -> Option<&'a str> {
    match tags.get(name) {
        Some(ExifValue::Text(s)) => Some(s.as_str()),
        _ => None,
    }
}

fn integer(tags: &ExifTags, name: &str) -> Option<u32> {
    match tags.get(name) {
        Some(ExifValue::Integers(v)) => v.first().copied(),
        _ => None,
    }
}

fn rationals<'a>(tags: &'a ExifTags, name: &str) -> Option<&'a [(u32, u32)]> {
    match tags.get(name) {
        Some(ExifValue::Rationals(v)) if !v.is_empty() => Some(v.as_slice()),
        _ => None,
    }
}

fn single_rational(tags: &ExifTags, name: &str) -> Option<f64> {
    let &(num, denom) = rationals(tags, name)?.first()?;
    if denom == 0 {
        warn!(tag = name, "skipping {name} with zero denominator");
        return None;
    }
    Some(f64::from(num) / f64::from(denom))
}
