//! Timeline entries.
//!
//! An entry is one point on the timeline: a file from a backup, a location
//! fix, a post from an archive. Attributes are a tagged union keyed by schema
//! family, checked once in [`Entry::new`] rather than by every reader.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Format of `backup_date` and every other date stored as text
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub fn format_date(date: &DateTime<Utc>) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc)))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub schema: String,
    pub source: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(with = "timeline_date")]
    pub date_on_timeline: DateTime<Utc>,
    pub attributes: Attributes,
}

impl Entry {
    pub fn new(
        schema: impl Into<String>,
        source: impl Into<String>,
        title: impl Into<String>,
        date_on_timeline: DateTime<Utc>,
        attributes: Attributes,
    ) -> Result<Self> {
        let entry = Entry {
            id: None,
            schema: schema.into(),
            source: source.into(),
            title: title.into(),
            description: String::new(),
            date_on_timeline,
            attributes,
        };
        entry.validate()?;
        Ok(entry)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Reject schema/attribute combinations that readers would trip over.
    pub fn validate(&self) -> Result<()> {
        if self.schema.is_empty() {
            return Err(Error::InvalidEntry("schema must not be empty".into()));
        }
        if self.source.is_empty() {
            return Err(Error::InvalidEntry(format!("{} entry has no source", self.schema)));
        }

        let file_schema = is_file_schema(&self.schema);
        match &self.attributes {
            Attributes::File(attrs) => {
                if !file_schema {
                    return Err(Error::InvalidEntry(format!(
                        "file attributes on non-file schema '{}'",
                        self.schema
                    )));
                }
                if attrs.file.checksum.is_empty() {
                    return Err(Error::InvalidEntry(format!(
                        "file entry {} has no checksum",
                        attrs.file.path.display()
                    )));
                }
            }
            Attributes::Location(_) if !self.schema.starts_with("activity.location") => {
                return Err(Error::InvalidEntry(format!(
                    "location attributes on schema '{}'",
                    self.schema
                )));
            }
            _ if file_schema => {
                return Err(Error::InvalidEntry(format!(
                    "schema '{}' requires file attributes",
                    self.schema
                )));
            }
            _ => {}
        }

        Ok(())
    }

    pub fn file(&self) -> Option<&FileAttributes> {
        match &self.attributes {
            Attributes::File(attrs) => Some(attrs),
            _ => None,
        }
    }

    pub fn backup_date(&self) -> Option<&str> {
        self.file().and_then(|f| f.backup_date.as_deref())
    }
}

pub fn is_file_schema(schema: &str) -> bool {
    schema == "file" || schema.starts_with("file.")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attributes {
    File(FileAttributes),
    Location(LocationAttributes),
    Other(serde_json::Map<String, serde_json::Value>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAttributes {
    pub file: FileInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaAttributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationAttributes>,
    /// Timestamp of the snapshot this entry was derived from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: PathBuf,
    pub checksum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Whole seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "optional_date")]
    pub creation_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera: Option<String>,
    /// Clockwise rotation in degrees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<u16>,
}

impl MediaAttributes {
    pub fn is_empty(&self) -> bool {
        *self == MediaAttributes::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearing: Option<f64>,
}

impl LocationAttributes {
    pub fn is_empty(&self) -> bool {
        *self == LocationAttributes::default()
    }
}

/// The `file.*` schema family, resolved from a mimetype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileSchema {
    Image,
    Video,
    Audio,
    Text,
    Pdf,
    Other,
}

impl FileSchema {
    pub fn from_mimetype(mimetype: Option<&str>) -> Self {
        let Some(mimetype) = mimetype else {
            return FileSchema::Other;
        };

        if mimetype.starts_with("image/") {
            FileSchema::Image
        } else if mimetype.starts_with("video/") {
            FileSchema::Video
        } else if mimetype.starts_with("audio/") {
            FileSchema::Audio
        } else if mimetype.starts_with("text/") {
            FileSchema::Text
        } else if mimetype == "application/pdf" {
            FileSchema::Pdf
        } else {
            FileSchema::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileSchema::Image => "file.image",
            FileSchema::Video => "file.video",
            FileSchema::Audio => "file.audio",
            FileSchema::Text => "file.text",
            FileSchema::Pdf => "file.document.pdf",
            FileSchema::Other => "file",
        }
    }

    pub fn is_media(&self) -> bool {
        matches!(self, FileSchema::Image | FileSchema::Video | FileSchema::Audio)
    }
}

mod timeline_date {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_date(date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_date(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid date '{raw}'")))
    }
}

mod optional_date {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match date {
            Some(d) => s.serialize_str(&super::format_date(d)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(raw) => super::parse_date(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid date '{raw}'"))),
            None => Ok(None),
        }
    }
}
