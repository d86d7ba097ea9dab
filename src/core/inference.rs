//! Classification of the media a conversation is about.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Series,
    Anime,
    Book,
    Videogame,
    #[default]
    #[serde(other)]
    Unknown,
}

impl MediaType {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Series => "series",
            MediaType::Anime => "anime",
            MediaType::Book => "book",
            MediaType::Videogame => "videogame",
            MediaType::Unknown => "unknown",
        }
    }

    /// Maps the free-form labels models tend to produce onto the known set.
    pub fn from_label(label: &str) -> Self {
        let normalized: String = label
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();

        match normalized.as_str() {
            "movie" | "film" => MediaType::Movie,
            "series" | "tvseries" | "tvshow" | "show" | "tv" => MediaType::Series,
            "anime" | "manga" => MediaType::Anime,
            "book" | "novel" => MediaType::Book,
            "videogame" | "game" => MediaType::Videogame,
            _ => MediaType::Unknown,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the conversation is about and how far into it the user is.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inference {
    #[serde(default, alias = "media_type", deserialize_with = "deserialize_media_type")]
    pub media_type: MediaType,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub position: String,
}

fn deserialize_media_type<'de, D>(deserializer: D) -> Result<MediaType, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let label = Option::<String>::deserialize(deserializer)?;
    Ok(label.as_deref().map_or(MediaType::Unknown, MediaType::from_label))
}

impl Inference {
    pub fn new(
        media_type: MediaType,
        title: impl Into<String>,
        position: impl Into<String>,
    ) -> Self {
        Self {
            media_type,
            title: title.into(),
            position: position.into(),
        }
    }

    /// The result used whenever classification could not be performed.
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_unknown(&self) -> bool {
        self.media_type == MediaType::Unknown && self.title.is_empty() && self.position.is_empty()
    }

    /// Parses raw model output, tolerating code fences and surrounding prose.
    /// Anything unparseable resolves to [`Inference::unknown`].
    pub fn from_model_output(raw: &str) -> Self {
        let Some(object) = extract_json_object(raw) else {
            return Self::unknown();
        };
        match serde_json::from_str::<Inference>(object) {
            Ok(parsed) => parsed.normalized(),
            Err(_) => Self::unknown(),
        }
    }

    fn normalized(self) -> Self {
        Self {
            media_type: self.media_type,
            title: normalize_field(&self.title),
            position: normalize_field(&self.position),
        }
    }
}

fn normalize_field(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("unknown") || trimmed.eq_ignore_ascii_case("n/a") {
        String::new()
    } else {
        trimmed.to_string()
    }
}

fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}
