//! Art style identifiers.
//!
//! Styles form an open set: the identifier is a plain lowercase string and
//! the media crate's effect registry decides which identifiers it can render.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identifier of a per-frame art style (e.g. `pencil`, `vintage_film`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct StyleId(String);

impl StyleId {
    pub const PENCIL: &'static str = "pencil";
    pub const CARTOON: &'static str = "cartoon";
    pub const OIL_PAINTING: &'static str = "oil_painting";
    pub const WATERCOLOR: &'static str = "watercolor";
    pub const ANIME: &'static str = "anime";
    pub const VINTAGE_FILM: &'static str = "vintage_film";

    /// Styles shipped with the pipeline.
    pub const BUILTIN: &'static [&'static str] = &[
        Self::PENCIL,
        Self::CARTOON,
        Self::OIL_PAINTING,
        Self::WATERCOLOR,
        Self::ANIME,
        Self::VINTAGE_FILM,
    ];

    /// Create a style id, normalizing case and separators.
    ///
    /// `"Oil-Painting"` and `"oil painting"` both become `oil_painting`.
    pub fn new(name: impl AsRef<str>) -> Self {
        let normalized = name
            .as_ref()
            .trim()
            .to_lowercase()
            .replace(['-', ' '], "_");
        Self(normalized)
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id names one of the built-in styles.
    pub fn is_builtin(&self) -> bool {
        Self::BUILTIN.contains(&self.0.as_str())
    }

    /// Name used when building output file names.
    pub fn as_filename_part(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StyleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StyleId {
    type Err = StyleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = StyleId::new(s);
        if id.0.is_empty() || !id.0.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(StyleParseError(s.to_string()));
        }
        Ok(id)
    }
}

impl From<&str> for StyleId {
    fn from(s: &str) -> Self {
        StyleId::new(s)
    }
}

#[derive(Debug, Error)]
#[error("Invalid style identifier: {0}")]
pub struct StyleParseError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_style_normalization() {
        assert_eq!(StyleId::new("Oil-Painting").as_str(), "oil_painting");
        assert_eq!(StyleId::new(" vintage film ").as_str(), "vintage_film");
        assert!(StyleId::new("PENCIL").is_builtin());
    }

    #[test]
    fn test_style_parse() {
        assert_eq!("anime".parse::<StyleId>().unwrap().as_str(), "anime");
        assert!("".parse::<StyleId>().is_err());
        assert!("../etc".parse::<StyleId>().is_err());
        // Unknown but well-formed styles parse; the registry decides support.
        assert!(!"neon".parse::<StyleId>().unwrap().is_builtin());
    }

    #[test]
    fn test_style_serde_transparent() {
        let style = StyleId::new("cartoon");
        let json = serde_json::to_string(&style).unwrap();
        assert_eq!(json, "\"cartoon\"");
    }
}
