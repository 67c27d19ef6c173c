use serde::{Deserialize, Serialize};

/// An image held in memory as a base64 data URL. Nothing here is persisted;
/// a session owns its images for exactly as long as it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub data_url: String,
    pub mime_type: String,
}

impl ImageRef {
    pub fn new(data_url: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            data_url: data_url.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Generation intent: retouch preserves the photo's composition, reimagine
/// is free to replace scene and style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    Retouch,
    Reimagine,
}

impl PromptMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptMode::Retouch => "retouch",
            PromptMode::Reimagine => "reimagine",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "retouch" => Some(PromptMode::Retouch),
            "reimagine" => Some(PromptMode::Reimagine),
            _ => None,
        }
    }
}

/// How a selected result is presented against its source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonMode {
    Side,
    Slider,
    Single,
}

impl ComparisonMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonMode::Side => "side",
            ComparisonMode::Slider => "slider",
            ComparisonMode::Single => "single",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "side" => Some(ComparisonMode::Side),
            "slider" => Some(ComparisonMode::Slider),
            "single" => Some(ComparisonMode::Single),
            _ => None,
        }
    }
}

/// Pixel dimensions reported by the image decode collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

#[cfg(test)]
mod tests {
    use super::{ComparisonMode, PromptMode};

    #[test]
    fn prompt_mode_round_trips_through_strings() {
        assert_eq!(PromptMode::parse("retouch"), Some(PromptMode::Retouch));
        assert_eq!(PromptMode::parse(" Reimagine "), Some(PromptMode::Reimagine));
        assert_eq!(PromptMode::parse("other"), None);
        assert_eq!(PromptMode::Reimagine.as_str(), "reimagine");
    }

    #[test]
    fn comparison_mode_round_trips_through_strings() {
        assert_eq!(ComparisonMode::parse("slider"), Some(ComparisonMode::Slider));
        assert_eq!(ComparisonMode::parse("SIDE"), Some(ComparisonMode::Side));
        assert_eq!(ComparisonMode::parse("overlay"), None);
        assert_eq!(ComparisonMode::Single.as_str(), "single");
    }
}
