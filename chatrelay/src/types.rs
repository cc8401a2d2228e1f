use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

/// The capability a caller is asking for. Selects which providers apply and
/// which model each provider uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Chat,
    Code,
    Research,
    Image,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Chat, Mode::Code, Mode::Research, Mode::Image];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Chat => "chat",
            Mode::Code => "code",
            Mode::Research => "research",
            Mode::Image => "image",
        }
    }

    /// Text modes are served by `generate_text`; `Image` by `generate_image`.
    pub fn is_text(&self) -> bool {
        !matches!(self, Mode::Image)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(Mode::Chat),
            "code" => Ok(Mode::Code),
            "research" => Ok(Mode::Research),
            "image" => Ok(Mode::Image),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Provider descriptor
// ---------------------------------------------------------------------------

/// One registered backend: a name, a priority (lower is tried first) and the
/// modes it can serve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub priority: i32,
    pub modes: BTreeSet<Mode>,
}

impl ProviderDescriptor {
    pub fn new(name: impl Into<String>, priority: i32, modes: impl IntoIterator<Item = Mode>) -> Self {
        Self {
            name: name.into(),
            priority,
            modes: modes.into_iter().collect(),
        }
    }

    pub fn supports(&self, mode: Mode) -> bool {
        self.modes.contains(&mode)
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// A successful generation. For image modes `text` holds the image URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiResponse {
    pub text: String,
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

// ---------------------------------------------------------------------------
// Image options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageOptions {
    #[serde(default = "default_dimension")]
    pub width: u32,
    #[serde(default = "default_dimension")]
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    /// Pin the request to one backend instead of the highest-priority image provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

fn default_dimension() -> u32 {
    1024
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            width: default_dimension(),
            height: default_dimension(),
            negative_prompt: None,
            steps: None,
            provider: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Status reporting
// ---------------------------------------------------------------------------

/// Point-in-time view of one provider, as reported by the relay client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub name: String,
    pub priority: i32,
    pub modes: BTreeSet<Mode>,
    /// Liveness probe result; `None` when no probe was run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<bool>,
    pub cooling_down: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_secs: Option<u64>,
    pub attempts: u32,
    pub checked_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("Chat".parse::<Mode>(), Ok(Mode::Chat));
        assert_eq!(" image ".parse::<Mode>(), Ok(Mode::Image));
        assert!("video".parse::<Mode>().is_err());
    }

    #[test]
    fn mode_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Mode::Research).unwrap(), "\"research\"");
    }

    #[test]
    fn image_options_fill_defaults() {
        let opts: ImageOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts.width, 1024);
        assert_eq!(opts.height, 1024);
        assert!(opts.provider.is_none());
    }
}
