use crate::types::Mode;
use std::collections::HashMap;

/// Ranked model candidates per mode for one backend.
///
/// The first entry is the preferred model; the rest are tried in order when
/// the preferred one is rate limited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelTable {
    by_mode: HashMap<Mode, Vec<String>>,
}

impl ModelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<S: Into<String>>(mut self, mode: Mode, models: impl IntoIterator<Item = S>) -> Self {
        self.set(mode, models.into_iter().map(Into::into).collect());
        self
    }

    /// Replace the candidates for `mode`. An empty list removes the mode.
    pub fn set(&mut self, mode: Mode, models: Vec<String>) {
        if models.is_empty() {
            self.by_mode.remove(&mode);
        } else {
            self.by_mode.insert(mode, models);
        }
    }

    pub fn candidates(&self, mode: Mode) -> &[String] {
        self.by_mode.get(&mode).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn primary(&self, mode: Mode) -> Option<&str> {
        self.candidates(mode).first().map(String::as_str)
    }

    /// Modes with at least one model, in declaration order.
    pub fn modes(&self) -> Vec<Mode> {
        Mode::ALL
            .into_iter()
            .filter(|m| self.by_mode.contains_key(m))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Built-in tables
// ---------------------------------------------------------------------------

pub fn openrouter_models() -> ModelTable {
    ModelTable::new()
        .with(
            Mode::Chat,
            [
                "meta-llama/llama-3.3-70b-instruct:free",
                "google/gemma-2-9b-it:free",
                "mistralai/mistral-7b-instruct:free",
            ],
        )
        .with(
            Mode::Code,
            [
                "qwen/qwen-2.5-coder-32b-instruct:free",
                "deepseek/deepseek-chat:free",
                "meta-llama/llama-3.3-70b-instruct:free",
            ],
        )
        .with(
            Mode::Research,
            [
                "deepseek/deepseek-r1:free",
                "google/gemini-2.0-flash-exp:free",
                "meta-llama/llama-3.3-70b-instruct:free",
            ],
        )
}

pub fn together_models() -> ModelTable {
    ModelTable::new()
        .with(
            Mode::Chat,
            [
                "meta-llama/Llama-3.3-70B-Instruct-Turbo-Free",
                "meta-llama/Meta-Llama-3.1-8B-Instruct-Turbo",
            ],
        )
        .with(Mode::Code, ["Qwen/Qwen2.5-Coder-32B-Instruct"])
        .with(Mode::Research, ["deepseek-ai/DeepSeek-R1-Distill-Llama-70B-free"])
        .with(Mode::Image, ["black-forest-labs/FLUX.1-schnell-Free"])
}

pub fn huggingface_models() -> ModelTable {
    ModelTable::new().with(Mode::Image, ["stabilityai/stable-diffusion-xl-base-1.0"])
}

pub fn replicate_models() -> ModelTable {
    ModelTable::new().with(Mode::Image, ["black-forest-labs/flux-schnell"])
}
