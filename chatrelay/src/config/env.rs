//! API key resolution from the process environment.

/// Provider-specific environment variables, most specific first.
pub fn provider_env_candidates(provider: &str) -> &'static [&'static str] {
    match provider {
        "openrouter" => &["OPENROUTER_API_KEY"],
        "together" | "together-ai" => &["TOGETHER_AI_API_KEY", "TOGETHER_API_KEY"],
        "huggingface" | "hf" => &["HUGGINGFACE_API_TOKEN", "HF_TOKEN"],
        "replicate" => &["REPLICATE_API_TOKEN"],
        _ => &[],
    }
}

/// Generic fallback consulted after the provider-specific variables.
pub const GENERIC_KEY_VAR: &str = "CHATRELAY_API_KEY";

/// Resolve the API key for a provider:
/// 1. explicit override (trimmed, ignored if empty)
/// 2. provider-specific environment variable(s)
/// 3. `CHATRELAY_API_KEY`
pub fn resolve_api_key(provider: &str, override_key: Option<&str>) -> Option<String> {
    resolve_with(provider, override_key, |var| std::env::var(var).ok())
}

fn resolve_with(
    provider: &str,
    override_key: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    let non_empty = |raw: &str| {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_owned())
    };

    if let Some(key) = override_key.and_then(non_empty) {
        return Some(key);
    }

    provider_env_candidates(provider)
        .iter()
        .chain(std::iter::once(&GENERIC_KEY_VAR))
        .find_map(|var| lookup(var).as_deref().and_then(non_empty))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn override_wins() {
        let lookup = env(&[("OPENROUTER_API_KEY", "from-env")]);
        assert_eq!(
            resolve_with("openrouter", Some(" explicit "), lookup).as_deref(),
            Some("explicit")
        );
    }

    #[test]
    fn blank_override_falls_through_to_env() {
        let lookup = env(&[("OPENROUTER_API_KEY", "from-env")]);
        assert_eq!(resolve_with("openrouter", Some("  "), lookup).as_deref(), Some("from-env"));
    }

    #[test]
    fn secondary_variable_is_used() {
        let lookup = env(&[("TOGETHER_API_KEY", "t"), ("HF_TOKEN", "h")]);
        assert_eq!(resolve_with("together", None, &lookup).as_deref(), Some("t"));
        assert_eq!(resolve_with("huggingface", None, &lookup).as_deref(), Some("h"));
    }

    #[test]
    fn generic_fallback_and_absence() {
        let lookup = env(&[(GENERIC_KEY_VAR, "g"), ("REPLICATE_API_TOKEN", " ")]);
        assert_eq!(resolve_with("replicate", None, &lookup).as_deref(), Some("g"));
        assert_eq!(resolve_with("replicate", None, env(&[])), None);
    }
}
