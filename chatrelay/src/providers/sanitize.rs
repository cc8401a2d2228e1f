//! Scrub upstream error bodies before they reach error messages or logs.

const MAX_ERROR_CHARS: usize = 200;
const REDACTED: &str = "[REDACTED]";

/// Token prefixes used by the supported backends' credentials.
const SECRET_PREFIXES: [&str; 4] = ["sk-or-", "sk-", "hf_", "r8_"];

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// Replace anything that looks like an API key, plus `Bearer` values.
pub fn redact_secrets(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    'outer: while !rest.is_empty() {
        for prefix in SECRET_PREFIXES.iter().copied().chain(std::iter::once("Bearer ")) {
            if let Some(after) = rest.strip_prefix(prefix) {
                let token_len: usize = after
                    .chars()
                    .take_while(|c| is_token_char(*c))
                    .map(char::len_utf8)
                    .sum();
                // Bare prefixes are ordinary text.
                if token_len > 0 {
                    if prefix == "Bearer " {
                        out.push_str(prefix);
                    }
                    out.push_str(REDACTED);
                    rest = &after[token_len..];
                    continue 'outer;
                }
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

/// Redact secrets and cap the length of an upstream error body.
pub fn sanitize_api_error(input: &str) -> String {
    let scrubbed = redact_secrets(input.trim());
    if scrubbed.chars().count() <= MAX_ERROR_CHARS {
        return scrubbed;
    }
    let truncated: String = scrubbed.chars().take(MAX_ERROR_CHARS).collect();
    format!("{}...", truncated)
}
