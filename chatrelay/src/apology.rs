//! Plain-language replies for failed requests. Chat callers show these as an
//! assistant message instead of surfacing an error.

use crate::error::{ErrorKind, RelayError};

pub fn user_message(err: &RelayError) -> String {
    match err {
        RelayError::NoProviders(mode) => {
            format!("Sorry, no AI provider is configured for {} requests right now.", mode)
        }
        RelayError::UnknownProvider(name) => {
            format!("Sorry, the provider \"{}\" isn't available.", name)
        }
        RelayError::UnsupportedMode { provider, mode } => {
            format!("Sorry, {} can't handle {} requests.", provider, mode)
        }
        RelayError::NotTextMode(_) => {
            "Sorry, image requests need to go through image generation.".to_string()
        }
        RelayError::Cancelled => "The request was cancelled.".to_string(),
        RelayError::Config(_) => {
            "Sorry, the AI service is misconfigured. Please contact the administrator.".to_string()
        }
        RelayError::Exhausted { last, .. } => kind_message(last.kind).to_string(),
    }
}

fn kind_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::RateLimit => {
            "I've reached a rate limit with the current AI model. I'm trying a different model; please send your message again in a moment."
        }
        ErrorKind::QuotaExceeded => {
            "The AI service has used up its quota for now. Please try again later."
        }
        ErrorKind::AuthenticationError => {
            "I couldn't authenticate with the AI service. Please check the provider credentials."
        }
        ErrorKind::ServiceUnavailable => {
            "The AI service is temporarily unavailable. Please try again in a few moments."
        }
        ErrorKind::InvalidRequest => {
            "The AI service couldn't process that request. Please try rephrasing it."
        }
        ErrorKind::Cancelled => "The request was cancelled.",
        ErrorKind::Unknown => "Sorry, something went wrong while generating a response. Please try again.",
    }
}
