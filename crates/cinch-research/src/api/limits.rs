//! Context window sizes for common models.

/// Context window assumed for models missing from the table.
pub const DEFAULT_CONTEXT_WINDOW: usize = 128_000;

const MODEL_LIMITS: &[(&str, usize)] = &[
    ("gpt-4", 8_192),
    ("gpt-4-turbo", 128_000),
    ("gpt-4.1", 128_000),
    ("gpt-4.1-mini", 128_000),
    ("gpt-5", 200_000),
    ("claude-3-haiku", 200_000),
    ("claude-3-sonnet", 200_000),
    ("claude-3-opus", 200_000),
    ("claude-sonnet-4", 200_000),
];

/// Look up the context window for a model, in tokens.
///
/// Provider prefixes are stripped first, so `"openai:gpt-4.1"` and
/// `"openai/gpt-4.1"` both resolve to `gpt-4.1`. Matching is exact on the
/// remaining name.
pub fn model_token_limit(model: &str) -> Option<usize> {
    let name = model
        .rsplit([':', '/'])
        .next()
        .unwrap_or(model)
        .to_lowercase();
    MODEL_LIMITS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, limit)| *limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_provider_prefixes() {
        assert_eq!(model_token_limit("openai:gpt-4.1"), Some(128_000));
        assert_eq!(model_token_limit("openai/gpt-4.1"), Some(128_000));
        assert_eq!(model_token_limit("anthropic/claude-sonnet-4"), Some(200_000));
    }

    #[test]
    fn gpt4_is_not_confused_with_gpt4_turbo() {
        assert_eq!(model_token_limit("gpt-4"), Some(8_192));
        assert_eq!(model_token_limit("gpt-4-turbo"), Some(128_000));
    }

    #[test]
    fn unknown_model_has_no_limit() {
        assert_eq!(model_token_limit("z-ai/glm-5"), None);
    }
}
