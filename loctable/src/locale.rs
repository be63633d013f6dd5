//! BCP-47 locale handling

use icu_locale::Locale;

use crate::error::{GuardError, GuardResult};

/// Parse and validate a BCP-47 locale tag such as `de-DE` or `zh-Hans-CN`.
///
/// Underscores are accepted as separators (`pt_BR`).
pub fn parse_locale(tag: &str) -> GuardResult<Locale> {
    let trimmed = tag.trim();
    if trimmed.is_empty() {
        return Err(GuardError::InvalidLocale("locale tag is empty".to_string()));
    }
    trimmed
        .replace('_', "-")
        .parse::<Locale>()
        .map_err(|e| GuardError::InvalidLocale(format!("{}: {}", tag, e)))
}

/// Canonical string form of a locale tag, e.g. `pt_br` -> `pt-BR`
pub fn canonicalize(tag: &str) -> GuardResult<String> {
    Ok(parse_locale(tag)?.to_string())
}

/// Primary language subtag (`en-US` -> `en`)
pub fn base_language(tag: &str) -> GuardResult<String> {
    let locale = parse_locale(tag)?;
    Ok(locale.id.language.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_tags() {
        assert!(parse_locale("en").is_ok());
        assert!(parse_locale("de-DE").is_ok());
        assert!(parse_locale("zh-Hans-CN").is_ok());
    }

    #[test]
    fn test_invalid_tags() {
        assert!(matches!(parse_locale(""), Err(GuardError::InvalidLocale(_))));
        assert!(matches!(parse_locale("invalid@code"), Err(GuardError::InvalidLocale(_))));
        assert!(parse_locale("toolonglanguagetag").is_err());
    }

    #[test]
    fn test_canonicalize() {
        assert_eq!(canonicalize("pt_br").unwrap(), "pt-BR");
        assert_eq!(canonicalize("DE-de").unwrap(), "de-DE");
    }

    #[test]
    fn test_base_language() {
        assert_eq!(base_language("en-US").unwrap(), "en");
        assert_eq!(base_language("sr-Latn").unwrap(), "sr");
    }
}
