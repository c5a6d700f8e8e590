use anyhow::{Result, anyhow};
use isolang::Language;

/// Language utilities for configured language codes
///
/// Codes are ISO 639-1 (2-letter) codes, optionally followed by a region
/// subtag (`en-us`). Codes are stored lowercase.
/// Normalize a code for storage and comparison
pub fn normalize_code(code: &str) -> String {
    code.trim().to_lowercase().replace('_', "-")
}

/// Split a code into its language and optional region parts
pub fn split_region(code: &str) -> (&str, Option<&str>) {
    match code.split_once('-') {
        Some((language, region)) => (language, Some(region)),
        None => (code, None),
    }
}

/// Validate that a code is an ISO 639-1 code with an optional region subtag
pub fn validate_language_code(code: &str) -> Result<()> {
    let normalized = normalize_code(code);
    let (language, region) = split_region(&normalized);

    if language.len() != 2 || Language::from_639_1(language).is_none() {
        return Err(anyhow!("Invalid language code: {}", code));
    }

    if let Some(region) = region {
        if region.is_empty() || region.len() > 3 || !region.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(anyhow!("Invalid region subtag in language code: {}", code));
        }
    }

    Ok(())
}

/// Get the English display name for a language code
pub fn get_language_name(code: &str) -> Result<String> {
    let normalized = normalize_code(code);
    let (language, region) = split_region(&normalized);

    let lang = Language::from_639_1(language)
        .ok_or_else(|| anyhow!("Invalid language code: {}", code))?;

    Ok(match region {
        Some(region) => format!("{} ({})", lang.to_name(), region.to_uppercase()),
        None => lang.to_name().to_string(),
    })
}

/// Get the native name of a language, falling back to the English name
pub fn get_native_name(code: &str) -> Result<String> {
    let normalized = normalize_code(code);
    let (language, _) = split_region(&normalized);

    let lang = Language::from_639_1(language)
        .ok_or_else(|| anyhow!("Invalid language code: {}", code))?;

    match lang.to_autonym() {
        Some(name) => Ok(name.to_string()),
        None => get_language_name(code),
    }
}

/// Column-safe form of a code, used as the suffix of explicit field names
///
/// `en-us` becomes `en_us`, so `title_en_us` addresses that language.
pub fn field_suffix(code: &str) -> String {
    code.replace('-', "_")
}
