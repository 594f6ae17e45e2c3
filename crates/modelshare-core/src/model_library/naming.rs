//! Filesystem-safe name normalization and name-based metadata inference.

use regex::Regex;
use std::sync::LazyLock;

/// Maximum length for normalized names.
const MAX_NAME_LENGTH: usize = 128;

/// Characters reserved on NTFS that must be removed.
const NTFS_RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Reserved names on Windows NTFS.
const NTFS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

static CONSECUTIVE_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-_]{2,}").unwrap());

static NON_ALNUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9\-_]").unwrap());

/// Quantization code such as `Q4_K_M`, `Q8_0` or `IQ3_XXS`.
///
/// Must start the string or follow a non-letter so names like `phi3` do not
/// match.
static QUANTIZATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|[^a-z])(I?[QI]\d+[_a-z0-9]*)").unwrap());

/// Parameter count such as `7b`, `0.5B` or `70B`.
static PARAMETERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)[Bb](?:[^A-Za-z]|$)").unwrap());

/// Normalize a name for use as a filesystem-safe file name.
///
/// # Rules Applied
/// 1. Convert to lowercase
/// 2. Replace spaces with underscores
/// 3. Remove NTFS-reserved characters
/// 4. Replace other non-alphanumeric characters (except - and _) with underscore
/// 5. Collapse consecutive separators and trim them from both ends
/// 6. Truncate to `MAX_NAME_LENGTH`
/// 7. Suffix NTFS reserved names, and never return an empty string
///
/// ```
/// use modelshare_core::model_library::normalize_name;
///
/// assert_eq!(normalize_name("Llama 3 8B"), "llama_3_8b");
/// assert_eq!(normalize_name("qwen2.5:7b"), "qwen2_57b");
/// ```
pub fn normalize_name(name: &str) -> String {
    let mut result = name.to_lowercase().replace(' ', "_");

    for &c in NTFS_RESERVED_CHARS {
        result = result.replace(c, "");
    }

    result = NON_ALNUM.replace_all(&result, "_").to_string();
    result = CONSECUTIVE_SEPARATORS.replace_all(&result, "_").to_string();
    result = result.trim_matches(|c| c == '-' || c == '_').to_string();

    if result.len() > MAX_NAME_LENGTH {
        result.truncate(MAX_NAME_LENGTH);
        if let Some(pos) = result.rfind(['-', '_']) {
            if pos > MAX_NAME_LENGTH / 2 {
                result.truncate(pos);
            }
        }
        result = result.trim_matches(|c| c == '-' || c == '_').to_string();
    }

    if NTFS_RESERVED_NAMES.contains(&result.to_uppercase().as_str()) {
        result = format!("{}_model", result);
    }

    if result.is_empty() {
        result = "unnamed_model".to_string();
    }

    result
}

/// Normalize a filename while preserving (and lowercasing) its extension.
pub fn normalize_filename(filename: &str) -> String {
    match filename.rfind('.') {
        Some(dot_pos) if dot_pos > 0 => {
            let (name, ext) = filename.split_at(dot_pos);
            format!("{}{}", normalize_name(name), ext.to_lowercase())
        }
        _ => normalize_name(filename),
    }
}

/// Derive a name acceptable to Ollama's create API from a display name.
///
/// Lowercases, maps anything outside `[a-z0-9._-]` to a hyphen, collapses
/// hyphen runs and trims trailing hyphens.
pub fn derive_ollama_name(display_name: &str) -> String {
    let mapped: String = display_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();

    let mut result = String::with_capacity(mapped.len());
    let mut last_was_hyphen = false;
    for c in mapped.chars() {
        if c == '-' {
            if !last_was_hyphen && !result.is_empty() {
                result.push('-');
            }
            last_was_hyphen = true;
        } else {
            result.push(c);
            last_was_hyphen = false;
        }
    }

    let result = result.trim_end_matches('-');
    if result.is_empty() {
        "model".to_string()
    } else {
        result.to_string()
    }
}

/// Extract an uppercased quantization code from a model or file name.
///
/// ```
/// use modelshare_core::model_library::extract_quantization;
///
/// assert_eq!(extract_quantization("model-Q4_K_M.gguf").as_deref(), Some("Q4_K_M"));
/// assert_eq!(extract_quantization("plain.gguf"), None);
/// ```
pub fn extract_quantization(name: &str) -> Option<String> {
    QUANTIZATION
        .captures(name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_uppercase())
}

/// Extract a parameter count (`<n>B`) from a model or file name.
///
/// ```
/// use modelshare_core::model_library::extract_parameters;
///
/// assert_eq!(extract_parameters("llama-7b").as_deref(), Some("7B"));
/// ```
pub fn extract_parameters(name: &str) -> Option<String> {
    PARAMETERS
        .captures(name)
        .and_then(|caps| caps.get(1))
        .map(|m| format!("{}B", m.as_str()))
}
