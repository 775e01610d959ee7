//! Email syntax validation and canonicalization.

use crate::EngineError;
use std::collections::HashSet;

/// A syntactically valid, canonicalized email address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEmail {
    /// Input as received (trimmed).
    pub raw: String,
    /// Canonical form: lowercased, alias segment stripped when the domain
    /// supports `+` aliasing.
    pub normalized: String,
    /// Local part of the normalized email.
    pub local_part: String,
    /// Lowercased domain.
    pub domain: String,
    /// True when the raw local-part contains at least one `+`.
    pub is_alias: bool,
}

/// Parse and normalize a raw email address.
///
/// Rules: exactly one `@`; local-part non-empty and at most 64 characters;
/// domain at most 253 characters with at least one dot, every label 1-63
/// alphanumeric-or-hyphen characters with no leading/trailing hyphen.
///
/// The alias segment (everything from the first `+`) is stripped from the
/// canonical form only when the domain is in `alias_capable`; `is_alias` is
/// reported for any `+` regardless of domain.
pub fn parse(raw: &str, alias_capable: &HashSet<String>) -> Result<ParsedEmail, EngineError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidSyntax("empty input".to_string()));
    }

    let mut parts = trimmed.splitn(2, '@');
    let (local, domain) = match (parts.next(), parts.next()) {
        (Some(local), Some(domain)) => (local, domain),
        _ => return Err(EngineError::InvalidSyntax("missing '@'".to_string())),
    };
    if domain.contains('@') {
        return Err(EngineError::InvalidSyntax("multiple '@'".to_string()));
    }
    if local.is_empty() {
        return Err(EngineError::InvalidSyntax("empty local-part".to_string()));
    }
    if local.chars().count() > 64 {
        return Err(EngineError::InvalidSyntax("local-part too long".to_string()));
    }
    if local.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(EngineError::InvalidSyntax(
            "whitespace in local-part".to_string(),
        ));
    }

    let domain = domain.to_lowercase();
    if !is_valid_domain(&domain) {
        return Err(EngineError::InvalidSyntax(format!(
            "invalid domain '{domain}'"
        )));
    }

    let local_lower = local.to_lowercase();
    let is_alias = local_lower.contains('+');
    let canonical_local = if is_alias && alias_capable.contains(&domain) {
        match local_lower.split('+').next() {
            // Stripping "+tag" entirely would leave nothing to address.
            Some("") | None => local_lower.clone(),
            Some(stem) => stem.to_string(),
        }
    } else {
        local_lower
    };

    Ok(ParsedEmail {
        raw: trimmed.to_string(),
        normalized: format!("{canonical_local}@{domain}"),
        local_part: canonical_local,
        domain,
        is_alias,
    })
}

/// Domain format check: dotted labels, alphanumeric-or-hyphen, no
/// leading/trailing hyphen per label.
fn is_valid_domain(domain: &str) -> bool {
    if domain.len() > 253 || domain.is_empty() {
        return false;
    }
    if !domain.contains('.') {
        return false;
    }
    if domain.starts_with('.') || domain.ends_with('.') {
        return false;
    }
    for label in domain.split('.') {
        if label.is_empty() || label.len() > 63 {
            return false;
        }
        if label.starts_with('-') || label.ends_with('-') {
            return false;
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return false;
        }
    }
    true
}
