//! Symbol and sector-id normalization.
//!
//! Every mutation entry point runs user input through these functions before
//! anything reaches the network, so a malformed ticker never produces a task.

use thiserror::Error;

/// Longest ticker accepted (covers index symbols like `^VIX9D` and share classes).
pub const MAX_SYMBOL_LEN: usize = 12;

/// Longest sector id accepted.
pub const MAX_SECTOR_ID_LEN: usize = 48;

/// Input rejected before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("ticker symbol required")]
    EmptySymbol,

    #[error("invalid ticker symbol '{0}'")]
    InvalidSymbol(String),

    #[error("{symbol} is already in sector '{sector_id}'")]
    DuplicateMember { sector_id: String, symbol: String },

    #[error("{symbol} is not a member of sector '{sector_id}'")]
    NotAMember { sector_id: String, symbol: String },

    #[error("sector id required")]
    EmptySectorId,

    #[error("invalid sector id '{0}'")]
    InvalidSectorId(String),

    #[error("sector name required")]
    EmptySectorName,

    #[error("sector '{0}' already exists")]
    DuplicateSector(String),

    #[error("unknown sector '{0}'")]
    UnknownSector(String),

    #[error("sector '{0}' needs at least one ticker")]
    EmptySector(String),
}

/// Trim, uppercase and pattern-check a ticker symbol.
///
/// Accepted characters are `A-Z`, `0-9`, `.`, `-`, `^` and `=`; the first character
/// must be alphanumeric or `^`.
pub fn normalize_symbol(raw: &str) -> Result<String, ValidationError> {
    let symbol = raw.trim().to_ascii_uppercase();
    if symbol.is_empty() {
        return Err(ValidationError::EmptySymbol);
    }
    if symbol.len() > MAX_SYMBOL_LEN || !symbol.chars().all(is_symbol_char) {
        return Err(ValidationError::InvalidSymbol(raw.trim().to_string()));
    }
    match symbol.chars().next() {
        Some(c) if c.is_ascii_alphanumeric() || c == '^' => Ok(symbol),
        _ => Err(ValidationError::InvalidSymbol(raw.trim().to_string())),
    }
}

fn is_symbol_char(c: char) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '^' | '=')
}

/// Trim and lowercase a sector id. Ids are slugs: `a-z`, `0-9`, `-` and `_`.
pub fn normalize_sector_id(raw: &str) -> Result<String, ValidationError> {
    let id = raw.trim().to_ascii_lowercase();
    if id.is_empty() {
        return Err(ValidationError::EmptySectorId);
    }
    let valid = id.len() <= MAX_SECTOR_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if !valid {
        return Err(ValidationError::InvalidSectorId(raw.trim().to_string()));
    }
    Ok(id)
}

/// Normalize a list of symbols, rejecting the first invalid or duplicate entry.
pub fn normalize_symbols<'a>(
    sector_id: &str,
    raw: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<String>, ValidationError> {
    let mut out: Vec<String> = Vec::new();
    for item in raw {
        let symbol = normalize_symbol(item)?;
        if out.contains(&symbol) {
            return Err(ValidationError::DuplicateMember {
                sector_id: sector_id.to_string(),
                symbol,
            });
        }
        out.push(symbol);
    }
    Ok(out)
}
