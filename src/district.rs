//! Arrondissement code normalization
//!
//! Raw sources disagree on how they spell a district: zero-padded strings,
//! plain integers, floats from spreadsheet exports. Everything funnels through
//! [`normalize`] so the fetch reconciliation and any downstream aggregation
//! can never disagree on which records belong to which district.

use std::fmt;

use serde_json::Value;

/// Lowest valid INSEE-style code (1st arrondissement).
const CODE_MIN: i64 = 75001;
/// Highest valid INSEE-style code (20th arrondissement).
const CODE_MAX: i64 = 75020;

/// One of the 20 Paris arrondissements.
///
/// Stores the district number (1–20) and renders as the canonical
/// zero-padded 5-character code (`"75001"`–`"75020"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Arrondissement(u8);

impl Arrondissement {
    /// Number of administrative districts.
    pub const COUNT: u8 = 20;

    /// Create from a district number (1–20).
    pub fn new(number: u8) -> Option<Self> {
        if (1..=Self::COUNT).contains(&number) {
            Some(Self(number))
        } else {
            None
        }
    }

    /// District number, 1–20.
    pub fn number(&self) -> u8 {
        self.0
    }

    /// Canonical 5-character code, e.g. `"75003"`.
    pub fn code(&self) -> String {
        format!("750{:02}", self.0)
    }
}

impl fmt::Display for Arrondissement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "750{:02}", self.0)
    }
}

/// Normalize a raw district identifier into its canonical form.
///
/// Accepts any numeric spelling whose value is exactly in 75001–75020:
/// the canonical 5-character string, unpadded variants with surrounding
/// whitespace, and float renderings like `"75001.0"`. Everything else
/// (out-of-range codes, fractional values, non-numeric text, empty input)
/// is `None`. This is a classification outcome, not an error.
pub fn normalize(raw: &str) -> Option<Arrondissement> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let value: f64 = trimmed.parse().ok()?;
    if !value.is_finite() || value.fract() != 0.0 {
        return None;
    }

    let code = value as i64;
    if (CODE_MIN..=CODE_MAX).contains(&code) {
        Arrondissement::new((code - CODE_MIN + 1) as u8)
    } else {
        None
    }
}

/// Normalize a JSON value as it appears in API payloads.
///
/// Strings and numbers go through [`normalize`]; null and structured values
/// are invalid.
pub fn normalize_value(value: &Value) -> Option<Arrondissement> {
    match value {
        Value::String(s) => normalize(s),
        Value::Number(n) => normalize(&n.to_string()),
        _ => None,
    }
}
