//! Canonical anchor references: `<domain>#<slug>`.
//!
//! The domain is slash-scoped lower-kebab (`panasonic`, `sony/display`);
//! the slug starts alphanumeric and may contain `. _ : -` afterwards.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

fn anchor_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^[a-z0-9]+(?:-[a-z0-9]+)*(?:/[a-z0-9]+(?:-[a-z0-9]+)*)*#[a-z0-9][a-z0-9._:-]*$",
        )
        .expect("anchor regex is valid")
    })
}

/// True when the input already is a canonical anchor reference. The resolver
/// short-circuits on this.
pub fn is_anchor_ref(input: &str) -> bool {
    anchor_regex().is_match(input)
}

/// Errors from anchor-string parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnchorParseError {
    #[error("anchor reference missing '#' separator: {0}")]
    MissingSeparator(String),
    #[error("anchor reference does not match <domain>#<slug> grammar: {0}")]
    InvalidGrammar(String),
}

/// A parsed `<domain>#<slug>` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AnchorRef {
    domain: String,
    slug: String,
}

impl AnchorRef {
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }
}

impl FromStr for AnchorRef {
    type Err = AnchorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (domain, slug) = s
            .split_once('#')
            .ok_or_else(|| AnchorParseError::MissingSeparator(s.to_string()))?;
        if !is_anchor_ref(s) {
            return Err(AnchorParseError::InvalidGrammar(s.to_string()));
        }
        Ok(Self {
            domain: domain.to_string(),
            slug: slug.to_string(),
        })
    }
}

impl fmt::Display for AnchorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.domain, self.slug)
    }
}

impl TryFrom<String> for AnchorRef {
    type Error = AnchorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AnchorRef> for String {
    fn from(value: AnchorRef) -> Self {
        value.to_string()
    }
}
