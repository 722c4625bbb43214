//! Identifier-like entity extraction.
//!
//! Matchers are pluggable: anything implementing [`EntityMatcher`] can be
//! added to an [`EntityExtractor`]. When two matchers claim overlapping
//! text, the one registered first wins.
use regex::Regex;
use std::collections::HashSet;
use std::fmt;

use rehydrate_core::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Url,
    Email,
    Path,
    CamelCase,
    SnakeCase,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Url => "url",
            Self::Email => "email",
            Self::Path => "path",
            Self::CamelCase => "camel_case",
            Self::SnakeCase => "snake_case",
        })
    }
}

/// A match with its byte span in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub text: String,
    pub kind: EntityKind,
    pub start: usize,
    pub end: usize,
}

pub trait EntityMatcher: Send + Sync {
    fn kind(&self) -> EntityKind;
    fn find(&self, text: &str) -> Vec<Entity>;
}

const TRAILING_PUNCT: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '\'', '"'];

pub struct RegexMatcher {
    kind: EntityKind,
    re: Regex,
}

impl RegexMatcher {
    pub fn new(kind: EntityKind, pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern).map_err(|e| Error::InvalidConfig(format!("{} matcher: {}", kind, e)))?;
        Ok(Self { kind, re })
    }
}

impl EntityMatcher for RegexMatcher {
    fn kind(&self) -> EntityKind { self.kind }

    fn find(&self, text: &str) -> Vec<Entity> {
        self.re
            .find_iter(text)
            .filter_map(|m| {
                let s = m.as_str().trim_end_matches(TRAILING_PUNCT);
                (!s.is_empty()).then(|| Entity { text: s.to_string(), kind: self.kind, start: m.start(), end: m.start() + s.len() })
            })
            .collect()
    }
}

pub const URL_PATTERN: &str = r#"\bhttps?://[^\s<>"'`]+"#;
pub const EMAIL_PATTERN: &str = r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}\b";
pub const PATH_PATTERN: &str = r"(?:~|\.{1,2})?/?(?:[A-Za-z0-9_.-]+/)+[A-Za-z0-9_.-]+|\b[A-Za-z0-9_-]+\.(?:rs|py|md|toml|json|ya?ml|ts|js|go|sh|txt|sql)\b";
pub const CAMEL_CASE_PATTERN: &str = r"\b(?:[A-Z][a-z0-9]+|[a-z][a-z0-9]*)(?:[A-Z][a-z0-9]*)+\b";
pub const SNAKE_CASE_PATTERN: &str = r"\b[A-Za-z][A-Za-z0-9]*(?:_[A-Za-z0-9]+)+\b";

pub struct EntityExtractor {
    matchers: Vec<Box<dyn EntityMatcher>>,
}

impl EntityExtractor {
    pub fn new(matchers: Vec<Box<dyn EntityMatcher>>) -> Self { Self { matchers } }

    /// URL, email, path, CamelCase and snake_case, in that precedence.
    pub fn with_default_matchers() -> Result<Self> {
        Ok(Self::new(vec![
            Box::new(RegexMatcher::new(EntityKind::Url, URL_PATTERN)?),
            Box::new(RegexMatcher::new(EntityKind::Email, EMAIL_PATTERN)?),
            Box::new(RegexMatcher::new(EntityKind::Path, PATH_PATTERN)?),
            Box::new(RegexMatcher::new(EntityKind::CamelCase, CAMEL_CASE_PATTERN)?),
            Box::new(RegexMatcher::new(EntityKind::SnakeCase, SNAKE_CASE_PATTERN)?),
        ]))
    }

    pub fn push(&mut self, matcher: Box<dyn EntityMatcher>) { self.matchers.push(matcher); }

    /// Entities of one text in order of appearance.
    pub fn extract(&self, text: &str) -> Vec<Entity> {
        let mut claimed: Vec<(usize, usize)> = Vec::new();
        let mut out: Vec<Entity> = Vec::new();
        for m in &self.matchers {
            for e in m.find(text) {
                if claimed.iter().any(|&(s, end)| e.start < end && s < e.end) { continue; }
                claimed.push((e.start, e.end));
                out.push(e);
            }
        }
        out.sort_by_key(|e| e.start);
        out
    }

    /// Distinct entity strings over several texts, first appearance wins.
    pub fn extract_all<'a, I>(&self, texts: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen = HashSet::new();
        texts.into_iter().flat_map(|t| self.extract(t)).map(|e| e.text).filter(|t| seen.insert(t.clone())).collect()
    }
}

/// Adaptive secondary-recall size: `min(cap, base + entity_count * multiplier)`.
pub fn related_k(entity_count: usize, base: usize, multiplier: usize, cap: usize) -> usize {
    base.saturating_add(entity_count.saturating_mul(multiplier)).min(cap)
}
