//! Configuration and kill-switches.
//!
//! Uses Figment to merge defaults + `rehydrate.toml` + `rehydrate.<env>.toml` +
//! `REHYDRATE_*` env vars into [`RehydrateOptions`]. Requests validate once into
//! an immutable [`RehydrateConfig`]; no component reads the environment later.
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

pub const ENV_PREFIX: &str = "REHYDRATE_";
pub const MAX_TOKEN_BUDGET: usize = 200_000;

/// Env keys under `REHYDRATE_` that belong to the binaries, not to the options.
const NON_OPTION_ENV_KEYS: &[&str] = &["log_json", "snapshot"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DedupePolicy {
    #[serde(rename = "file")]
    File,
    #[serde(rename = "file+overlap")]
    FileOverlap,
}

impl FromStr for DedupePolicy {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "file" => Ok(Self::File),
            "file+overlap" => Ok(Self::FileOverlap),
            other => Err(Error::InvalidConfig(format!("dedupe_policy: unknown value '{}' (expected 'file' or 'file+overlap')", other))),
        }
    }
}

impl fmt::Display for DedupePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self { Self::File => "file", Self::FileOverlap => "file+overlap" })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpandQuery {
    Auto,
    Off,
}

impl FromStr for ExpandQuery {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "auto" => Ok(Self::Auto),
            "off" => Ok(Self::Off),
            other => Err(Error::InvalidConfig(format!("expand_query: unknown value '{}' (expected 'auto' or 'off')", other))),
        }
    }
}

/// Raw, unvalidated options as read from files and the environment.
///
/// Every field has a default, so an empty source yields `Default::default()`.
/// Call [`RehydrateOptions::validate`] to obtain the immutable
/// [`RehydrateConfig`] that is threaded through a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RehydrateOptions {
    pub stability: f32,
    pub use_rrf: bool,
    pub rrf_k0: u32,
    pub dedupe_policy: DedupePolicy,
    pub overlap_threshold: f32,
    pub max_chunks_per_file: usize,
    pub expand_query: ExpandQuery,
    pub use_entity_expansion: bool,
    pub entity_top_n: usize,
    pub entity_base_k: usize,
    pub entity_multiplier: usize,
    pub entity_cap: usize,
    pub max_entity_lookups: usize,
    pub stability_threshold: f32,
    pub entity_workers: usize,
    pub token_budget: usize,
    pub evidence_share: f32,
    pub recency_share: f32,
    pub recency_limit: usize,
    pub search_k: usize,
    pub request_timeout_ms: u64,
    pub sub_search_timeout_ms: u64,
    pub critique_threshold: f32,
    pub min_evidence: usize,
    /// Process-level: path to a `tokenizer.json`. Not overridable per request.
    pub tokenizer_path: Option<String>,
}

impl Default for RehydrateOptions {
    fn default() -> Self {
        Self {
            stability: 0.6,
            use_rrf: true,
            rrf_k0: 60,
            dedupe_policy: DedupePolicy::FileOverlap,
            overlap_threshold: 0.5,
            max_chunks_per_file: 1,
            expand_query: ExpandQuery::Auto,
            use_entity_expansion: true,
            entity_top_n: 5,
            entity_base_k: 2,
            entity_multiplier: 2,
            entity_cap: 8,
            max_entity_lookups: 8,
            stability_threshold: 0.7,
            entity_workers: 4,
            token_budget: 1200,
            evidence_share: 0.8,
            recency_share: 0.1,
            recency_limit: 8,
            search_k: 20,
            request_timeout_ms: 5000,
            sub_search_timeout_ms: 2000,
            critique_threshold: 0.5,
            min_evidence: 3,
            tokenizer_path: None,
        }
    }
}

impl RehydrateOptions {
    /// Load process defaults: built-in defaults, then `rehydrate.toml`, then
    /// `rehydrate.<env>.toml` (env from `RUST_ENV`, default `dev`), then
    /// `REHYDRATE_*` environment variables.
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::from_figment(Self::figment(&env_name, Path::new(".")))
    }

    pub fn figment(env_name: &str, dir: &Path) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default())).merge(Toml::file(dir.join("rehydrate.toml")));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("rehydrate.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("rehydrate.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("rehydrate.test.toml"))),
            _ => {}
        }
        figment.merge(Env::prefixed(ENV_PREFIX).ignore(NON_OPTION_ENV_KEYS))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let options: Self = figment.extract()?;
        // Fail fast on bad process defaults instead of on the first request.
        options.validate()?;
        Ok(options)
    }

    /// Apply per-request overrides on top of these defaults.
    pub fn with_overrides(&self, o: &RequestOverrides) -> Self {
        let mut out = self.clone();
        if let Some(v) = o.stability { out.stability = v; }
        if let Some(v) = o.use_rrf { out.use_rrf = v; }
        if let Some(v) = o.dedupe_policy { out.dedupe_policy = v; }
        if let Some(v) = o.expand_query { out.expand_query = v; }
        if let Some(v) = o.use_entity_expansion { out.use_entity_expansion = v; }
        if let Some(v) = o.token_budget { out.token_budget = v; }
        out
    }

    pub fn tokenizer_path(&self) -> Option<PathBuf> { self.tokenizer_path.as_deref().map(expand_path) }

    pub fn validate(&self) -> Result<RehydrateConfig> {
        unit_interval("stability", self.stability)?;
        unit_interval("stability_threshold", self.stability_threshold)?;
        unit_interval("critique_threshold", self.critique_threshold)?;
        ensure(self.overlap_threshold > 0.0 && self.overlap_threshold <= 1.0, || format!("overlap_threshold must be in (0, 1], got {}", self.overlap_threshold))?;
        ensure(self.rrf_k0 >= 1, || "rrf_k0 must be >= 1".to_string())?;
        ensure(self.max_chunks_per_file >= 1, || "max_chunks_per_file must be >= 1".to_string())?;
        ensure(self.entity_cap >= 1, || "entity_cap must be >= 1".to_string())?;
        ensure(self.max_entity_lookups >= 1, || "max_entity_lookups must be >= 1".to_string())?;
        ensure(self.entity_workers >= 1, || "entity_workers must be >= 1".to_string())?;
        ensure(self.search_k >= 1, || "search_k must be >= 1".to_string())?;
        ensure(self.min_evidence >= 1, || "min_evidence must be >= 1".to_string())?;
        ensure(self.token_budget >= 1 && self.token_budget <= MAX_TOKEN_BUDGET, || format!("token_budget must be in 1..={}, got {}", MAX_TOKEN_BUDGET, self.token_budget))?;
        ensure(self.evidence_share.is_finite() && (0.5..=0.8).contains(&self.evidence_share), || format!("evidence_share must be in [0.5, 0.8], got {}", self.evidence_share))?;
        ensure(self.recency_share.is_finite() && (0.0..=0.1).contains(&self.recency_share), || format!("recency_share must be in [0, 0.1], got {}", self.recency_share))?;
        ensure(self.request_timeout_ms >= 1, || "request_timeout_ms must be >= 1".to_string())?;
        ensure(self.sub_search_timeout_ms >= 1 && self.sub_search_timeout_ms <= self.request_timeout_ms, || format!("sub_search_timeout_ms must be in 1..={}, got {}", self.request_timeout_ms, self.sub_search_timeout_ms))?;
        Ok(RehydrateConfig::from_checked(self))
    }
}

fn ensure(cond: bool, msg: impl FnOnce() -> String) -> Result<()> {
    if cond { Ok(()) } else { Err(Error::InvalidConfig(msg())) }
}

fn unit_interval(name: &str, v: f32) -> Result<()> {
    ensure(v.is_finite() && (0.0..=1.0).contains(&v), || format!("{} must be in [0, 1], got {}", name, v))
}

/// Validated, immutable configuration for one request.
///
/// Only obtainable through [`RehydrateOptions::validate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[non_exhaustive]
pub struct RehydrateConfig {
    pub stability: f32,
    pub use_rrf: bool,
    pub rrf_k0: u32,
    pub dedupe_policy: DedupePolicy,
    pub overlap_threshold: f32,
    pub max_chunks_per_file: usize,
    pub expand_query: ExpandQuery,
    pub use_entity_expansion: bool,
    pub entity_top_n: usize,
    pub entity_base_k: usize,
    pub entity_multiplier: usize,
    pub entity_cap: usize,
    pub max_entity_lookups: usize,
    pub stability_threshold: f32,
    pub entity_workers: usize,
    pub token_budget: usize,
    pub evidence_share: f32,
    pub recency_share: f32,
    pub recency_limit: usize,
    pub search_k: usize,
    pub request_timeout: Duration,
    pub sub_search_timeout: Duration,
    pub critique_threshold: f32,
    pub min_evidence: usize,
}

impl RehydrateConfig {
    fn from_checked(o: &RehydrateOptions) -> Self {
        Self {
            stability: o.stability,
            use_rrf: o.use_rrf,
            rrf_k0: o.rrf_k0,
            dedupe_policy: o.dedupe_policy,
            overlap_threshold: o.overlap_threshold,
            max_chunks_per_file: o.max_chunks_per_file,
            expand_query: o.expand_query,
            use_entity_expansion: o.use_entity_expansion,
            entity_top_n: o.entity_top_n,
            entity_base_k: o.entity_base_k,
            entity_multiplier: o.entity_multiplier,
            entity_cap: o.entity_cap,
            max_entity_lookups: o.max_entity_lookups,
            stability_threshold: o.stability_threshold,
            entity_workers: o.entity_workers,
            token_budget: o.token_budget,
            evidence_share: o.evidence_share,
            recency_share: o.recency_share,
            recency_limit: o.recency_limit,
            search_k: o.search_k,
            request_timeout: Duration::from_millis(o.request_timeout_ms),
            sub_search_timeout: Duration::from_millis(o.sub_search_timeout_ms),
            critique_threshold: o.critique_threshold,
            min_evidence: o.min_evidence,
        }
    }
}

impl Default for RehydrateConfig {
    fn default() -> Self { Self::from_checked(&RehydrateOptions::default()) }
}

/// Per-request overrides of the recognized kill-switches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestOverrides {
    pub stability: Option<f32>,
    pub use_rrf: Option<bool>,
    pub dedupe_policy: Option<DedupePolicy>,
    pub expand_query: Option<ExpandQuery>,
    pub use_entity_expansion: Option<bool>,
    pub token_budget: Option<usize>,
}

impl RequestOverrides {
    /// Parse environment-style `key=value` pairs. Keys may carry the
    /// `REHYDRATE_` prefix and any case.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut out = Self::default();
        for (k, v) in pairs {
            let key = k.as_ref().trim().to_ascii_lowercase();
            let key = key.strip_prefix(&ENV_PREFIX.to_ascii_lowercase()).unwrap_or(&key).to_string();
            let value = v.as_ref().trim();
            match key.as_str() {
                "stability" => out.stability = Some(parse_value(&key, value)?),
                "use_rrf" => out.use_rrf = Some(parse_bool(&key, value)?),
                "dedupe_policy" => out.dedupe_policy = Some(value.parse()?),
                "expand_query" => out.expand_query = Some(value.parse()?),
                "use_entity_expansion" => out.use_entity_expansion = Some(parse_bool(&key, value)?),
                "token_budget" => out.token_budget = Some(parse_value(&key, value)?),
                _ => return Err(Error::InvalidConfig(format!("unknown option '{}'", k.as_ref()))),
            }
        }
        Ok(out)
    }

    /// Parse a single `key=value` string.
    pub fn parse_pair(s: &str) -> Result<(String, String)> {
        let (k, v) = s.split_once('=').ok_or_else(|| Error::InvalidConfig(format!("expected key=value, got '{}'", s)))?;
        Ok((k.to_string(), v.to_string()))
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| Error::InvalidConfig(format!("{}: cannot parse '{}'", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidConfig(format!("{}: expected a boolean, got '{}'", key, value))),
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}
