use std::collections::{BTreeSet, HashSet};

use rehydrate_core::bundle::MatchedAnchor;
use rehydrate_core::config::{ExpandQuery, RehydrateConfig};
use rehydrate_core::types::{AnchorMetadata, Chunk, Role};

/// Split text into lowercase terms on non-alphanumerics and camelCase humps.
/// `HybridVectorStore` -> `hybrid`, `vector`, `store`; `HTTPServer` -> `http`, `server`.
pub fn split_terms(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    for word in s.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        let chars: Vec<char> = word.chars().collect();
        let mut cur = String::new();
        for (i, &c) in chars.iter().enumerate() {
            if i > 0 && c.is_uppercase() {
                let prev = chars[i - 1];
                let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
                if (prev.is_lowercase() || prev.is_numeric() || (prev.is_uppercase() && next_lower)) && !cur.is_empty() {
                    out.push(cur.to_lowercase());
                    cur.clear();
                }
            }
            cur.push(c);
        }
        if !cur.is_empty() { out.push(cur.to_lowercase()); }
    }
    out
}

/// Lowercase alphanumerics only: `Hybrid-Vector_Store` -> `hybridvectorstore`.
pub fn compact(s: &str) -> String { s.chars().filter(|c| c.is_alphanumeric()).flat_map(char::to_lowercase).collect() }

#[derive(Debug, Clone, PartialEq)]
pub struct AnchorResolution {
    /// Query to send to the searches when expansion added anything.
    pub expanded_query: Option<String>,
    /// Matched anchors, highest priority first.
    pub matches: Vec<MatchedAnchor>,
}

impl AnchorResolution {
    pub fn search_query<'a>(&'a self, raw: &'a str) -> &'a str { self.expanded_query.as_deref().unwrap_or(raw) }
}

struct KnownAnchor {
    meta: AnchorMetadata,
    terms: Vec<String>,
    compact_key: String,
}

/// Matches query text against the anchor registry of a snapshot.
pub struct AnchorResolver {
    anchors: Vec<KnownAnchor>,
    max_priority: u32,
}

impl AnchorResolver {
    pub fn new<'a, I>(anchors: I) -> Self
    where
        I: IntoIterator<Item = &'a AnchorMetadata>,
    {
        let anchors: Vec<KnownAnchor> = anchors
            .into_iter()
            .map(|a| KnownAnchor { terms: split_terms(&a.key), compact_key: compact(&a.key), meta: a.clone() })
            .filter(|a| !a.compact_key.is_empty())
            .collect();
        let max_priority = anchors.iter().map(|a| a.meta.priority).max().unwrap_or(0);
        Self { anchors, max_priority }
    }

    pub fn len(&self) -> usize { self.anchors.len() }

    pub fn is_empty(&self) -> bool { self.anchors.is_empty() }

    pub fn resolve(&self, query: &str, role: &Role, cfg: &RehydrateConfig) -> AnchorResolution {
        let words: HashSet<String> = query.split_whitespace().map(compact).filter(|w| !w.is_empty()).collect();
        let terms: HashSet<String> = split_terms(query).into_iter().chain(words.iter().cloned()).collect();
        let mut hits: Vec<&KnownAnchor> = self
            .anchors
            .iter()
            .filter(|a| words.contains(&a.compact_key) || (!a.terms.is_empty() && a.terms.iter().all(|t| terms.contains(t))))
            .collect();
        hits.sort_by(|a, b| b.meta.priority.cmp(&a.meta.priority).then_with(|| a.meta.key.cmp(&b.meta.key)));

        let expanded_query = if cfg.expand_query == ExpandQuery::Auto && cfg.stability > 0.0 {
            let mut added: Vec<String> = Vec::new();
            let mut added_set: BTreeSet<String> = BTreeSet::new();
            for a in &hits {
                if !words.contains(&a.compact_key) && added_set.insert(a.compact_key.clone()) { added.push(a.meta.key.clone()); }
                for t in &a.terms {
                    if !words.contains(t) && added_set.insert(t.clone()) { added.push(t.clone()); }
                }
            }
            (!added.is_empty()).then(|| format!("{} {}", query.trim(), added.join(" ")))
        } else {
            None
        };

        let matches = hits
            .into_iter()
            .map(|a| MatchedAnchor { key: a.meta.key.clone(), priority: a.meta.priority, role_pinned: a.meta.is_pinned_to(role) })
            .collect();
        AnchorResolution { expanded_query, matches }
    }

    /// Score added to a candidate carrying a matched, role-pinned anchor:
    /// `stability * priority / max_priority * 1/(k0 + 1)`, at most one rank-1
    /// RRF term.
    pub fn boost_for(&self, resolution: &AnchorResolution, chunk: &Chunk, cfg: &RehydrateConfig) -> f64 {
        let Some(key) = chunk.anchor_key() else { return 0.0 };
        let Some(m) = resolution.matches.iter().find(|m| m.role_pinned && m.key == key) else { return 0.0 };
        let weight = if self.max_priority == 0 { 1.0 } else { m.priority as f64 / self.max_priority as f64 };
        cfg.stability as f64 * weight / (cfg.rrf_k0 as f64 + 1.0)
    }
}
