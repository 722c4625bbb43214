use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use rehydrate_core::bundle::{Bundle, Stage};
use rehydrate_core::error::Result;
use rehydrate_core::types::QueryContext;

/// Post-assembly hook. Observers see the finished bundle read-only; an
/// error or a panic is logged and otherwise ignored.
pub trait BundleObserver: Send + Sync {
    fn name(&self) -> &str;
    fn observe(&self, bundle: &Bundle, ctx: &QueryContext) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CritiqueReport {
    pub score: f32,
    pub anchor_role_coverage: f32,
    pub evidence_sufficiency: f32,
    pub source_diversity: f32,
    pub budget_utilization: f32,
}

/// Heuristic 0..1 quality score; warns below `critique_threshold`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfCritique;

impl SelfCritique {
    pub fn evaluate(&self, bundle: &Bundle, ctx: &QueryContext) -> CritiqueReport {
        let evidence = bundle.evidence();
        let present: HashSet<&str> = evidence.iter().filter_map(|e| e.anchor_key.as_deref()).collect();
        let pinned: Vec<&str> = bundle.trace.matched_anchors.iter().filter(|m| m.role_pinned).map(|m| m.key.as_str()).collect();
        let anchor_role_coverage = if pinned.is_empty() { 1.0 } else { pinned.iter().filter(|k| present.contains(*k)).count() as f32 / pinned.len() as f32 };
        let evidence_sufficiency = (evidence.len() as f32 / ctx.config.min_evidence.max(1) as f32).min(1.0);
        let source_diversity = if evidence.is_empty() {
            0.0
        } else {
            evidence.iter().map(|e| e.file_path.as_str()).collect::<HashSet<_>>().len() as f32 / evidence.len() as f32
        };
        let budget_utilization = if bundle.token_budget == 0 { 0.0 } else { (bundle.total_tokens as f32 / bundle.token_budget as f32).min(1.0) };
        let score = (anchor_role_coverage + evidence_sufficiency + source_diversity + budget_utilization) / 4.0;
        CritiqueReport { score, anchor_role_coverage, evidence_sufficiency, source_diversity, budget_utilization }
    }
}

impl BundleObserver for SelfCritique {
    fn name(&self) -> &str { "self-critique" }

    fn observe(&self, bundle: &Bundle, ctx: &QueryContext) -> Result<()> {
        let r = self.evaluate(bundle, ctx);
        if r.score < ctx.config.critique_threshold {
            tracing::warn!(
                stage = %Stage::Critique,
                score = r.score,
                threshold = ctx.config.critique_threshold,
                anchor_role_coverage = r.anchor_role_coverage,
                evidence_sufficiency = r.evidence_sufficiency,
                source_diversity = r.source_diversity,
                budget_utilization = r.budget_utilization,
                "low-quality context bundle"
            );
        } else {
            tracing::debug!(stage = %Stage::Critique, score = r.score, "self-critique");
        }
        Ok(())
    }
}

/// Run every observer; returns how many failed.
pub fn run_observers(observers: &[Arc<dyn BundleObserver>], bundle: &Bundle, ctx: &QueryContext) -> usize {
    let mut failed = 0;
    for obs in observers {
        match catch_unwind(AssertUnwindSafe(|| obs.observe(bundle, ctx))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => { failed += 1; tracing::warn!(observer = obs.name(), error = %e, "bundle observer failed"); }
            Err(_) => { failed += 1; tracing::warn!(observer = obs.name(), "bundle observer panicked"); }
        }
    }
    failed
}
