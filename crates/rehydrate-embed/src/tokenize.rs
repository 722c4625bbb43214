//! Token counting. One counter is used for every slot of a request so the
//! budget invariants hold for whichever method is configured.
use std::path::Path;
use std::sync::Arc;
use tokenizers::Tokenizer;

use rehydrate_core::error::{Error, Result};
use rehydrate_core::traits::TokenCounter;

/// `ceil(words * 4 / 3)` over whitespace-separated words, i.e. the usual
/// "0.75 words per token" rule. Deterministic and monotone in prefix length.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicTokenCounter;

impl HeuristicTokenCounter {
    pub fn estimate(text: &str) -> usize {
        let words = text.split_whitespace().count();
        (words * 4 + 2) / 3
    }
}

impl TokenCounter for HeuristicTokenCounter {
    fn name(&self) -> &str { "heuristic:words*4/3" }
    fn count(&self, text: &str) -> Result<usize> { Ok(Self::estimate(text)) }
}

/// Counts with a Hugging Face `tokenizer.json`; special tokens are not added.
pub struct HfTokenCounter { tokenizer: Tokenizer, name: String }

impl HfTokenCounter {
    pub fn from_file(path: &Path) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| Error::Tokenization(format!("failed to load tokenizer from {}: {}", path.display(), e)))?;
        Ok(Self { tokenizer, name: format!("hf:{}", path.display()) })
    }
}

impl TokenCounter for HfTokenCounter {
    fn name(&self) -> &str { &self.name }

    fn count(&self, text: &str) -> Result<usize> {
        let enc = self.tokenizer.encode(text, false).map_err(|e| Error::Tokenization(e.to_string()))?;
        Ok(enc.get_ids().len())
    }
}

/// Heuristic counter unless a tokenizer file is configured.
pub fn counter_from_path(tokenizer_path: Option<&Path>) -> Result<Arc<dyn TokenCounter>> {
    match tokenizer_path {
        Some(p) => {
            tracing::info!(path = %p.display(), "using tokenizer.json token counter");
            Ok(Arc::new(HfTokenCounter::from_file(p)?))
        }
        None => Ok(Arc::new(HeuristicTokenCounter)),
    }
}
