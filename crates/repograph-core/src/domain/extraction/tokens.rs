//! Token counting with the cl100k BPE

use std::fmt;
use std::sync::{Arc, OnceLock};

use tiktoken_rs::CoreBPE;

use crate::error::{Error, Result};

static CL100K: OnceLock<std::result::Result<Arc<CoreBPE>, String>> = OnceLock::new();

/// Counts tokens the way the language models see them
#[derive(Clone)]
pub struct TokenCounter {
    bpe: Arc<CoreBPE>,
}

impl TokenCounter {
    /// Shared cl100k encoder, loaded once per process
    pub fn cl100k() -> Result<Self> {
        let bpe = CL100K
            .get_or_init(|| {
                tiktoken_rs::cl100k_base()
                    .map(Arc::new)
                    .map_err(|e| e.to_string())
            })
            .clone()
            .map_err(|e| Error::ConfigError(format!("Failed to load cl100k tokenizer: {}", e)))?;
        Ok(Self { bpe })
    }

    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_ordinary(text).len()
    }

    /// Whether `text` fits in `max_tokens`
    pub fn fits(&self, text: &str, max_tokens: usize) -> bool {
        // Every token covers at least one byte
        text.len() <= max_tokens || self.count(text) <= max_tokens
    }
}

impl fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCounter").field("encoding", &"cl100k_base").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_tokens() {
        let counter = TokenCounter::cl100k().unwrap();
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("hello"), 1);
        assert!(counter.count("hello world, this is a sentence") > 3);
    }

    #[test]
    fn test_cjk_costs_more_than_four_chars_per_token() {
        let counter = TokenCounter::cl100k().unwrap();
        let text = "日本語のテキストを分割します。".repeat(8);
        let chars = text.chars().count();
        assert!(counter.count(&text) > chars.div_ceil(4));
        assert!(!counter.fits(&text, chars.div_ceil(4)));
    }
}
