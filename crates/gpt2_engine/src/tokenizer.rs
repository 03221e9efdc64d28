//! Tokenizer - BERT-style WordPiece over a plain `vocab.txt`

use anyhow::Result;
use std::path::Path;
use tokenizers::models::wordpiece::WordPiece;
use tokenizers::normalizers::bert::BertNormalizer;
use tokenizers::normalizers::NormalizerWrapper;
use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
use tokenizers::pre_tokenizers::PreTokenizerWrapper;
use tokenizers::{AddedToken, Tokenizer};

pub const UNK_TOKEN: &str = "[UNK]";

/// Text -> token strings -> ids, in two separate steps.
pub trait TextTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<String>>;
    fn convert_tokens_to_ids(&self, tokens: &[String]) -> Vec<u32>;
    fn token_to_id(&self, token: &str) -> Option<u32>;
}

pub struct BertTokenizer {
    inner: Tokenizer,
    unk_id: u32,
}

impl BertTokenizer {
    /// `special_tokens` are matched verbatim in the input and never split.
    pub fn from_vocab_file<P: AsRef<Path>>(path: P, special_tokens: &[&str]) -> Result<Self> {
        let path = path.as_ref();
        let wordpiece = WordPiece::from_file(&path.to_string_lossy())
            .unk_token(UNK_TOKEN.to_string())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to load vocab {}: {}", path.display(), e))?;

        let mut inner = Tokenizer::new(wordpiece);
        inner.with_normalizer(Some(NormalizerWrapper::BertNormalizer(
            BertNormalizer::default(),
        )));
        inner.with_pre_tokenizer(Some(PreTokenizerWrapper::BertPreTokenizer(
            BertPreTokenizer,
        )));
        let specials: Vec<AddedToken> = special_tokens
            .iter()
            .map(|t| AddedToken::from(t.to_string(), true))
            .collect();
        inner.add_special_tokens(&specials);

        let unk_id = inner
            .token_to_id(UNK_TOKEN)
            .ok_or_else(|| anyhow::anyhow!("{} missing from {}", UNK_TOKEN, path.display()))?;
        tracing::info!(
            "Tokenizer loaded from {} (vocab size {})",
            path.display(),
            inner.get_vocab_size(true)
        );
        Ok(Self { inner, unk_id })
    }
}

impl TextTokenizer for BertTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<String>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| anyhow::anyhow!("Failed to tokenize: {}", e))?;
        Ok(encoding.get_tokens().to_vec())
    }

    fn convert_tokens_to_ids(&self, tokens: &[String]) -> Vec<u32> {
        tokens
            .iter()
            .map(|t| self.inner.token_to_id(t).unwrap_or(self.unk_id))
            .collect()
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        self.inner.token_to_id(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_vocab(dir: &Path) -> Result<std::path::PathBuf> {
        let path = dir.join("vocab.txt");
        let mut file = std::fs::File::create(&path)?;
        for token in ["[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]", "a", "b", "##b", "你", "好"] {
            writeln!(file, "{token}")?;
        }
        Ok(path)
    }

    #[test]
    fn keeps_separator_and_splits_wordpieces() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let tokenizer = BertTokenizer::from_vocab_file(write_vocab(dir.path())?, &["[SEP]"])?;

        let tokens = tokenizer.tokenize("AB [SEP] 你好")?;
        assert_eq!(tokens, vec!["a", "##b", "[SEP]", "你", "好"]);

        let ids = tokenizer.convert_tokens_to_ids(&tokens);
        assert_eq!(ids, vec![5, 7, 3, 8, 9]);
        Ok(())
    }

    #[test]
    fn unknown_tokens_map_to_unk() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let tokenizer = BertTokenizer::from_vocab_file(write_vocab(dir.path())?, &[])?;
        let ids = tokenizer.convert_tokens_to_ids(&["zzz".to_string()]);
        assert_eq!(ids, vec![1]);
        assert_eq!(tokenizer.token_to_id("[MASK]"), Some(4));
        Ok(())
    }
}
