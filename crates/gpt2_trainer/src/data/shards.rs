//! Shard building: documents -> sentinel-delimited id streams on disk.

use gpt2_engine::TextTokenizer;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::error::{Result, TrainError};

/// Documents must be strictly longer than this (in characters) to be kept.
pub const MIN_DOCUMENT_CHARS: usize = 128;

pub const DEFAULT_START_TOKEN: &str = "[MASK]";
pub const DEFAULT_END_TOKEN: &str = "[CLS]";
pub const DEFAULT_SEPARATOR_TOKEN: &str = "[SEP]";

pub fn shard_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("tokenized_train_{index}.txt"))
}

/// Ids that open and close every document inside a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentSentinels {
    pub start: u32,
    pub end: u32,
}

impl DocumentSentinels {
    /// Looks both tokens up in the vocabulary once.
    pub fn resolve<T: TextTokenizer + ?Sized>(
        tokenizer: &T,
        start_token: &str,
        end_token: &str,
    ) -> Result<Self> {
        let lookup = |token: &str| {
            tokenizer.token_to_id(token).ok_or_else(|| {
                TrainError::config(format!("sentinel token {token} is not in the vocabulary"))
            })
        };
        Ok(Self {
            start: lookup(start_token)?,
            end: lookup(end_token)?,
        })
    }
}

/// How documents are turned into shard streams.
#[derive(Debug, Clone)]
pub struct ShardOptions {
    pub sentinels: DocumentSentinels,
    /// Token string substituted for every newline.
    pub separator: String,
    pub min_chars: usize,
}

impl ShardOptions {
    pub fn new(sentinels: DocumentSentinels) -> Self {
        Self {
            sentinels,
            separator: DEFAULT_SEPARATOR_TOKEN.to_string(),
            min_chars: MIN_DOCUMENT_CHARS,
        }
    }

    fn prepare(&self, document: &str) -> String {
        document.replace('\n', &format!(" {} ", self.separator))
    }

    fn keeps(&self, prepared: &str) -> bool {
        prepared.chars().count() > self.min_chars
    }
}

/// Outcome for one written shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSummary {
    pub index: usize,
    pub documents: usize,
    pub tokens: usize,
}

/// Document index ranges per shard, using floor-division group sizes.
///
/// Group `i` covers `[size * i, size * (i + 1))` with `size = len / pieces`;
/// documents past `size * pieces` fall in no group.
pub fn shard_ranges(document_count: usize, num_pieces: usize) -> Vec<Range<usize>> {
    let size = document_count / num_pieces.max(1);
    (0..num_pieces).map(|i| size * i..size * (i + 1)).collect()
}

/// Flattens one group of documents into `START ids.. END` runs.
///
/// Returns the stream and the number of documents kept.
pub fn encode_documents<T: TextTokenizer + ?Sized>(
    documents: &[String],
    tokenizer: &T,
    options: &ShardOptions,
) -> Result<(Vec<u32>, usize)> {
    let mut stream = Vec::new();
    let mut kept = 0;
    for document in documents {
        let prepared = options.prepare(document);
        if !options.keeps(&prepared) {
            continue;
        }
        let tokens = tokenizer
            .tokenize(&prepared)
            .map_err(|e| TrainError::data("tokenizing document", e.to_string()))?;
        stream.push(options.sentinels.start);
        stream.extend(tokenizer.convert_tokens_to_ids(&tokens));
        stream.push(options.sentinels.end);
        kept += 1;
    }
    Ok((stream, kept))
}

/// Writes ids as decimal text, each followed by one space.
pub fn write_shard(path: &Path, ids: &[u32]) -> Result<()> {
    let write = || -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        for id in ids {
            write!(writer, "{id} ")?;
        }
        writer.flush()
    };
    write().map_err(|e| TrainError::io_at("writing shard", path, e))
}

pub fn read_shard(path: &Path) -> Result<Vec<u32>> {
    let text =
        std::fs::read_to_string(path).map_err(|e| TrainError::io_at("reading shard", path, e))?;
    text.split_whitespace()
        .map(|item| {
            item.parse::<u32>().map_err(|_| {
                TrainError::data(
                    format!("shard {}", path.display()),
                    format!("'{item}' is not a token id"),
                )
            })
        })
        .collect()
}

/// Token count of a shard without keeping the ids.
pub fn count_tokens(path: &Path) -> Result<usize> {
    let text =
        std::fs::read_to_string(path).map_err(|e| TrainError::io_at("reading shard", path, e))?;
    Ok(text.split_whitespace().count())
}

/// Sum of token counts over shards `0..num_pieces` in `dir`.
pub fn total_tokens(dir: &Path, num_pieces: usize) -> Result<usize> {
    let pb = ProgressBar::new(num_pieces as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} counting tokens {bar:40.cyan/blue} {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let mut total = 0;
    for index in 0..num_pieces {
        total += count_tokens(&shard_path(dir, index))?;
        pb.inc(1);
    }
    pb.finish_and_clear();
    Ok(total)
}

/// Tokenizes `documents` into `num_pieces` shard files under `out_dir`.
pub fn build_shards<T: TextTokenizer + ?Sized>(
    documents: &[String],
    num_pieces: usize,
    tokenizer: &T,
    options: &ShardOptions,
    out_dir: &Path,
) -> Result<Vec<ShardSummary>> {
    if num_pieces == 0 {
        return Err(TrainError::config("num_pieces must be at least 1"));
    }
    std::fs::create_dir_all(out_dir)
        .map_err(|e| TrainError::io_at("creating shard directory", out_dir, e))?;

    let pb = ProgressBar::new(num_pieces as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} shards")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let ranges = shard_ranges(documents.len(), num_pieces);
    let covered = ranges.last().map_or(0, |r| r.end);
    let mut summaries = Vec::with_capacity(num_pieces);
    for (index, range) in ranges.into_iter().enumerate() {
        let (stream, kept) = encode_documents(&documents[range], tokenizer, options)?;
        write_shard(&shard_path(out_dir, index), &stream)?;
        summaries.push(ShardSummary {
            index,
            documents: kept,
            tokens: stream.len(),
        });
        pb.inc(1);
    }
    pb.finish_and_clear();

    let dropped = documents.len() - covered;
    if dropped > 0 {
        tracing::warn!(
            "{} trailing documents do not fit the {} equal shards and were not written",
            dropped,
            num_pieces
        );
    }
    let kept: usize = summaries.iter().map(|s| s.documents).sum();
    let tokens: usize = summaries.iter().map(|s| s.tokens).sum();
    tracing::info!(
        "Built {} shards in {}: {} documents kept, {} tokens",
        num_pieces,
        out_dir.display(),
        kept,
        tokens
    );
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One token per character; sentinels and separator get fixed ids.
    struct CharTokenizer;

    impl TextTokenizer for CharTokenizer {
        fn tokenize(&self, text: &str) -> anyhow::Result<Vec<String>> {
            Ok(text
                .split_whitespace()
                .flat_map(|word| {
                    if word == DEFAULT_SEPARATOR_TOKEN {
                        vec![word.to_string()]
                    } else {
                        word.chars().map(String::from).collect()
                    }
                })
                .collect())
        }

        fn convert_tokens_to_ids(&self, tokens: &[String]) -> Vec<u32> {
            tokens
                .iter()
                .map(|t| self.token_to_id(t).unwrap_or(100))
                .collect()
        }

        fn token_to_id(&self, token: &str) -> Option<u32> {
            match token {
                "[CLS]" => Some(101),
                "[SEP]" => Some(102),
                "[MASK]" => Some(103),
                t if t.chars().count() == 1 => t.chars().next().map(|c| c as u32),
                _ => None,
            }
        }
    }

    fn options() -> ShardOptions {
        let sentinels =
            DocumentSentinels::resolve(&CharTokenizer, DEFAULT_START_TOKEN, DEFAULT_END_TOKEN)
                .expect("sentinels");
        ShardOptions::new(sentinels)
    }

    #[test]
    fn short_documents_are_dropped() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let docs = vec!["short".to_string(), "a".repeat(200)];
        let summaries = build_shards(&docs, 1, &CharTokenizer, &options(), dir.path())?;

        assert_eq!(summaries[0].documents, 1);
        let ids = read_shard(&shard_path(dir.path(), 0))?;
        let mut expected = vec![103];
        expected.extend(std::iter::repeat('a' as u32).take(200));
        expected.push(101);
        assert_eq!(ids, expected);
        Ok(())
    }

    #[test]
    fn length_threshold_is_strict() -> anyhow::Result<()> {
        let docs = vec!["x".repeat(128), "y".repeat(129)];
        let (stream, kept) = encode_documents(&docs, &CharTokenizer, &options())?;
        assert_eq!(kept, 1);
        assert!(!stream.contains(&('x' as u32)));
        Ok(())
    }

    #[test]
    fn newlines_become_separator_tokens() -> anyhow::Result<()> {
        let doc = format!("{}\n{}", "a".repeat(70), "b".repeat(70));
        let (stream, _) = encode_documents(&[doc], &CharTokenizer, &options())?;
        assert_eq!(stream.iter().filter(|&&id| id == 102).count(), 1);
        assert_eq!(stream[71], 102);
        Ok(())
    }

    #[test]
    fn sentinels_balance_per_shard() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let docs: Vec<String> = (0..7)
            .map(|i| if i % 3 == 0 { "tiny".into() } else { "z".repeat(150 + i) })
            .collect();
        let summaries = build_shards(&docs, 2, &CharTokenizer, &options(), dir.path())?;

        for summary in &summaries {
            let ids = read_shard(&shard_path(dir.path(), summary.index))?;
            let starts = ids.iter().filter(|&&id| id == 103).count();
            let ends = ids.iter().filter(|&&id| id == 101).count();
            assert_eq!(starts, summary.documents);
            assert_eq!(ends, summary.documents);
            assert_eq!(ids.len(), summary.tokens);
        }
        Ok(())
    }

    #[test]
    fn floor_division_slicing() {
        assert_eq!(shard_ranges(10, 3), vec![0..3, 3..6, 6..9]);
        assert_eq!(shard_ranges(2, 4), vec![0..0, 0..0, 0..0, 0..0]);
        assert_eq!(shard_ranges(8, 2), vec![0..4, 4..8]);
    }

    #[test]
    fn rebuild_is_byte_identical() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let docs: Vec<String> = (0..6)
            .map(|i| format!("{}\n{}", "q".repeat(100), i).repeat(2))
            .collect();

        build_shards(&docs, 3, &CharTokenizer, &options(), dir.path())?;
        let first: Vec<Vec<u8>> = (0..3)
            .map(|i| std::fs::read(shard_path(dir.path(), i)))
            .collect::<std::io::Result<_>>()?;

        build_shards(&docs, 3, &CharTokenizer, &options(), dir.path())?;
        for (i, bytes) in first.iter().enumerate() {
            assert_eq!(&std::fs::read(shard_path(dir.path(), i))?, bytes);
        }
        Ok(())
    }

    #[test]
    fn shard_file_format() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("s.txt");
        write_shard(&path, &[103, 7, 101])?;
        assert_eq!(std::fs::read_to_string(&path)?, "103 7 101 ");
        assert_eq!(count_tokens(&path)?, 3);

        write_shard(&shard_path(dir.path(), 0), &[1, 2])?;
        write_shard(&shard_path(dir.path(), 1), &[3, 4, 5, 6])?;
        assert_eq!(total_tokens(dir.path(), 2)?, 6);
        assert!(matches!(
            total_tokens(dir.path(), 3),
            Err(TrainError::Io { .. })
        ));
        Ok(())
    }

    #[test]
    fn garbage_in_shard_is_a_data_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("s.txt");
        std::fs::write(&path, "1 2 x 4")?;
        assert!(matches!(read_shard(&path), Err(TrainError::Data { .. })));
        Ok(())
    }

    #[test]
    fn missing_sentinel_is_a_config_error() {
        let result = DocumentSentinels::resolve(&CharTokenizer, "[BOS]", DEFAULT_END_TOKEN);
        assert!(matches!(result, Err(TrainError::Configuration(_))));
    }
}
