//! Corpus loading: a JSON array of documents, optionally compressed.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use zstd::stream::read::Decoder as ZstdDecoder;

use crate::error::{Result, TrainError};

fn open_compressed_file(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).map_err(|e| TrainError::io_at("opening corpus", path, e))?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");

    match ext {
        "gz" => Ok(Box::new(GzDecoder::new(file))),
        "zst" => Ok(Box::new(
            ZstdDecoder::new(file).map_err(|e| TrainError::io_at("opening corpus", path, e))?,
        )),
        _ => Ok(Box::new(file)),
    }
}

/// Reads every document from `path`. Embedded newlines are preserved.
pub fn load_corpus(path: &Path) -> Result<Vec<String>> {
    let reader = BufReader::new(open_compressed_file(path)?);
    let documents: Vec<String> = serde_json::from_reader(reader).map_err(|e| {
        if e.is_io() {
            TrainError::io_at("reading corpus", path, e.into())
        } else {
            TrainError::data(
                format!("corpus {}", path.display()),
                format!("expected a JSON array of strings: {e}"),
            )
        }
    })?;
    tracing::info!("Read {} documents from {}", documents.len(), path.display());
    Ok(documents)
}
