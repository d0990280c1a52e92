//! Graph-file encoding: JSON, optionally wrapped in a Brotli stream.
//!
//! Compression is controlled at write time by the
//! `INTEGRATION_FILE_COMPRESSION_ENABLED` environment variable; readers
//! detect the format per file, so mixed staging directories stay readable.

use std::io::{Read, Write};

use graphbeam_types::{FlushedFile, IntegrationError};

use crate::layout::{StorageLayout, WalkEntry};

/// Non-empty value enables Brotli compression of flushed files.
pub const COMPRESSION_ENV_VAR: &str = "INTEGRATION_FILE_COMPRESSION_ENABLED";

const BROTLI_BUFFER_SIZE: usize = 4096;
const BROTLI_QUALITY: u32 = 5;
const BROTLI_LGWIN: u32 = 22;

/// Whether flushed files should be written Brotli-compressed.
#[must_use]
pub fn compression_enabled() -> bool {
    std::env::var(COMPRESSION_ENV_VAR)
        .map(|v| !v.is_empty())
        .unwrap_or(false)
}

/// Compress bytes into a Brotli stream.
#[must_use]
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut writer = brotli::CompressorWriter::new(
            &mut out,
            BROTLI_BUFFER_SIZE,
            BROTLI_QUALITY,
            BROTLI_LGWIN,
        );
        writer.write_all(data).expect("in-memory brotli write");
    }
    out
}

/// Decompress a Brotli stream.
///
/// # Errors
///
/// Returns an `io` error when the input is not a valid Brotli stream.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, IntegrationError> {
    let mut out = Vec::new();
    let mut reader = brotli::Decompressor::new(data, BROTLI_BUFFER_SIZE);
    reader.read_to_end(&mut out)?;
    Ok(out)
}

/// Serialize a flushed file, honoring the compression toggle.
///
/// # Errors
///
/// Returns an `io` error on serialization failure.
pub fn encode(file: &FlushedFile) -> Result<Vec<u8>, IntegrationError> {
    let json = serde_json::to_vec(file)?;
    if compression_enabled() {
        Ok(compress(&json))
    } else {
        Ok(json)
    }
}

/// Parse a flushed file, transparently decompressing when needed.
///
/// Plain JSON is tried first; anything that fails to parse is treated as a
/// Brotli stream.
///
/// # Errors
///
/// Returns an `io` error when the bytes are neither valid JSON nor a Brotli
/// stream containing valid JSON.
pub fn decode(data: &[u8]) -> Result<FlushedFile, IntegrationError> {
    match serde_json::from_slice(data) {
        Ok(file) => Ok(file),
        Err(json_err) => {
            let Ok(decompressed) = decompress(data) else {
                return Err(json_err.into());
            };
            Ok(serde_json::from_slice(&decompressed)?)
        }
    }
}

/// Lazily pair every flushed file under `graph/` with its parsed content.
///
/// Files are yielded in walk order; each is read and decoded only when the
/// iterator reaches it.
///
/// # Errors
///
/// Returns an `io` error when the graph directory cannot be walked; per-file
/// read or decode failures surface as `Err` items.
pub fn graph_files(
    layout: &StorageLayout,
) -> Result<impl Iterator<Item = Result<(WalkEntry, FlushedFile), IntegrationError>>, IntegrationError>
{
    let entries = layout.walk_dir(&layout.graph_dir())?;
    Ok(entries.into_iter().map(|entry| {
        let bytes = std::fs::read(&entry.file_path)?;
        let file = decode(&bytes)?;
        Ok((entry, file))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphbeam_types::Entity;

    fn sample() -> FlushedFile {
        FlushedFile::Entities {
            entities: vec![
                Entity::new("k1", "acme_user", "User").with_property("displayName", "Alice"),
                Entity::new("k2", "acme_user", "User"),
            ],
        }
    }

    #[test]
    fn brotli_roundtrip() {
        let data = b"a staged graph object file, repeated, repeated, repeated";
        let compressed = compress(data);
        let decompressed = decompress(&compressed).unwrap();
        assert_eq!(data.as_slice(), decompressed.as_slice());
    }

    #[test]
    fn brotli_compresses_repetitive_data() {
        let data = vec![42u8; 10_000];
        let compressed = compress(&data);
        assert!(compressed.len() < data.len() / 2);
    }

    #[test]
    fn decode_detects_plain_json() {
        let file = sample();
        let plain = serde_json::to_vec(&file).unwrap();
        assert_eq!(decode(&plain).unwrap(), file);
    }

    #[test]
    fn decode_detects_compressed_json() {
        let file = sample();
        let compressed = compress(&serde_json::to_vec(&file).unwrap());
        assert_eq!(decode(&compressed).unwrap(), file);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode(b"\x00\xffnot a file").is_err());
    }

    #[test]
    fn graph_files_pairs_paths_with_parsed_content() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().join("staging"));
        layout.reset().unwrap();
        let step_dir = layout.graph_dir().join("my-step/entities");
        std::fs::create_dir_all(&step_dir).unwrap();
        let file = sample();
        std::fs::write(
            step_dir.join("000001.json"),
            serde_json::to_vec(&file).unwrap(),
        )
        .unwrap();

        let parsed: Vec<_> = graph_files(&layout)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].1, file);
        assert!(parsed[0].0.file_path.ends_with("000001.json"));
    }

    #[test]
    fn encode_honors_env_toggle() {
        let file = sample();

        std::env::remove_var(COMPRESSION_ENV_VAR);
        let plain = encode(&file).unwrap();
        assert_eq!(serde_json::from_slice::<FlushedFile>(&plain).unwrap(), file);

        std::env::set_var(COMPRESSION_ENV_VAR, "1");
        let compressed = encode(&file).unwrap();
        assert!(serde_json::from_slice::<FlushedFile>(&compressed).is_err());
        assert_eq!(decode(&compressed).unwrap(), file);
        std::env::remove_var(COMPRESSION_ENV_VAR);
    }
}
