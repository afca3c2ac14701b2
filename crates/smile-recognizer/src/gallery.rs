//! Enrolled face samples.
//!
//! Each sample is a file `<username>_<index>.dat` holding the raw feature
//! vector as little-endian `f32`s. The username is everything before the
//! first `_` of the file stem.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{RecognizerError, RecognizerResult};

const SAMPLE_EXTENSION: &str = "dat";

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub username: String,
    pub features: Vec<f32>,
}

/// Best gallery hit for a probe vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub username: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, Default)]
pub struct Gallery {
    samples: Vec<Sample>,
}

impl Gallery {
    pub fn from_samples(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// Read every sample in `dir`. A missing directory is an empty gallery;
    /// unreadable or malformed files are skipped.
    pub fn load(dir: &Path) -> RecognizerResult<Self> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(dir = %dir.display(), "face gallery directory does not exist");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(RecognizerError::Gallery {
                    path: dir.to_path_buf(),
                    source,
                })
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == SAMPLE_EXTENSION))
            .collect();
        paths.sort();

        let mut samples = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(username) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(username_from_stem)
                .filter(|u| !u.is_empty())
            else {
                warn!(file = %path.display(), "sample file name has no username");
                continue;
            };
            match std::fs::read(&path) {
                Ok(bytes) => match decode_features(&bytes) {
                    Some(features) => samples.push(Sample {
                        username: username.to_string(),
                        features,
                    }),
                    None => warn!(file = %path.display(), len = bytes.len(), "malformed sample skipped"),
                },
                Err(e) => warn!(file = %path.display(), error = %e, "unreadable sample skipped"),
            }
        }
        debug!(dir = %dir.display(), samples = samples.len(), "face gallery loaded");
        Ok(Self { samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Highest-similarity sample across the whole gallery.
    pub fn best_match(&self, probe: &[f32]) -> Option<Match> {
        self.samples
            .iter()
            .map(|s| Match {
                username: s.username.clone(),
                similarity: cosine_similarity(probe, &s.features),
            })
            .max_by(|a, b| a.similarity.total_cmp(&b.similarity))
    }
}

/// The part of a sample's file stem before the first `_`.
pub fn username_from_stem(stem: &str) -> &str {
    stem.split('_').next().unwrap_or_default()
}

/// Cosine similarity in `[-1, 1]`. Mismatched lengths or zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// A username must survive the round trip through a sample file name.
pub fn validate_username(username: &str) -> RecognizerResult<()> {
    let bad = username.is_empty()
        || username.contains(['_', '/', '\\', '\0'])
        || username.starts_with('.');
    if bad {
        return Err(RecognizerError::InvalidUsername(username.to_string()));
    }
    Ok(())
}

/// Write one sample as `<dir>/<username>_<index>.dat`, creating `dir`.
pub fn write_sample(dir: &Path, username: &str, index: usize, features: &[f32]) -> RecognizerResult<PathBuf> {
    validate_username(username)?;
    let io_error = |path: &Path, source| RecognizerError::Gallery {
        path: path.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;

    let path = dir.join(format!("{username}_{index}.{SAMPLE_EXTENSION}"));
    let bytes: Vec<u8> = features.iter().flat_map(|f| f.to_le_bytes()).collect();
    std::fs::write(&path, bytes).map_err(|e| io_error(&path, e))?;
    Ok(path)
}

fn decode_features(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}
