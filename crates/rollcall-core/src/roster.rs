//! Enrollment roster — the ordered store of known identities.
//!
//! Built once at startup from a directory of reference images, one
//! identity per image, identity name = filename stem. Iteration order is
//! enrollment order, which the matcher's tie-break depends on.

use crate::engine::FaceEngine;
use crate::types::Descriptor;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("cannot read reference directory {path}: {source}")]
    DirUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// An enrolled identity: a name bound to exactly one reference descriptor.
#[derive(Debug, Clone)]
pub struct EnrolledFace {
    pub name: String,
    pub descriptor: Descriptor,
}

/// Ordered mapping from identity name to reference descriptor.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    entries: Vec<EnrolledFace>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `descriptor`.
    ///
    /// A duplicate name replaces the earlier descriptor in place, keeping
    /// the original enrollment position. Returns true if an existing entry
    /// was replaced.
    pub fn insert(&mut self, name: String, descriptor: Descriptor) -> bool {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.name == name) {
            existing.descriptor = descriptor;
            true
        } else {
            self.entries.push(EnrolledFace { name, descriptor });
            false
        }
    }

    /// Entries in enrollment order.
    pub fn iter(&self) -> impl Iterator<Item = &EnrolledFace> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Enroll every reference image in `dir`.
    ///
    /// Non-image files are ignored. An image that cannot be decoded, or in
    /// which no face is detected, is skipped with a warning and enrollment
    /// continues; the identity is simply absent from the roster. An
    /// unreadable directory is fatal — no partial roster is returned.
    ///
    /// Directory entries are processed in filename order so enrollment
    /// order (and with it the matcher tie-break) is reproducible.
    pub fn enroll_dir<E: FaceEngine>(dir: &Path, engine: &mut E) -> Result<Roster, RosterError> {
        let reader = std::fs::read_dir(dir).map_err(|source| RosterError::DirUnreadable {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = reader
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut roster = Roster::new();
        for path in &paths {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let gray = match image::open(path) {
                Ok(img) => img.to_luma8(),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "cannot decode reference image, skipping");
                    continue;
                }
            };
            let (width, height) = gray.dimensions();

            let regions = match engine.detect(gray.as_raw(), width, height) {
                Ok(regions) => regions,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "detection failed on reference image, skipping");
                    continue;
                }
            };

            // Highest-confidence face (regions arrive confidence-sorted).
            let Some(face) = regions.first() else {
                tracing::warn!(path = %path.display(), "no face found in reference image, skipping");
                continue;
            };

            let descriptor = match engine.encode(gray.as_raw(), width, height, std::slice::from_ref(face)) {
                Ok(mut descriptors) if !descriptors.is_empty() => descriptors.remove(0),
                Ok(_) => {
                    tracing::warn!(path = %path.display(), "encoder returned no descriptor, skipping");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "encoding failed on reference image, skipping");
                    continue;
                }
            };

            if roster.insert(name.to_string(), descriptor) {
                tracing::warn!(name, path = %path.display(), "duplicate reference name, keeping the later image");
            } else {
                tracing::debug!(name, confidence = face.confidence, "enrolled identity");
            }
        }

        tracing::info!(count = roster.len(), dir = %dir.display(), "roster built");
        Ok(roster)
    }
}
