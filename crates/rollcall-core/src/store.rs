//! Flat-directory store of labeled face samples.
//!
//! Each sample is one normalized 200×200 grayscale image whose file name
//! carries its metadata: `{name}-{sequence}-{identifier}.png`. The directory
//! is the only source of truth for which identifiers are taken.

use crate::preprocess;
use crate::types::{Identifier, LabelMap, SampleMeta};
use image::GrayImage;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Extension used for newly written samples.
pub const SAMPLE_EXTENSION: &str = "png";

/// Extensions accepted when listing an existing corpus.
const READABLE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "pgm"];

const FIELD_DELIMITER: char = '-';

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identifier {0} is already enrolled; choose a different identifier")]
    DuplicateIdentifier(Identifier),
    #[error("invalid name {0:?}: names must be non-empty and must not contain '-' or path separators")]
    InvalidName(String),
    #[error("malformed sample {path}: {reason}")]
    MalformedSample { path: PathBuf, reason: String },
    #[error("sample store I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A parsed sample file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRecord {
    pub meta: SampleMeta,
    pub path: PathBuf,
}

/// Result of listing the store: parsed samples plus the count of skipped files.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    /// Sorted by file name.
    pub samples: Vec<SampleRecord>,
    pub skipped: usize,
}

/// One enrolled person as seen in the corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonSummary {
    pub identifier: Identifier,
    pub name: String,
    pub samples: usize,
}

/// Directory-backed sample store.
pub struct SampleStore {
    dir: PathBuf,
    /// Identifiers reserved by this instance that may have no samples yet.
    reserved: HashSet<Identifier>,
}

impl SampleStore {
    /// Open the store at `dir`, creating the directory if it does not exist.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            reserved: HashSet::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Claim `id` for a new enrollment.
    ///
    /// Fails if any stored sample already uses `id`, or if this store has
    /// already handed it out.
    pub fn reserve_identifier(&mut self, id: Identifier) -> Result<(), StoreError> {
        if self.reserved.contains(&id) || self.has_identifier(id)? {
            tracing::warn!(identifier = %id, "identifier already enrolled");
            return Err(StoreError::DuplicateIdentifier(id));
        }
        self.reserved.insert(id);
        Ok(())
    }

    /// Validate `name`, reserve `id`, and start a capture run.
    ///
    /// Nothing is written until [`Enrollment::append`] is called, so a
    /// rejected identifier never leaves samples behind.
    pub fn begin_enrollment(&mut self, name: &str, id: Identifier) -> Result<Enrollment, StoreError> {
        validate_name(name)?;
        self.reserve_identifier(id)?;
        tracing::info!(name, identifier = %id, "enrollment started");
        Ok(Enrollment {
            dir: self.dir.clone(),
            name: name.to_string(),
            identifier: id,
            next_sequence: 1,
        })
    }

    /// Parse every sample file name in the store.
    ///
    /// Files whose names do not follow the `{name}-{sequence}-{identifier}`
    /// contract are logged and skipped; they never abort the listing.
    pub fn list_all(&self) -> Result<Listing, StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.dir.clone(),
            source,
        };

        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                paths.push(entry.path());
            }
        }
        paths.sort();

        let mut listing = Listing::default();
        for path in paths {
            match parse_sample_path(&path) {
                Ok(meta) => listing.samples.push(SampleRecord { meta, path }),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping malformed sample");
                    listing.skipped += 1;
                }
            }
        }
        Ok(listing)
    }

    /// Decode one stored sample as grayscale.
    pub fn load_sample(&self, record: &SampleRecord) -> Result<GrayImage, StoreError> {
        let img = image::open(&record.path).map_err(|e| StoreError::MalformedSample {
            path: record.path.clone(),
            reason: e.to_string(),
        })?;
        Ok(img.to_luma8())
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        Ok(self.list_all()?.samples.len())
    }

    pub fn has_name(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.list_all()?.samples.iter().any(|s| s.meta.name == name))
    }

    pub fn has_identifier(&self, id: Identifier) -> Result<bool, StoreError> {
        Ok(self
            .list_all()?
            .samples
            .iter()
            .any(|s| s.meta.identifier == id))
    }

    pub fn names(&self) -> Result<BTreeSet<String>, StoreError> {
        Ok(self
            .list_all()?
            .samples
            .into_iter()
            .map(|s| s.meta.name)
            .collect())
    }

    pub fn identifiers(&self) -> Result<BTreeSet<Identifier>, StoreError> {
        Ok(self
            .list_all()?
            .samples
            .iter()
            .map(|s| s.meta.identifier)
            .collect())
    }

    /// Identifier → name map for recognition.
    ///
    /// If tampering left one identifier under several names, the first in
    /// file-name order wins and the conflict is logged.
    pub fn label_map(&self) -> Result<LabelMap, StoreError> {
        let mut labels = LabelMap::default();
        for sample in self.list_all()?.samples {
            if let Some(existing) = labels.insert(sample.meta.identifier, &sample.meta.name) {
                tracing::warn!(
                    identifier = %sample.meta.identifier,
                    kept = existing,
                    ignored = %sample.meta.name,
                    "identifier stored under more than one name"
                );
            }
        }
        Ok(labels)
    }

    /// Enrolled persons with their sample counts, ordered by identifier.
    pub fn summary(&self) -> Result<Vec<PersonSummary>, StoreError> {
        let mut people: BTreeMap<Identifier, PersonSummary> = BTreeMap::new();
        for sample in self.list_all()?.samples {
            people
                .entry(sample.meta.identifier)
                .or_insert_with(|| PersonSummary {
                    identifier: sample.meta.identifier,
                    name: sample.meta.name.clone(),
                    samples: 0,
                })
                .samples += 1;
        }
        Ok(people.into_values().collect())
    }
}

/// An in-progress capture run for one person.
#[derive(Debug)]
pub struct Enrollment {
    dir: PathBuf,
    name: String,
    identifier: Identifier,
    next_sequence: u32,
}

impl Enrollment {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identifier(&self) -> Identifier {
        self.identifier
    }

    /// Number of samples written so far in this run.
    pub fn captured(&self) -> u32 {
        self.next_sequence - 1
    }

    /// Normalize and persist one face crop.
    ///
    /// The sequence number advances only after the file is written.
    pub fn append(&mut self, face: &GrayImage) -> Result<SampleMeta, StoreError> {
        let meta = SampleMeta {
            name: self.name.clone(),
            sequence: self.next_sequence,
            identifier: self.identifier,
        };
        let path = self.dir.join(sample_file_name(&meta));

        let normalized = preprocess::normalize_face(face);
        normalized.save(&path).map_err(|e| StoreError::Io {
            path: path.clone(),
            source: std::io::Error::other(e),
        })?;

        tracing::debug!(path = %path.display(), sequence = meta.sequence, "sample written");
        self.next_sequence += 1;
        Ok(meta)
    }
}

/// `{name}-{sequence}-{identifier}.png`
pub fn sample_file_name(meta: &SampleMeta) -> String {
    format!(
        "{}{FIELD_DELIMITER}{}{FIELD_DELIMITER}{}.{SAMPLE_EXTENSION}",
        meta.name, meta.sequence, meta.identifier
    )
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    let bad = name.is_empty()
        || name.trim() != name
        || name.contains(FIELD_DELIMITER)
        || name.contains(['/', '\\'])
        || name.starts_with('.');
    if bad {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Parse `{name}-{sequence}-{identifier}.{ext}`.
///
/// Extra middle fields are tolerated: `anne-marie-1-7.png` is sample 1 of
/// identifier 7, named `anne`.
pub fn parse_sample_path(path: &Path) -> Result<SampleMeta, StoreError> {
    let malformed = |reason: &str| StoreError::MalformedSample {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| malformed("missing extension"))?;
    if !READABLE_EXTENSIONS.contains(&ext.as_str()) {
        return Err(malformed("not an image extension"));
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| malformed("file name is not UTF-8"))?;

    // Older corpora may hold names with '-' in them; the name is always the
    // first field and the identifier always the last.
    let fields: Vec<&str> = stem.split(FIELD_DELIMITER).collect();
    let [name, .., sequence, identifier] = fields.as_slice() else {
        return Err(malformed("expected at least three '-'-separated fields"));
    };

    if name.is_empty() {
        return Err(malformed("empty name"));
    }
    let sequence: u32 = sequence
        .parse()
        .ok()
        .filter(|&s| s > 0)
        .ok_or_else(|| malformed("sequence is not a positive integer"))?;
    let identifier: Identifier = identifier
        .parse()
        .map_err(|_| malformed("identifier is not numeric"))?;

    Ok(SampleMeta {
        name: name.to_string(),
        sequence,
        identifier,
    })
}
