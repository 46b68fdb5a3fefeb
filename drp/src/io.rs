//! Frame encoding and access to previously acquired frames.

use std::cell::OnceCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::file_format::SerdeFormat;
use serde::{Deserialize, Serialize};

use crate::batch::Frame;
use crate::error::{Error, Result};
use crate::image::{Image, ImageDimensions};
use crate::metadata::Metadata;

/// Reads and writes frames in one on-disk format.
pub trait FrameCodec {
    /// File extension without the leading dot.
    fn extension(&self) -> &str;

    fn load(&self, path: &Path) -> Result<Frame>;

    fn save(&self, frame: &Frame, path: &Path) -> Result<()>;

    fn load_metadata(&self, path: &Path) -> Result<Metadata> {
        Ok(self.load(path)?.metadata)
    }

    fn file_name(&self, stem: &str) -> String {
        format!("{}.{}", stem, self.extension())
    }
}

#[derive(Serialize)]
struct StoredFrameRef<'a> {
    dimensions: ImageDimensions,
    pixels: &'a [f32],
    metadata: &'a Metadata,
}

#[derive(Deserialize)]
struct StoredFrame {
    dimensions: ImageDimensions,
    pixels: Vec<f32>,
    metadata: Metadata,
}

/// `.frame` files: bincode payload compressed with lz4, size-prefixed.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinFrameCodec;

impl BinFrameCodec {
    pub const EXTENSION: &'static str = "frame";

    pub fn encode(frame: &Frame) -> anyhow::Result<Vec<u8>> {
        let stored = StoredFrameRef {
            dimensions: frame.image.dimensions(),
            pixels: frame.image.pixels(),
            metadata: &frame.metadata,
        };
        common::serde::serialize(&stored, SerdeFormat::Bin)
    }

    pub fn decode(bytes: &[u8]) -> anyhow::Result<Frame> {
        let stored: StoredFrame = common::serde::deserialize(bytes, SerdeFormat::Bin)?;
        let image = Image::try_from_pixels(stored.dimensions, stored.pixels)?;
        Ok(Frame::new(image, stored.metadata))
    }
}

impl FrameCodec for BinFrameCodec {
    fn extension(&self) -> &str {
        Self::EXTENSION
    }

    fn load(&self, path: &Path) -> Result<Frame> {
        let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
        Self::decode(&bytes).map_err(|e| Error::codec(path, e))
    }

    fn save(&self, frame: &Frame, path: &Path) -> Result<()> {
        let bytes = Self::encode(frame).map_err(|e| Error::codec(path, e))?;
        common::file_utils::ensure_parent_dir(path).map_err(|e| Error::io(path, e))?;
        fs::write(path, bytes).map_err(|e| Error::io(path, e))
    }
}

/// A previously acquired frame known by path and metadata only.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub path: PathBuf,
    pub metadata: Metadata,
}

/// Queryable record of frames from earlier acquisitions, used to build
/// calibration artifacts.
pub trait HistorySource {
    fn entries(&self) -> Result<Vec<HistoryEntry>>;

    fn load(&self, entry: &HistoryEntry) -> Result<Frame>;
}

/// History read from `<root>/<night>/<sub_dir>` for every night directory
/// under `root`.
///
/// The directories are scanned on the first successful `entries` call; later
/// calls return that snapshot, so calibrators sharing one source decode each
/// history file once per run.
pub struct DirectoryHistory {
    root: PathBuf,
    sub_dir: PathBuf,
    codec: Arc<dyn FrameCodec>,
    scanned: OnceCell<Vec<HistoryEntry>>,
}

impl DirectoryHistory {
    pub fn new(
        root: impl Into<PathBuf>,
        sub_dir: impl Into<PathBuf>,
        codec: Arc<dyn FrameCodec>,
    ) -> Self {
        Self {
            root: root.into(),
            sub_dir: sub_dir.into(),
            codec,
            scanned: OnceCell::new(),
        }
    }

    fn night_dirs(&self) -> Result<Vec<PathBuf>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut dirs: Vec<PathBuf> = fs::read_dir(&self.root)
            .map_err(|e| Error::io(&self.root, e))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();
        Ok(dirs)
    }

    fn scan(&self) -> Result<Vec<HistoryEntry>> {
        let extension = self.codec.extension();
        let mut entries = Vec::new();

        for night_dir in self.night_dirs()? {
            let dir = night_dir.join(&self.sub_dir);
            let files = common::file_utils::files_with_extensions(&dir, &[extension])
                .map_err(|e| Error::io(&dir, e))?;

            for path in files {
                match self.codec.load_metadata(&path) {
                    Ok(metadata) => entries.push(HistoryEntry { path, metadata }),
                    Err(error) => {
                        tracing::warn!("Skipping unreadable history file: {:#}", error)
                    }
                }
            }
        }

        tracing::debug!(
            root = %self.root.display(),
            entries = entries.len(),
            "Scanned frame history"
        );

        Ok(entries)
    }
}

impl HistorySource for DirectoryHistory {
    fn entries(&self) -> Result<Vec<HistoryEntry>> {
        if let Some(entries) = self.scanned.get() {
            return Ok(entries.clone());
        }
        let entries = self.scan()?;
        Ok(self.scanned.get_or_init(|| entries).clone())
    }

    fn load(&self, entry: &HistoryEntry) -> Result<Frame> {
        self.codec.load(&entry.path)
    }
}
