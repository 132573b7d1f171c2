//! Image persistence.
//!
//! Captured stills land under `<pictures>/security/` as
//! `front_<ddMMyyyy_HHmmss>_<suffix>.jpg`. The name is reserved on disk when it
//! is generated (exclusive create), so two captures in the same second can
//! never collide. Files are write-once: nothing here rewrites or removes them.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rand::Rng;

use crate::error::CaptureResult;
use crate::frame::StillFrame;

pub const SECURITY_SUBDIR: &str = "security";
pub const FILE_PREFIX: &str = "front_";
pub const FILE_EXTENSION: &str = "jpg";
/// `ddMMyyyy_HHmmss` in local time.
pub const TIMESTAMP_FORMAT: &str = "%d%m%Y_%H%M%S";

const MAX_NAME_ATTEMPTS: usize = 16;

/// A still that has been written to durable storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistedImage {
    pub path: PathBuf,
    pub byte_length: u64,
}

#[derive(Clone, Debug)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    /// Store rooted at `<pictures_dir>/security`, created if absent.
    pub fn new(pictures_dir: &Path) -> io::Result<Self> {
        let root = pictures_dir.join(SECURITY_SUBDIR);
        if !root.exists() {
            fs::create_dir_all(&root)?;
            log::info!("image folder created at {}", root.display());
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Generate and reserve a unique target path for `session_id`.
    pub fn begin_naming(&self, session_id: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.root)?;
        let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
        let mut rng = rand::thread_rng();
        for _ in 0..MAX_NAME_ATTEMPTS {
            let suffix: u64 = rng.gen();
            let path = self.root.join(format!(
                "{}{}_{}.{}",
                FILE_PREFIX, timestamp, suffix, FILE_EXTENSION
            ));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {
                    log::debug!(
                        "session {}: image file reserved at {}",
                        session_id,
                        path.display()
                    );
                    return Ok(path);
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free image name after {} attempts", MAX_NAME_ATTEMPTS),
        ))
    }

    /// Write the whole frame to `path`.
    ///
    /// The frame is consumed and released exactly once on every outcome. A
    /// failed write may leave the reserved, empty file behind.
    pub fn save(&self, path: &Path, frame: StillFrame) -> CaptureResult<PersistedImage> {
        let written = write_atomic(path, frame.bytes());
        let byte_length = frame.byte_len() as u64;
        drop(frame);
        written?;
        Ok(PersistedImage {
            path: path.to_path_buf(),
            byte_length,
        })
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)
}
