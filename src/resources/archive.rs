//! Archive extraction for the `unzip` action.
//!
//! Format is chosen by filename suffix, case-insensitively.

use crate::core::error::TaskError;
use std::fs::File;
use std::path::Path;
use tracing::debug;

/// Archive container formats understood by [`extract`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarXz,
    TarGz,
    Zip,
    SevenZip,
}

impl ArchiveFormat {
    /// Detect the format from the file name, or `None` if unsupported.
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        if name.ends_with(".tar.xz") {
            Some(Self::TarXz)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".7z") {
            Some(Self::SevenZip)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TarXz => "tar.xz",
            Self::TarGz => "tar.gz",
            Self::Zip => "zip",
            Self::SevenZip => "7z",
        };
        write!(f, "{}", s)
    }
}

/// Extract `archive` into `dest`, creating `dest` if absent.
///
/// The archive's internal directory structure is reproduced under `dest`.
pub fn extract(archive: &Path, dest: &Path) -> Result<(), TaskError> {
    let format = ArchiveFormat::detect(archive).ok_or_else(|| {
        TaskError::UnsupportedArchiveFormat {
            path: archive.to_path_buf(),
        }
    })?;

    if !archive.is_file() {
        return Err(TaskError::SourceNotFound {
            path: archive.to_path_buf(),
        });
    }

    std::fs::create_dir_all(dest).map_err(|e| TaskError::io(dest, e))?;
    debug!(archive = %archive.display(), dest = %dest.display(), %format, "extracting");

    let failure = |detail: String| TaskError::ArchiveFailure {
        path: archive.to_path_buf(),
        detail,
    };

    match format {
        ArchiveFormat::TarXz => {
            let file = File::open(archive).map_err(|e| TaskError::io(archive, e))?;
            let mut tar = tar::Archive::new(xz2::read::XzDecoder::new(file));
            tar.unpack(dest).map_err(|e| failure(e.to_string()))
        }
        ArchiveFormat::TarGz => {
            let file = File::open(archive).map_err(|e| TaskError::io(archive, e))?;
            let mut tar = tar::Archive::new(flate2::read::GzDecoder::new(file));
            tar.unpack(dest).map_err(|e| failure(e.to_string()))
        }
        ArchiveFormat::Zip => {
            let file = File::open(archive).map_err(|e| TaskError::io(archive, e))?;
            let mut zip = zip::ZipArchive::new(file).map_err(|e| failure(e.to_string()))?;
            zip.extract(dest).map_err(|e| failure(e.to_string()))
        }
        ArchiveFormat::SevenZip => {
            sevenz_rust::decompress_file(archive, dest).map_err(|e| failure(e.to_string()))
        }
    }
}
