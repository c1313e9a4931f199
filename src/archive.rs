use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// The four places a processed inbox file can end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveLocation {
    Imported,
    ExactDuplicates,
    LogicalDuplicates,
    Unrecognized,
}

impl ArchiveLocation {
    pub const ALL: [ArchiveLocation; 4] = [
        Self::Imported,
        Self::ExactDuplicates,
        Self::LogicalDuplicates,
        Self::Unrecognized,
    ];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Imported => "imported",
            Self::ExactDuplicates => "exact_duplicates",
            Self::LogicalDuplicates => "logical_duplicates",
            Self::Unrecognized => "unrecognized",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveLayout {
    root: PathBuf,
}

impl ArchiveLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, location: ArchiveLocation) -> PathBuf {
        self.root.join(location.dir_name())
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for location in ArchiveLocation::ALL {
            fs::create_dir_all(self.dir(location))?;
        }
        Ok(())
    }

    /// Moves `file` into `location` without overwriting anything already there.
    /// Returns the final path.
    pub fn move_into(&self, file: &Path, location: ArchiveLocation) -> Result<PathBuf> {
        let target_dir = self.dir(location);
        fs::create_dir_all(&target_dir)?;
        let file_name = file
            .file_name()
            .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, format!("not a file: {}", file.display())))?;
        let dest = free_destination(&target_dir, &file_name.to_string_lossy());
        move_file(file, &dest)?;
        tracing::debug!(from = %file.display(), to = %dest.display(), "Archived file");
        Ok(dest)
    }
}

/// First name in `dir` not yet taken: `name`, then `stem_1.ext`, `stem_2.ext`, ...
pub fn free_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (file_name, None),
    };
    (1u32..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{stem}_{n}.{ext}")),
            None => dir.join(format!("{stem}_{n}")),
        })
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if matches!(e.kind(), ErrorKind::CrossesDevices | ErrorKind::PermissionDenied) => {
            tracing::debug!(from = %from.display(), "Rename refused ({e}), copying instead");
            copy_then_remove(from, to)
        }
        Err(e) => Err(e.into()),
    }
}

// The file ends up in exactly one place: on any failure `to` is removed again.
fn copy_then_remove(from: &Path, to: &Path) -> Result<()> {
    if let Err(e) = fs::copy(from, to) {
        let _ = fs::remove_file(to);
        return Err(e.into());
    }
    if let Err(e) = fs::remove_file(from) {
        let _ = fs::remove_file(to);
        return Err(e.into());
    }
    Ok(())
}
