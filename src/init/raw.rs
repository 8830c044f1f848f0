// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs,
    os::unix::fs::{MetadataExt, PermissionsExt, lchown, symlink},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::utils::{WarnErr, ensure_dir_exists, lgetfilecon, lsetfilecon, rm_rf};

#[derive(Debug, PartialEq, Eq)]
pub enum RawKind {
    File(Vec<u8>),
    Dir,
    Symlink(PathBuf),
}

/// A captured filesystem entry: content and attributes, relative to the
/// directory it was captured from.
#[derive(Debug, PartialEq, Eq)]
pub struct RawFile {
    pub path: PathBuf,
    pub kind: RawKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub context: Option<String>,
}

impl RawFile {
    pub fn capture(base: &Path, path: &Path) -> Result<Self> {
        let meta = fs::symlink_metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        let ft = meta.file_type();
        let kind = if ft.is_symlink() {
            RawKind::Symlink(fs::read_link(path)?)
        } else if ft.is_dir() {
            RawKind::Dir
        } else {
            RawKind::File(
                fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?,
            )
        };
        Ok(Self {
            path: path.strip_prefix(base)?.to_path_buf(),
            kind,
            mode: meta.mode() & 0o7777,
            uid: meta.uid(),
            gid: meta.gid(),
            context: lgetfilecon(path).ok().filter(|c| !c.is_empty()),
        })
    }

    /// Recreate the entry under `dest`, consuming the record.
    pub fn restore(self, dest: &Path) -> Result<()> {
        let target = dest.join(&self.path);
        if let Some(parent) = target.parent() {
            ensure_dir_exists(parent)?;
        }
        let is_link = matches!(self.kind, RawKind::Symlink(_));
        match self.kind {
            RawKind::Dir => ensure_dir_exists(&target)?,
            RawKind::File(content) => {
                rm_rf(&target)?;
                fs::write(&target, content)
                    .with_context(|| format!("Failed to write {}", target.display()))?;
            }
            RawKind::Symlink(link) => {
                rm_rf(&target)?;
                symlink(&link, &target)?;
            }
        }
        if !is_link {
            fs::set_permissions(&target, fs::Permissions::from_mode(self.mode))?;
        }
        lchown(&target, Some(self.uid), Some(self.gid)).warn_on_err();
        if let Some(con) = &self.context {
            lsetfilecon(&target, con)?;
        }
        Ok(())
    }
}

/// Capture every entry below `dir`, parents before children.
pub fn backup_folder(dir: &Path) -> Result<Vec<RawFile>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        files.push(RawFile::capture(dir, entry.path())?);
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_and_restore_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("overlay.d");
        fs::create_dir_all(src.join("sbin")).unwrap();
        fs::write(src.join("sbin/tool"), b"tool").unwrap();
        fs::set_permissions(src.join("sbin/tool"), fs::Permissions::from_mode(0o750)).unwrap();
        symlink("tool", src.join("sbin/alias")).unwrap();

        let files = backup_folder(&src).unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(files[0].path, Path::new("sbin"));
        assert_eq!(files[0].kind, RawKind::Dir);

        let dest = dir.path().join("dest");
        for file in files {
            file.restore(&dest).unwrap();
        }
        assert_eq!(fs::read(dest.join("sbin/tool")).unwrap(), b"tool");
        let mode = fs::metadata(dest.join("sbin/tool")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o750);
        assert_eq!(fs::read_link(dest.join("sbin/alias")).unwrap(), Path::new("tool"));
    }
}
