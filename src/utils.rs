// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs::{self, OpenOptions, create_dir_all, remove_dir_all, remove_file},
    io::Write,
    os::unix::fs::{MetadataExt, PermissionsExt, lchown, symlink},
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
#[cfg(any(target_os = "linux", target_os = "android"))]
use extattr::{Flags as XattrFlags, lgetxattr, lsetxattr};

use crate::defs::{CONTEXT_ROOTFS, CONTEXT_SYSTEM};

const SELINUX_XATTR: &str = "security.selinux";
const KMSG: &str = "/dev/kmsg";

pub fn init_logging(verbose: bool, early_boot: bool) -> Result<()> {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    // logd only exists once the real init is up, which is the proxy case.
    #[cfg(target_os = "android")]
    if !early_boot {
        android_logger::init_once(
            android_logger::Config::default()
                .with_max_level(level)
                .with_tag("magiskinit"),
        );
        return Ok(());
    }

    let mut builder = env_logger::Builder::new();
    builder.format(|buf, record| {
        writeln!(
            buf,
            "magiskinit: [{}] [{}] {}",
            record.level(),
            record.target(),
            record.args()
        )
    });
    if early_boot && let Ok(kmsg) = OpenOptions::new().write(true).open(KMSG) {
        builder.target(env_logger::Target::Pipe(Box::new(kmsg)));
    }
    builder
        .filter_level(level)
        .try_init()
        .context("Failed to install logger")?;
    Ok(())
}

/// Write `content` to `path` through a temp file in the same directory, so
/// `path` is either untouched or fully replaced.
pub fn atomic_write<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, content: C) -> Result<()> {
    let path = path.as_ref();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let temp_name = format!(
        ".magiskinit_{}_{}.tmp",
        std::process::id(),
        SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos()
    );
    let temp_file = dir.join(temp_name);

    struct CleanupGuard<'a>(&'a Path);
    impl Drop for CleanupGuard<'_> {
        fn drop(&mut self) {
            let _ = fs::remove_file(self.0);
        }
    }
    let guard = CleanupGuard(&temp_file);

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_file)
            .context("Failed to create temporary file for atomic write")?;
        file.write_all(content.as_ref())?;
        file.sync_all()?;
    }

    if let Ok(meta) = fs::metadata(path) {
        let _ = fs::set_permissions(&temp_file, meta.permissions());
    }

    fs::rename(&temp_file, path).context("Failed to rename atomic temporary file")?;
    std::mem::forget(guard);
    Ok(())
}

pub fn lsetfilecon<P: AsRef<Path>>(path: P, con: &str) -> Result<()> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        if let Err(e) = lsetxattr(
            path.as_ref(),
            SELINUX_XATTR,
            con.as_bytes(),
            XattrFlags::empty(),
        ) {
            let io_err = std::io::Error::from(e);
            log::debug!(
                "lsetfilecon: {} -> {} failed: {}",
                path.as_ref().display(),
                con,
                io_err
            );
        }
    }
    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn lgetfilecon<P: AsRef<Path>>(path: P) -> Result<String> {
    let con = lgetxattr(path.as_ref(), SELINUX_XATTR).with_context(|| {
        format!(
            "Failed to get SELinux context for {}",
            path.as_ref().display()
        )
    })?;
    Ok(String::from_utf8_lossy(&con).trim_matches('\0').to_string())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn lgetfilecon<P: AsRef<Path>>(_path: P) -> Result<String> {
    anyhow::bail!("SELinux contexts are not supported on this platform")
}

/// Copy mode, ownership and SELinux context from `src` onto `dst`.
pub fn clone_attr(src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(src)
        .with_context(|| format!("Failed to stat {}", src.display()))?;
    if !meta.file_type().is_symlink() {
        fs::set_permissions(dst, fs::Permissions::from_mode(meta.mode() & 0o7777))?;
    }
    lchown(dst, Some(meta.uid()), Some(meta.gid())).warn_on_err();
    if let Ok(mut ctx) = lgetfilecon(src) {
        if ctx == CONTEXT_ROOTFS && dst.starts_with("/system") {
            ctx = CONTEXT_SYSTEM.to_string();
        }
        lsetfilecon(dst, &ctx)?;
    }
    Ok(())
}

pub fn ensure_dir_exists<T: AsRef<Path>>(dir: T) -> Result<()> {
    if !dir.as_ref().exists() {
        create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.as_ref().display()))?;
    }
    Ok(())
}

/// Remove a file, symlink or directory tree. Missing paths are fine.
pub fn rm_rf<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => remove_dir_all(path)?,
        Ok(_) => remove_file(path)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Replace whatever is at `link` with a symlink to `target`.
pub fn force_symlink<P: AsRef<Path>, Q: AsRef<Path>>(target: P, link: Q) -> Result<()> {
    let link = link.as_ref();
    rm_rf(link)?;
    symlink(target.as_ref(), link).with_context(|| {
        format!(
            "Failed to link {} -> {}",
            link.display(),
            target.as_ref().display()
        )
    })
}

/// Mirror the tree at `src` into `dst` with hard links; directories are recreated.
pub fn link_path(src: &Path, dst: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(src).min_depth(1) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src)?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            ensure_dir_exists(&target)?;
            clone_attr(entry.path(), &target).warn_on_err();
        } else {
            rm_rf(&target)?;
            fs::hard_link(entry.path(), &target).with_context(|| {
                format!("Failed to link {} to {}", entry.path().display(), target.display())
            })?;
        }
    }
    Ok(())
}

/// Move every entry of `src` into `dst`, merging into existing directories.
pub fn mv_path(src: &Path, dst: &Path) -> Result<()> {
    ensure_dir_exists(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() && to.is_dir() {
            mv_path(&from, &to)?;
            fs::remove_dir(&from).warn_on_err();
        } else {
            rm_rf(&to)?;
            fs::rename(&from, &to).with_context(|| {
                format!("Failed to move {} to {}", from.display(), to.display())
            })?;
        }
    }
    Ok(())
}

/// Device-tree and sysfs strings are NUL padded.
pub fn read_trimmed<P: AsRef<Path>>(path: P) -> Option<String> {
    fs::read(path.as_ref()).ok().map(|buf| {
        String::from_utf8_lossy(&buf)
            .trim_end_matches(['\0', '\n', '\r', ' ', '\t'])
            .to_string()
    })
}

pub trait WarnErr {
    fn warn_on_err(self);
}

impl<T, E: std::fmt::Display> WarnErr for Result<T, E> {
    fn warn_on_err(self) {
        if let Err(e) = self {
            log::warn!("Suppressed error: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target");
        fs::write(&path, b"old content").unwrap();

        atomic_write(&path, b"new").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn mv_path_merges_directories() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(src.join("sbin")).unwrap();
        fs::create_dir_all(dst.join("sbin")).unwrap();
        fs::write(src.join("sbin/tool"), b"tool").unwrap();
        fs::write(dst.join("sbin/keep"), b"keep").unwrap();
        fs::write(src.join("init.custom.rc"), b"on boot").unwrap();

        mv_path(&src, &dst).unwrap();

        assert_eq!(fs::read(dst.join("sbin/tool")).unwrap(), b"tool");
        assert_eq!(fs::read(dst.join("sbin/keep")).unwrap(), b"keep");
        assert!(dst.join("init.custom.rc").exists());
        assert!(!src.join("init.custom.rc").exists());
    }

    #[test]
    fn read_trimmed_strips_dt_padding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dev");
        fs::write(&path, b"/dev/block/sda1\0").unwrap();
        assert_eq!(read_trimmed(&path).as_deref(), Some("/dev/block/sda1"));
        assert_eq!(read_trimmed(dir.path().join("missing")), None);
    }
}
