// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fs, path::Path};

use crate::utils::read_trimmed;

/// One mount described by the device tree. Not `Clone`: entries are moved
/// into the mount step and dropped there.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FstabEntry {
    pub dev: String,
    pub mnt_point: String,
    pub r#type: String,
    pub mnt_flags: String,
    pub fsmgr_flags: String,
}

impl FstabEntry {
    pub fn is_slotselect(&self) -> bool {
        self.fsmgr_flags.split(',').any(|f| f == "slotselect")
    }
}

fn is_enabled(node: &Path) -> bool {
    match read_trimmed(node.join("status")) {
        Some(status) => status == "okay" || status == "ok",
        None => true,
    }
}

/// Walk `<dt_dir>/fstab/*`. A missing tree is simply no entries.
pub fn read_dt_fstab<P: AsRef<Path>>(dt_dir: P) -> Vec<FstabEntry> {
    let fstab_dir = dt_dir.as_ref().join("fstab");
    if !fstab_dir.is_dir() {
        return Vec::new();
    }
    if !is_enabled(&fstab_dir) {
        log::debug!("dt fstab is disabled");
        return Vec::new();
    }

    let mut nodes: Vec<_> = match fs::read_dir(&fstab_dir) {
        Ok(entries) => entries
            .flatten()
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .collect(),
        Err(e) => {
            log::warn!("Failed to read {}: {}", fstab_dir.display(), e);
            return Vec::new();
        }
    };
    nodes.sort_by_key(|e| e.file_name());

    let mut fstab = Vec::new();
    for node in nodes {
        let path = node.path();
        let name = node.file_name().to_string_lossy().to_string();
        if !is_enabled(&path) {
            continue;
        }

        let read = |field: &str| read_trimmed(path.join(field));
        let (Some(dev), Some(r#type), Some(mnt_flags), Some(fsmgr_flags)) = (
            read("dev"),
            read("type"),
            read("mnt_flags"),
            read("fsmgr_flags"),
        ) else {
            log::warn!("Skip incomplete dt fstab entry [{name}]");
            continue;
        };
        let mnt_point = read("mnt_point").unwrap_or_else(|| format!("/{name}"));

        log::debug!("dt fstab: {} -> {} ({})", dev, mnt_point, r#type);
        fstab.push(FstabEntry {
            dev,
            mnt_point,
            r#type,
            mnt_flags,
            fsmgr_flags,
        });
    }
    fstab
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_entry(dt: &Path, name: &str, fields: &[(&str, &str)]) {
        let dir = dt.join("fstab").join(name);
        fs::create_dir_all(&dir).unwrap();
        for (k, v) in fields {
            fs::write(dir.join(k), format!("{v}\0")).unwrap();
        }
    }

    #[test]
    fn absent_or_empty_tree() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_dt_fstab(dir.path().join("missing")).is_empty());
        assert!(read_dt_fstab(dir.path()).is_empty());
        fs::create_dir(dir.path().join("fstab")).unwrap();
        assert!(read_dt_fstab(dir.path()).is_empty());
    }

    #[test]
    fn single_entry_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        write_entry(
            dir.path(),
            "system",
            &[
                ("dev", "/dev/block/sda1"),
                ("mnt_point", "/system"),
                ("type", "ext4"),
                ("mnt_flags", "ro"),
                ("fsmgr_flags", "wait"),
            ],
        );

        let fstab = read_dt_fstab(dir.path());
        assert_eq!(
            fstab,
            vec![FstabEntry {
                dev: "/dev/block/sda1".into(),
                mnt_point: "/system".into(),
                r#type: "ext4".into(),
                mnt_flags: "ro".into(),
                fsmgr_flags: "wait".into(),
            }]
        );
    }

    #[test]
    fn incomplete_and_disabled_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_entry(
            dir.path(),
            "vendor",
            &[("dev", "/dev/block/by-name/vendor"), ("mnt_point", "/vendor")],
        );
        write_entry(
            dir.path(),
            "odm",
            &[
                ("dev", "/dev/block/by-name/odm"),
                ("type", "ext4"),
                ("mnt_flags", "ro"),
                ("fsmgr_flags", "wait"),
                ("status", "disabled"),
            ],
        );
        write_entry(
            dir.path(),
            "product",
            &[
                ("dev", "/dev/block/by-name/product"),
                ("type", "erofs"),
                ("mnt_flags", "ro"),
                ("fsmgr_flags", "wait,slotselect"),
                ("status", "okay"),
            ],
        );

        let fstab = read_dt_fstab(dir.path());
        assert_eq!(fstab.len(), 1);
        assert_eq!(fstab[0].mnt_point, "/product");
        assert!(fstab[0].is_slotselect());
    }

    #[test]
    fn disabled_fstab_node() {
        let dir = tempfile::tempdir().unwrap();
        write_entry(
            dir.path(),
            "system",
            &[
                ("dev", "/dev/block/sda1"),
                ("type", "ext4"),
                ("mnt_flags", "ro"),
                ("fsmgr_flags", "wait"),
            ],
        );
        fs::write(dir.path().join("fstab/status"), "disabled\0").unwrap();
        assert!(read_dt_fstab(dir.path()).is_empty());
    }
}
