// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fs, path::Path};

/// A block device as announced in sysfs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDev {
    pub major: u32,
    pub minor: u32,
    pub devname: String,
    pub partname: Option<String>,
}

fn parse_uevent(content: &str) -> Option<BlockDev> {
    let mut major = None;
    let mut minor = None;
    let mut devname = None;
    let mut partname = None;
    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key {
            "MAJOR" => major = value.parse().ok(),
            "MINOR" => minor = value.parse().ok(),
            "DEVNAME" => devname = Some(value.to_string()),
            "PARTNAME" => partname = Some(value.to_string()),
            _ => {}
        }
    }
    Some(BlockDev {
        major: major?,
        minor: minor?,
        devname: devname?,
        partname,
    })
}

/// Scan `<sysfs_block>/*/uevent` for a partition name, case-insensitive.
/// A plain device name match is accepted too.
pub fn find_block(sysfs_block: &Path, name: &str) -> Option<BlockDev> {
    let entries = fs::read_dir(sysfs_block).ok()?;
    let mut by_devname = None;
    for entry in entries.flatten() {
        let Ok(content) = fs::read_to_string(entry.path().join("uevent")) else {
            continue;
        };
        let Some(dev) = parse_uevent(&content) else {
            continue;
        };
        if dev
            .partname
            .as_deref()
            .is_some_and(|p| p.eq_ignore_ascii_case(name))
        {
            return Some(dev);
        }
        if by_devname.is_none() && dev.devname == name {
            by_devname = Some(dev);
        }
    }
    by_devname
}
