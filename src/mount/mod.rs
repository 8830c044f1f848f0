// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod overlayfs;

use std::{fmt, path::Path};

/// Mount points established during this boot stage, in order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MountList(Vec<String>);

impl MountList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, target: &str) -> bool {
        self.0.iter().any(|m| m == target)
    }

    /// Returns false if `target` was already recorded.
    pub fn push(&mut self, target: impl Into<String>) -> bool {
        let target = target.into();
        if self.contains(&target) {
            return false;
        }
        self.0.push(target);
        true
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for MountList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// Strip the context root so a path can be recorded as seen from the device.
pub fn device_path(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) => format!("/{}", rel.display()),
        Err(_) => path.display().to_string(),
    }
}
