// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{Context, Result, anyhow, bail};
use thiserror::Error;

use super::MagiskInit;
use crate::{
    sys::Sys,
    utils::{WarnErr, atomic_write},
};

const POLICY_MAGIC: u32 = 0xf97c_ff8c;
const POLICY_TARGET: &[u8] = b"SE Linux";
const POLICY_VERSIONS: std::ops::RangeInclusive<u32> = 15..=35;
const RULE_FILE: &str = "sepolicy.rule";

/// Statements every patched policy receives.
pub const MAGISK_RULES: &[&str] = &[
    "type magisk domain",
    "typeattribute magisk mlstrustedsubject",
    "permissive magisk",
    "type magisk_file file_type",
    "typeattribute magisk_file mlstrustedobject",
    "allow magisk * * *",
    "allow * magisk_file file *",
    "allow * magisk_file dir *",
    "allow * magisk unix_stream_socket { connectto getopt }",
    "allow kernel * fd use",
    "allow init magisk process { transition rlimitinh siginh noatsecure }",
    "type_transition init magisk_file process magisk",
    "dontaudit magisk * * *",
];

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("malformed policy image: {0}")]
    Malformed(String),
}

fn u32_at(buf: &[u8], off: usize) -> Option<u32> {
    let bytes = buf.get(off..off + 4)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

/// Check the binary policy header and return its version.
pub fn validate_policy(buf: &[u8]) -> Result<u32, PolicyError> {
    let malformed = |what: &str| PolicyError::Malformed(what.to_string());
    let magic = u32_at(buf, 0).ok_or_else(|| malformed("truncated header"))?;
    if magic != POLICY_MAGIC {
        return Err(PolicyError::Malformed(format!("bad magic {magic:#010x}")));
    }
    let len = u32_at(buf, 4).ok_or_else(|| malformed("truncated header"))? as usize;
    if len != POLICY_TARGET.len() || buf.get(8..8 + len) != Some(POLICY_TARGET) {
        return Err(malformed("target is not SE Linux"));
    }
    let version = u32_at(buf, 8 + len).ok_or_else(|| malformed("truncated header"))?;
    if !POLICY_VERSIONS.contains(&version) {
        return Err(PolicyError::Malformed(format!(
            "unsupported policy version {version}"
        )));
    }
    Ok(version)
}

/// Applies rule statements to a policy image.
pub trait PolicyPatcher {
    fn patch(&self, tool: &Path, policy: &[u8], rules: &[String]) -> Result<Vec<u8>>;
}

/// Runs the extracted policy tool next to where it lives.
pub struct ToolPatcher;

impl PolicyPatcher for ToolPatcher {
    fn patch(&self, tool: &Path, policy: &[u8], rules: &[String]) -> Result<Vec<u8>> {
        let dir = tool.parent().unwrap_or_else(|| Path::new("/"));
        let input = dir.join(".policy.in");
        let output = dir.join(".policy.out");
        let rule_file = dir.join(".policy.rules");

        let result = (|| -> Result<Vec<u8>> {
            fs::write(&input, policy)?;
            fs::write(&rule_file, rules.join("\n") + "\n")?;
            let status = Command::new(tool)
                .arg("--load")
                .arg(&input)
                .arg("--save")
                .arg(&output)
                .arg("--apply")
                .arg(&rule_file)
                .status()
                .with_context(|| format!("Failed to execute {}", tool.display()))?;
            if !status.success() {
                bail!("{} exited with {}", tool.display(), status);
            }
            fs::read(&output).context("Failed to read patched policy")
        })();

        for f in [&input, &output, &rule_file] {
            let _ = fs::remove_file(f);
        }
        result
    }
}

/// Rules shipped by modules: `<rules_dir>/<module>/sepolicy.rule`.
pub fn load_custom_rules(rules_dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(rules_dir) else {
        return Vec::new();
    };
    let mut modules: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    modules.sort();

    let mut rules = Vec::new();
    for module in modules {
        if module.join("disable").exists() || module.join("remove").exists() {
            continue;
        }
        let Ok(content) = fs::read_to_string(module.join(RULE_FILE)) else {
            continue;
        };
        log::info!("Loading custom sepolicy rules: {}", module.display());
        rules.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string),
        );
    }
    rules
}

impl<S: Sys> MagiskInit<S> {
    /// Patch the policy at `src` and write it to `dst` atomically. `dst` is
    /// left untouched if the image is malformed.
    pub fn patch_sepolicy(&mut self, src: &str, dst: &str) -> Result<()> {
        let src_path = self.path(src);
        let dst_path = self.path(dst);
        log::info!("Patching sepolicy: {} -> {}", src, dst);

        let policy = fs::read(&src_path)
            .with_context(|| format!("Failed to read {}", src_path.display()))?;
        let version = validate_policy(&policy)?;
        log::debug!("Policy version {version}");

        let tool = self
            .policy_tool
            .clone()
            .ok_or_else(|| anyhow!("Policy tool is not extracted"))?;

        let mut rules: Vec<String> = MAGISK_RULES.iter().map(|r| r.to_string()).collect();
        if let Some(dir) = &self.rules_dir {
            rules.extend(load_custom_rules(dir));
        }

        let patched = self.policy.patch(&tool, &policy, &rules)?;
        validate_policy(&patched)?;
        atomic_write(&dst_path, &patched)
            .with_context(|| format!("Failed to write {}", dst_path.display()))?;
        if src_path != dst_path
            && let Ok(meta) = fs::metadata(&src_path)
        {
            fs::set_permissions(&dst_path, meta.permissions()).warn_on_err();
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Appends rule statements after the image.
    pub struct AppendPatcher;

    impl PolicyPatcher for AppendPatcher {
        fn patch(&self, _tool: &Path, policy: &[u8], rules: &[String]) -> Result<Vec<u8>> {
            let mut out = policy.to_vec();
            for rule in rules {
                out.push(b'\n');
                out.extend(rule.as_bytes());
            }
            Ok(out)
        }
    }

    pub fn policy_image(version: u32) -> Vec<u8> {
        let mut buf = POLICY_MAGIC.to_le_bytes().to_vec();
        buf.extend((POLICY_TARGET.len() as u32).to_le_bytes());
        buf.extend(POLICY_TARGET);
        buf.extend(version.to_le_bytes());
        buf.extend(b"policy body");
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::{testing::*, *};
    use crate::{
        config::BootConfig,
        init::testing::{context, scratch, write},
    };

    #[test]
    fn header_validation() {
        assert_eq!(validate_policy(&policy_image(30)).unwrap(), 30);
        assert!(validate_policy(&policy_image(14)).is_err());
        assert!(validate_policy(&policy_image(36)).is_err());
        assert!(validate_policy(b"\x8c\xff\x7c").is_err());

        let mut bad_target = policy_image(30);
        bad_target[8..16].copy_from_slice(b"XEN Pol.");
        assert!(validate_policy(&bad_target).is_err());
    }

    #[test]
    fn patches_and_applies_module_rules() {
        let (_dir, root) = scratch();
        write(&root, "/sepolicy", &policy_image(31));
        write(&root, "/rules/mod_a/sepolicy.rule", b"# comment\nallow app_a * * *\n");
        write(&root, "/rules/mod_b/sepolicy.rule", b"allow app_b * * *\n");
        write(&root, "/rules/mod_b/disable", b"");

        let mut ctx = context(&root, BootConfig::default(), true);
        ctx.policy_tool = Some(root.join("sbin/magiskpolicy"));
        ctx.rules_dir = Some(root.join("rules"));
        ctx.patch_sepolicy("/sepolicy", "/sepolicy").unwrap();

        let out = String::from_utf8_lossy(&fs::read(root.join("sepolicy")).unwrap()).to_string();
        assert!(out.contains("allow magisk * * *"));
        assert!(out.contains("allow app_a * * *"));
        assert!(!out.contains("app_b"));
    }

    #[test]
    fn malformed_policy_writes_nothing() {
        let (_dir, root) = scratch();
        write(&root, "/sepolicy", b"not a policy at all");
        let mut ctx = context(&root, BootConfig::default(), true);
        ctx.policy_tool = Some(root.join("sbin/magiskpolicy"));

        let err = ctx.patch_sepolicy("/sepolicy", "/patched").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PolicyError>(),
            Some(PolicyError::Malformed(_))
        ));
        assert!(!root.join("patched").exists());
        assert_eq!(fs::read(root.join("sepolicy")).unwrap(), b"not a policy at all");
    }
}
