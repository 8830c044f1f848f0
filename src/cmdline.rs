// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fs;

pub type KvPairs = Vec<(String, String)>;

const PROC_CMDLINE: &str = "/proc/cmdline";
const PROC_BOOTCONFIG: &str = "/proc/bootconfig";

/// Split a kernel command line into `key=value` pairs. Double quotes group
/// whitespace; a bare word gets an empty value.
pub fn parse_cmdline(cmdline: &str) -> KvPairs {
    let mut pairs = Vec::new();
    let mut token = String::new();
    let mut quoted = false;

    let mut flush = |token: &mut String| {
        if token.is_empty() {
            return;
        }
        let (k, v) = token.split_once('=').unwrap_or((token.as_str(), ""));
        pairs.push((k.to_string(), v.trim_matches('"').to_string()));
        token.clear();
    };

    for c in cmdline.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                token.push(c);
            }
            c if c.is_whitespace() && !quoted => flush(&mut token),
            c => token.push(c),
        }
    }
    flush(&mut token);
    pairs
}

/// `/proc/bootconfig` lines look like `androidboot.slot_suffix = "_a"`.
pub fn parse_bootconfig(content: &str) -> KvPairs {
    content
        .lines()
        .filter_map(|line| {
            let (k, v) = line.split_once('=')?;
            let v = v.trim().trim_matches('"');
            Some((k.trim().to_string(), v.to_string()))
        })
        .collect()
}

/// Cmdline first, bootconfig after it so bootconfig values win.
pub fn load_kernel_pairs() -> KvPairs {
    let mut pairs = fs::read_to_string(PROC_CMDLINE)
        .map(|s| parse_cmdline(&s))
        .unwrap_or_default();
    if let Ok(bootconfig) = fs::read_to_string(PROC_BOOTCONFIG) {
        pairs.extend(parse_bootconfig(&bootconfig));
    }
    pairs
}
