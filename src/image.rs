// Copyright 2026 Magiskinit Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fs::File, io::Write, path::Path};

use anyhow::{Context, Result};
use liblzma::write::XzDecoder;
use memmap2::Mmap;
use thiserror::Error;

const SELF_EXE: &str = "/proc/self/exe";
const TRAILER_MAGIC: &[u8; 8] = b"MSKPAYLD";
const TRAILER_LEN: usize = 8 + 8 + 8;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload trailer is out of bounds (payload {payload} + config {config} > {image})")]
    Trailer {
        payload: u64,
        config: u64,
        image: usize,
    },
    #[error("payload entry at offset {0} is truncated")]
    Truncated(usize),
    #[error("payload entry name at offset {0} is not UTF-8")]
    Name(usize),
    #[error("required payload entry '{0}' is missing")]
    Missing(String),
    #[error("failed to decompress '{name}'")]
    Decompress {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Read-only mapping of a file for the lifetime of the boot stage.
pub struct MappedImage {
    map: Option<Mmap>,
}

impl MappedImage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(Self { map: None });
        }
        // SAFETY: boot images are not modified while we run; the map is
        // never written through.
        let map = unsafe { Mmap::map(&file) }
            .with_context(|| format!("Failed to map {}", path.display()))?;
        Ok(Self { map: Some(map) })
    }

    pub fn from_self() -> Result<Self> {
        Self::open(SELF_EXE)
    }

    pub fn empty() -> Self {
        Self { map: None }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    pub fn contains(&self, needle: &[u8]) -> bool {
        !needle.is_empty() && self.as_bytes().windows(needle.len()).any(|w| w == needle)
    }

    /// Locate the payload trailer appended to the executable.
    pub fn embedded(&self) -> Result<Option<Embedded<'_>>, PayloadError> {
        let buf = self.as_bytes();
        if buf.len() < TRAILER_LEN || &buf[buf.len() - 8..] != TRAILER_MAGIC {
            return Ok(None);
        }
        let body_end = buf.len() - TRAILER_LEN;
        let mut pos = body_end;
        let payload_len = take_array::<8>(buf, &mut pos).map(u64::from_le_bytes)?;
        let config_len = take_array::<8>(buf, &mut pos).map(u64::from_le_bytes)?;

        let total = payload_len.checked_add(config_len);
        let Some(total) = total.filter(|t| *t <= body_end as u64) else {
            return Err(PayloadError::Trailer {
                payload: payload_len,
                config: config_len,
                image: buf.len(),
            });
        };
        let start = body_end - total as usize;
        let config_start = start + payload_len as usize;
        Ok(Some(Embedded {
            payload: &buf[start..config_start],
            config: &buf[config_start..body_end],
        }))
    }
}

pub struct Embedded<'a> {
    pub payload: &'a [u8],
    pub config: &'a [u8],
}

#[derive(Debug)]
pub struct PayloadEntry<'a> {
    pub name: &'a str,
    pub mode: u32,
    pub data: &'a [u8],
}

fn take<'a>(buf: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8], PayloadError> {
    let start = *pos;
    let end = start.checked_add(n).filter(|e| *e <= buf.len());
    let end = end.ok_or(PayloadError::Truncated(start))?;
    *pos = end;
    Ok(&buf[start..end])
}

fn take_array<const N: usize>(buf: &[u8], pos: &mut usize) -> Result<[u8; N], PayloadError> {
    let start = *pos;
    take(buf, pos, N)?
        .try_into()
        .map_err(|_| PayloadError::Truncated(start))
}

impl<'a> Embedded<'a> {
    pub fn entries(&self) -> Result<Vec<PayloadEntry<'a>>, PayloadError> {
        let buf = self.payload;
        let mut pos = 0;
        let mut entries = Vec::new();
        while pos < buf.len() {
            let entry_start = pos;
            let name_len = take_array::<2>(buf, &mut pos).map(u16::from_le_bytes)?;
            let name = std::str::from_utf8(take(buf, &mut pos, name_len as usize)?)
                .map_err(|_| PayloadError::Name(entry_start))?;
            let mode = take_array::<4>(buf, &mut pos).map(u32::from_le_bytes)?;
            let data_len = take_array::<8>(buf, &mut pos).map(u64::from_le_bytes)?;
            let data_len =
                usize::try_from(data_len).map_err(|_| PayloadError::Truncated(entry_start))?;
            let data = take(buf, &mut pos, data_len)?;
            entries.push(PayloadEntry { name, mode, data });
        }
        Ok(entries)
    }
}

/// Decompress an xz stream fully into `out`.
pub fn unxz<W: Write>(name: &str, data: &[u8], out: W) -> Result<W, PayloadError> {
    let err = |source| PayloadError::Decompress {
        name: name.to_string(),
        source,
    };
    let mut decoder = XzDecoder::new(out);
    decoder.write_all(data).map_err(err)?;
    decoder.finish().map_err(err)
}

/// Replace every occurrence of `from` with `to` (same length) in place.
pub fn hexpatch(buf: &mut [u8], from: &[u8], to: &[u8]) -> Vec<usize> {
    debug_assert_eq!(from.len(), to.len());
    let mut offsets = Vec::new();
    if from.is_empty() || from.len() != to.len() {
        return offsets;
    }
    let mut i = 0;
    while i + from.len() <= buf.len() {
        if &buf[i..i + from.len()] == from {
            buf[i..i + to.len()].copy_from_slice(to);
            offsets.push(i);
            i += from.len();
        } else {
            i += 1;
        }
    }
    offsets
}

#[cfg(test)]
pub mod testing {
    use std::io::Write;

    use liblzma::write::XzEncoder;

    use super::*;

    pub fn xz(data: &[u8]) -> Vec<u8> {
        let mut enc = XzEncoder::new(Vec::new(), 6);
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    /// Append a payload trailer to `elf`, compressing each entry.
    pub fn build_image(elf: &[u8], entries: &[(&str, u32, &[u8])], config: &[u8]) -> Vec<u8> {
        let mut payload = Vec::new();
        for (name, mode, data) in entries {
            let packed = xz(data);
            payload.extend((name.len() as u16).to_le_bytes());
            payload.extend(name.as_bytes());
            payload.extend(mode.to_le_bytes());
            payload.extend((packed.len() as u64).to_le_bytes());
            payload.extend(packed);
        }
        let mut out = elf.to_vec();
        out.extend(&payload);
        out.extend(config);
        out.extend((payload.len() as u64).to_le_bytes());
        out.extend((config.len() as u64).to_le_bytes());
        out.extend(TRAILER_MAGIC);
        out
    }

    pub fn write_image(path: &Path, bytes: &[u8]) -> MappedImage {
        std::fs::write(path, bytes).unwrap();
        MappedImage::open(path).unwrap()
    }
}
