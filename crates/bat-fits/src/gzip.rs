//! Inflation of gzip-compressed FITS files (`*.fits.gz`, `*.dph.gz`, ...).

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;
const FHCRC: u8 = 0x02;

/// Returns `true` if `data` starts with the gzip magic bytes.
pub fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

fn skip_zero_terminated(data: &[u8], mut pos: usize) -> usize {
    while pos < data.len() && data[pos] != 0 {
        pos += 1;
    }
    pos + 1
}

/// Strip the gzip member header and trailer, returning the raw deflate payload.
fn deflate_payload(data: &[u8]) -> Result<&[u8]> {
    if data.len() < 18 || !is_gzip(data) || data[2] != 0x08 {
        return Err(Error::Decompression("not a deflate gzip stream".into()));
    }
    let flags = data[3];
    let mut pos = 10usize;
    if flags & FEXTRA != 0 {
        if pos + 2 > data.len() {
            return Err(Error::Decompression("truncated FEXTRA field".into()));
        }
        let xlen = u16::from_le_bytes([data[pos], data[pos + 1]]) as usize;
        pos += 2 + xlen;
    }
    if flags & FNAME != 0 {
        pos = skip_zero_terminated(data, pos);
    }
    if flags & FCOMMENT != 0 {
        pos = skip_zero_terminated(data, pos);
    }
    if flags & FHCRC != 0 {
        pos += 2;
    }
    if data.len() < pos + 8 {
        return Err(Error::Decompression("truncated gzip member".into()));
    }
    Ok(&data[pos..data.len() - 8])
}

/// Inflate a single-member gzip stream.
pub fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let payload = deflate_payload(data)?;
    miniz_oxide::inflate::decompress_to_vec(payload)
        .map_err(|e| Error::Decompression(format!("{:?}", e.status)))
}

/// Path of the inflated sibling of `path`: the same name with `.gz` removed.
pub fn inflated_path(path: &Path) -> PathBuf {
    match path.extension() {
        Some(ext) if ext == "gz" => path.with_extension(""),
        _ => path.to_path_buf(),
    }
}

/// Inflate `path` into its sibling without the `.gz` suffix.
///
/// Paths that do not end in `.gz` are returned unchanged without touching the
/// filesystem.
pub fn inflate_to_sibling(path: &Path) -> Result<PathBuf> {
    let target = inflated_path(path);
    if target == path {
        return Ok(target);
    }
    let raw = fs::read(path)?;
    let inflated = gunzip(&raw)?;
    fs::write(&target, inflated)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Wrap `payload` in a minimal gzip member with stored (uncompressed) deflate blocks.
    fn stored_gzip(payload: &[u8], name: Option<&str>) -> Vec<u8> {
        let mut out = vec![0x1f, 0x8b, 0x08, 0, 0, 0, 0, 0, 0, 0xff];
        if let Some(name) = name {
            out[3] |= FNAME;
            out.extend_from_slice(name.as_bytes());
            out.push(0);
        }
        out.extend_from_slice(&miniz_oxide::deflate::compress_to_vec(payload, 0));
        // CRC and size are not verified by the inflater.
        out.extend_from_slice(&[0; 4]);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out
    }

    #[test]
    fn detects_magic() {
        assert!(is_gzip(&[0x1f, 0x8b, 0x08]));
        assert!(!is_gzip(b"SIMPLE  ="));
    }

    #[test]
    fn inflates_with_and_without_name() {
        let payload = b"SIMPLE  =                    T".repeat(10);
        assert_eq!(gunzip(&stored_gzip(&payload, None)).unwrap(), payload);
        assert_eq!(
            gunzip(&stored_gzip(&payload, Some("sw.dph"))).unwrap(),
            payload
        );
    }

    #[test]
    fn rejects_plain_data() {
        assert!(matches!(
            gunzip(&[0u8; 32]),
            Err(Error::Decompression(_))
        ));
    }

    #[test]
    fn sibling_path_strips_suffix() {
        assert_eq!(
            inflated_path(Path::new("/d/sw00.dph.gz")),
            PathBuf::from("/d/sw00.dph")
        );
        assert_eq!(
            inflated_path(Path::new("/d/sw00.dph")),
            PathBuf::from("/d/sw00.dph")
        );
    }
}
