//! Header Data Units and the FITS file that holds them.

use std::fs;
use std::path::Path;

use crate::block::{block_len, pad_to_block, DATA_FILL};
use crate::error::{Error, Result};
use crate::gzip;
use crate::header::{Card, Header};

/// The kind of data an HDU carries, derived from its first keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HduKind {
    Primary,
    Image,
    AsciiTable,
    BinaryTable,
}

/// A single HDU: its header and the unpadded data segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Hdu {
    pub header: Header,
    pub data: Vec<u8>,
}

impl Hdu {
    pub fn new(header: Header, data: Vec<u8>) -> Self {
        Hdu { header, data }
    }

    /// A primary HDU with no data array.
    pub fn empty_primary() -> Self {
        let header = Header::new(vec![
            Card::new("SIMPLE", true).with_comment("file does conform to FITS standard"),
            Card::new("BITPIX", 8i64),
            Card::new("NAXIS", 0i64),
            Card::new("EXTEND", true),
        ]);
        Hdu::new(header, Vec::new())
    }

    pub fn kind(&self) -> Result<HduKind> {
        if self.header.cards().first().map(|c| c.keyword.as_str()) == Some("SIMPLE") {
            return Ok(HduKind::Primary);
        }
        match self.header.string("XTENSION").map(str::trim) {
            Some("BINTABLE") => Ok(HduKind::BinaryTable),
            Some("IMAGE") => Ok(HduKind::Image),
            Some("TABLE") => Ok(HduKind::AsciiTable),
            Some(other) => Err(Error::UnsupportedExtension(other.to_string())),
            None => Err(Error::MissingKeyword("XTENSION".into())),
        }
    }

    pub fn extname(&self) -> Option<&str> {
        self.header.string("EXTNAME").map(str::trim)
    }

    fn to_bytes_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.header.to_bytes());
        let start = out.len();
        out.extend_from_slice(&self.data);
        if out.len() > start {
            pad_to_block(out, DATA_FILL);
        }
    }
}

/// Unpadded data length implied by BITPIX, NAXISn, PCOUNT and GCOUNT.
fn data_byte_len(header: &Header, is_primary: bool) -> Result<usize> {
    let bitpix = header.require_integer("BITPIX")?;
    let naxis = header.require_integer("NAXIS")? as usize;
    if naxis == 0 {
        return Ok(0);
    }
    let mut pixels = 1usize;
    for i in 1..=naxis {
        let dim = header.require_integer(&format!("NAXIS{i}"))? as usize;
        pixels = pixels
            .checked_mul(dim)
            .ok_or(Error::InvalidHeader("data size overflow"))?;
    }
    let (pcount, gcount) = if is_primary {
        (0, 1)
    } else {
        let pcount = header.integer("PCOUNT").unwrap_or(0) as usize;
        let gcount = header.integer("GCOUNT").unwrap_or(1).max(1) as usize;
        (pcount, gcount)
    };
    let bytes_per_value = bitpix.unsigned_abs() as usize / 8;
    pixels
        .checked_mul(bytes_per_value)
        .and_then(|n| n.checked_add(pcount))
        .and_then(|n| n.checked_mul(gcount))
        .ok_or(Error::InvalidHeader("data size overflow"))
}

/// An in-memory FITS file: an ordered list of HDUs, primary first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitsFile {
    hdus: Vec<Hdu>,
}

impl FitsFile {
    pub fn new(hdus: Vec<Hdu>) -> Self {
        FitsFile { hdus }
    }

    /// Read and parse a file from disk, inflating gzip content transparently.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read(path.as_ref())?;
        if gzip::is_gzip(&raw) {
            return Self::from_bytes(&gzip::gunzip(&raw)?);
        }
        Self::from_bytes(&raw)
    }

    /// Parse every HDU in `data`.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut hdus = Vec::new();
        let mut offset = 0usize;
        while offset < data.len() {
            let (header, header_len) = Header::parse(&data[offset..])?;
            let data_start = offset + header_len;
            let data_len = data_byte_len(&header, hdus.is_empty())?;
            let data_end = data_start + data_len;
            if data_end > data.len() {
                return Err(Error::UnexpectedEof);
            }
            hdus.push(Hdu::new(header, data[data_start..data_end].to_vec()));
            offset = data_start + block_len(data_len);
        }
        if hdus.is_empty() {
            return Err(Error::InvalidHeader("no primary HDU"));
        }
        Ok(FitsFile { hdus })
    }

    pub fn len(&self) -> usize {
        self.hdus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hdus.is_empty()
    }

    pub fn hdus(&self) -> &[Hdu] {
        &self.hdus
    }

    pub fn hdus_mut(&mut self) -> &mut [Hdu] {
        &mut self.hdus
    }

    /// HDU by zero-based index (0 is the primary).
    pub fn hdu(&self, index: usize) -> Result<&Hdu> {
        self.hdus
            .get(index)
            .ok_or_else(|| Error::MissingHdu(index.to_string()))
    }

    /// First HDU whose EXTNAME equals `name`.
    pub fn hdu_by_name(&self, name: &str) -> Result<&Hdu> {
        self.find(name)
            .ok_or_else(|| Error::MissingHdu(name.to_string()))
    }

    pub fn find(&self, name: &str) -> Option<&Hdu> {
        self.hdus.iter().find(|h| h.extname() == Some(name))
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.hdus.iter().position(|h| h.extname() == Some(name))
    }

    /// Replace the HDU at `index`.
    pub fn replace(&mut self, index: usize, hdu: Hdu) -> Result<()> {
        let slot = self
            .hdus
            .get_mut(index)
            .ok_or_else(|| Error::MissingHdu(index.to_string()))?;
        *slot = hdu;
        Ok(())
    }

    pub fn push(&mut self, hdu: Hdu) {
        self.hdus.push(hdu);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for hdu in &self.hdus {
            hdu.to_bytes_into(&mut out);
        }
        out
    }

    /// Serialize and write to `path`, replacing any existing file.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BLOCK_SIZE;

    fn image_extension(values: &[i16]) -> Hdu {
        let header = Header::new(vec![
            Card::new("XTENSION", "IMAGE"),
            Card::new("BITPIX", 16i64),
            Card::new("NAXIS", 1i64),
            Card::new("NAXIS1", values.len() as i64),
            Card::new("PCOUNT", 0i64),
            Card::new("GCOUNT", 1i64),
            Card::new("EXTNAME", "RAW"),
        ]);
        let data = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        Hdu::new(header, data)
    }

    #[test]
    fn empty_primary_is_one_block() {
        let file = FitsFile::new(vec![Hdu::empty_primary()]);
        let bytes = file.to_bytes();
        assert_eq!(bytes.len(), BLOCK_SIZE);
        let parsed = FitsFile::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed.hdu(0).unwrap().kind().unwrap(), HduKind::Primary);
    }

    #[test]
    fn extension_data_is_unpadded_after_parse() {
        let file = FitsFile::new(vec![Hdu::empty_primary(), image_extension(&[1, -2, 3])]);
        let bytes = file.to_bytes();
        assert_eq!(bytes.len(), 3 * BLOCK_SIZE);

        let parsed = FitsFile::from_bytes(&bytes).unwrap();
        let raw = parsed.hdu_by_name("RAW").unwrap();
        assert_eq!(raw.kind().unwrap(), HduKind::Image);
        assert_eq!(raw.data.len(), 6);
        assert_eq!(parsed.position("RAW"), Some(1));
    }

    #[test]
    fn missing_hdu_is_reported_by_name() {
        let file = FitsFile::new(vec![Hdu::empty_primary()]);
        assert!(matches!(
            file.hdu_by_name("EBOUNDS"),
            Err(Error::MissingHdu(name)) if name == "EBOUNDS"
        ));
    }

    #[test]
    fn truncated_data_is_eof() {
        let file = FitsFile::new(vec![Hdu::empty_primary(), image_extension(&[1, 2])]);
        let bytes = file.to_bytes();
        let cut = &bytes[..2 * BLOCK_SIZE];
        assert!(matches!(
            FitsFile::from_bytes(cut),
            Err(Error::UnexpectedEof)
        ));
    }

    #[test]
    fn replace_swaps_hdu_in_place() {
        let mut file = FitsFile::new(vec![Hdu::empty_primary(), image_extension(&[1])]);
        file.replace(1, image_extension(&[4, 5])).unwrap();
        assert_eq!(file.hdu(1).unwrap().data.len(), 4);
        assert!(file.replace(7, Hdu::empty_primary()).is_err());
    }
}
