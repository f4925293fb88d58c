//! `control.nacp` — the Nintendo Application Control Property blob carried
//! by a title's Control-type NCA. The installer only needs enough of it to
//! surface a localized display name to the UI after install; the rest of
//! the (quite large, 0x4000-byte) structure is Non-goal territory.
//!
//! Field layout cross-checked against the community-documented NACP format
//! (switchbrew.org/wiki/NACP) and `other_examples/`'s `raw-nacp.rs` sample.

use std::io::{Read, Seek, SeekFrom};

use binrw::prelude::*;

use crate::error::Error;

/// Total on-disk size of a `control.nacp` blob.
pub const NACP_SIZE: u64 = 0x4000;

/// Offset of `supported_language_flag`, relative to the start of the blob.
const SUPPORTED_LANGUAGE_FLAG_OFFSET: u64 = 0x3030;

/// One of the 16 fixed language slots: application name and publisher,
/// each a null-terminated UTF-8 string.
#[derive(BinRead, Debug, Clone, Copy)]
#[brw(little)]
pub struct NacpLanguageEntry {
    pub name: [u8; 0x200],
    pub author: [u8; 0x100],
}

impl NacpLanguageEntry {
    fn str_field(bytes: &[u8]) -> String {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }

    pub fn name(&self) -> String {
        Self::str_field(&self.name)
    }

    pub fn author(&self) -> String {
        Self::str_field(&self.author)
    }

    fn is_empty(&self) -> bool {
        self.name.iter().all(|&b| b == 0)
    }
}

/// Switch language indices, in the fixed order the console's settings use —
/// the same order `lang[]` and `supported_language_flag`'s bits follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NacpLanguage {
    AmericanEnglish = 0,
    BritishEnglish = 1,
    Japanese = 2,
    French = 3,
    German = 4,
    LatinAmericanSpanish = 5,
    Spanish = 6,
    Italian = 7,
    Dutch = 8,
    CanadianFrench = 9,
    Portuguese = 10,
    Russian = 11,
    Korean = 12,
    TraditionalChinese = 13,
    SimplifiedChinese = 14,
    BrazilianPortuguese = 15,
}

/// Parsed `control.nacp`, holding only the language table and supported
/// language bitmask — what's needed to pick a localized title name.
#[derive(Debug)]
pub struct ControlNacp {
    pub languages: [NacpLanguageEntry; 16],
    pub supported_language_flag: u32,
}

impl ControlNacp {
    pub fn from_reader<R: Read + Seek>(mut reader: R) -> Result<Self, Error> {
        let mut languages = [NacpLanguageEntry {
            name: [0; 0x200],
            author: [0; 0x100],
        }; 16];
        for entry in languages.iter_mut() {
            *entry = reader.read_le()?;
        }

        reader.seek(SeekFrom::Start(SUPPORTED_LANGUAGE_FLAG_OFFSET))?;
        let supported_language_flag: u32 = reader.read_le()?;

        Ok(Self {
            languages,
            supported_language_flag,
        })
    }

    /// Returns the name/author pair for the first language flagged as
    /// supported, falling back to American English, then to the first
    /// non-empty entry found — the same precedence sphaira's UI uses when
    /// surfacing a title's display name after install.
    pub fn localized_name(&self) -> Option<(String, String)> {
        for lang in [NacpLanguage::AmericanEnglish, NacpLanguage::BritishEnglish, NacpLanguage::Japanese] {
            if self.supported_language_flag & (1 << lang as u8) != 0 {
                let entry = &self.languages[lang as usize];
                if !entry.is_empty() {
                    return Some((entry.name(), entry.author()));
                }
            }
        }

        self.languages
            .iter()
            .find(|e| !e.is_empty())
            .map(|e| (e.name(), e.author()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn synthetic_control_nacp(name: &str, author: &str, supported_language_flag: u32) -> Vec<u8> {
        let mut out = vec![0u8; NACP_SIZE as usize];

        let mut name_bytes = [0u8; 0x200];
        name_bytes[..name.len()].copy_from_slice(name.as_bytes());
        let mut author_bytes = [0u8; 0x100];
        author_bytes[..author.len()].copy_from_slice(author.as_bytes());

        out[0..0x200].copy_from_slice(&name_bytes);
        out[0x200..0x300].copy_from_slice(&author_bytes);

        out[SUPPORTED_LANGUAGE_FLAG_OFFSET as usize..SUPPORTED_LANGUAGE_FLAG_OFFSET as usize + 4]
            .copy_from_slice(&supported_language_flag.to_le_bytes());

        out
    }

    #[test]
    fn test_parse_and_localize_name() {
        let bytes = synthetic_control_nacp("Test Game", "Test Studio", 1 << NacpLanguage::AmericanEnglish as u8);
        let nacp = ControlNacp::from_reader(Cursor::new(bytes)).unwrap();

        let (name, author) = nacp.localized_name().unwrap();
        assert_eq!(name, "Test Game");
        assert_eq!(author, "Test Studio");
    }

    #[test]
    fn test_falls_back_to_first_nonempty_entry() {
        // Only the Japanese slot (index 2) is populated, and the supported
        // language flag doesn't mark any of the priority languages.
        let mut bytes = vec![0u8; NACP_SIZE as usize];
        let name = b"Only Japanese";
        bytes[2 * 0x300..2 * 0x300 + name.len()].copy_from_slice(name);

        let nacp = ControlNacp::from_reader(Cursor::new(bytes)).unwrap();
        let (name, _) = nacp.localized_name().unwrap();
        assert_eq!(name, "Only Japanese");
    }
}
