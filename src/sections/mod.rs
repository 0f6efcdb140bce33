//! The six BUFR message sections: splitting a raw buffer into section
//! buffers, the fixed section 0/2/3/4/5 layouts, and the edition-dependent
//! section 1 layouts in [`ed3`]/[`ed4`].

pub mod ed3;
pub mod ed4;

use nom::{
    IResult,
    bytes::complete::{tag, take},
    number::complete::{be_u8, be_u16, be_u24},
};

use crate::bitio::BitWriter;
use crate::descriptor::FXY;
use crate::errors::{Error, Result};

pub use ed3::Section1Ed3;
pub use ed4::Section1Ed4;

pub const BUFR_MAGIC: &[u8] = b"BUFR";
pub const END_MAGIC: &[u8] = b"7777";

/// Byte length of section 0 (magic + total length + edition).
pub const SECTION0_LEN: usize = 8;
/// Byte length of section 5 (the "7777" trailer).
pub const SECTION5_LEN: usize = 4;

#[inline]
pub(crate) fn skip1(input: &[u8]) -> IResult<&[u8], ()> {
    let (input, _) = take(1usize)(input)?;
    Ok((input, ()))
}

/// One BUFR message held as its six section buffers. Indices follow the WMO
/// numbering: 0 indicator, 1 identification, 2 optional, 3 data description,
/// 4 data, 5 end.
#[derive(Debug, Clone, Default)]
pub struct BufrMessage {
    pub sections: [Vec<u8>; 6],
}

impl BufrMessage {
    /// Split a raw buffer into section buffers, checking the "BUFR" and
    /// "7777" markers and each self-declared section length. A disagreement
    /// between the summed lengths and the total declared in section 0 is
    /// reported on stderr but tolerated.
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < SECTION0_LEN || &raw[..4] != BUFR_MAGIC {
            return Err(Error::MalformedMessage("missing BUFR marker".to_string()));
        }

        let section0 = Section0::parse(raw)?;
        let edition = section0.edition;

        let mut lengths = [0usize; 6];
        lengths[0] = SECTION0_LEN;

        let mut offset = SECTION0_LEN;
        lengths[1] = declared_length(raw, offset)?;

        // The optional-section flag sits at a different octet of section 1
        // depending on the edition.
        let flag_index = if edition >= 4 { 9 } else { 7 };
        let flags = *raw
            .get(offset + flag_index)
            .ok_or(Error::TruncatedMessage {
                declared: offset + flag_index + 1,
                available: raw.len(),
            })?;
        let optional_present = (flags & 0x80) != 0;

        offset += lengths[1];
        lengths[2] = if optional_present {
            declared_length(raw, offset)?
        } else {
            0
        };
        offset += lengths[2];
        lengths[3] = declared_length(raw, offset)?;
        offset += lengths[3];
        lengths[4] = declared_length(raw, offset)?;
        offset += lengths[4];
        lengths[5] = SECTION5_LEN;

        let declared: usize = lengths.iter().sum();
        if declared > raw.len() {
            return Err(Error::TruncatedMessage {
                declared,
                available: raw.len(),
            });
        }
        if raw[offset..offset + SECTION5_LEN] != *END_MAGIC {
            return Err(Error::MalformedMessage("missing 7777 marker".to_string()));
        }
        if declared != section0.total_length as usize {
            eprintln!(
                "bufrlib: section lengths sum to {} but section 0 declares {}",
                declared, section0.total_length
            );
        }

        let mut sections: [Vec<u8>; 6] = Default::default();
        let mut start = 0usize;
        for (section, len) in sections.iter_mut().zip(lengths) {
            *section = raw[start..start + len].to_vec();
            start += len;
        }
        Ok(BufrMessage { sections })
    }

    pub fn section_lengths(&self) -> [usize; 6] {
        std::array::from_fn(|i| self.sections[i].len())
    }

    pub fn total_len(&self) -> usize {
        self.sections.iter().map(Vec::len).sum()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.sections.concat()
    }

    pub fn edition(&self) -> u8 {
        self.sections[0].get(7).copied().unwrap_or(0)
    }

    pub fn section1(&self) -> Result<Section1> {
        Section1::parse(&self.sections[1], self.edition())
    }

    /// The descriptor list from section 3, in message order.
    pub fn descriptors(&self) -> Result<Vec<FXY>> {
        let header = Section3Header::parse(&self.sections[3])?;
        let body = &self.sections[3][7..];
        let mut descriptors = Vec::with_capacity(header.descriptor_count(&self.sections[3]));
        for chunk in body.chunks_exact(2) {
            descriptors.push(FXY::from_u16(u16::from_be_bytes([chunk[0], chunk[1]])));
        }
        Ok(descriptors)
    }

    pub fn subset_count(&self) -> Result<u16> {
        Ok(Section3Header::parse(&self.sections[3])?.number_of_subsets)
    }

    pub fn is_compressed(&self) -> Result<bool> {
        Ok(Section3Header::parse(&self.sections[3])?.is_compressed)
    }

    /// The packed element values of section 4, after its 4-byte header.
    pub fn data(&self) -> Result<&[u8]> {
        if self.sections[4].len() < 4 {
            return Err(Error::MalformedMessage("section 4 too short".to_string()));
        }
        Ok(&self.sections[4][4..])
    }
}

fn declared_length(raw: &[u8], offset: usize) -> Result<usize> {
    let bytes = raw.get(offset..offset + 3).ok_or(Error::TruncatedMessage {
        declared: offset + 3,
        available: raw.len(),
    })?;
    Ok(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]) as usize)
}

#[derive(Debug, Clone, Copy)]
pub struct Section0 {
    pub total_length: u32,
    pub edition: u8,
}

impl Section0 {
    pub fn parse(input: &[u8]) -> Result<Self> {
        let (_, section0) = parse_section0(input)?;
        Ok(section0)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        for b in BUFR_MAGIC {
            w.append_bits(*b as u64, 8);
        }
        w.append_bits(self.total_length as u64, 24);
        w.append_bits(self.edition as u64, 8);
        w.finish()
    }
}

fn parse_section0(input: &[u8]) -> IResult<&[u8], Section0> {
    let (input, _) = tag(BUFR_MAGIC)(input)?;
    let (input, total_length) = be_u24(input)?;
    let (input, edition) = be_u8(input)?;
    Ok((
        input,
        Section0 {
            total_length,
            edition,
        },
    ))
}

/// Edition-dependent section 1. Editions below 4 share one layout.
#[derive(Debug, Clone)]
pub enum Section1 {
    Ed3(Section1Ed3),
    Ed4(Section1Ed4),
}

impl Section1 {
    pub fn parse(input: &[u8], edition: u8) -> Result<Self> {
        match edition {
            2 | 3 => Ok(Section1::Ed3(Section1Ed3::parse(input)?)),
            4 => Ok(Section1::Ed4(Section1Ed4::parse(input)?)),
            other => Err(Error::UnsupportedEdition(other)),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Section1::Ed3(s) => s.encode(),
            Section1::Ed4(s) => s.encode(),
        }
    }

    pub fn master_table_version(&self) -> u8 {
        match self {
            Section1::Ed3(s) => s.master_table_version,
            Section1::Ed4(s) => s.master_table_version,
        }
    }

    pub fn local_table_version(&self) -> u8 {
        match self {
            Section1::Ed3(s) => s.local_table_version,
            Section1::Ed4(s) => s.local_table_version,
        }
    }

    pub fn center_id(&self) -> u16 {
        match self {
            Section1::Ed3(s) => s.centre as u16,
            Section1::Ed4(s) => s.centre,
        }
    }

    pub fn subcenter_id(&self) -> u16 {
        match self {
            Section1::Ed3(s) => s.subcentre as u16,
            Section1::Ed4(s) => s.subcentre,
        }
    }

    pub fn data_category(&self) -> u8 {
        match self {
            Section1::Ed3(s) => s.data_category,
            Section1::Ed4(s) => s.data_category,
        }
    }

    pub fn optional_section_present(&self) -> bool {
        match self {
            Section1::Ed3(s) => s.optional_section_present,
            Section1::Ed4(s) => s.optional_section_present,
        }
    }
}

impl std::fmt::Display for Section1 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Section1::Ed3(s) => write!(f, "{}", s),
            Section1::Ed4(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Section3Header {
    pub length: usize,
    pub number_of_subsets: u16,
    pub is_observation: bool,
    pub is_compressed: bool,
}

impl Section3Header {
    pub fn parse(input: &[u8]) -> Result<Self> {
        let (_, header) = parse_section3_header(input)?;
        Ok(header)
    }

    fn descriptor_count(&self, section: &[u8]) -> usize {
        section.len().saturating_sub(7) / 2
    }
}

fn parse_section3_header(input: &[u8]) -> IResult<&[u8], Section3Header> {
    let (input, length) = be_u24(input)?;
    let (input, _) = skip1(input)?;
    let (input, number_of_subsets) = be_u16(input)?;
    let (input, flags) = be_u8(input)?;
    Ok((
        input,
        Section3Header {
            length: length as usize,
            number_of_subsets,
            is_observation: (flags & 0b1000_0000) != 0,
            is_compressed: (flags & 0b0100_0000) != 0,
        },
    ))
}

/// Build section 3 from a descriptor list: 24-bit length, one reserved
/// byte, 16-bit subset count, the 0x80 "observed, non-compressed" flag
/// byte, then one 16-bit triple per descriptor.
pub fn encode_section3(descriptors: &[FXY], number_of_subsets: u16) -> Vec<u8> {
    let length = 7 + descriptors.len() * 2;
    let mut w = BitWriter::new();
    w.append_bits(length as u64, 24);
    w.append_bits(0, 8);
    w.append_bits(number_of_subsets as u64, 16);
    w.append_bits(0x80, 8);
    for d in descriptors {
        w.append_bits(d.to_u16() as u64, 16);
    }
    w.finish()
}

/// Wrap packed section 4 data with its 24-bit length and reserved byte.
pub fn encode_section4(data: Vec<u8>) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.append_bits((data.len() + 4) as u64, 24);
    w.append_bits(0, 8);
    let mut out = w.finish();
    out.extend(data);
    out
}

pub fn encode_section5() -> Vec<u8> {
    END_MAGIC.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_message() -> Vec<u8> {
        let section1 = Section1Ed3 {
            length: 18,
            master_table: 0,
            subcentre: 0,
            centre: 247,
            update_sequence_number: 0,
            optional_section_present: false,
            data_category: 6,
            data_subcategory: 0,
            master_table_version: 11,
            local_table_version: 5,
            year: 9,
            month: 7,
            day: 23,
            hour: 16,
            minute: 0,
            local_use: vec![0],
        }
        .encode();
        let section3 = encode_section3(&[FXY::new(0, 1, 1)], 1);
        let section4 = encode_section4(vec![0b0001011_0]);
        let total = SECTION0_LEN + section1.len() + section3.len() + section4.len() + SECTION5_LEN;
        let section0 = Section0 {
            total_length: total as u32,
            edition: 3,
        }
        .encode();

        [section0, section1, vec![], section3, section4, encode_section5()].concat()
    }

    #[test]
    fn split_reproduces_section_boundaries() {
        let raw = minimal_message();
        let msg = BufrMessage::from_bytes(&raw).unwrap();
        assert_eq!(msg.section_lengths(), [8, 18, 0, 9, 5, 4]);
        assert_eq!(msg.total_len(), raw.len());
        assert_eq!(msg.to_bytes(), raw);
        assert_eq!(msg.edition(), 3);
    }

    #[test]
    fn descriptors_and_subsets_parsed_from_section3() {
        let msg = BufrMessage::from_bytes(&minimal_message()).unwrap();
        assert_eq!(msg.descriptors().unwrap(), vec![FXY::new(0, 1, 1)]);
        assert_eq!(msg.subset_count().unwrap(), 1);
        assert!(!msg.is_compressed().unwrap());
        assert_eq!(msg.data().unwrap(), &[0b0001011_0]);
    }

    #[test]
    fn section1_metadata_survives_roundtrip() {
        let msg = BufrMessage::from_bytes(&minimal_message()).unwrap();
        let s1 = msg.section1().unwrap();
        assert_eq!(s1.master_table_version(), 11);
        assert_eq!(s1.local_table_version(), 5);
        assert_eq!(s1.center_id(), 247);
        assert_eq!(s1.encode(), msg.sections[1]);
    }

    #[test]
    fn missing_markers_are_fatal() {
        assert!(matches!(
            BufrMessage::from_bytes(b"NOPE"),
            Err(Error::MalformedMessage(_))
        ));

        let mut raw = minimal_message();
        let len = raw.len();
        raw[len - 4..].copy_from_slice(b"xxxx");
        assert!(matches!(
            BufrMessage::from_bytes(&raw),
            Err(Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn truncated_buffer_is_fatal() {
        let raw = minimal_message();
        assert!(matches!(
            BufrMessage::from_bytes(&raw[..raw.len() - 6]),
            Err(Error::TruncatedMessage { .. })
        ));
    }
}
