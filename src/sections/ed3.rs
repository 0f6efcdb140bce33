//! Section 1 layout for BUFR editions 2 and 3: 8-bit centre identifiers and
//! a two-digit year of century, padded to an even length with one filler
//! octet.

use nom::{
    IResult,
    number::complete::{be_u8, be_u24},
};

use crate::bitio::BitWriter;
use crate::errors::Result;

pub const SECTION1_ED3_LEN: usize = 18;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section1Ed3 {
    pub length: usize,                  // octets 1-3
    pub master_table: u8,               // octet 4
    pub subcentre: u8,                  // octet 5
    pub centre: u8,                     // octet 6
    pub update_sequence_number: u8,     // octet 7
    pub optional_section_present: bool, // octet 8 bit 1
    pub data_category: u8,              // octet 9
    pub data_subcategory: u8,           // octet 10
    pub master_table_version: u8,       // octet 11
    pub local_table_version: u8,        // octet 12
    pub year: u8,                       // octet 13, year of century
    pub month: u8,                      // octet 14
    pub day: u8,                        // octet 15
    pub hour: u8,                       // octet 16
    pub minute: u8,                     // octet 17
    /// Octet 18 onward: the even-length filler and any local-use bytes,
    /// kept verbatim so re-encoding is byte exact.
    pub local_use: Vec<u8>,
}

impl Section1Ed3 {
    pub fn parse(input: &[u8]) -> Result<Self> {
        let (_, section1) = parse_section1(input)?;
        Ok(section1)
    }

    /// Byte-exact encoding of the layout above, followed by the retained
    /// local-use octets.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.append_bits((17 + self.local_use.len()) as u64, 24);
        w.append_bits(self.master_table as u64, 8);
        w.append_bits(self.subcentre as u64, 8);
        w.append_bits(self.centre as u64, 8);
        w.append_bits(self.update_sequence_number as u64, 8);
        w.append_bits(if self.optional_section_present { 0x80 } else { 0 }, 8);
        w.append_bits(self.data_category as u64, 8);
        w.append_bits(self.data_subcategory as u64, 8);
        w.append_bits(self.master_table_version as u64, 8);
        w.append_bits(self.local_table_version as u64, 8);
        w.append_bits(self.year as u64, 8);
        w.append_bits(self.month as u64, 8);
        w.append_bits(self.day as u64, 8);
        w.append_bits(self.hour as u64, 8);
        w.append_bits(self.minute as u64, 8);
        let mut bytes = w.finish();
        bytes.extend_from_slice(&self.local_use);
        bytes
    }
}

fn parse_section1(input: &[u8]) -> IResult<&[u8], Section1Ed3> {
    let (input, length) = be_u24(input)?;
    let length = length as usize;

    const FIXED_LEN: usize = 17;
    if length < FIXED_LEN {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::LengthValue,
        )));
    }

    let (input, master_table) = be_u8(input)?;
    let (input, subcentre) = be_u8(input)?;
    let (input, centre) = be_u8(input)?;
    let (input, update_sequence_number) = be_u8(input)?;
    let (input, optional_section_flag) = be_u8(input)?;
    let (input, data_category) = be_u8(input)?;
    let (input, data_subcategory) = be_u8(input)?;
    let (input, master_table_version) = be_u8(input)?;
    let (input, local_table_version) = be_u8(input)?;
    let (input, year) = be_u8(input)?;
    let (input, month) = be_u8(input)?;
    let (input, day) = be_u8(input)?;
    let (input, hour) = be_u8(input)?;
    let (input, minute) = be_u8(input)?;

    // Remaining octets are reserved for local use. Keep them so the
    // section re-encodes byte for byte.
    let local_len = length - FIXED_LEN;
    let (input, local_use) = nom::bytes::complete::take(local_len)(input)?;

    Ok((
        input,
        Section1Ed3 {
            length,
            master_table,
            subcentre,
            centre,
            update_sequence_number,
            optional_section_present: (optional_section_flag & 0x80) != 0,
            data_category,
            data_subcategory,
            master_table_version,
            local_table_version,
            year,
            month,
            day,
            hour,
            minute,
            local_use: local_use.to_vec(),
        },
    ))
}

impl std::fmt::Display for Section1Ed3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Section 1 (edition <4):")?;
        writeln!(f, "  Centre / sub-centre:  {} / {}", self.centre, self.subcentre)?;
        writeln!(
            f,
            "  Tables:               master {} v{}, local v{}",
            self.master_table, self.master_table_version, self.local_table_version
        )?;
        writeln!(
            f,
            "  Category:             {} / {}",
            self.data_category, self.data_subcategory
        )?;
        write!(
            f,
            "  DateTime:             year {:02}, {:02}-{:02} {:02}:{:02} UTC",
            self.year, self.month, self.day, self.hour, self.minute
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_parse_is_byte_exact() {
        let s1 = Section1Ed3 {
            length: SECTION1_ED3_LEN,
            master_table: 0,
            subcentre: 0,
            centre: 247,
            update_sequence_number: 1,
            optional_section_present: false,
            data_category: 6,
            data_subcategory: 0,
            master_table_version: 11,
            local_table_version: 8,
            year: 9,
            month: 7,
            day: 23,
            hour: 16,
            minute: 30,
            local_use: vec![0],
        };
        let bytes = s1.encode();
        assert_eq!(bytes.len(), SECTION1_ED3_LEN);
        let parsed = Section1Ed3::parse(&bytes).unwrap();
        assert_eq!(parsed, s1);
        assert_eq!(parsed.encode(), bytes);
    }

    #[test]
    fn longer_local_use_area_survives_reencoding() {
        let bytes = Section1Ed3 {
            length: SECTION1_ED3_LEN + 2,
            master_table: 0,
            subcentre: 3,
            centre: 85,
            update_sequence_number: 0,
            optional_section_present: true,
            data_category: 6,
            data_subcategory: 0,
            master_table_version: 13,
            local_table_version: 1,
            year: 25,
            month: 1,
            day: 2,
            hour: 3,
            minute: 4,
            local_use: vec![0x00, 0xaa, 0xbb],
        }
        .encode();
        assert_eq!(bytes.len(), SECTION1_ED3_LEN + 2);

        let parsed = Section1Ed3::parse(&bytes).unwrap();
        assert_eq!(parsed.length, SECTION1_ED3_LEN + 2);
        assert!(parsed.optional_section_present);
        assert_eq!(parsed.centre, 85);
        assert_eq!(parsed.local_use, [0x00, 0xaa, 0xbb]);
        assert_eq!(parsed.encode(), bytes);
    }
}
