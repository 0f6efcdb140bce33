//! Section 1 layout for BUFR edition 4: 16-bit centre identifiers,
//! four-digit year, second of minute and the international sub-category.

use nom::{
    IResult,
    bytes::complete::take,
    error::{Error as NomError, ErrorKind},
    number::complete::{be_u8, be_u16, be_u24},
};

use crate::bitio::BitWriter;
use crate::errors::Result;

pub const SECTION1_ED4_LEN: usize = 22;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section1Ed4 {
    pub length: usize,                      // octets 1-3
    pub master_table: u8,                   // octet 4
    pub centre: u16,                        // octets 5-6
    pub subcentre: u16,                     // octets 7-8
    pub update_sequence_number: u8,         // octet 9
    pub optional_section_present: bool,     // octet 10 bit 1
    pub data_category: u8,                  // octet 11
    pub international_data_subcategory: u8, // octet 12
    pub local_subcategory: u8,              // octet 13
    pub master_table_version: u8,           // octet 14
    pub local_table_version: u8,            // octet 15
    pub year: u16,                          // octets 16-17, four digits
    pub month: u8,                          // octet 18
    pub day: u8,                            // octet 19
    pub hour: u8,                           // octet 20
    pub minute: u8,                         // octet 21
    pub second: u8,                         // octet 22
    pub local_use: Vec<u8>,                 // octet 23-
}

impl Section1Ed4 {
    pub fn parse(input: &[u8]) -> Result<Self> {
        let (_, section1) = parse_section1(input)?;
        Ok(section1)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.append_bits((SECTION1_ED4_LEN + self.local_use.len()) as u64, 24);
        w.append_bits(self.master_table as u64, 8);
        w.append_bits(self.centre as u64, 16);
        w.append_bits(self.subcentre as u64, 16);
        w.append_bits(self.update_sequence_number as u64, 8);
        w.append_bits(if self.optional_section_present { 0x80 } else { 0 }, 8);
        w.append_bits(self.data_category as u64, 8);
        w.append_bits(self.international_data_subcategory as u64, 8);
        w.append_bits(self.local_subcategory as u64, 8);
        w.append_bits(self.master_table_version as u64, 8);
        w.append_bits(self.local_table_version as u64, 8);
        w.append_bits(self.year as u64, 16);
        w.append_bits(self.month as u64, 8);
        w.append_bits(self.day as u64, 8);
        w.append_bits(self.hour as u64, 8);
        w.append_bits(self.minute as u64, 8);
        w.append_bits(self.second as u64, 8);
        for b in &self.local_use {
            w.append_bits(*b as u64, 8);
        }
        w.finish()
    }
}

fn parse_section1(input: &[u8]) -> IResult<&[u8], Section1Ed4> {
    let (input, length_u24) = be_u24(input)?;
    let length = length_u24 as usize;

    if length < SECTION1_ED4_LEN {
        return Err(nom::Err::Error(NomError::new(input, ErrorKind::LengthValue)));
    }

    let (input, master_table) = be_u8(input)?;
    let (input, centre) = be_u16(input)?;
    let (input, subcentre) = be_u16(input)?;
    let (input, update_sequence_number) = be_u8(input)?;
    let (input, flags) = be_u8(input)?;
    let (input, data_category) = be_u8(input)?;
    let (input, international_data_subcategory) = be_u8(input)?;
    let (input, local_subcategory) = be_u8(input)?;
    let (input, master_table_version) = be_u8(input)?;
    let (input, local_table_version) = be_u8(input)?;
    let (input, year) = be_u16(input)?;
    let (input, month) = be_u8(input)?;
    let (input, day) = be_u8(input)?;
    let (input, hour) = be_u8(input)?;
    let (input, minute) = be_u8(input)?;
    let (input, second) = be_u8(input)?;

    let local_len = length - SECTION1_ED4_LEN;
    let (input, local_bytes) = take(local_len)(input)?;

    Ok((
        input,
        Section1Ed4 {
            length,
            master_table,
            centre,
            subcentre,
            update_sequence_number,
            optional_section_present: (flags & 0x80) != 0,
            data_category,
            international_data_subcategory,
            local_subcategory,
            master_table_version,
            local_table_version,
            year,
            month,
            day,
            hour,
            minute,
            second,
            local_use: local_bytes.to_vec(),
        },
    ))
}

impl std::fmt::Display for Section1Ed4 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Section 1 (edition 4):")?;
        writeln!(f, "  Centre / sub-centre:  {} / {}", self.centre, self.subcentre)?;
        writeln!(
            f,
            "  Tables:               master {} v{}, local v{}",
            self.master_table, self.master_table_version, self.local_table_version
        )?;
        writeln!(
            f,
            "  Category:             {} / {} (local {})",
            self.data_category, self.international_data_subcategory, self.local_subcategory
        )?;
        write!(
            f,
            "  DateTime:             {:04}-{:02}-{:02} {:02}:{:02}:{:02} UTC",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Section1Ed4 {
        Section1Ed4 {
            length: SECTION1_ED4_LEN,
            master_table: 0,
            centre: 65535,
            subcentre: 300,
            update_sequence_number: 0,
            optional_section_present: false,
            data_category: 6,
            international_data_subcategory: 0,
            local_subcategory: 0,
            master_table_version: 14,
            local_table_version: 0,
            year: 2026,
            month: 8,
            day: 26,
            hour: 12,
            minute: 0,
            second: 30,
            local_use: vec![],
        }
    }

    #[test]
    fn encode_parse_is_byte_exact() {
        let s1 = sample();
        let bytes = s1.encode();
        assert_eq!(bytes.len(), SECTION1_ED4_LEN);
        let parsed = Section1Ed4::parse(&bytes).unwrap();
        assert_eq!(parsed, s1);
        assert_eq!(parsed.encode(), bytes);
    }

    #[test]
    fn sixteen_bit_centres_survive() {
        let bytes = sample().encode();
        let parsed = Section1Ed4::parse(&bytes).unwrap();
        assert_eq!(parsed.centre, 65535);
        assert_eq!(parsed.subcentre, 300);
        assert_eq!(parsed.year, 2026);
    }

    #[test]
    fn local_use_bytes_are_kept() {
        let mut s1 = sample();
        s1.local_use = vec![1, 2, 3];
        s1.length = SECTION1_ED4_LEN + 3;
        let bytes = s1.encode();
        assert_eq!(bytes.len(), SECTION1_ED4_LEN + 3);
        let parsed = Section1Ed4::parse(&bytes).unwrap();
        assert_eq!(parsed.local_use, vec![1, 2, 3]);
    }
}
