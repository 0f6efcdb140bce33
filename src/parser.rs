//! File-level scanning: a physical file may carry any number of BUFR
//! messages back to back, possibly with padding or unrelated bytes in
//! between, and may be gzip-compressed as a whole.

use crate::errors::{Error, Result};
use crate::sections::{BUFR_MAGIC, BufrMessage, SECTION0_LEN};
use flate2::read::GzDecoder;
use std::{fs, io::Read, path::Path};

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// All messages found in one physical file, in file order.
#[derive(Default)]
pub struct BufrFile {
    messages: Vec<BufrMessage>,
}

impl BufrFile {
    pub fn new() -> Self {
        BufrFile::default()
    }

    pub fn push_message(&mut self, message: BufrMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[BufrMessage] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<BufrMessage> {
        self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Reads a BUFR file from disk, transparently inflating gzip input, and
/// collects every message whose sections parse.
pub fn parse<P: AsRef<Path>>(path: P) -> Result<BufrFile> {
    let raw = fs::read(path)?;
    if raw.starts_with(&GZIP_MAGIC) {
        let mut inflated = Vec::new();
        GzDecoder::new(raw.as_slice()).read_to_end(&mut inflated)?;
        Ok(parse_bytes(&inflated))
    } else {
        Ok(parse_bytes(&raw))
    }
}

/// Scans an already inflated buffer for `BUFR` start markers and splits
/// each candidate into its sections. A candidate whose sections do not
/// parse is reported on stderr and the scan resumes just past its start
/// marker, so one corrupt message never hides the ones behind it.
pub fn parse_bytes(bytes: &[u8]) -> BufrFile {
    let mut file = BufrFile::new();
    let mut pos = 0;
    while let Some(start) = find_magic(bytes, pos) {
        match message_at(bytes, start) {
            Ok(message) => {
                pos = start + message.total_len();
                file.push_message(message);
            }
            Err(e) => {
                eprintln!("Skipping BUFR candidate at offset {}: {}", start, e);
                pos = start + BUFR_MAGIC.len();
            }
        }
    }
    file
}

fn find_magic(bytes: &[u8], from: usize) -> Option<usize> {
    bytes
        .get(from..)?
        .windows(BUFR_MAGIC.len())
        .position(|window| window == BUFR_MAGIC)
        .map(|i| from + i)
}

/// Slices the candidate at `start` to its declared total length and
/// hands it to the section splitter.
fn message_at(bytes: &[u8], start: usize) -> Result<BufrMessage> {
    let available = bytes.len() - start;
    let header = bytes
        .get(start..start + SECTION0_LEN)
        .ok_or(Error::TruncatedMessage {
            declared: SECTION0_LEN,
            available,
        })?;
    let declared = u32::from_be_bytes([0, header[4], header[5], header[6]]) as usize;
    let body = bytes
        .get(start..start + declared)
        .ok_or(Error::TruncatedMessage { declared, available })?;
    BufrMessage::from_bytes(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::FXY;
    use crate::sections::{
        SECTION5_LEN, Section0, Section1Ed4, encode_section3, encode_section4, encode_section5,
    };
    use flate2::{Compression, write::GzEncoder};
    use std::io::Write as _;

    fn message_bytes() -> Vec<u8> {
        let section1 = Section1Ed4 {
            length: 22,
            master_table: 0,
            centre: 247,
            subcentre: 0,
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
            second: 0,
            local_use: vec![],
        }
        .encode();
        let section3 = encode_section3(&[FXY::new(0, 1, 1)], 1);
        let section4 = encode_section4(vec![0b0001011_0]);
        let total = SECTION0_LEN + section1.len() + section3.len() + section4.len() + SECTION5_LEN;
        let section0 = Section0 {
            total_length: total as u32,
            edition: 4,
        }
        .encode();

        [section0, section1, section3, section4, encode_section5()].concat()
    }

    #[test]
    fn finds_every_message_in_a_concatenated_stream() {
        let message = message_bytes();
        let mut bytes = vec![0u8; 3];
        bytes.extend_from_slice(&message);
        bytes.extend_from_slice(b"noise");
        bytes.extend_from_slice(&message);

        let file = parse_bytes(&bytes);
        assert_eq!(file.len(), 2);
        assert_eq!(file.messages()[0].total_len(), message.len());
        assert_eq!(file.messages()[1].to_bytes(), message);
    }

    #[test]
    fn corrupt_candidate_does_not_hide_later_messages() {
        // A bare marker with a bogus declared length, then a real message.
        let mut bytes = b"BUFR\x00\x00\x10xxxx".to_vec();
        bytes.extend_from_slice(&message_bytes());

        let file = parse_bytes(&bytes);
        assert_eq!(file.len(), 1);
        assert_eq!(file.messages()[0].edition(), 4);
    }

    #[test]
    fn truncated_tail_is_skipped() {
        let message = message_bytes();
        let mut bytes = message.clone();
        bytes.extend_from_slice(&message[..message.len() / 2]);

        let file = parse_bytes(&bytes);
        assert_eq!(file.len(), 1);
    }

    #[test]
    fn empty_input_yields_no_messages() {
        assert!(parse_bytes(&[]).is_empty());
    }

    #[test]
    fn gzip_input_is_inflated_before_scanning() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&message_bytes()).unwrap();
        let gz = enc.finish().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("msg.bufr.gz");
        std::fs::write(&path, &gz).unwrap();

        let file = parse(&path).unwrap();
        assert_eq!(file.len(), 1);
    }
}
