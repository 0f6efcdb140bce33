//! Message assembly: the four callback implementations that plug the walker
//! into bitstreams and value arrays, and the top-level decode/encode entry
//! points.

use crate::bitio::{BitReader, BitWriter};
use crate::descriptor::{ElementEntry, FXY};
use crate::errors::{Error, Result};
use crate::sections::{BufrMessage, Section0, Section1, encode_section3, encode_section5};
use crate::tables::Catalog;
use crate::value::Value;
use crate::walker::{DateMemo, Packing, PackingKind, ReadValue, Walker, WriteValue};

/// Reads values off a packed data-section bitstream.
pub struct BitSource<'a> {
    reader: BitReader<'a>,
}

impl<'a> BitSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitSource {
            reader: BitReader::new(data),
        }
    }

    pub fn bit_position(&self) -> usize {
        self.reader.bit_position()
    }
}

fn all_ones(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

impl ReadValue for BitSource<'_> {
    fn read_value(&mut self, _elem: &ElementEntry, packing: &Packing) -> Result<Value> {
        match packing.kind {
            PackingKind::Notify => Ok(Value::Missing),
            PackingKind::Chars(n) => Ok(Value::String(self.reader.read_string(n)?)),
            PackingKind::Numeric => {
                let width = packing.width;
                let raw = self.reader.read_bits(width as usize)?;
                if packing.allow_missing && width > 0 && raw == all_ones(width) {
                    return Ok(Value::Missing);
                }
                let v = (raw as f64 + packing.reference_value) * 10f64.powi(-packing.scale);
                Ok(Value::Number(v))
            }
        }
    }
}

/// Packs values onto a data-section bitstream.
pub struct BitSink {
    writer: BitWriter,
}

impl BitSink {
    pub fn new() -> Self {
        BitSink {
            writer: BitWriter::new(),
        }
    }

    pub fn writer_mut(&mut self) -> &mut BitWriter {
        &mut self.writer
    }

    pub fn into_writer(self) -> BitWriter {
        self.writer
    }
}

impl Default for BitSink {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteValue for BitSink {
    fn write_value(&mut self, value: &Value, _elem: &ElementEntry, packing: &Packing) -> Result<()> {
        match packing.kind {
            PackingKind::Notify => Ok(()),
            PackingKind::Chars(n) => {
                match value {
                    Value::String(s) => self.writer.append_string(s, n),
                    Value::Number(c) => {
                        self.writer.append_bits(*c as u64, n * 8);
                    }
                    Value::Missing => {
                        for _ in 0..n {
                            self.writer.append_bits(0xff, 8);
                        }
                    }
                }
                Ok(())
            }
            PackingKind::Numeric => {
                let width = packing.width;
                let raw = match value {
                    Value::Missing => all_ones(width),
                    Value::Number(v) => {
                        let scaled = (v * 10f64.powi(packing.scale) - packing.reference_value)
                            .round();
                        if scaled < 0.0 {
                            eprintln!(
                                "bufrlib: negative field value {} for {}, writing zero",
                                scaled, packing.descriptor
                            );
                            0
                        } else {
                            scaled as u64
                        }
                    }
                    Value::String(_) => {
                        return Err(Error::ParseError(format!(
                            "string value supplied for numeric descriptor {}",
                            packing.descriptor
                        )));
                    }
                };
                self.writer.append_bits(raw, width as usize);
                Ok(())
            }
        }
    }
}

/// Feeds values from an in-memory array, for encoding or transcoding.
pub struct SliceSource<'a> {
    values: &'a [Value],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(values: &'a [Value]) -> Self {
        SliceSource { values, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.values.len() - self.pos
    }
}

impl ReadValue for SliceSource<'_> {
    fn read_value(&mut self, _elem: &ElementEntry, packing: &Packing) -> Result<Value> {
        if packing.kind == PackingKind::Notify {
            return Ok(Value::Missing);
        }
        let value = self.values.get(self.pos).cloned().ok_or_else(|| {
            Error::ParseError(format!(
                "value array exhausted at descriptor {}",
                packing.descriptor
            ))
        })?;
        self.pos += 1;
        Ok(value)
    }
}

/// One decoded datum with its Table B identity.
#[derive(Debug, Clone)]
pub struct Record {
    pub descriptor: FXY,
    pub name: String,
    pub unit: String,
    pub value: Value,
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let width = f.width().unwrap_or(0);
        if width > 0 {
            write!(f, "{:<width$} : {}", self.name, self.value, width = width)?;
        } else {
            write!(f, "{} : {}", self.name, self.value)?;
        }
        match (&self.value, self.unit.as_str()) {
            (Value::Number(_), "Numeric" | "CCITT IA5" | "") => Ok(()),
            (Value::Number(_), unit) => write!(f, " {}", unit),
            _ => Ok(()),
        }
    }
}

/// Collects the walk output as a record list.
#[derive(Debug, Default)]
pub struct Recorder {
    records: Vec<Record>,
}

impl Recorder {
    pub fn new() -> Self {
        Recorder::default()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    /// The bare value stream, in walk order; feeding it back through a
    /// [`SliceSource`] reproduces the original data section.
    pub fn values(&self) -> Vec<Value> {
        self.records.iter().map(|r| r.value.clone()).collect()
    }
}

impl WriteValue for Recorder {
    fn write_value(&mut self, value: &Value, elem: &ElementEntry, packing: &Packing) -> Result<()> {
        if packing.kind == PackingKind::Notify {
            return Ok(());
        }
        self.records.push(Record {
            descriptor: packing.descriptor,
            name: elem.name.clone(),
            unit: elem.unit.clone(),
            value: value.clone(),
        });
        Ok(())
    }
}

impl std::fmt::Display for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name_width = self
            .records
            .iter()
            .map(|r| r.name.len())
            .max()
            .unwrap_or(0)
            .min(50);
        for record in &self.records {
            writeln!(f, "{:name_width$}", record)?;
        }
        Ok(())
    }
}

/// A fully decoded message: identification metadata plus one record list
/// per subset.
#[derive(Debug)]
pub struct DecodedMessage {
    pub section1: Section1,
    pub subsets: Vec<Vec<Record>>,
    pub date: DateMemo,
}

/// Decode every subset of a message against a loaded catalog.
pub fn decode(msg: &BufrMessage, catalog: &Catalog) -> Result<DecodedMessage> {
    let edition = msg.edition();
    let section1 = msg.section1()?;
    let descriptors = msg.descriptors()?;
    let subset_count = msg.subset_count()?;

    let mut src = BitSource::new(msg.data()?);
    let mut walker = Walker::new(catalog, edition);

    let mut subsets = Vec::with_capacity(subset_count as usize);
    for _ in 0..subset_count {
        let mut recorder = Recorder::new();
        walker.walk(&descriptors, &mut src, &mut recorder, false)?;
        subsets.push(recorder.into_records());
    }

    Ok(DecodedMessage {
        section1,
        subsets,
        date: walker.date(),
    })
}

/// An encoded message plus the number of values that had to be truncated
/// to their declared widths.
#[derive(Debug)]
pub struct Encoded {
    pub message: BufrMessage,
    pub truncations: usize,
}

/// Build a complete message from section 1 metadata, a descriptor list and
/// one value array per subset. Sections 3 and 4 are finalized first; their
/// lengths feed the total in section 0.
pub fn encode(
    section1: &Section1,
    descriptors: &[FXY],
    subsets: &[Vec<Value>],
    catalog: &Catalog,
) -> Result<Encoded> {
    let edition = match section1 {
        Section1::Ed3(_) => 3,
        Section1::Ed4(_) => 4,
    };

    let mut sink = BitSink::new();
    // Section 4 header: length backpatched once the body is packed.
    sink.writer_mut().append_bits(0, 24);
    sink.writer_mut().append_bits(0, 8);

    let mut walker = Walker::new(catalog, edition);
    for subset in subsets {
        let mut src = SliceSource::new(subset);
        walker.walk(descriptors, &mut src, &mut sink, false)?;
        if src.remaining() != 0 {
            eprintln!(
                "bufrlib: {} values left over after encoding subset",
                src.remaining()
            );
        }
    }

    let mut writer = sink.into_writer();
    let truncations = writer.truncation_count();
    writer.write_bits_at(writer.byte_len() as u64, 24, 0)?;
    let sec4 = writer.finish();

    let sec1 = section1.encode();
    let sec3 = encode_section3(descriptors, subsets.len() as u16);
    let sec5 = encode_section5();

    let total = 8 + sec1.len() + sec3.len() + sec4.len() + sec5.len();
    let sec0 = Section0 {
        total_length: total as u32,
        edition,
    }
    .encode();

    Ok(Encoded {
        message: BufrMessage {
            sections: [sec0, sec1, Vec::new(), sec3, sec4, sec5],
        },
        truncations,
    })
}
