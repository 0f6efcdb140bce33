//! Call contract for the OPERA run-length image codec.
//!
//! Radar bitmaps travel inside BUFR data sections as a flat parcel of
//! numeric element values produced by a run-length scheme that is
//! separate from the bit packing done here. This crate never inspects
//! parcel internals; an external codec implements [`RunLengthCodec`]
//! and the application feeds the parcel values through `encode`/`decode`
//! like any other element values.

use crate::errors::Result;
use crate::value::Value;

/// Pixel storage of a decoded radar image.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    /// One byte per pixel.
    Byte(Vec<u8>),
    /// Two bytes per pixel, high byte first on the wire.
    Short(Vec<u16>),
    /// Native float pixels.
    Float(Vec<f32>),
}

/// A 2-D radar image in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct RadarImage {
    pub nrows: usize,
    pub ncols: usize,
    pub data: PixelData,
}

impl RadarImage {
    pub fn len(&self) -> usize {
        match &self.data {
            PixelData::Byte(v) => v.len(),
            PixelData::Short(v) => v.len(),
            PixelData::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// External run-length codec for radar bitmaps.
///
/// `compress` turns an image into the flat value parcel that is stored
/// under a delayed-replicated pixel descriptor; `decompress` is the
/// inverse and recovers the image dimensions from the parcel header.
pub trait RunLengthCodec {
    fn compress(&self, image: &RadarImage) -> Result<Vec<Value>>;

    fn decompress(&self, parcel: &[Value]) -> Result<RadarImage>;
}
