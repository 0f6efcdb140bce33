pub mod bitio;
pub mod codec;
pub mod descriptor;
pub mod errors;
pub mod parser;
pub mod rlenc;
pub mod sections;
pub mod table_path;
pub mod tables;
pub mod value;
pub mod walker;

pub use crate::codec::{DecodedMessage, Encoded, Record, Recorder, decode, encode};
pub use crate::descriptor::{ElementEntry, FXY, SequenceEntry, TableEntry};
pub use crate::errors::{Error, Result};
pub use crate::parser::{BufrFile, parse, parse_bytes};
pub use crate::sections::{BufrMessage, Section1};
pub use crate::table_path::{get_tables_base_path, set_tables_base_path};
pub use crate::tables::Catalog;
pub use crate::value::{MISS_VAL, Value};
pub use crate::walker::{DateMemo, ReadValue, WalkLimits, Walker, WriteValue};
