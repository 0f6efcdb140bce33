use serde::{Deserialize, Serialize};

/// WMO "F X Y" descriptor key. F selects the descriptor class:
/// 0 = element, 1 = replication, 2 = operator, 3 = sequence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FXY {
    pub f: u8,
    pub x: u8,
    pub y: u8,
}

impl FXY {
    pub const fn new(f: u8, x: u8, y: u8) -> Self {
        FXY { f, x, y }
    }

    /// Pack into the 16-bit on-wire form used in section 3 (2 + 6 + 8 bits).
    pub fn to_u16(&self) -> u16 {
        ((self.f as u16) << 14) | ((self.x as u16) << 8) | (self.y as u16)
    }

    pub fn from_u16(raw: u16) -> Self {
        FXY {
            f: ((raw >> 14) & 0x3) as u8,
            x: ((raw >> 8) & 0x3f) as u8,
            y: (raw & 0xff) as u8,
        }
    }

    pub fn is_element(&self) -> bool {
        self.f == 0
    }

    pub fn is_replication(&self) -> bool {
        self.f == 1
    }

    pub fn is_operator(&self) -> bool {
        self.f == 2
    }

    pub fn is_sequence(&self) -> bool {
        self.f == 3
    }

    /// Class 31 elements qualify replication and associated fields and are
    /// exempt from width/scale modification and missing-value mapping.
    pub fn is_qualifier(&self) -> bool {
        self.f == 0 && self.x == 31
    }
}

impl std::fmt::Display for FXY {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {:02} {:03}", self.f, self.x, self.y)
    }
}

/// Synthetic catalog keys. These never appear in table files or in a
/// message's descriptor section; they identify the out-of-band entries the
/// walker hands to callbacks for data that has no Table B descriptor of its
/// own.
pub const CCITT_SPECIAL: FXY = FXY::new(2, 5, 0);
pub const REFVAL_SPECIAL: FXY = FXY::new(2, 3, 0);
pub const ASSOC_SPECIAL: FXY = FXY::new(2, 4, 0);
pub const NODATA_SPECIAL: FXY = FXY::new(2, 6, 0);

/// One Table B record: a leaf descriptor carrying an encoded value.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementEntry {
    pub fxy: FXY,
    pub name: String,
    pub unit: String,
    pub scale: i32,
    pub reference_value: f64,
    pub data_width: u32,
}

impl ElementEntry {
    pub fn is_ccitt(&self) -> bool {
        self.unit == "CCITT IA5" || self.unit == "CCITTIA5"
    }

    /// Case-insensitive, since table exports spell the unit every way from
    /// `CODE TABLE` to `Flag-Table`.
    pub fn is_code_or_flag_table(&self) -> bool {
        let unit = self.unit.trim();
        ["code table", "code-table", "flag table", "flag-table"]
            .iter()
            .any(|t| unit.eq_ignore_ascii_case(t))
    }
}

/// One Table D record: an ordered list of child descriptors. Child order is
/// the decode/encode order.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceEntry {
    pub fxy: FXY,
    pub children: Vec<FXY>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableEntry {
    Element(ElementEntry),
    Sequence(SequenceEntry),
}

impl TableEntry {
    pub fn fxy(&self) -> FXY {
        match self {
            TableEntry::Element(e) => e.fxy,
            TableEntry::Sequence(s) => s.fxy,
        }
    }

    pub fn as_element(&self) -> Option<&ElementEntry> {
        match self {
            TableEntry::Element(e) => Some(e),
            TableEntry::Sequence(_) => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&SequenceEntry> {
        match self {
            TableEntry::Sequence(s) => Some(s),
            TableEntry::Element(_) => None,
        }
    }
}

/// The four synthetic entries present in every catalog.
pub fn special_entries() -> Vec<TableEntry> {
    vec![
        TableEntry::Element(ElementEntry {
            fxy: CCITT_SPECIAL,
            name: "Character".to_string(),
            unit: "CCITT IA5".to_string(),
            scale: 0,
            reference_value: 0.0,
            data_width: 8,
        }),
        TableEntry::Element(ElementEntry {
            fxy: REFVAL_SPECIAL,
            name: "New reference value".to_string(),
            unit: "Numeric".to_string(),
            scale: 0,
            reference_value: 0.0,
            data_width: 0,
        }),
        TableEntry::Element(ElementEntry {
            fxy: ASSOC_SPECIAL,
            name: "Associated field".to_string(),
            unit: "Numeric".to_string(),
            scale: 0,
            reference_value: 0.0,
            data_width: 0,
        }),
        TableEntry::Element(ElementEntry {
            fxy: NODATA_SPECIAL,
            name: "Descriptor without data".to_string(),
            unit: "Numeric".to_string(),
            scale: 0,
            reference_value: 0.0,
            data_width: 0,
        }),
    ]
}
