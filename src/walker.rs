//! The descriptor interpreter: recursively walks a flat descriptor array,
//! driving a read/write callback pair against the data stream while operator
//! descriptors mutate the interpreter registers for subsequent elements.
//!
//! The same walk serves decoding (bitstream source, record sink), encoding
//! (value-array source, bitstream sink) and transcoding, because both sides
//! are behind the [`ReadValue`]/[`WriteValue`] traits.

use rustc_hash::FxHashMap;

use crate::descriptor::{
    ASSOC_SPECIAL, CCITT_SPECIAL, ElementEntry, FXY, NODATA_SPECIAL, REFVAL_SPECIAL,
};
use crate::errors::{Error, Result};
use crate::tables::Catalog;
use crate::value::Value;

/// How the value of one callback pair is laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PackingKind {
    /// An unsigned field of `Packing::width` bits, mapped through scale and
    /// reference value.
    Numeric,
    /// This many 8-bit CCITT IA5 characters.
    Chars(usize),
    /// No bits on the wire; the callback pair is a structural notification.
    Notify,
}

/// Effective wire layout for one callback pair, after all active operators
/// have been applied.
#[derive(Debug, Clone, Copy)]
pub struct Packing {
    /// The message descriptor this datum belongs to. For synthetic entries
    /// (associated fields, reference-value carriers) this is the descriptor
    /// that triggered them, not the synthetic key.
    pub descriptor: FXY,
    pub kind: PackingKind,
    pub width: u32,
    pub scale: i32,
    pub reference_value: f64,
    /// Whether an all-ones field maps to [`Value::Missing`]. Operator
    /// qualifiers (class 0 category 31) never decode as missing.
    pub allow_missing: bool,
}

impl Packing {
    fn numeric(descriptor: FXY, width: u32, scale: i32, reference_value: f64) -> Self {
        Packing {
            descriptor,
            kind: PackingKind::Numeric,
            width,
            scale,
            reference_value,
            allow_missing: true,
        }
    }

    fn notify(descriptor: FXY) -> Self {
        Packing {
            descriptor,
            kind: PackingKind::Notify,
            width: 0,
            scale: 0,
            reference_value: 0.0,
            allow_missing: false,
        }
    }

    fn chars(descriptor: FXY, count: usize) -> Self {
        Packing {
            descriptor,
            kind: PackingKind::Chars(count),
            width: count as u32 * 8,
            scale: 0,
            reference_value: 0.0,
            allow_missing: false,
        }
    }
}

pub trait ReadValue {
    fn read_value(&mut self, elem: &ElementEntry, packing: &Packing) -> Result<Value>;
}

pub trait WriteValue {
    fn write_value(&mut self, value: &Value, elem: &ElementEntry, packing: &Packing) -> Result<()>;
}

/// Soft limits guarding against pathological or corrupt input.
#[derive(Debug, Clone, Copy)]
pub struct WalkLimits {
    pub max_assoc_depth: usize,
    pub max_ref_overrides: usize,
    pub max_depth: usize,
}

impl Default for WalkLimits {
    fn default() -> Self {
        WalkLimits {
            max_assoc_depth: 10,
            max_ref_overrides: 10,
            max_depth: 64,
        }
    }
}

/// Date/time memo filled from descriptors (0,4,1)..(0,4,5) during a walk.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DateMemo {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
    pub hour: Option<u32>,
    pub minute: Option<u32>,
}

/// The interpreter registers. All default values mean "no modification";
/// 128 is the neutral offset for scale and width per the BUFR operator
/// convention.
#[derive(Debug)]
struct WalkState {
    scale_offset: i32,
    width_offset: i32,
    assoc_width: u32,
    assoc_stack: Vec<u32>,
    /// (descriptor, saved table reference value) in installation order.
    ref_saved: Vec<(FXY, f64)>,
    ref_active: FxHashMap<FXY, f64>,
    /// Edition 4 "increase scale, reference value and data width" operator.
    incr: i32,
    ccitt_chars: Option<usize>,
    rep_depth: usize,
    date: DateMemo,
}

impl Default for WalkState {
    fn default() -> Self {
        WalkState {
            scale_offset: 128,
            width_offset: 128,
            assoc_width: 0,
            assoc_stack: Vec::new(),
            ref_saved: Vec::new(),
            ref_active: FxHashMap::default(),
            incr: 0,
            ccitt_chars: None,
            rep_depth: 0,
            date: DateMemo::default(),
        }
    }
}

pub struct Walker<'c> {
    catalog: &'c Catalog,
    edition: u8,
    opera_mode: bool,
    limits: WalkLimits,
    state: WalkState,
}

impl<'c> Walker<'c> {
    pub fn new(catalog: &'c Catalog, edition: u8) -> Self {
        Walker {
            catalog,
            edition,
            opera_mode: false,
            limits: WalkLimits::default(),
            state: WalkState::default(),
        }
    }

    pub fn with_limits(mut self, limits: WalkLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Suppress missing-value mapping entirely, as the OPERA bitmap decode
    /// path does.
    pub fn set_opera_mode(&mut self, on: bool) {
        self.opera_mode = on;
    }

    /// The date/time memo collected by the most recent walk.
    pub fn date(&self) -> DateMemo {
        self.state.date
    }

    /// Walk the whole descriptor list once, pumping values from `src` into
    /// `sink`. Registers are reset on entry; a failed walk leaves the
    /// streams mid-message and they must not be reused except to close.
    ///
    /// With `emit_all`, sequences, replications and inert operators surface
    /// a notification callback instead of (for sequences) being expanded.
    pub fn walk<S, W>(&mut self, descs: &[FXY], src: &mut S, sink: &mut W, emit_all: bool) -> Result<()>
    where
        S: ReadValue + ?Sized,
        W: WriteValue + ?Sized,
    {
        self.state = WalkState::default();
        self.walk_slice(descs, src, sink, emit_all, 0)
    }

    fn walk_slice<S, W>(
        &mut self,
        descs: &[FXY],
        src: &mut S,
        sink: &mut W,
        emit_all: bool,
        depth: usize,
    ) -> Result<()>
    where
        S: ReadValue + ?Sized,
        W: WriteValue + ?Sized,
    {
        if depth > self.limits.max_depth {
            return Err(Error::RecursionLimit(self.limits.max_depth));
        }

        let mut i = 0;
        while i < descs.len() {
            let d = descs[i];
            match d.f {
                0 => {
                    self.element(d, src, sink, emit_all)?;
                    i += 1;
                }
                1 => {
                    i = self.replication(descs, i, src, sink, emit_all, depth)?;
                }
                2 => {
                    i = self.operator(descs, i, src, sink, emit_all)?;
                }
                3 => {
                    self.sequence(d, src, sink, emit_all, depth)?;
                    i += 1;
                }
                _ => return Err(Error::UnknownDescriptor(d)),
            }
        }
        Ok(())
    }

    fn element<S, W>(&mut self, d: FXY, src: &mut S, sink: &mut W, emit_all: bool) -> Result<Value>
    where
        S: ReadValue + ?Sized,
        W: WriteValue + ?Sized,
    {
        let catalog = self.catalog;
        let elem = catalog.element(d)?;

        if elem.is_ccitt() {
            let nchars = self
                .state
                .ccitt_chars
                .unwrap_or((elem.data_width / 8) as usize);
            if emit_all {
                let ascii = catalog.element(CCITT_SPECIAL)?;
                return self.transfer(src, sink, ascii, &Packing::chars(d, nchars));
            }
            let mut last = Value::Missing;
            for _ in 0..nchars {
                last = self.transfer(src, sink, elem, &Packing::chars(d, 1))?;
            }
            return Ok(last);
        }

        if self.state.assoc_width != 0 && !self.assoc_exempt(d) {
            let assoc = catalog.element(ASSOC_SPECIAL)?;
            let packing = Packing::numeric(d, self.state.assoc_width, 0, 0.0);
            self.transfer(src, sink, assoc, &packing)?;
        }

        let packing = self.effective_packing(elem);
        let value = self.transfer(src, sink, elem, &packing)?;

        if d.x == 4 && (1..=5).contains(&d.y) {
            self.memo_date(d.y, &value);
        }
        Ok(value)
    }

    /// Associated fields never precede the qualifier elements themselves:
    /// all of category 31 for edition 4 and later, only (0,31,21) before.
    fn assoc_exempt(&self, d: FXY) -> bool {
        if self.edition >= 4 {
            d.x == 31
        } else {
            d == FXY::new(0, 31, 21)
        }
    }

    fn memo_date(&mut self, y: u8, value: &Value) {
        let Some(v) = value.as_f64() else { return };
        if value.is_missing() {
            return;
        }
        let date = &mut self.state.date;
        match y {
            1 => {
                date.year = Some(if self.edition >= 4 {
                    v as i32
                } else {
                    (v as i32 - 1).rem_euclid(100) + 1
                });
            }
            2 => date.month = Some(v as u32),
            3 => date.day = Some(v as u32),
            4 => date.hour = Some(v as u32),
            5 => date.minute = Some(v as u32),
            _ => {}
        }
    }

    /// Compute the effective width/scale/reference value for one element.
    /// Qualifiers, strings, code and flag tables and the synthetic entries
    /// are taken as tabled; everything else gets the active operator
    /// modifications.
    fn effective_packing(&self, elem: &ElementEntry) -> Packing {
        let d = elem.fxy;
        let unmodified = d.is_qualifier()
            || elem.is_ccitt()
            || elem.is_code_or_flag_table()
            || matches!(d, CCITT_SPECIAL | REFVAL_SPECIAL | ASSOC_SPECIAL | NODATA_SPECIAL);

        let mut width = elem.data_width as i64;
        let mut scale = elem.scale;
        let mut reference_value = self
            .state
            .ref_active
            .get(&d)
            .copied()
            .unwrap_or(elem.reference_value);

        if !unmodified {
            width += (self.state.width_offset - 128) as i64;
            scale += self.state.scale_offset - 128;
            if self.state.incr != 0 {
                width += ((10 * self.state.incr + 2) / 3) as i64;
                scale += self.state.incr;
                reference_value *= 10f64.powi(self.state.incr);
            }
        }

        let mut packing = Packing::numeric(d, width.max(0) as u32, scale, reference_value);
        packing.allow_missing = d.x != 31 && !self.opera_mode;
        packing
    }

    fn sequence<S, W>(
        &mut self,
        d: FXY,
        src: &mut S,
        sink: &mut W,
        emit_all: bool,
        depth: usize,
    ) -> Result<()>
    where
        S: ReadValue + ?Sized,
        W: WriteValue + ?Sized,
    {
        let catalog = self.catalog;
        let seq = catalog.sequence(d)?;
        if emit_all {
            let nodata = catalog.element(NODATA_SPECIAL)?;
            self.transfer(src, sink, nodata, &Packing::notify(d))?;
            return Ok(());
        }
        self.walk_slice(&seq.children, src, sink, emit_all, depth + 1)
    }

    /// Handle a replication descriptor at `descs[i]`; returns the index of
    /// the first descriptor past the replicated range.
    fn replication<S, W>(
        &mut self,
        descs: &[FXY],
        i: usize,
        src: &mut S,
        sink: &mut W,
        emit_all: bool,
        depth: usize,
    ) -> Result<usize>
    where
        S: ReadValue + ?Sized,
        W: WriteValue + ?Sized,
    {
        let d = descs[i];
        let x = d.x as usize;
        let mut count = d.y as usize;

        if emit_all {
            let nodata = self.catalog.element(NODATA_SPECIAL)?;
            self.transfer(src, sink, nodata, &Packing::notify(d))?;
        }

        let mut body_start = i + 1;
        if d.y == 0 {
            // Delayed replication: the count is carried in-stream by the
            // next descriptor, which must be an element.
            let count_desc = *descs.get(i + 1).ok_or_else(|| {
                Error::MalformedMessage(format!("delayed replication {} has no count descriptor", d))
            })?;
            if !count_desc.is_element() {
                return Err(Error::MalformedMessage(format!(
                    "delayed replication count descriptor {} is not an element",
                    count_desc
                )));
            }
            let value = self.element(count_desc, src, sink, emit_all)?;
            count = value
                .as_f64()
                .map(|v| v.floor() as usize)
                .ok_or_else(|| {
                    Error::MalformedMessage("replication count is not numeric".to_string())
                })?;
            // (0,31,11) and (0,31,12) carry replication metadata that
            // appears exactly once, whatever their decoded value.
            if count_desc.y == 11 || count_desc.y == 12 {
                count = 1;
            }
            body_start = i + 2;
        }

        let body_end = body_start + x;
        if body_end > descs.len() {
            return Err(Error::MalformedMessage(format!(
                "replication {} wants {} descriptors, only {} remain",
                d,
                x,
                descs.len() - body_start
            )));
        }

        let body = &descs[body_start..body_end];
        for _ in 0..count {
            self.state.rep_depth += 1;
            self.walk_slice(body, src, sink, emit_all, depth + 1)?;
        }
        self.state.rep_depth = self.state.rep_depth.saturating_sub(count);

        Ok(body_end)
    }

    /// Handle an operator descriptor at `descs[i]`; returns the next index
    /// (operators 2-03 and 2-06 may consume following descriptors).
    fn operator<S, W>(
        &mut self,
        descs: &[FXY],
        i: usize,
        src: &mut S,
        sink: &mut W,
        emit_all: bool,
    ) -> Result<usize>
    where
        S: ReadValue + ?Sized,
        W: WriteValue + ?Sized,
    {
        let d = descs[i];
        let y = d.y;

        match d.x {
            1 => {
                self.state.width_offset = if y == 0 { 128 } else { y as i32 };
            }
            2 => {
                self.state.scale_offset = if y == 0 { 128 } else { y as i32 };
            }
            3 => match y {
                0 => self.restore_reference_values(),
                255 => {} // stray terminator
                _ => return self.refval_region(descs, i, y as u32, src, sink),
            },
            4 => {
                if y == 0 {
                    let prev = self.state.assoc_stack.pop().ok_or_else(|| {
                        Error::MalformedMessage("associated-field stack underflow".to_string())
                    })?;
                    self.state.assoc_width = prev;
                } else {
                    if self.state.assoc_stack.len() >= self.limits.max_assoc_depth {
                        return Err(Error::CapacityExceeded("associated-field nesting"));
                    }
                    self.state.assoc_stack.push(self.state.assoc_width);
                    self.state.assoc_width += y as u32;
                }
            }
            5 => {
                // Signify character: y literal CCITT characters.
                let ascii = self.catalog.element(CCITT_SPECIAL)?;
                for _ in 0..y {
                    self.transfer(src, sink, ascii, &Packing::chars(d, 1))?;
                }
            }
            6 => {
                // Signify local width: lets an unknown local descriptor be
                // skipped over with the declared width.
                if let Some(&next) = descs.get(i + 1) {
                    let known = next.is_element() && self.catalog.element(next).is_ok();
                    if !known {
                        let carrier = self.catalog.element(REFVAL_SPECIAL)?;
                        let mut packing = Packing::numeric(next, y as u32, 0, 0.0);
                        packing.allow_missing = false;
                        self.transfer(src, sink, carrier, &packing)?;
                        return Ok(i + 2);
                    }
                }
            }
            7 if self.edition >= 4 => {
                self.state.incr = y as i32;
            }
            8 if self.edition >= 4 => {
                self.state.ccitt_chars = if y == 0 { None } else { Some(y as usize) };
            }
            // The increase and character-width operators only exist from
            // edition 4 on; older messages carrying them are left alone.
            7 | 8 => {}
            21..=25 | 32 | 35..=37 | 41..=43 => {
                // Recognized but inert for en/decoding.
                if emit_all {
                    let nodata = self.catalog.element(NODATA_SPECIAL)?;
                    self.transfer(src, sink, nodata, &Packing::notify(d))?;
                }
            }
            _ => return Err(Error::UnknownModifier(d)),
        }
        Ok(i + 1)
    }

    /// Operator 2-03-y: each following element descriptor carries a new
    /// reference value of `width` bits (sign-magnitude, MSB is the sign)
    /// until a (2,3,255) terminator. The tabled values are saved and
    /// restorable by 2-03-000.
    fn refval_region<S, W>(
        &mut self,
        descs: &[FXY],
        i: usize,
        width: u32,
        src: &mut S,
        sink: &mut W,
    ) -> Result<usize>
    where
        S: ReadValue + ?Sized,
        W: WriteValue + ?Sized,
    {
        let catalog = self.catalog;
        let carrier = catalog.element(REFVAL_SPECIAL)?;

        let mut j = i + 1;
        while j < descs.len() {
            let d = descs[j];
            if d == FXY::new(2, 3, 255) {
                return Ok(j + 1);
            }
            if !d.is_element() {
                return Err(Error::MalformedMessage(format!(
                    "descriptor {} inside a reference-value override region",
                    d
                )));
            }
            if self.state.ref_saved.len() >= self.limits.max_ref_overrides {
                return Err(Error::CapacityExceeded("reference-value overrides"));
            }

            let elem = catalog.element(d)?;
            let mut packing = Packing::numeric(d, width, 0, 0.0);
            packing.allow_missing = false;
            let value = self.transfer(src, sink, carrier, &packing)?;
            let raw = value.as_f64().unwrap_or(0.0) as u64;

            // Sign-magnitude: a set MSB negates the remaining bits.
            let sign_bit = 1u64 << (width - 1);
            let new_ref = if raw & sign_bit != 0 {
                -((raw & !sign_bit) as f64)
            } else {
                raw as f64
            };

            self.state.ref_saved.push((d, elem.reference_value));
            self.state.ref_active.insert(d, new_ref);
            j += 1;
        }

        // No terminator before the end of the descriptor range; the region
        // swallows the rest.
        eprintln!("bufrlib: reference-value override region without 2 03 255 terminator");
        Ok(j)
    }

    /// Operator 2-03-000: drop every active override, restoring the tabled
    /// reference values.
    fn restore_reference_values(&mut self) {
        for (d, _) in self.state.ref_saved.drain(..) {
            self.state.ref_active.remove(&d);
        }
    }

    fn transfer<S, W>(
        &mut self,
        src: &mut S,
        sink: &mut W,
        elem: &ElementEntry,
        packing: &Packing,
    ) -> Result<Value>
    where
        S: ReadValue + ?Sized,
        W: WriteValue + ?Sized,
    {
        let value = src.read_value(elem, packing)?;
        sink.write_value(&value, elem, packing)?;
        Ok(value)
    }
}
