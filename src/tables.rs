//! Descriptor catalog: Table B elements, Table D sequences and the OPERA
//! bitmap-descriptor table, loaded from semicolon-delimited text files.

use std::io::Read;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use crate::descriptor::{ElementEntry, FXY, SequenceEntry, TableEntry, special_entries};
use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableType {
    B,
    D,
    BitMap,
}

pub trait TableTrait {
    fn file_path(&self, base: &Path, table_type: TableType) -> PathBuf;
}

#[derive(Debug, Clone, Copy)]
pub struct MasterTable {
    version: u8,
}

impl MasterTable {
    pub fn new(version: u8) -> Self {
        MasterTable { version }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LocalTable {
    center_code: u32,
    version: u8,
}

impl LocalTable {
    /// `center_code` is `subcenter * 256 + center`, the combined originating
    /// center identifier used in local table file names.
    pub fn new(center_code: u32, version: u8) -> Self {
        LocalTable {
            center_code,
            version,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BitmapTable {
    center_code: u32,
}

impl BitmapTable {
    pub fn new(center_code: u32) -> Self {
        BitmapTable { center_code }
    }
}

impl TableTrait for MasterTable {
    fn file_path(&self, base: &Path, table_type: TableType) -> PathBuf {
        match table_type {
            TableType::B => base.join(format!("master/bufrtabb_{}.csv", self.version)),
            TableType::D => base.join(format!("master/bufrtabd_{}.csv", self.version)),
            TableType::BitMap => {
                unreachable!("Table type not supported for MasterTable")
            }
        }
    }
}

impl TableTrait for LocalTable {
    fn file_path(&self, base: &Path, table_type: TableType) -> PathBuf {
        match table_type {
            TableType::B => base.join(format!(
                "local/localtabb_{}_{}.csv",
                self.center_code, self.version
            )),
            TableType::D => base.join(format!(
                "local/localtabd_{}_{}.csv",
                self.center_code, self.version
            )),
            TableType::BitMap => {
                unreachable!("Table type not supported for LocalTable")
            }
        }
    }
}

impl TableTrait for BitmapTable {
    fn file_path(&self, base: &Path, table_type: TableType) -> PathBuf {
        match table_type {
            TableType::BitMap => base.join(format!("local/bitmaps_{}.csv", self.center_code)),
            _ => unreachable!("Table type not supported for BitmapTable"),
        }
    }
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    serial: u32,
    entry: TableEntry,
}

/// Catalog of all known descriptors. Loading appends entries tagged with a
/// monotonically increasing serial, then rebuilds the sorted index keeping
/// the highest serial per key, so local tables loaded after master tables
/// override on conflict.
#[derive(Debug)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    bitmap_depths: FxHashMap<FXY, u8>,
    next_serial: u32,
    local_loaded: bool,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        let mut catalog = Catalog {
            entries: Vec::new(),
            bitmap_depths: FxHashMap::default(),
            next_serial: 0,
            local_loaded: false,
        };
        catalog.seed_specials();
        catalog
    }

    fn seed_specials(&mut self) {
        for entry in special_entries() {
            self.append(entry);
        }
        self.rebuild();
    }

    /// Load master tables for `master_version` (mandatory, with fallback to
    /// the nearest lower version), then local tables for
    /// `subcenter`/`center` (optional), then the bitmap table (optional),
    /// from the directory configured in [`crate::table_path`].
    pub fn load_tables(
        &mut self,
        master_version: u8,
        local_version: u8,
        subcenter: u16,
        center: u16,
    ) -> Result<()> {
        let base = crate::table_path::get_tables_base_path();
        self.load_tables_in(&base, master_version, local_version, subcenter, center)
    }

    /// As [`Catalog::load_tables`], with an explicit table directory.
    pub fn load_tables_in(
        &mut self,
        base: &Path,
        master_version: u8,
        local_version: u8,
        subcenter: u16,
        center: u16,
    ) -> Result<()> {
        self.local_loaded = false;
        let version = (0..=master_version)
            .rev()
            .find(|v| MasterTable::new(*v).file_path(base, TableType::B).exists())
            .ok_or_else(|| {
                Error::TableNotFound(MasterTable::new(master_version).file_path(base, TableType::B))
            })?;
        if version != master_version {
            eprintln!("bufrlib: falling back to master table version {}", version);
        }

        let master = MasterTable::new(version);
        self.load_table_b_file(master.file_path(base, TableType::B))?;
        self.load_table_d_file(master.file_path(base, TableType::D))?;

        let center_code = subcenter as u32 * 256 + center as u32;
        if local_version > 0 {
            let mut local = LocalTable::new(center_code, local_version);
            // Some centres publish their local tables under the centre code
            // alone; retry there when the combined-code file is absent.
            if subcenter != 0 && !local.file_path(base, TableType::B).exists() {
                local = LocalTable::new(center as u32, local_version);
            }
            let b_path = local.file_path(base, TableType::B);
            let d_path = local.file_path(base, TableType::D);
            let loaded_b = self.try_load_local(b_path, Catalog::load_table_b_file);
            let loaded_d = self.try_load_local(d_path, Catalog::load_table_d_file);
            self.local_loaded = loaded_b || loaded_d;
        }

        let bitmap_path = BitmapTable::new(center_code).file_path(base, TableType::BitMap);
        if bitmap_path.exists() {
            self.load_bitmap_file(bitmap_path)?;
        }

        self.rebuild();
        Ok(())
    }

    fn try_load_local(
        &mut self,
        path: PathBuf,
        load: fn(&mut Catalog, PathBuf) -> Result<()>,
    ) -> bool {
        match load(self, path) {
            Ok(()) => true,
            Err(e) => {
                eprintln!("bufrlib: local table not loaded: {}", e);
                false
            }
        }
    }

    /// Whether the last `load_tables` call found local tables. False after a
    /// master-only load; callers treating local tables as required can check
    /// this instead of relying on the stderr warning.
    pub fn has_local_tables(&self) -> bool {
        self.local_loaded
    }

    pub fn load_table_b_file(&mut self, path: PathBuf) -> Result<()> {
        let file = std::fs::File::open(&path).map_err(|_| Error::TableNotFound(path))?;
        self.load_table_b(file)
    }

    pub fn load_table_d_file(&mut self, path: PathBuf) -> Result<()> {
        let file = std::fs::File::open(&path).map_err(|_| Error::TableNotFound(path))?;
        self.load_table_d(file)
    }

    pub fn load_bitmap_file(&mut self, path: PathBuf) -> Result<()> {
        let file = std::fs::File::open(&path).map_err(|_| Error::TableNotFound(path))?;
        self.load_bitmap(file)
    }

    /// Parse Table B records from semicolon-delimited text. Two field
    /// layouts are accepted: the classic
    /// `f;x;y;name;unit;scale;reference_value;data_width` export and the
    /// extended `f;x;y;name;unit;;;scale;;reference_value;data_width` one
    /// with filler columns. Lines that do not parse are skipped.
    pub fn load_table_b<R: Read>(&mut self, reader: R) -> Result<()> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .flexible(true)
            .has_headers(false)
            .from_reader(reader);

        for record in csv_reader.records() {
            let record = record?;
            if let Some(entry) = parse_b_record(&record) {
                self.append(TableEntry::Element(entry));
            }
        }
        self.rebuild();
        Ok(())
    }

    /// Parse Table D records. Field layout per line:
    /// `f;x;y;child_f;child_x;child_y`, where a nonzero leading triple opens
    /// a new sequence and zero-triple lines extend the current one.
    pub fn load_table_d<R: Read>(&mut self, reader: R) -> Result<()> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .flexible(true)
            .has_headers(false)
            .from_reader(reader);

        let mut builder = SequenceBuilder::new();
        for record in csv_reader.records() {
            let record = record?;
            for entry in builder.feed(&record) {
                self.append(TableEntry::Sequence(entry));
            }
        }
        if let Some(entry) = builder.finish() {
            self.append(TableEntry::Sequence(entry));
        }
        self.rebuild();
        Ok(())
    }

    /// Parse the bitmap-descriptor table: `f;x;y;depth` with depth one of
    /// 1, 2, 4 or 8 bytes per pixel.
    pub fn load_bitmap<R: Read>(&mut self, reader: R) -> Result<()> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .flexible(true)
            .has_headers(false)
            .from_reader(reader);

        for record in csv_reader.records() {
            let record = record?;
            let parsed = (
                field_u8(&record, 0),
                field_u8(&record, 1),
                field_u8(&record, 2),
                field_u8(&record, 3),
            );
            if let (Some(f), Some(x), Some(y), Some(depth)) = parsed {
                if matches!(depth, 1 | 2 | 4 | 8) {
                    self.bitmap_depths.insert(FXY::new(f, x, y), depth);
                }
            }
        }
        Ok(())
    }

    pub fn append(&mut self, entry: TableEntry) {
        self.entries.push(CatalogEntry {
            serial: self.next_serial,
            entry,
        });
        self.next_serial += 1;
    }

    /// Sort by key and drop duplicates, keeping the most recently loaded
    /// entry per key.
    pub fn rebuild(&mut self) {
        self.entries
            .sort_by(|a, b| match a.entry.fxy().cmp(&b.entry.fxy()) {
                std::cmp::Ordering::Equal => b.serial.cmp(&a.serial),
                other => other,
            });
        self.entries.dedup_by(|a, b| a.entry.fxy() == b.entry.fxy());
    }

    /// Binary search for a key; index is stable until the next load/clear.
    pub fn lookup(&self, fxy: FXY) -> Option<usize> {
        self.entries
            .binary_search_by(|e| e.entry.fxy().cmp(&fxy))
            .ok()
    }

    pub fn entry(&self, index: usize) -> &TableEntry {
        &self.entries[index].entry
    }

    pub fn element(&self, fxy: FXY) -> Result<&ElementEntry> {
        self.lookup(fxy)
            .and_then(|i| self.entry(i).as_element())
            .ok_or(Error::UnknownDescriptor(fxy))
    }

    pub fn sequence(&self, fxy: FXY) -> Result<&SequenceEntry> {
        self.lookup(fxy)
            .and_then(|i| self.entry(i).as_sequence())
            .ok_or(Error::UnknownDescriptor(fxy))
    }

    pub fn bitmap_depth(&self, fxy: FXY) -> Option<u8> {
        self.bitmap_depths.get(&fxy).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every loaded entry and reseed the synthetic specials. Safe to
    /// call repeatedly; a subsequent `load_tables` starts from scratch.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.bitmap_depths.clear();
        self.next_serial = 0;
        self.local_loaded = false;
        self.seed_specials();
    }
}

fn field_str<'r>(record: &'r csv::StringRecord, index: usize) -> Option<&'r str> {
    record.get(index).map(str::trim)
}

fn field_u8(record: &csv::StringRecord, index: usize) -> Option<u8> {
    field_str(record, index)?.parse().ok()
}

fn field_i32(record: &csv::StringRecord, index: usize) -> Option<i32> {
    field_str(record, index)?.parse().ok()
}

fn field_f64(record: &csv::StringRecord, index: usize) -> Option<f64> {
    field_str(record, index)?.parse().ok()
}

fn parse_b_record(record: &csv::StringRecord) -> Option<ElementEntry> {
    let f = field_u8(record, 0)?;
    let x = field_u8(record, 1)?;
    let y = field_u8(record, 2)?;
    let name = field_str(record, 3)?.to_string();
    let unit = field_str(record, 4)?.to_string();
    if f != 0 {
        return None;
    }

    // Two exports are in circulation: the classic layout with scale,
    // reference value and width directly after the unit, and an extended
    // one with filler columns in between. A line is extended only if all
    // three extended positions hold values.
    let (scale, reference_value, data_width) = match (
        field_i32(record, 7),
        field_f64(record, 9),
        field_i32(record, 10),
    ) {
        (Some(scale), Some(reference_value), Some(data_width)) => {
            (scale, reference_value, data_width)
        }
        _ => (
            field_i32(record, 5)?,
            field_f64(record, 6)?,
            field_i32(record, 7)?,
        ),
    };
    if data_width < 0 {
        return None;
    }

    Some(ElementEntry {
        fxy: FXY::new(f, x, y),
        name,
        unit,
        scale,
        reference_value,
        data_width: data_width as u32,
    })
}

/// Accumulates one Table D sequence across the line-by-line parse; flushed
/// at sequence boundaries and end of input.
struct SequenceBuilder {
    current: Option<SequenceEntry>,
}

impl SequenceBuilder {
    fn new() -> Self {
        SequenceBuilder { current: None }
    }

    fn feed(&mut self, record: &csv::StringRecord) -> Option<SequenceEntry> {
        let f = field_u8(record, 0).unwrap_or(0);
        let x = field_u8(record, 1).unwrap_or(0);
        let y = field_u8(record, 2).unwrap_or(0);

        let child = match (
            field_u8(record, 3),
            field_u8(record, 4),
            field_u8(record, 5),
        ) {
            (Some(cf), Some(cx), Some(cy)) if cf != 0 || cx != 0 || cy != 0 => {
                Some(FXY::new(cf, cx, cy))
            }
            _ => None,
        };

        let mut flushed = None;
        if f == 3 || x != 0 || y != 0 {
            flushed = self.current.take();
            self.current = Some(SequenceEntry {
                fxy: FXY::new(3, x, y),
                children: Vec::new(),
            });
        }
        if let (Some(seq), Some(child)) = (self.current.as_mut(), child) {
            seq.children.push(child);
        }
        flushed
    }

    fn finish(self) -> Option<SequenceEntry> {
        self.current.filter(|s| !s.children.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::CCITT_SPECIAL;

    const TABLE_B: &str = "\
0;1;1;WMO block number;Numeric;;;0;;0;7
0;1;2;WMO station number;Numeric;;;0;;0;10
0;21;198;dBZ offset;dBZ;0;0;0;;-127;8
garbage line that should be skipped
0;4;1;Year;Year;;;0;;0;12
";

    const TABLE_D: &str = "\
3;1;1;0;1;1
;;;0;1;2
3;1;25;0;4;1
;;;0;21;198
";

    #[test]
    fn specials_present_in_fresh_catalog() {
        let catalog = Catalog::new();
        assert_eq!(catalog.len(), 4);
        assert!(catalog.element(CCITT_SPECIAL).is_ok());
    }

    #[test]
    fn table_b_loads_and_skips_malformed_lines() {
        let mut catalog = Catalog::new();
        catalog.load_table_b(TABLE_B.as_bytes()).unwrap();
        assert_eq!(catalog.len(), 4 + 4);

        let e = catalog.element(FXY::new(0, 21, 198)).unwrap();
        assert_eq!(e.name, "dBZ offset");
        assert_eq!(e.unit, "dBZ");
        assert_eq!(e.scale, 0);
        assert_eq!(e.reference_value, -127.0);
        assert_eq!(e.data_width, 8);
    }

    #[test]
    fn classic_layout_without_filler_columns_loads() {
        let classic = "\
0;5;2;Latitude (coarse accuracy);Degree;2;-9000;15
0;21;198;dBZ offset;dBZ;0;0;8;-127;8
";
        let mut catalog = Catalog::new();
        catalog.load_table_b(classic.as_bytes()).unwrap();

        let e = catalog.element(FXY::new(0, 5, 2)).unwrap();
        assert_eq!(e.scale, 2);
        assert_eq!(e.reference_value, -9000.0);
        assert_eq!(e.data_width, 15);

        let e = catalog.element(FXY::new(0, 21, 198)).unwrap();
        assert_eq!(e.scale, 0);
        assert_eq!(e.data_width, 8);
    }

    #[test]
    fn table_d_sequences_keep_child_order() {
        let mut catalog = Catalog::new();
        catalog.load_table_d(TABLE_D.as_bytes()).unwrap();

        let seq = catalog.sequence(FXY::new(3, 1, 1)).unwrap();
        assert_eq!(seq.children, vec![FXY::new(0, 1, 1), FXY::new(0, 1, 2)]);
        let seq = catalog.sequence(FXY::new(3, 1, 25)).unwrap();
        assert_eq!(seq.children, vec![FXY::new(0, 4, 1), FXY::new(0, 21, 198)]);
    }

    #[test]
    fn local_entry_overrides_master_entry() {
        let mut catalog = Catalog::new();
        catalog.load_table_b(TABLE_B.as_bytes()).unwrap();
        let master_len = catalog.len();

        let local = "0;1;1;Local block number;Numeric;;;2;;0;9\n";
        catalog.load_table_b(local.as_bytes()).unwrap();

        assert_eq!(catalog.len(), master_len);
        let e = catalog.element(FXY::new(0, 1, 1)).unwrap();
        assert_eq!(e.name, "Local block number");
        assert_eq!(e.data_width, 9);
        assert_eq!(e.scale, 2);
    }

    #[test]
    fn clear_is_idempotent_and_reloadable() {
        let mut catalog = Catalog::new();
        catalog.load_table_b(TABLE_B.as_bytes()).unwrap();
        catalog.clear();
        catalog.clear();
        assert_eq!(catalog.len(), 4);

        catalog.load_table_b(TABLE_B.as_bytes()).unwrap();
        assert!(catalog.element(FXY::new(0, 1, 1)).is_ok());
    }

    #[test]
    fn unknown_descriptor_is_an_error() {
        let catalog = Catalog::new();
        assert!(matches!(
            catalog.element(FXY::new(0, 63, 255)),
            Err(Error::UnknownDescriptor(_))
        ));
    }

    #[test]
    fn bitmap_table_maps_depths() {
        let mut catalog = Catalog::new();
        catalog
            .load_bitmap("3;21;192;8\n3;21;193;1\n3;21;194;3\n".as_bytes())
            .unwrap();
        assert_eq!(catalog.bitmap_depth(FXY::new(3, 21, 192)), Some(8));
        assert_eq!(catalog.bitmap_depth(FXY::new(3, 21, 193)), Some(1));
        // Depth 3 is not a valid pixel width.
        assert_eq!(catalog.bitmap_depth(FXY::new(3, 21, 194)), None);
    }

    #[test]
    fn load_tables_from_directory() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("master")).unwrap();
        let mut b = std::fs::File::create(dir.path().join("master/bufrtabb_11.csv")).unwrap();
        b.write_all(TABLE_B.as_bytes()).unwrap();
        let mut d = std::fs::File::create(dir.path().join("master/bufrtabd_11.csv")).unwrap();
        d.write_all(TABLE_D.as_bytes()).unwrap();

        let mut catalog = Catalog::new();
        // Version 13 is absent; the loader falls back to 11.
        catalog.load_tables_in(dir.path(), 13, 0, 0, 247).unwrap();
        assert!(catalog.element(FXY::new(0, 1, 1)).is_ok());
        assert!(catalog.sequence(FXY::new(3, 1, 1)).is_ok());
        assert!(!catalog.has_local_tables());
    }

    #[test]
    fn local_tables_fall_back_to_centre_only_filename() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("master")).unwrap();
        std::fs::create_dir(dir.path().join("local")).unwrap();
        let mut b = std::fs::File::create(dir.path().join("master/bufrtabb_11.csv")).unwrap();
        b.write_all(TABLE_B.as_bytes()).unwrap();
        let mut d = std::fs::File::create(dir.path().join("master/bufrtabd_11.csv")).unwrap();
        d.write_all(TABLE_D.as_bytes()).unwrap();
        // Published under the centre code alone, not the combined
        // sub-centre/centre code 3 * 256 + 85.
        let mut local = std::fs::File::create(dir.path().join("local/localtabb_85_2.csv")).unwrap();
        local
            .write_all(b"0;21;198;dBZ offset;dBZ;0;0;8;-127;8\n")
            .unwrap();

        let mut catalog = Catalog::new();
        catalog.load_tables_in(dir.path(), 11, 2, 3, 85).unwrap();
        assert!(catalog.has_local_tables());
        assert!(catalog.element(FXY::new(0, 21, 198)).is_ok());
    }

    #[test]
    fn reloading_without_local_tables_clears_the_flag() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("master")).unwrap();
        std::fs::create_dir(dir.path().join("local")).unwrap();
        let mut b = std::fs::File::create(dir.path().join("master/bufrtabb_11.csv")).unwrap();
        b.write_all(TABLE_B.as_bytes()).unwrap();
        let mut d = std::fs::File::create(dir.path().join("master/bufrtabd_11.csv")).unwrap();
        d.write_all(TABLE_D.as_bytes()).unwrap();
        let mut local = std::fs::File::create(dir.path().join("local/localtabb_85_2.csv")).unwrap();
        local
            .write_all(b"0;21;198;dBZ offset;dBZ;0;0;8;-127;8\n")
            .unwrap();

        let mut catalog = Catalog::new();
        catalog.load_tables_in(dir.path(), 11, 2, 0, 85).unwrap();
        assert!(catalog.has_local_tables());

        catalog.load_tables_in(dir.path(), 11, 0, 0, 85).unwrap();
        assert!(!catalog.has_local_tables());
    }
}
