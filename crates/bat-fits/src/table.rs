//! Binary table (`XTENSION = 'BINTABLE'`) column access and construction.
//!
//! Columns are read as `f64` regardless of their stored type; `TSCALn` and
//! `TZEROn` are applied. Variable-length `P`/`Q` columns are read row by row
//! through the heap. Multi-dimensional cells report their `TDIMn` shape in
//! row-major order (slowest axis first), the reverse of the on-disk keyword.

use crate::error::{Error, Result};
use crate::hdu::{Hdu, HduKind};
use crate::header::{Card, Header};

/// Element type of a binary table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// L
    Logical,
    /// X
    Bit,
    /// B
    Byte,
    /// I
    Short,
    /// J
    Int,
    /// K
    Long,
    /// E
    Float,
    /// D
    Double,
    /// C
    ComplexFloat,
    /// M
    ComplexDouble,
    /// A
    Ascii,
}

impl ColumnType {
    fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            b'L' => ColumnType::Logical,
            b'X' => ColumnType::Bit,
            b'B' => ColumnType::Byte,
            b'I' => ColumnType::Short,
            b'J' => ColumnType::Int,
            b'K' => ColumnType::Long,
            b'E' => ColumnType::Float,
            b'D' => ColumnType::Double,
            b'C' => ColumnType::ComplexFloat,
            b'M' => ColumnType::ComplexDouble,
            b'A' => ColumnType::Ascii,
            _ => return None,
        })
    }

    pub fn code(self) -> char {
        match self {
            ColumnType::Logical => 'L',
            ColumnType::Bit => 'X',
            ColumnType::Byte => 'B',
            ColumnType::Short => 'I',
            ColumnType::Int => 'J',
            ColumnType::Long => 'K',
            ColumnType::Float => 'E',
            ColumnType::Double => 'D',
            ColumnType::ComplexFloat => 'C',
            ColumnType::ComplexDouble => 'M',
            ColumnType::Ascii => 'A',
        }
    }

    /// Bytes per element; bit columns are handled by [`ColumnFormat::width`].
    pub fn size(self) -> usize {
        match self {
            ColumnType::Logical | ColumnType::Byte | ColumnType::Ascii | ColumnType::Bit => 1,
            ColumnType::Short => 2,
            ColumnType::Int | ColumnType::Float => 4,
            ColumnType::Long | ColumnType::Double | ColumnType::ComplexFloat => 8,
            ColumnType::ComplexDouble => 16,
        }
    }

    /// Whether a stored (already unscaled) value can be encoded as this
    /// type without clamping. Integer types round first.
    pub fn holds(self, stored: f64) -> bool {
        const TWO_63: f64 = 9_223_372_036_854_775_808.0;
        let v = stored.round();
        match self {
            ColumnType::Byte => stored.is_finite() && (0.0..=255.0).contains(&v),
            ColumnType::Short => {
                stored.is_finite() && (f64::from(i16::MIN)..=f64::from(i16::MAX)).contains(&v)
            }
            ColumnType::Int => {
                stored.is_finite() && (f64::from(i32::MIN)..=f64::from(i32::MAX)).contains(&v)
            }
            ColumnType::Long => stored.is_finite() && v >= -TWO_63 && v < TWO_63,
            ColumnType::Float => !stored.is_finite() || stored.abs() <= f64::from(f32::MAX),
            _ => true,
        }
    }

    fn is_integer(self) -> bool {
        matches!(
            self,
            ColumnType::Byte | ColumnType::Short | ColumnType::Int | ColumnType::Long
        )
    }

    /// The narrowest type, starting from `self`, that stores every value
    /// exactly: integer types step `B -> I -> J -> K` and fall back to `D`
    /// for fractional values; `E` moves to `D` when out of range.
    pub fn widened_for(self, values: &[f64]) -> ColumnType {
        const LADDER: [ColumnType; 4] = [
            ColumnType::Byte,
            ColumnType::Short,
            ColumnType::Int,
            ColumnType::Long,
        ];
        if self.is_integer() {
            if values.iter().any(|v| !v.is_finite() || v.fract() != 0.0) {
                return ColumnType::Double;
            }
            let from = LADDER.iter().position(|&t| t == self).unwrap_or(0);
            return LADDER[from..]
                .iter()
                .copied()
                .find(|t| values.iter().all(|&v| t.holds(v)))
                .unwrap_or(ColumnType::Double);
        }
        if self == ColumnType::Float && !values.iter().all(|&v| self.holds(v)) {
            return ColumnType::Double;
        }
        self
    }

    fn is_numeric(self) -> bool {
        matches!(
            self,
            ColumnType::Logical
                | ColumnType::Byte
                | ColumnType::Short
                | ColumnType::Int
                | ColumnType::Long
                | ColumnType::Float
                | ColumnType::Double
        )
    }
}

/// Storage layout of a column as declared by `TFORMn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnFormat {
    /// `rT`: `repeat` elements stored in the row.
    Fixed { repeat: usize, ty: ColumnType },
    /// `rPT` / `rQT`: a heap descriptor in the row; `long` for `Q`.
    Variable { ty: ColumnType, long: bool },
}

impl ColumnFormat {
    /// Parse a `TFORMn` value such as `1E`, `16A`, `1PE(4096)` or `QD`.
    pub fn parse(tform: &str) -> Option<Self> {
        let s = tform.trim();
        let s = match s.find('(') {
            Some(paren) => &s[..paren],
            None => s,
        };
        let digits = s.bytes().take_while(u8::is_ascii_digit).count();
        let repeat = if digits == 0 {
            1
        } else {
            s[..digits].parse().ok()?
        };
        match s.as_bytes().get(digits..)? {
            [code] => Some(ColumnFormat::Fixed {
                repeat,
                ty: ColumnType::from_code(*code)?,
            }),
            [b'P', code] => Some(ColumnFormat::Variable {
                ty: ColumnType::from_code(*code)?,
                long: false,
            }),
            [b'Q', code] => Some(ColumnFormat::Variable {
                ty: ColumnType::from_code(*code)?,
                long: true,
            }),
            _ => None,
        }
    }

    pub fn ty(self) -> ColumnType {
        match self {
            ColumnFormat::Fixed { ty, .. } | ColumnFormat::Variable { ty, .. } => ty,
        }
    }

    /// The same layout with a different element type.
    pub fn with_ty(self, ty: ColumnType) -> Self {
        match self {
            ColumnFormat::Fixed { repeat, .. } => ColumnFormat::Fixed { repeat, ty },
            ColumnFormat::Variable { long, .. } => ColumnFormat::Variable { ty, long },
        }
    }

    /// Bytes this column occupies in each row.
    pub fn width(self) -> usize {
        match self {
            ColumnFormat::Fixed {
                repeat,
                ty: ColumnType::Bit,
            } => repeat.div_ceil(8),
            ColumnFormat::Fixed { repeat, ty } => repeat * ty.size(),
            ColumnFormat::Variable { long: false, .. } => 8,
            ColumnFormat::Variable { long: true, .. } => 16,
        }
    }

    pub fn tform(self) -> String {
        match self {
            ColumnFormat::Fixed { repeat, ty } => format!("{repeat}{}", ty.code()),
            ColumnFormat::Variable { ty, long } => {
                format!("1{}{}", if long { 'Q' } else { 'P' }, ty.code())
            }
        }
    }
}

/// Layout and metadata of one column of a parsed table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub format: ColumnFormat,
    pub unit: Option<String>,
    /// Cell shape in row-major order, from `TDIMn`.
    pub dims: Option<Vec<usize>>,
    /// Byte offset of the column within a row.
    pub offset: usize,
    scale: f64,
    zero: f64,
}

impl ColumnInfo {
    /// Element count of one cell for fixed columns.
    pub fn repeat(&self) -> Option<usize> {
        match self.format {
            ColumnFormat::Fixed { repeat, .. } => Some(repeat),
            ColumnFormat::Variable { .. } => None,
        }
    }

    /// `TSCALn`, 1 when absent.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// `TZEROn`, 0 when absent.
    pub fn zero(&self) -> f64 {
        self.zero
    }

    /// Spec that recreates this column with the same type, unit, shape and
    /// scaling.
    pub fn spec(&self) -> ColumnSpec {
        ColumnSpec {
            name: self.name.clone(),
            format: self.format,
            unit: self.unit.clone(),
            dims: self.dims.clone(),
            scale: self.scale,
            zero: self.zero,
        }
    }

    fn unsupported(&self) -> Error {
        Error::UnsupportedColumn {
            name: self.name.clone(),
            tform: self.format.tform(),
        }
    }
}

/// Parse `TDIMn = '(d1,d2,...)'` and return the dimensions slowest first.
fn parse_tdim(text: &str) -> Option<Vec<usize>> {
    let inner = text.trim().strip_prefix('(')?.strip_suffix(')')?;
    let mut dims = inner
        .split(',')
        .map(|d| d.trim().parse::<usize>().ok())
        .collect::<Option<Vec<_>>>()?;
    dims.reverse();
    Some(dims)
}

fn format_tdim(dims: &[usize]) -> String {
    let parts: Vec<String> = dims.iter().rev().map(usize::to_string).collect();
    format!("({})", parts.join(","))
}

/// Keywords describing the table structure itself; everything else is
/// user metadata that survives a rewrite.
pub fn is_structural_keyword(keyword: &str) -> bool {
    const FIXED: [&str; 9] = [
        "XTENSION", "BITPIX", "NAXIS", "NAXIS1", "NAXIS2", "PCOUNT", "GCOUNT", "TFIELDS", "THEAP",
    ];
    const INDEXED: [&str; 10] = [
        "TTYPE", "TFORM", "TUNIT", "TDIM", "TSCAL", "TZERO", "TNULL", "TDISP", "TLMIN", "TLMAX",
    ];
    if FIXED.contains(&keyword) || keyword == "EXTNAME" {
        return true;
    }
    INDEXED.iter().any(|prefix| {
        keyword
            .strip_prefix(prefix)
            .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
    })
}

/// Read access to a binary table HDU.
#[derive(Debug)]
pub struct BinTable<'a> {
    hdu: &'a Hdu,
    row_len: usize,
    nrows: usize,
    heap_start: usize,
    columns: Vec<ColumnInfo>,
}

impl<'a> BinTable<'a> {
    pub fn new(hdu: &'a Hdu) -> Result<Self> {
        if hdu.kind()? != HduKind::BinaryTable {
            return Err(Error::UnsupportedExtension(
                hdu.extname().unwrap_or("primary").to_string(),
            ));
        }
        let header = &hdu.header;
        let row_len = header.require_integer("NAXIS1")? as usize;
        let nrows = header.require_integer("NAXIS2")? as usize;
        let tfields = header.require_integer("TFIELDS")? as usize;
        let heap_start = header
            .integer("THEAP")
            .map(|t| t as usize)
            .unwrap_or(row_len * nrows);

        let mut columns = Vec::with_capacity(tfields);
        let mut offset = 0usize;
        for i in 1..=tfields {
            let tform_key = format!("TFORM{i}");
            let tform = header
                .string(&tform_key)
                .ok_or_else(|| Error::MissingKeyword(tform_key.clone()))?;
            let format = ColumnFormat::parse(tform).ok_or(Error::InvalidValue(tform_key))?;
            let name = header
                .string(&format!("TTYPE{i}"))
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|| format!("COL{i}"));
            let unit = header
                .string(&format!("TUNIT{i}"))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
            let dims = header.string(&format!("TDIM{i}")).and_then(parse_tdim);
            columns.push(ColumnInfo {
                name,
                format,
                unit,
                dims,
                offset,
                scale: header.float(&format!("TSCAL{i}")).unwrap_or(1.0),
                zero: header.float(&format!("TZERO{i}")).unwrap_or(0.0),
            });
            offset += format.width();
        }
        if offset != row_len {
            return Err(Error::InvalidHeader("column widths do not sum to NAXIS1"));
        }
        if hdu.data.len() < row_len * nrows {
            return Err(Error::UnexpectedEof);
        }
        log::trace!(
            "bintable {:?}: {} rows x {} columns",
            hdu.extname(),
            nrows,
            columns.len()
        );
        Ok(BinTable {
            hdu,
            row_len,
            nrows,
            heap_start,
            columns,
        })
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn header(&self) -> &'a Header {
        &self.hdu.header
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Result<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::MissingColumn(name.to_string()))
    }

    fn cell(&self, col: &ColumnInfo, row: usize) -> &'a [u8] {
        let start = row * self.row_len + col.offset;
        &self.hdu.data[start..start + col.format.width()]
    }

    /// Bytes of a variable-length cell, located through the heap descriptor.
    fn heap_cell(&self, col: &ColumnInfo, row: usize, ty: ColumnType, long: bool) -> Result<&'a [u8]> {
        let desc = self.cell(col, row);
        let (count, offset) = if long {
            let w: Vec<u64> = bytemuck::pod_collect_to_vec(desc);
            (u64::from_be(w[0]) as usize, u64::from_be(w[1]) as usize)
        } else {
            let w: Vec<u32> = bytemuck::pod_collect_to_vec(desc);
            (u32::from_be(w[0]) as usize, u32::from_be(w[1]) as usize)
        };
        let start = self.heap_start + offset;
        let end = start + count * ty.size();
        self.hdu.data.get(start..end).ok_or(Error::UnexpectedEof)
    }

    fn decode(&self, col: &ColumnInfo, ty: ColumnType, bytes: &[u8]) -> Vec<f64> {
        let raw = decode_be(ty, bytes);
        if col.scale == 1.0 && col.zero == 0.0 {
            raw
        } else {
            raw.into_iter().map(|v| v * col.scale + col.zero).collect()
        }
    }

    /// All values of a fixed-width numeric column, flattened row by row.
    pub fn read_f64(&self, name: &str) -> Result<Vec<f64>> {
        let col = self.column(name)?;
        let ColumnFormat::Fixed { ty, .. } = col.format else {
            return Err(col.unsupported());
        };
        if !ty.is_numeric() {
            return Err(col.unsupported());
        }
        let width = col.format.width();
        let mut bytes = Vec::with_capacity(width * self.nrows);
        for row in 0..self.nrows {
            bytes.extend_from_slice(self.cell(col, row));
        }
        Ok(self.decode(col, ty, &bytes))
    }

    /// Numeric values of each row; works for fixed and variable-length columns.
    pub fn read_rows_f64(&self, name: &str) -> Result<Vec<Vec<f64>>> {
        let col = self.column(name)?;
        if !col.format.ty().is_numeric() {
            return Err(col.unsupported());
        }
        (0..self.nrows)
            .map(|row| match col.format {
                ColumnFormat::Fixed { ty, .. } => Ok(self.decode(col, ty, self.cell(col, row))),
                ColumnFormat::Variable { ty, long } => {
                    let bytes = self.heap_cell(col, row, ty, long)?;
                    Ok(self.decode(col, ty, bytes))
                }
            })
            .collect()
    }

    /// Values of a fixed-width integer column without float conversion.
    pub fn read_i64(&self, name: &str) -> Result<Vec<i64>> {
        let col = self.column(name)?;
        let bytes: Vec<u8> = (0..self.nrows)
            .flat_map(|row| self.cell(col, row).iter().copied())
            .collect();
        let values: Vec<i64> = match col.format {
            ColumnFormat::Fixed { ty: ColumnType::Byte, .. } => {
                bytes.iter().map(|&b| i64::from(b)).collect()
            }
            ColumnFormat::Fixed { ty: ColumnType::Short, .. } => {
                let w: Vec<i16> = bytemuck::pod_collect_to_vec(&bytes);
                w.into_iter().map(|v| i64::from(i16::from_be(v))).collect()
            }
            ColumnFormat::Fixed { ty: ColumnType::Int, .. } => {
                let w: Vec<i32> = bytemuck::pod_collect_to_vec(&bytes);
                w.into_iter().map(|v| i64::from(i32::from_be(v))).collect()
            }
            ColumnFormat::Fixed { ty: ColumnType::Long, .. } => {
                let w: Vec<i64> = bytemuck::pod_collect_to_vec(&bytes);
                w.into_iter().map(i64::from_be).collect()
            }
            _ => return Err(col.unsupported()),
        };
        if col.zero != 0.0 {
            let zero = col.zero as i64;
            return Ok(values.into_iter().map(|v| v + zero).collect());
        }
        Ok(values)
    }

    /// Values of an `A` column, one trimmed string per row.
    pub fn read_strings(&self, name: &str) -> Result<Vec<String>> {
        let col = self.column(name)?;
        if col.format.ty() != ColumnType::Ascii || col.repeat().is_none() {
            return Err(col.unsupported());
        }
        Ok((0..self.nrows)
            .map(|row| {
                let cell = self.cell(col, row);
                let end = cell.iter().position(|&b| b == 0).unwrap_or(cell.len());
                String::from_utf8_lossy(&cell[..end]).trim_end().to_string()
            })
            .collect())
    }
}

/// Decode big-endian elements of `ty` into `f64`.
fn decode_be(ty: ColumnType, bytes: &[u8]) -> Vec<f64> {
    match ty {
        ColumnType::Logical => bytes.iter().map(|&b| f64::from(u8::from(b == b'T'))).collect(),
        ColumnType::Byte => bytes.iter().map(|&b| f64::from(b)).collect(),
        ColumnType::Short => bytemuck::pod_collect_to_vec::<u8, i16>(bytes)
            .into_iter()
            .map(|v| f64::from(i16::from_be(v)))
            .collect(),
        ColumnType::Int => bytemuck::pod_collect_to_vec::<u8, i32>(bytes)
            .into_iter()
            .map(|v| f64::from(i32::from_be(v)))
            .collect(),
        ColumnType::Long => bytemuck::pod_collect_to_vec::<u8, i64>(bytes)
            .into_iter()
            .map(|v| i64::from_be(v) as f64)
            .collect(),
        ColumnType::Float => bytemuck::pod_collect_to_vec::<u8, u32>(bytes)
            .into_iter()
            .map(|v| f64::from(f32::from_bits(u32::from_be(v))))
            .collect(),
        ColumnType::Double => bytemuck::pod_collect_to_vec::<u8, u64>(bytes)
            .into_iter()
            .map(|v| f64::from_bits(u64::from_be(v)))
            .collect(),
        ColumnType::Bit | ColumnType::ComplexFloat | ColumnType::ComplexDouble | ColumnType::Ascii => {
            Vec::new()
        }
    }
}

fn encode_be(ty: ColumnType, value: f64, out: &mut Vec<u8>) {
    match ty {
        ColumnType::Logical => out.push(if value != 0.0 { b'T' } else { b'F' }),
        ColumnType::Byte => out.push(value.round() as u8),
        ColumnType::Short => out.extend_from_slice(&(value.round() as i16).to_be_bytes()),
        ColumnType::Int => out.extend_from_slice(&(value.round() as i32).to_be_bytes()),
        ColumnType::Long => out.extend_from_slice(&(value.round() as i64).to_be_bytes()),
        ColumnType::Float => out.extend_from_slice(&(value as f32).to_be_bytes()),
        ColumnType::Double => out.extend_from_slice(&value.to_be_bytes()),
        ColumnType::Bit | ColumnType::ComplexFloat | ColumnType::ComplexDouble | ColumnType::Ascii => {}
    }
}

// ── Writing ──

/// Declaration of a column to write.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub format: ColumnFormat,
    pub unit: Option<String>,
    pub dims: Option<Vec<usize>>,
    /// Physical value = stored * `scale` + `zero`.
    pub scale: f64,
    pub zero: f64,
}

impl ColumnSpec {
    /// A scalar column of `ty`.
    pub fn new(name: &str, ty: ColumnType) -> Self {
        ColumnSpec {
            name: name.to_string(),
            format: ColumnFormat::Fixed { repeat: 1, ty },
            unit: None,
            dims: None,
            scale: 1.0,
            zero: 0.0,
        }
    }

    /// A `1P<ty>` variable-length column.
    pub fn variable(name: &str, ty: ColumnType) -> Self {
        ColumnSpec {
            name: name.to_string(),
            format: ColumnFormat::Variable { ty, long: false },
            unit: None,
            dims: None,
            scale: 1.0,
            zero: 0.0,
        }
    }

    pub fn with_repeat(mut self, repeat: usize) -> Self {
        if let ColumnFormat::Fixed { ty, .. } = self.format {
            self.format = ColumnFormat::Fixed { repeat, ty };
        }
        self
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    /// Store `(value - zero) / scale`, written as `TSCALn`/`TZEROn`.
    pub fn with_scaling(mut self, scale: f64, zero: f64) -> Self {
        self.scale = scale;
        self.zero = zero;
        self
    }

    fn is_scaled(&self) -> bool {
        self.scale != 1.0 || self.zero != 0.0
    }

    /// The stored representation of a physical value.
    pub fn stored(&self, value: f64) -> f64 {
        if self.is_scaled() {
            (value - self.zero) / self.scale
        } else {
            value
        }
    }

    /// Keep this declaration if it stores every one of `values` exactly;
    /// otherwise drop the scaling and widen the element type until it does.
    pub fn widened_for(mut self, values: &[f64]) -> Self {
        let ty = self.format.ty();
        let exact = values.iter().all(|&v| {
            let s = self.stored(v);
            ty.holds(s) && (!ty.is_integer() || s.fract() == 0.0)
        });
        if exact {
            return self;
        }
        let wider = ty.widened_for(values);
        log::debug!(
            "column {}: {} cannot hold the values, writing {}",
            self.name,
            self.format.tform(),
            self.format.with_ty(wider).tform()
        );
        self.format = self.format.with_ty(wider);
        self.scale = 1.0;
        self.zero = 0.0;
        self
    }

    fn encode(&self, ty: ColumnType, value: f64, out: &mut Vec<u8>) -> Result<()> {
        let stored = self.stored(value);
        if !ty.holds(stored) {
            return Err(Error::ValueOutOfRange {
                name: self.name.clone(),
                tform: self.format.tform(),
                value,
            });
        }
        encode_be(ty, stored, out);
        Ok(())
    }

    /// Set the cell shape (row-major) and the matching repeat count.
    pub fn with_dims(mut self, dims: &[usize]) -> Self {
        self = self.with_repeat(dims.iter().product());
        self.dims = Some(dims.to_vec());
        self
    }
}

/// Values supplied for one column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    /// Flattened cells of a fixed-width numeric column.
    Fixed(Vec<f64>),
    /// One array per row for a variable-length column.
    Variable(Vec<Vec<f64>>),
    /// One string per row for an `A` column.
    Text(Vec<String>),
}

impl From<Vec<f64>> for ColumnValues {
    fn from(values: Vec<f64>) -> Self {
        ColumnValues::Fixed(values)
    }
}

/// Assembles a binary table HDU column by column.
#[derive(Debug, Clone)]
pub struct BinTableBuilder {
    extname: String,
    nrows: usize,
    columns: Vec<(ColumnSpec, ColumnValues)>,
    cards: Vec<Card>,
}

impl BinTableBuilder {
    pub fn new(extname: &str, nrows: usize) -> Self {
        BinTableBuilder {
            extname: extname.to_string(),
            nrows,
            columns: Vec::new(),
            cards: Vec::new(),
        }
    }

    pub fn column(mut self, spec: ColumnSpec, values: impl Into<ColumnValues>) -> Self {
        self.columns.push((spec, values.into()));
        self
    }

    /// Append a header card after the structural keywords.
    pub fn card(mut self, card: Card) -> Self {
        self.cards.push(card);
        self
    }

    /// Copy every non-structural card of `header`, HISTORY included.
    pub fn cards_from(mut self, header: &Header) -> Self {
        self.cards.extend(
            header
                .cards()
                .iter()
                .filter(|c| !is_structural_keyword(&c.keyword))
                .cloned(),
        );
        self
    }

    fn check_len(spec: &ColumnSpec, expected: usize, actual: usize) -> Result<()> {
        if expected != actual {
            return Err(Error::ColumnLength {
                name: spec.name.clone(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    pub fn build(self) -> Result<Hdu> {
        let nrows = self.nrows;
        let row_len: usize = self.columns.iter().map(|(s, _)| s.format.width()).sum();
        let mut rows = vec![Vec::with_capacity(row_len); nrows];
        let mut heap = Vec::new();

        for (spec, values) in &self.columns {
            match (spec.format, values) {
                (ColumnFormat::Fixed { repeat, ty }, ColumnValues::Fixed(v)) if ty.is_numeric() => {
                    Self::check_len(spec, repeat * nrows, v.len())?;
                    for (row, cell) in rows.iter_mut().zip(v.chunks(repeat.max(1))) {
                        for &x in cell {
                            spec.encode(ty, x, row)?;
                        }
                    }
                }
                (ColumnFormat::Fixed { repeat, ty: ColumnType::Ascii }, ColumnValues::Text(v)) => {
                    Self::check_len(spec, nrows, v.len())?;
                    for (row, text) in rows.iter_mut().zip(v) {
                        let mut cell = text.as_bytes().to_vec();
                        cell.resize(repeat, b' ');
                        row.extend_from_slice(&cell);
                    }
                }
                (ColumnFormat::Variable { ty, long }, ColumnValues::Variable(v)) if ty.is_numeric() => {
                    Self::check_len(spec, nrows, v.len())?;
                    for (row, cell) in rows.iter_mut().zip(v) {
                        let offset = heap.len();
                        for &x in cell {
                            spec.encode(ty, x, &mut heap)?;
                        }
                        if long {
                            row.extend_from_slice(&(cell.len() as u64).to_be_bytes());
                            row.extend_from_slice(&(offset as u64).to_be_bytes());
                        } else {
                            row.extend_from_slice(&(cell.len() as u32).to_be_bytes());
                            row.extend_from_slice(&(offset as u32).to_be_bytes());
                        }
                    }
                }
                _ => {
                    return Err(Error::UnsupportedColumn {
                        name: spec.name.clone(),
                        tform: spec.format.tform(),
                    })
                }
            }
        }

        let mut header = Header::new(vec![
            Card::new("XTENSION", "BINTABLE").with_comment("binary table extension"),
            Card::new("BITPIX", 8i64),
            Card::new("NAXIS", 2i64),
            Card::new("NAXIS1", row_len as i64).with_comment("width of table in bytes"),
            Card::new("NAXIS2", nrows as i64).with_comment("number of rows in table"),
            Card::new("PCOUNT", heap.len() as i64).with_comment("size of special data area"),
            Card::new("GCOUNT", 1i64),
            Card::new("TFIELDS", self.columns.len() as i64),
        ]);
        for (i, (spec, _)) in self.columns.iter().enumerate() {
            let n = i + 1;
            header.push(Card::new(&format!("TTYPE{n}"), spec.name.as_str()));
            header.push(Card::new(&format!("TFORM{n}"), spec.format.tform()));
            if let Some(unit) = &spec.unit {
                header.push(Card::new(&format!("TUNIT{n}"), unit.as_str()));
            }
            if let Some(dims) = &spec.dims {
                header.push(Card::new(&format!("TDIM{n}"), format_tdim(dims)));
            }
            if spec.is_scaled() {
                header.push(Card::new(&format!("TSCAL{n}"), spec.scale));
                header.push(Card::new(&format!("TZERO{n}"), spec.zero));
            }
        }
        header.push(Card::new("EXTNAME", self.extname.as_str()));
        for card in self.cards {
            header.push(card);
        }

        let mut data: Vec<u8> = rows.concat();
        data.extend_from_slice(&heap);
        Ok(Hdu::new(header, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tform_variants() {
        assert_eq!(
            ColumnFormat::parse("1E"),
            Some(ColumnFormat::Fixed {
                repeat: 1,
                ty: ColumnType::Float
            })
        );
        assert_eq!(
            ColumnFormat::parse("D"),
            Some(ColumnFormat::Fixed {
                repeat: 1,
                ty: ColumnType::Double
            })
        );
        assert_eq!(
            ColumnFormat::parse("1PE(80)"),
            Some(ColumnFormat::Variable {
                ty: ColumnType::Float,
                long: false
            })
        );
        assert_eq!(
            ColumnFormat::parse("QJ"),
            Some(ColumnFormat::Variable {
                ty: ColumnType::Int,
                long: true
            })
        );
        assert_eq!(ColumnFormat::parse("3Z"), None);
        assert_eq!(ColumnFormat::parse(""), None);
    }

    #[test]
    fn width_of_bits_rounds_up() {
        assert_eq!(ColumnFormat::parse("9X").unwrap().width(), 2);
        assert_eq!(ColumnFormat::parse("16A").unwrap().width(), 16);
    }

    #[test]
    fn tdim_is_reversed() {
        assert_eq!(parse_tdim("(286,173)"), Some(vec![173, 286]));
        assert_eq!(format_tdim(&[173, 286]), "(286,173)");
        assert_eq!(parse_tdim("286,173"), None);
    }

    #[test]
    fn structural_keywords() {
        assert!(is_structural_keyword("TFORM12"));
        assert!(is_structural_keyword("NAXIS2"));
        assert!(!is_structural_keyword("TSTART"));
        assert!(!is_structural_keyword("HISTORY"));
        assert!(!is_structural_keyword("TIMEUNIT"));
    }

    #[test]
    fn fixed_columns_roundtrip() {
        let hdu = BinTableBuilder::new("STDGTI", 2)
            .column(
                ColumnSpec::new("START", ColumnType::Double).with_unit("s"),
                vec![1.5, 10.0],
            )
            .column(ColumnSpec::new("STOP", ColumnType::Double), vec![2.5, 11.0])
            .column(ColumnSpec::new("FLAG", ColumnType::Short), vec![1.0, -3.0])
            .build()
            .unwrap();
        let table = BinTable::new(&hdu).unwrap();
        assert_eq!(table.nrows(), 2);
        assert_eq!(table.read_f64("START").unwrap(), vec![1.5, 10.0]);
        assert_eq!(table.read_i64("FLAG").unwrap(), vec![1, -3]);
        assert_eq!(table.column("START").unwrap().unit.as_deref(), Some("s"));
        assert!(matches!(
            table.read_f64("BOGUS"),
            Err(Error::MissingColumn(_))
        ));
    }

    #[test]
    fn shaped_column_keeps_dims() {
        let cells: Vec<f64> = (0..12).map(f64::from).collect();
        let hdu = BinTableBuilder::new("BAT_DPH", 2)
            .column(
                ColumnSpec::new("DPH_COUNTS", ColumnType::Int).with_dims(&[2, 3]),
                cells.clone(),
            )
            .build()
            .unwrap();
        let table = BinTable::new(&hdu).unwrap();
        let col = table.column("DPH_COUNTS").unwrap();
        assert_eq!(col.dims.as_deref(), Some(&[2, 3][..]));
        assert_eq!(col.repeat(), Some(6));
        assert_eq!(table.read_f64("DPH_COUNTS").unwrap(), cells);
        let rows = table.read_rows_f64("DPH_COUNTS").unwrap();
        assert_eq!(rows[1], vec![6.0, 7.0, 8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn variable_column_reads_through_heap() {
        let hdu = BinTableBuilder::new("MATRIX", 3)
            .column(
                ColumnSpec::variable("MATRIX", ColumnType::Float),
                ColumnValues::Variable(vec![vec![0.5], vec![], vec![1.0, 2.0, 3.0]]),
            )
            .build()
            .unwrap();
        assert_eq!(hdu.header.integer("PCOUNT"), Some(16));
        let table = BinTable::new(&hdu).unwrap();
        let rows = table.read_rows_f64("MATRIX").unwrap();
        assert_eq!(rows, vec![vec![0.5], vec![], vec![1.0, 2.0, 3.0]]);
        assert!(table.read_f64("MATRIX").is_err());
    }

    #[test]
    fn text_column_pads_and_trims() {
        let hdu = BinTableBuilder::new("NAMES", 2)
            .column(
                ColumnSpec::new("NAME", ColumnType::Ascii).with_repeat(8),
                ColumnValues::Text(vec!["batbin".into(), "drm".into()]),
            )
            .build()
            .unwrap();
        let table = BinTable::new(&hdu).unwrap();
        assert_eq!(table.read_strings("NAME").unwrap(), vec!["batbin", "drm"]);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let err = BinTableBuilder::new("T", 3)
            .column(ColumnSpec::new("X", ColumnType::Float), vec![1.0])
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ColumnLength {
                expected: 3,
                actual: 1,
                ..
            }
        ));
    }

    #[test]
    fn tzero_is_applied() {
        let mut hdu = BinTableBuilder::new("T", 1)
            .column(ColumnSpec::new("U", ColumnType::Short), vec![-32768.0])
            .build()
            .unwrap();
        hdu.header.set("TZERO1", 32768i64);
        let table = BinTable::new(&hdu).unwrap();
        assert_eq!(table.read_f64("U").unwrap(), vec![0.0]);
        assert_eq!(table.read_i64("U").unwrap(), vec![0]);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = BinTableBuilder::new("T", 2)
            .column(ColumnSpec::new("COUNTS", ColumnType::Short), vec![40000.0, 1.0])
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ValueOutOfRange { ref name, value, .. } if name == "COUNTS" && value == 40000.0
        ));
    }

    #[test]
    fn integer_types_widen_along_the_ladder() {
        assert_eq!(ColumnType::Short.widened_for(&[1.0, 40000.0]), ColumnType::Int);
        assert_eq!(ColumnType::Byte.widened_for(&[-1.0]), ColumnType::Short);
        assert_eq!(ColumnType::Int.widened_for(&[5.0e9]), ColumnType::Long);
        assert_eq!(ColumnType::Short.widened_for(&[0.5]), ColumnType::Double);
        assert_eq!(ColumnType::Float.widened_for(&[1.0e39]), ColumnType::Double);
        assert_eq!(ColumnType::Int.widened_for(&[7.0]), ColumnType::Int);
    }

    #[test]
    fn widened_spec_drops_scaling() {
        let spec = ColumnSpec::new("U", ColumnType::Short).with_scaling(1.0, 32768.0);
        let kept = spec.clone().widened_for(&[0.0, 65535.0]);
        assert_eq!(kept.format.ty(), ColumnType::Short);
        assert_eq!(kept.zero, 32768.0);

        let wide = spec.widened_for(&[70000.0]);
        assert_eq!(wide.format.ty(), ColumnType::Int);
        assert_eq!((wide.scale, wide.zero), (1.0, 0.0));
        let hdu = BinTableBuilder::new("T", 1)
            .column(wide, vec![70000.0])
            .build()
            .unwrap();
        let table = BinTable::new(&hdu).unwrap();
        assert_eq!(table.read_i64("U").unwrap(), vec![70000]);
        assert!(hdu.header.get("TZERO1").is_none());
    }

    #[test]
    fn scaled_columns_write_tscal_and_tzero() {
        let hdu = BinTableBuilder::new("T", 2)
            .column(
                ColumnSpec::new("U", ColumnType::Short).with_scaling(1.0, 32768.0),
                vec![0.0, 60000.0],
            )
            .build()
            .unwrap();
        assert_eq!(hdu.header.float("TZERO1"), Some(32768.0));
        assert_eq!(hdu.header.float("TSCAL1"), Some(1.0));
        let table = BinTable::new(&hdu).unwrap();
        let col = table.column("U").unwrap();
        assert_eq!((col.scale(), col.zero()), (1.0, 32768.0));
        assert_eq!(table.read_f64("U").unwrap(), vec![0.0, 60000.0]);
    }
}
