//! Pure-Rust FITS container layer for Swift/BAT data products.
//!
//! Covers what the product wrappers need: header cards and `HISTORY`, HDU
//! walking by index or `EXTNAME`, binary-table columns (fixed, shaped via
//! `TDIMn`, and `P`/`Q` variable-length), and gzip-compressed inputs.

pub mod block;
pub mod error;
pub mod gzip;
pub mod hdu;
pub mod header;
pub mod table;
pub mod value;

pub use block::{BLOCK_SIZE, CARDS_PER_BLOCK, CARD_SIZE};
pub use error::{Error, Result};
pub use hdu::{FitsFile, Hdu, HduKind};
pub use header::{Card, Header};
pub use table::{BinTable, BinTableBuilder, ColumnFormat, ColumnInfo, ColumnSpec, ColumnType, ColumnValues};
pub use value::Value;
