//! Error types for FITS container access.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// All errors that can occur while reading or writing FITS containers.
#[derive(Error, Debug)]
pub enum Error {
    /// Header bytes that do not form valid cards or structure keywords.
    #[error("invalid FITS header: {0}")]
    InvalidHeader(&'static str),

    /// The file ends inside a header or data unit.
    #[error("unexpected end of file")]
    UnexpectedEof,

    #[error("invalid keyword name")]
    InvalidKeyword,

    /// A header value could not be interpreted as the requested type.
    #[error("invalid value for keyword {0}")]
    InvalidValue(String),

    #[error("missing required keyword: {0}")]
    MissingKeyword(String),

    #[error("unsupported XTENSION type: {0}")]
    UnsupportedExtension(String),

    /// No HDU with the requested EXTNAME or index.
    #[error("HDU not found: {0}")]
    MissingHdu(String),

    /// No column with the requested TTYPE.
    #[error("column not found: {0}")]
    MissingColumn(String),

    /// The column's TFORM cannot be decoded the way it was requested.
    #[error("column {name} has unsupported format {tform}")]
    UnsupportedColumn { name: String, tform: String },

    /// Supplied column values do not match the declared table shape.
    #[error("column {name}: expected {expected} values, got {actual}")]
    ColumnLength {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// A value does not fit the column's stored type.
    #[error("column {name}: {value} does not fit format {tform}")]
    ValueOutOfRange {
        name: String,
        tform: String,
        value: f64,
    },

    /// The gzip stream could not be inflated.
    #[error("gzip decompression failed: {0}")]
    Decompression(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
