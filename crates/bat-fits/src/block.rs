//! Record geometry shared by headers and data units.

pub const BLOCK_SIZE: usize = 2880;

pub const CARD_SIZE: usize = 80;

/// 36 cards per header block.
pub const CARDS_PER_BLOCK: usize = BLOCK_SIZE / CARD_SIZE;

/// Headers are filled with blanks, data units with zeros.
pub const HEADER_FILL: u8 = b' ';
pub const DATA_FILL: u8 = 0;

/// `len` rounded up to a whole number of blocks.
pub const fn block_len(len: usize) -> usize {
    len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

/// Grow `buf` with `fill` until it ends on a block boundary.
pub fn pad_to_block(buf: &mut Vec<u8>, fill: u8) {
    buf.resize(block_len(buf.len()), fill);
}
