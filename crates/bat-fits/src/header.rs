//! FITS header cards and the ordered header they form.

use std::str;

use crate::block::{pad_to_block, BLOCK_SIZE, CARD_SIZE, HEADER_FILL};
use crate::error::{Error, Result};
use crate::value::{format_value, formatted_value_len, parse_value, Value};

/// Keywords whose bytes 8..80 are free text rather than `= value`.
const COMMENTARY_KEYWORDS: [&str; 3] = ["COMMENT", "HISTORY", ""];

/// A single 80-byte keyword record.
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    /// Keyword name, trimmed of trailing blanks.
    pub keyword: String,
    /// Parsed value, if the card carries a value indicator.
    pub value: Option<Value>,
    /// Comment text, or the free text of a commentary card.
    pub comment: Option<String>,
}

impl Card {
    pub fn new(keyword: &str, value: impl Into<Value>) -> Self {
        Card {
            keyword: keyword.to_string(),
            value: Some(value.into()),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }

    /// A `HISTORY` card carrying `text`.
    pub fn history(text: &str) -> Self {
        Card {
            keyword: String::from("HISTORY"),
            value: None,
            comment: Some(text.to_string()),
        }
    }

    pub fn is_end(&self) -> bool {
        self.keyword == "END"
    }

    pub fn is_commentary(&self) -> bool {
        COMMENTARY_KEYWORDS.contains(&self.keyword.as_str())
    }
}

fn free_text(bytes: &[u8]) -> Result<Option<String>> {
    let text = str::from_utf8(bytes)
        .map_err(|_| Error::InvalidHeader("non-ASCII card text"))?
        .trim_end();
    Ok((!text.is_empty()).then(|| text.to_string()))
}

/// Parse a single 80-byte card image.
pub fn parse_card(bytes: &[u8; CARD_SIZE]) -> Result<Card> {
    for &b in &bytes[..8] {
        match b {
            b'A'..=b'Z' | b'0'..=b'9' | b' ' | b'-' | b'_' => {}
            _ => return Err(Error::InvalidKeyword),
        }
    }
    let keyword = str::from_utf8(&bytes[..8])
        .map_err(|_| Error::InvalidKeyword)?
        .trim_end()
        .to_string();

    if keyword == "END" {
        return Ok(Card {
            keyword,
            value: None,
            comment: None,
        });
    }

    let has_value = bytes[8] == b'=' && bytes[9] == b' ';
    if COMMENTARY_KEYWORDS.contains(&keyword.as_str()) || !has_value {
        let comment = free_text(&bytes[8..])?;
        return Ok(Card {
            keyword,
            value: None,
            comment,
        });
    }

    match parse_value(&bytes[10..]) {
        Some((value, comment)) => Ok(Card {
            keyword,
            value: Some(value),
            comment,
        }),
        None => Ok(Card {
            keyword,
            value: None,
            comment: None,
        }),
    }
}

/// Serialize a card into its 80-byte image.
pub fn format_card(card: &Card) -> [u8; CARD_SIZE] {
    let mut buf = [b' '; CARD_SIZE];
    let kw = card.keyword.as_bytes();
    let len = kw.len().min(8);
    buf[..len].copy_from_slice(&kw[..len]);

    match &card.value {
        Some(value) => {
            buf[8] = b'=';
            buf[9] = b' ';
            let field = format_value(value);
            buf[10..].copy_from_slice(&field);
            if let Some(comment) = &card.comment {
                let sep = 10 + formatted_value_len(&field) + 1;
                if sep + 3 < CARD_SIZE {
                    buf[sep] = b'/';
                    let text = comment.as_bytes();
                    let n = text.len().min(CARD_SIZE - sep - 2);
                    buf[sep + 2..sep + 2 + n].copy_from_slice(&text[..n]);
                }
            }
        }
        None => {
            if let Some(text) = &card.comment {
                let text = text.as_bytes();
                let n = text.len().min(CARD_SIZE - 8);
                buf[8..8 + n].copy_from_slice(&text[..n]);
            }
        }
    }
    buf
}

/// An ordered list of header cards, excluding the END card.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    cards: Vec<Card>,
}

impl Header {
    pub fn new(cards: Vec<Card>) -> Self {
        Header { cards }
    }

    /// Parse header blocks from the start of `data` until the END card.
    ///
    /// Returns the header and the number of bytes it occupied (a multiple of
    /// [`BLOCK_SIZE`]).
    pub fn parse(data: &[u8]) -> Result<(Header, usize)> {
        let mut cards = Vec::new();
        for (i, chunk) in data.chunks_exact(CARD_SIZE).enumerate() {
            let bytes: &[u8; CARD_SIZE] = chunk
                .try_into()
                .map_err(|_| Error::InvalidHeader("short card"))?;
            let card = parse_card(bytes)?;
            if card.is_end() {
                let consumed = (i * CARD_SIZE / BLOCK_SIZE + 1) * BLOCK_SIZE;
                if consumed > data.len() {
                    return Err(Error::UnexpectedEof);
                }
                return Ok((Header { cards }, consumed));
            }
            cards.push(card);
        }
        Err(Error::UnexpectedEof)
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn get(&self, keyword: &str) -> Option<&Value> {
        self.cards
            .iter()
            .find(|c| c.keyword == keyword)
            .and_then(|c| c.value.as_ref())
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.get(keyword).is_some()
    }

    pub fn string(&self, keyword: &str) -> Option<&str> {
        self.get(keyword).and_then(Value::as_str)
    }

    pub fn integer(&self, keyword: &str) -> Option<i64> {
        self.get(keyword).and_then(Value::as_i64)
    }

    pub fn float(&self, keyword: &str) -> Option<f64> {
        self.get(keyword).and_then(Value::as_f64)
    }

    pub fn logical(&self, keyword: &str) -> Option<bool> {
        self.get(keyword).and_then(Value::as_bool)
    }

    /// Like [`Header::integer`] but missing or non-integer values are an error.
    pub fn require_integer(&self, keyword: &str) -> Result<i64> {
        match self.get(keyword) {
            Some(Value::Integer(n)) => Ok(*n),
            Some(_) => Err(Error::InvalidValue(keyword.to_string())),
            None => Err(Error::MissingKeyword(keyword.to_string())),
        }
    }

    pub fn require_float(&self, keyword: &str) -> Result<f64> {
        match self.get(keyword) {
            Some(v) => v
                .as_f64()
                .ok_or_else(|| Error::InvalidValue(keyword.to_string())),
            None => Err(Error::MissingKeyword(keyword.to_string())),
        }
    }

    /// Set `keyword`, replacing the first existing card or appending a new one.
    pub fn set(&mut self, keyword: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.cards.iter_mut().find(|c| c.keyword == keyword) {
            Some(card) => card.value = Some(value),
            None => self.cards.push(Card::new(keyword, value)),
        }
    }

    pub fn push(&mut self, card: Card) {
        self.cards.push(card);
    }

    /// Drop every card with the given keyword.
    pub fn remove(&mut self, keyword: &str) {
        self.cards.retain(|c| c.keyword != keyword);
    }

    /// Text of every `HISTORY` card, in header order.
    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.cards
            .iter()
            .filter(|c| c.keyword == "HISTORY")
            .map(|c| c.comment.as_deref().unwrap_or(""))
    }

    /// Serialize into complete header blocks, END card included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity((self.cards.len() + 1) * CARD_SIZE);
        for card in &self.cards {
            buf.extend_from_slice(&format_card(card));
        }
        let mut end = [b' '; CARD_SIZE];
        end[..3].copy_from_slice(b"END");
        buf.extend_from_slice(&end);
        pad_to_block(&mut buf, HEADER_FILL);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_card(s: &str) -> [u8; CARD_SIZE] {
        let mut buf = [b' '; CARD_SIZE];
        buf[..s.len()].copy_from_slice(s.as_bytes());
        buf
    }

    #[test]
    fn parse_value_card() {
        let c = parse_card(&make_card("TSTART  =      100.5 / start time")).unwrap();
        assert_eq!(c.keyword, "TSTART");
        assert_eq!(c.value, Some(Value::Float(100.5)));
        assert_eq!(c.comment.as_deref(), Some("start time"));
    }

    #[test]
    fn parse_history_card_keeps_text() {
        let c = parse_card(&make_card("HISTORY P3 outtype = DPH")).unwrap();
        assert!(c.is_commentary());
        assert!(c.value.is_none());
        assert_eq!(c.comment.as_deref(), Some("P3 outtype = DPH"));
    }

    #[test]
    fn reject_lowercase_keyword() {
        assert!(matches!(
            parse_card(&make_card("tstart  = 1")),
            Err(Error::InvalidKeyword)
        ));
    }

    #[test]
    fn header_roundtrip_preserves_history_order() {
        let mut header = Header::default();
        header.set("EXTNAME", "EBOUNDS");
        header.push(Card::history("first"));
        header.push(Card::history("second"));
        header.set("TSTART", 12.5);
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), BLOCK_SIZE);

        let (parsed, consumed) = Header::parse(&bytes).unwrap();
        assert_eq!(consumed, BLOCK_SIZE);
        assert_eq!(parsed.string("EXTNAME"), Some("EBOUNDS"));
        assert_eq!(parsed.float("TSTART"), Some(12.5));
        let history: Vec<_> = parsed.history().collect();
        assert_eq!(history, vec!["first", "second"]);
    }

    #[test]
    fn set_replaces_existing_card() {
        let mut header = Header::default();
        header.set("TSTOP", 1.0);
        header.set("TSTOP", 2.0);
        assert_eq!(header.cards().len(), 1);
        assert_eq!(header.float("TSTOP"), Some(2.0));
    }

    #[test]
    fn comment_survives_formatting() {
        let card = Card::new("TIMEUNIT", "s").with_comment("unit of time keywords");
        let parsed = parse_card(&format_card(&card)).unwrap();
        assert_eq!(parsed.value, Some(Value::String("s".into())));
        assert_eq!(parsed.comment.as_deref(), Some("unit of time keywords"));
    }

    #[test]
    fn missing_end_is_eof() {
        let block = vec![b' '; BLOCK_SIZE];
        assert!(matches!(Header::parse(&block), Err(Error::UnexpectedEof)));
    }
}
