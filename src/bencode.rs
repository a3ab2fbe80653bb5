//! Bencode decoding into a [`Value`] tree and canonical re-encoding.
//!
//! The decoder is strict about framing (every construct must be terminated
//! and the whole input must be consumed) and about integers (no leading
//! zeros, no `-0`). Dictionary keys are accepted in any order; since
//! [`Value::Dictionary`] is a `BTreeMap`, encoding always emits them sorted,
//! which is what makes info-hash computation reproducible.

use std::{collections::BTreeMap, fmt, str};

use bytes::{BufMut, Bytes};

use crate::error::BencodeError;

/// Containers nested deeper than this are rejected instead of recursing.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Raw bytes, not necessarily UTF-8.
    ByteString(Bytes),
    Integer(i64),
    List(Vec<Value>),
    Dictionary(BTreeMap<Bytes, Value>),
}

impl Value {
    pub fn as_bytes(&self) -> Option<&Bytes> {
        if let Value::ByteString(bs) = self {
            Some(bs)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        str::from_utf8(self.as_bytes()?).ok()
    }

    pub fn as_integer(&self) -> Option<i64> {
        if let Value::Integer(i) = self {
            Some(*i)
        } else {
            None
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        if let Value::List(l) = self {
            Some(l)
        } else {
            None
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Bytes, Value>> {
        if let Value::Dictionary(d) = self {
            Some(d)
        } else {
            None
        }
    }

    /// Looks up `key` when `self` is a dictionary.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict()?.get(key)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::ByteString(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::ByteString(Bytes::copy_from_slice(b))
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::ByteString(Bytes::from(b))
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl From<BTreeMap<Bytes, Value>> for Value {
    fn from(d: BTreeMap<Bytes, Value>) -> Self {
        Value::Dictionary(d)
    }
}

fn write_json_str(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if (c as u32) < 0x20 => write!(f, "\\u{:04x}", c as u32)?,
            c => write!(f, "{}", c)?,
        }
    }
    f.write_str("\"")
}

/// Renders the tree as JSON. Byte strings that are not UTF-8 (piece
/// hashes, compact peer lists) are shown as a length placeholder.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::ByteString(bs) => match str::from_utf8(bs) {
                Ok(s) => write_json_str(f, s),
                Err(_) => write!(f, "\"<{} bytes>\"", bs.len()),
            },
            Value::Integer(i) => write!(f, "{}", i),
            Value::List(l) => {
                write!(f, "[")?;
                for (i, item) in l.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Dictionary(d) => {
                write!(f, "{{")?;
                for (i, (key, value)) in d.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}:{}", Value::ByteString(key.clone()), value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Decodes exactly one value spanning the whole of `data`.
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    let mut decoder = Decoder { data, pos: 0 };
    let value = decoder.decode_value(0)?;

    if decoder.pos != data.len() {
        return Err(BencodeError::TrailingData {
            position: decoder.pos,
        });
    }

    Ok(value)
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn decode_value(&mut self, depth: usize) -> Result<Value, BencodeError> {
        if depth > MAX_DEPTH {
            return Err(BencodeError::NestingTooDeep { position: self.pos });
        }

        match self.peek() {
            None => Err(BencodeError::UnexpectedEnd { position: self.pos }),
            Some(b'i') => self.decode_integer(),
            Some(b'l') => self.decode_list(depth),
            Some(b'd') => self.decode_dictionary(depth),
            Some(b'0'..=b'9') => self.decode_byte_string().map(Value::ByteString),
            Some(byte) => Err(BencodeError::InvalidLeadingByte {
                byte,
                position: self.pos,
            }),
        }
    }

    fn decode_byte_string(&mut self) -> Result<Bytes, BencodeError> {
        let start = self.pos;
        let malformed = BencodeError::MalformedLength { position: start };

        let digits = self.data[start..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();
        let colon = start + digits;
        if self.data.get(colon) != Some(&b':') {
            return Err(malformed);
        }

        let mut len: usize = 0;
        for &digit in &self.data[start..colon] {
            len = len
                .checked_mul(10)
                .and_then(|l| l.checked_add((digit - b'0') as usize))
                .ok_or_else(|| malformed.clone())?;
        }

        let content_start = colon + 1;
        let available = self.data.len() - content_start;
        if len > available {
            return Err(BencodeError::TruncatedString {
                position: content_start,
                needed: len,
                available,
            });
        }

        self.pos = content_start + len;
        Ok(Bytes::copy_from_slice(&self.data[content_start..self.pos]))
    }

    fn decode_integer(&mut self) -> Result<Value, BencodeError> {
        let start = self.pos;
        let digits_start = start + 1;
        let end = self.data[digits_start..]
            .iter()
            .position(|&b| b == b'e')
            .map(|offset| digits_start + offset)
            .ok_or(BencodeError::UnterminatedInteger { position: start })?;

        let invalid = BencodeError::InvalidInteger {
            position: digits_start,
        };
        let raw = &self.data[digits_start..end];
        let magnitude = raw.strip_prefix(b"-").unwrap_or(raw);
        if magnitude.is_empty() || !magnitude.iter().all(u8::is_ascii_digit) {
            return Err(invalid);
        }
        if (magnitude[0] == b'0' && magnitude.len() > 1) || raw == b"-0" {
            return Err(invalid);
        }

        let value = str::from_utf8(raw)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or(invalid)?;

        self.pos = end + 1;
        Ok(Value::Integer(value))
    }

    fn decode_list(&mut self, depth: usize) -> Result<Value, BencodeError> {
        let start = self.pos;
        self.pos += 1;
        let mut list = Vec::new();

        loop {
            match self.peek() {
                None => return Err(BencodeError::UnterminatedList { position: start }),
                Some(b'e') => break,
                Some(_) => list.push(self.decode_value(depth + 1)?),
            }
        }

        self.pos += 1;
        Ok(Value::List(list))
    }

    fn decode_dictionary(&mut self, depth: usize) -> Result<Value, BencodeError> {
        let start = self.pos;
        self.pos += 1;
        let mut dict = BTreeMap::new();

        loop {
            match self.peek() {
                None => return Err(BencodeError::UnterminatedDictionary { position: start }),
                Some(b'e') => break,
                Some(b'0'..=b'9') => {
                    let key = self.decode_byte_string()?;
                    match self.peek() {
                        None => {
                            return Err(BencodeError::UnterminatedDictionary { position: start })
                        }
                        Some(b'e') => {
                            let position = self.pos;
                            return Err(BencodeError::MissingDictionaryValue { position });
                        }
                        Some(_) => {}
                    }
                    let value = self.decode_value(depth + 1)?;
                    dict.insert(key, value);
                }
                Some(_) => {
                    return Err(BencodeError::NonStringDictionaryKey { position: self.pos })
                }
            }
        }

        self.pos += 1;
        Ok(Value::Dictionary(dict))
    }
}

/// Canonical encoding: dictionary keys in ascending byte order.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_into(value, &mut buf);
    buf
}

pub fn encode_into<B: BufMut>(value: &Value, buf: &mut B) {
    match value {
        Value::ByteString(bs) => put_byte_string(bs, buf),
        Value::Integer(i) => {
            buf.put_u8(b'i');
            buf.put_slice(i.to_string().as_bytes());
            buf.put_u8(b'e');
        }
        Value::List(l) => {
            buf.put_u8(b'l');
            for item in l {
                encode_into(item, buf);
            }
            buf.put_u8(b'e');
        }
        Value::Dictionary(d) => {
            buf.put_u8(b'd');
            for (key, value) in d {
                put_byte_string(key, buf);
                encode_into(value, buf);
            }
            buf.put_u8(b'e');
        }
    }
}

fn put_byte_string<B: BufMut>(bs: &[u8], buf: &mut B) {
    buf.put_slice(bs.len().to_string().as_bytes());
    buf.put_u8(b':');
    buf.put_slice(bs);
}
