//! Protocol-buffer style records.
//!
//! Only the two wire types the handshake and identify messages need are supported:
//! varints (wire type 0) and length-delimited bytes (wire type 2). Messages travel as
//! `<varint length><record bytes>`.

use crate::error::ParseError;
use crate::varint;

const WIRE_VARINT: u64 = 0;
const WIRE_LEN: u64 = 2;

/// Upper bound on a single delimited message.
pub const MAX_MESSAGE_SIZE: usize = 1 << 20;

/// Builds a record field by field.
#[derive(Debug, Default)]
pub struct RecordWriter {
    buf: Vec<u8>,
}

impl RecordWriter {
    /// Start an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a varint field.
    #[must_use]
    pub fn uint(mut self, field: u64, value: u64) -> Self {
        varint::encode_to(field << 3 | WIRE_VARINT, &mut self.buf);
        varint::encode_to(value, &mut self.buf);
        self
    }

    /// Append a bytes field.
    #[must_use]
    pub fn bytes(mut self, field: u64, value: &[u8]) -> Self {
        varint::encode_to(field << 3 | WIRE_LEN, &mut self.buf);
        varint::encode_to(value.len() as u64, &mut self.buf);
        self.buf.extend_from_slice(value);
        self
    }

    /// Append a string field.
    #[must_use]
    pub fn string(self, field: u64, value: &str) -> Self {
        self.bytes(field, value.as_bytes())
    }

    /// Append one bytes field per item, as protobuf does for `repeated bytes`.
    #[must_use]
    pub fn repeated<I, T>(self, field: u64, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        values
            .into_iter()
            .fold(self, |w, v| w.bytes(field, v.as_ref()))
    }

    /// Finished record bytes.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// A decoded field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    /// Wire type 0
    Varint(u64),
    /// Wire type 2
    Bytes(&'a [u8]),
}

impl<'a> FieldValue<'a> {
    /// The bytes of a length-delimited field.
    ///
    /// # Errors
    ///
    /// Fails if the field was a varint.
    pub fn as_bytes(self) -> Result<&'a [u8], ParseError> {
        match self {
            Self::Bytes(b) => Ok(b),
            Self::Varint(_) => Err(ParseError::MalformedRecord("expected bytes field".into())),
        }
    }

    /// A length-delimited field as UTF-8.
    ///
    /// # Errors
    ///
    /// Fails if the field was a varint or is not valid UTF-8.
    pub fn as_str(self) -> Result<&'a str, ParseError> {
        std::str::from_utf8(self.as_bytes()?)
            .map_err(|_| ParseError::MalformedRecord("string field is not utf-8".into()))
    }
}

/// Iterates the `(field number, value)` pairs of a record.
#[derive(Debug, Clone)]
pub struct RecordReader<'a> {
    rest: &'a [u8],
}

impl<'a> RecordReader<'a> {
    /// Read fields from `bytes`.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { rest: bytes }
    }

    fn next_field(&mut self) -> Result<(u64, FieldValue<'a>), ParseError> {
        let (key, rest) = varint::decode(self.rest)?;
        let field = key >> 3;
        let value = match key & 0x7 {
            WIRE_VARINT => {
                let (v, rest) = varint::decode(rest)?;
                self.rest = rest;
                FieldValue::Varint(v)
            }
            WIRE_LEN => {
                let (len, rest) = varint::decode_usize(rest)?;
                if rest.len() < len {
                    return Err(ParseError::Truncated);
                }
                let (body, rest) = rest.split_at(len);
                self.rest = rest;
                FieldValue::Bytes(body)
            }
            other => {
                return Err(ParseError::MalformedRecord(
                    format!("unsupported wire type {other}").into(),
                ));
            }
        };
        Ok((field, value))
    }
}

impl<'a> Iterator for RecordReader<'a> {
    type Item = Result<(u64, FieldValue<'a>), ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let item = self.next_field();
        if item.is_err() {
            self.rest = &[];
        }
        Some(item)
    }
}

/// Prefix `record` with its varint length.
#[must_use]
pub fn encode_delimited(record: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(varint::encoded_len(record.len() as u64) + record.len());
    varint::encode_to(record.len() as u64, &mut out);
    out.extend_from_slice(record);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_fields() {
        let record = RecordWriter::new()
            .string(1, "0.1.0")
            .uint(2, 300)
            .repeated(3, [b"a".as_slice(), b"bc".as_slice()])
            .finish();

        let fields: Vec<_> = RecordReader::new(&record)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            fields,
            vec![
                (1, FieldValue::Bytes(b"0.1.0")),
                (2, FieldValue::Varint(300)),
                (3, FieldValue::Bytes(b"a")),
                (3, FieldValue::Bytes(b"bc")),
            ]
        );
    }

    #[test]
    fn test_string_field_layout() {
        let record = RecordWriter::new().string(1, "hi").finish();
        assert_eq!(record, vec![0x0a, 0x02, b'h', b'i']);
    }

    #[test]
    fn test_truncated_field() {
        let mut reader = RecordReader::new(&[0x0a, 0x05, b'h']);
        assert_eq!(reader.next(), Some(Err(ParseError::Truncated)));
        assert_eq!(reader.next(), None);
    }

    #[test]
    fn test_unsupported_wire_type() {
        let mut reader = RecordReader::new(&[0x0d, 0, 0, 0, 0]);
        assert!(matches!(
            reader.next(),
            Some(Err(ParseError::MalformedRecord(_)))
        ));
    }

    #[test]
    fn test_field_value_accessors() {
        assert_eq!(FieldValue::Bytes(b"ok").as_str(), Ok("ok"));
        assert!(FieldValue::Varint(1).as_bytes().is_err());
        assert!(FieldValue::Bytes(&[0xff]).as_str().is_err());
    }

    #[test]
    fn test_encode_delimited() {
        assert_eq!(encode_delimited(b"abc"), vec![3, b'a', b'b', b'c']);
    }
}
