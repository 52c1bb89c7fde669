use std::fmt;

use crate::{PageId, Result};

/// Fixed payload width of a text field: a 4 byte length
/// prefix plus this many bytes of content, zero padded.
pub const TEXT_LEN: usize = 32;

/// The types a field can take. Every type has a fixed byte
/// width so that tuples within one table are interchangeable
/// in their page slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int,
    Text,
}

impl FieldType {
    pub fn byte_len(&self) -> usize {
        match self {
            FieldType::Int => 8,
            FieldType::Text => 4 + TEXT_LEN,
        }
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Int(i64),
    Text(String),
}

impl Field {
    pub fn field_type(&self) -> FieldType {
        match self {
            Field::Int(_) => FieldType::Int,
            Field::Text(_) => FieldType::Text,
        }
    }

    /// Serializes into exactly `field_type().byte_len()`
    /// bytes. Text longer than [`TEXT_LEN`] is truncated.
    fn write_to(&self, buf: &mut [u8]) {
        match self {
            Field::Int(v) => buf[..8].copy_from_slice(&v.to_le_bytes()),
            Field::Text(s) => {
                let bytes = s.as_bytes();
                let len = bytes.len().min(TEXT_LEN);
                buf[..4].copy_from_slice(&(len as u32).to_le_bytes());
                buf[4..4 + len].copy_from_slice(&bytes[..len]);
                buf[4 + len..4 + TEXT_LEN].fill(0);
            }
        }
    }

    fn read_from(field_type: FieldType, buf: &[u8]) -> Field {
        match field_type {
            FieldType::Int => {
                let raw: [u8; 8] = buf[..8].try_into().unwrap();
                Field::Int(i64::from_le_bytes(raw))
            }
            FieldType::Text => {
                let raw: [u8; 4] = buf[..4].try_into().unwrap();
                let len = (u32::from_le_bytes(raw) as usize).min(TEXT_LEN);
                let s = String::from_utf8_lossy(&buf[4..4 + len]).into_owned();
                Field::Text(s)
            }
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{}", v),
            Field::Text(s) => write!(f, "{}", s),
        }
    }
}

/// The schema of a tuple: an ordered list of field types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleDesc {
    types: Vec<FieldType>,
}

impl TupleDesc {
    pub fn new(types: Vec<FieldType>) -> TupleDesc {
        assert!(!types.is_empty(), "a schema needs at least one field");
        TupleDesc { types }
    }

    pub fn num_fields(&self) -> usize {
        self.types.len()
    }

    pub fn field_type(&self, i: usize) -> FieldType {
        self.types[i]
    }

    /// The serialized width of one tuple of this schema.
    pub fn tuple_bytes(&self) -> usize {
        self.types.iter().map(FieldType::byte_len).sum()
    }
}

/// Locates a stored tuple: the page holding it and its slot
/// index within that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub pid: PageId,
    pub slot: usize,
}

/// A record: field values conforming to a [`TupleDesc`], plus
/// the record id assigned once the tuple is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    desc: TupleDesc,
    fields: Vec<Field>,
    rid: Option<RecordId>,
}

impl Tuple {
    pub fn new(desc: TupleDesc, fields: Vec<Field>) -> Result<Tuple> {
        if fields.len() != desc.num_fields()
            || fields
                .iter()
                .enumerate()
                .any(|(i, f)| f.field_type() != desc.field_type(i))
        {
            return Err(crate::Error::SchemaMismatch);
        }

        Ok(Tuple {
            desc,
            fields,
            rid: None,
        })
    }

    pub fn desc(&self) -> &TupleDesc {
        &self.desc
    }

    pub fn field(&self, i: usize) -> &Field {
        &self.fields[i]
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.rid
    }

    pub fn set_record_id(&mut self, rid: RecordId) {
        self.rid = Some(rid);
    }

    pub(crate) fn write_to(&self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len(), self.desc.tuple_bytes());
        let mut offset = 0;
        for field in &self.fields {
            let len = field.field_type().byte_len();
            field.write_to(&mut buf[offset..offset + len]);
            offset += len;
        }
    }

    pub(crate) fn read_from(desc: &TupleDesc, buf: &[u8]) -> Tuple {
        debug_assert_eq!(buf.len(), desc.tuple_bytes());
        let mut fields = Vec::with_capacity(desc.num_fields());
        let mut offset = 0;
        for i in 0..desc.num_fields() {
            let field_type = desc.field_type(i);
            let len = field_type.byte_len();
            fields.push(Field::read_from(field_type, &buf[offset..offset + len]));
            offset += len;
        }

        Tuple {
            desc: desc.clone(),
            fields,
            rid: None,
        }
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, "\t")?;
            }
            write!(f, "{}", field)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip() {
        let desc = TupleDesc::new(vec![FieldType::Int, FieldType::Text]);
        let tuple = Tuple::new(
            desc.clone(),
            vec![Field::Int(-42), Field::Text("slate".into())],
        )
        .unwrap();

        let mut buf = vec![0; desc.tuple_bytes()];
        tuple.write_to(&mut buf);
        let back = Tuple::read_from(&desc, &buf);

        assert_eq!(back.field(0), &Field::Int(-42));
        assert_eq!(back.field(1), &Field::Text("slate".into()));
    }

    #[test]
    fn long_text_is_truncated() {
        let desc = TupleDesc::new(vec![FieldType::Text]);
        let long = "x".repeat(TEXT_LEN + 10);
        let tuple = Tuple::new(desc.clone(), vec![Field::Text(long)]).unwrap();

        let mut buf = vec![0; desc.tuple_bytes()];
        tuple.write_to(&mut buf);
        let back = Tuple::read_from(&desc, &buf);

        assert_eq!(back.field(0), &Field::Text("x".repeat(TEXT_LEN)));
    }

    #[test]
    fn schema_mismatch_is_rejected() {
        let desc = TupleDesc::new(vec![FieldType::Int]);
        assert!(Tuple::new(desc, vec![Field::Text("nope".into())]).is_err());
    }
}
