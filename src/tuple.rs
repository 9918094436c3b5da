//! Row model: field types, values, schemas and tuples.
//!
//! Tuples are fixed width. An `Int` occupies 4 bytes, a `Str` occupies a 4 byte
//! length prefix followed by [`STRING_LEN`] bytes of (zero padded) payload.

use std::{fmt::Display, sync::Arc};

use crate::{DbError, DbResult, PageId};

/// Maximum number of payload bytes stored for a string field.
pub const STRING_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Str,
}

impl Type {
    const INT_BYTES: usize = 4;

    /// Number of bytes a field of this type takes on a page.
    pub fn len(&self) -> usize {
        match self {
            Type::Int => Self::INT_BYTES,
            Type::Str => Self::INT_BYTES + STRING_LEN,
        }
    }

    /// Decode a field of this type from the start of `bytes`.
    pub fn parse(&self, bytes: &[u8]) -> DbResult<Field> {
        if bytes.len() < self.len() {
            return Err(DbError::schema(format!(
                "need {} bytes to decode {self}, got {}",
                self.len(),
                bytes.len()
            )));
        }
        let int_bytes: [u8; Self::INT_BYTES] = bytes[..Self::INT_BYTES]
            .try_into()
            .map_err(|_| DbError::schema("short integer"))?;
        match self {
            Type::Int => Ok(Field::Int(i32::from_be_bytes(int_bytes))),
            Type::Str => {
                let length = u32::from_be_bytes(int_bytes) as usize;
                if length > STRING_LEN {
                    return Err(DbError::schema(format!(
                        "string length {length} exceeds {STRING_LEN}"
                    )));
                }
                let start = Self::INT_BYTES;
                let value = String::from_utf8(bytes[start..start + length].to_vec())
                    .map_err(|e| DbError::schema(format!("invalid utf-8 in string field: {e}")))?;
                Ok(Field::Str(value))
            }
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Int => write!(f, "INT"),
            Type::Str => write!(f, "STRING"),
        }
    }
}

impl std::str::FromStr for Type {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "int" | "integer" => Ok(Type::Int),
            "str" | "string" | "text" => Ok(Type::Str),
            other => Err(DbError::schema(format!("unknown field type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Int(i32),
    Str(String),
}

impl Field {
    pub fn field_type(&self) -> Type {
        match self {
            Field::Int(_) => Type::Int,
            Field::Str(_) => Type::Str,
        }
    }

    /// Append the fixed-width encoding of this field to `out`.
    /// Strings longer than [`STRING_LEN`] bytes are truncated on a char boundary.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        match self {
            Field::Int(value) => out.extend_from_slice(&value.to_be_bytes()),
            Field::Str(value) => {
                let mut end = value.len().min(STRING_LEN);
                while !value.is_char_boundary(end) {
                    end -= 1;
                }
                let bytes = &value.as_bytes()[..end];
                out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                out.extend_from_slice(bytes);
                out.resize(out.len() + STRING_LEN - bytes.len(), 0);
            }
        }
    }

    /// Parse a field of type `ty` from its textual form.
    pub fn parse_as(ty: Type, text: &str) -> DbResult<Field> {
        match ty {
            Type::Int => text
                .trim()
                .parse::<i32>()
                .map(Field::Int)
                .map_err(|e| DbError::schema(format!("'{text}' is not an integer: {e}"))),
            Type::Str => Ok(Field::Str(text.to_string())),
        }
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Field::Int(value) => write!(f, "{value}"),
            Field::Str(value) => write!(f, "{value}"),
        }
    }
}

impl From<i32> for Field {
    fn from(value: i32) -> Self {
        Field::Int(value)
    }
}

impl From<&str> for Field {
    fn from(value: &str) -> Self {
        Field::Str(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TDItem {
    pub field_type: Type,
    pub field_name: String,
}

impl Display for TDItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.field_type, self.field_name)
    }
}

/// The schema of a tuple: an ordered, non-empty list of typed, named fields.
#[derive(Debug, Clone, Eq)]
pub struct TupleDesc {
    items: Vec<TDItem>,
}

impl TupleDesc {
    pub fn new(types: &[Type], names: &[&str]) -> DbResult<Self> {
        if types.is_empty() {
            return Err(DbError::schema("a schema needs at least one field"));
        }
        if types.len() != names.len() {
            return Err(DbError::schema(format!(
                "{} types but {} names",
                types.len(),
                names.len()
            )));
        }
        let items = types
            .iter()
            .zip(names)
            .map(|(ty, name)| TDItem {
                field_type: *ty,
                field_name: name.to_string(),
            })
            .collect();
        Ok(Self { items })
    }

    /// A schema with anonymous fields.
    pub fn from_types(types: &[Type]) -> DbResult<Self> {
        let names = vec![""; types.len()];
        Self::new(types, &names)
    }

    /// Parse a schema of the form `id:int,name:string`.
    pub fn parse(spec: &str) -> DbResult<Self> {
        let mut types = Vec::new();
        let mut names = Vec::new();
        for column in spec.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            let (name, ty) = column
                .split_once(':')
                .ok_or_else(|| DbError::schema(format!("expected name:type, got '{column}'")))?;
            names.push(name.trim());
            types.push(ty.trim().parse::<Type>()?);
        }
        Self::new(&types, &names)
    }

    pub fn num_fields(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> impl Iterator<Item = &TDItem> {
        self.items.iter()
    }

    pub fn field_name(&self, i: usize) -> DbResult<&str> {
        self.items
            .get(i)
            .map(|item| item.field_name.as_str())
            .ok_or_else(|| self.out_of_range(i))
    }

    pub fn field_type(&self, i: usize) -> DbResult<Type> {
        self.items
            .get(i)
            .map(|item| item.field_type)
            .ok_or_else(|| self.out_of_range(i))
    }

    /// Index of the first field called `name`.
    pub fn field_name_to_index(&self, name: &str) -> DbResult<usize> {
        self.items
            .iter()
            .position(|item| item.field_name == name)
            .ok_or_else(|| DbError::schema(format!("no field named '{name}'")))
    }

    /// Size in bytes of one tuple of this schema.
    pub fn size(&self) -> usize {
        self.items.iter().map(|item| item.field_type.len()).sum()
    }

    /// Concatenate two schemas, `first`'s fields before `second`'s.
    pub fn merge(first: &TupleDesc, second: &TupleDesc) -> TupleDesc {
        let items = first.items.iter().chain(&second.items).cloned().collect();
        TupleDesc { items }
    }

    /// A copy of this schema with every field renamed to `prefix.name`.
    pub fn with_prefix(&self, prefix: &str) -> TupleDesc {
        let items = self
            .items
            .iter()
            .map(|item| TDItem {
                field_type: item.field_type,
                field_name: format!("{prefix}.{}", item.field_name),
            })
            .collect();
        TupleDesc { items }
    }

    fn out_of_range(&self, i: usize) -> DbError {
        DbError::schema(format!(
            "field index {i} out of range for {} fields",
            self.items.len()
        ))
    }
}

/// Two schemas are equal when their field types match position by position.
/// Field names are not compared.
impl PartialEq for TupleDesc {
    fn eq(&self, other: &Self) -> bool {
        self.items.len() == other.items.len()
            && self
                .items
                .iter()
                .zip(&other.items)
                .all(|(a, b)| a.field_type == b.field_type)
    }
}

impl Display for TupleDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered: Vec<String> = self.items.iter().map(|item| item.to_string()).collect();
        write!(f, "{}", rendered.join(", "))
    }
}

/// Location of a tuple: the page it lives on and its slot within that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: usize,
}

impl RecordId {
    pub fn new(page_id: PageId, slot: usize) -> Self {
        Self { page_id, slot }
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.page_id, self.slot)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    desc: Arc<TupleDesc>,
    fields: Vec<Field>,
    record_id: Option<RecordId>,
}

impl Tuple {
    /// Build a tuple, checking the values against `desc`.
    pub fn new(desc: Arc<TupleDesc>, fields: Vec<Field>) -> DbResult<Self> {
        if fields.len() != desc.num_fields() {
            return Err(DbError::schema(format!(
                "schema has {} fields, tuple has {}",
                desc.num_fields(),
                fields.len()
            )));
        }
        for (i, field) in fields.iter().enumerate() {
            let expected = desc.field_type(i)?;
            if field.field_type() != expected {
                return Err(DbError::schema(format!(
                    "field {i} expects {expected}, got {}",
                    field.field_type()
                )));
            }
        }
        Ok(Self {
            desc,
            fields,
            record_id: None,
        })
    }

    /// Decode one tuple from `bytes`, which must hold at least `desc.size()` bytes.
    pub fn parse(desc: Arc<TupleDesc>, bytes: &[u8]) -> DbResult<Self> {
        let mut offset = 0;
        let mut fields = Vec::with_capacity(desc.num_fields());
        for item in desc.items() {
            let len = item.field_type.len();
            let end = offset + len;
            if end > bytes.len() {
                return Err(DbError::schema("tuple bytes shorter than schema"));
            }
            fields.push(item.field_type.parse(&bytes[offset..end])?);
            offset = end;
        }
        Ok(Self {
            desc,
            fields,
            record_id: None,
        })
    }

    pub fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, i: usize) -> DbResult<&Field> {
        self.fields.get(i).ok_or_else(|| {
            DbError::schema(format!(
                "field index {i} out of range for {} fields",
                self.fields.len()
            ))
        })
    }

    pub fn set_field(&mut self, i: usize, field: Field) -> DbResult<()> {
        let expected = self.desc.field_type(i)?;
        if field.field_type() != expected {
            return Err(DbError::schema(format!(
                "field {i} expects {expected}, got {}",
                field.field_type()
            )));
        }
        self.fields[i] = field;
        Ok(())
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, record_id: Option<RecordId>) {
        self.record_id = record_id;
    }

    /// Fixed-width encoding of this tuple, `tuple_desc().size()` bytes long.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.desc.size());
        for field in &self.fields {
            field.serialize(&mut out);
        }
        out
    }
}

impl Display for Tuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered: Vec<String> = self.fields.iter().map(|field| field.to_string()).collect();
        write!(f, "{}", rendered.join("\t"))
    }
}
