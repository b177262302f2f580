//! Primitive type table: maps a ULog primitive type name to its decoded
//! value tag, byte width and default value.
//!
//! # Endianness
//! Every multi-byte primitive is little-endian on disk.  There is no
//! per-file byte order; a big-endian log is simply not a valid ULog file.

use std::fmt;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;

// ── PrimitiveType ─────────────────────────────────────────────────────────────

/// One of the twelve primitive types a FORMAT definition may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PrimitiveType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    Bool,
    Char,
}

impl PrimitiveType {
    /// Resolve a type name as written in the file (`"uint64_t"`, `"float"`, …).
    /// Returns `None` for composite or unknown names.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "int8_t"   => Some(PrimitiveType::Int8),
            "uint8_t"  => Some(PrimitiveType::UInt8),
            "int16_t"  => Some(PrimitiveType::Int16),
            "uint16_t" => Some(PrimitiveType::UInt16),
            "int32_t"  => Some(PrimitiveType::Int32),
            "uint32_t" => Some(PrimitiveType::UInt32),
            "int64_t"  => Some(PrimitiveType::Int64),
            "uint64_t" => Some(PrimitiveType::UInt64),
            "float"    => Some(PrimitiveType::Float),
            "double"   => Some(PrimitiveType::Double),
            "bool"     => Some(PrimitiveType::Bool),
            "char"     => Some(PrimitiveType::Char),
            _          => None,
        }
    }

    /// The name written into FORMAT, INFO and PARAMETER records.
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveType::Int8   => "int8_t",
            PrimitiveType::UInt8  => "uint8_t",
            PrimitiveType::Int16  => "int16_t",
            PrimitiveType::UInt16 => "uint16_t",
            PrimitiveType::Int32  => "int32_t",
            PrimitiveType::UInt32 => "uint32_t",
            PrimitiveType::Int64  => "int64_t",
            PrimitiveType::UInt64 => "uint64_t",
            PrimitiveType::Float  => "float",
            PrimitiveType::Double => "double",
            PrimitiveType::Bool   => "bool",
            PrimitiveType::Char   => "char",
        }
    }

    /// Encoded width in bytes.
    #[inline]
    pub fn width(self) -> usize {
        match self {
            PrimitiveType::Int8 | PrimitiveType::UInt8 | PrimitiveType::Bool | PrimitiveType::Char => 1,
            PrimitiveType::Int16 | PrimitiveType::UInt16 => 2,
            PrimitiveType::Int32 | PrimitiveType::UInt32 | PrimitiveType::Float => 4,
            PrimitiveType::Int64 | PrimitiveType::UInt64 | PrimitiveType::Double => 8,
        }
    }

    pub fn default_value(self) -> Value {
        match self {
            PrimitiveType::Int8   => Value::Int8(0),
            PrimitiveType::UInt8  => Value::UInt8(0),
            PrimitiveType::Int16  => Value::Int16(0),
            PrimitiveType::UInt16 => Value::UInt16(0),
            PrimitiveType::Int32  => Value::Int32(0),
            PrimitiveType::UInt32 => Value::UInt32(0),
            PrimitiveType::Int64  => Value::Int64(0),
            PrimitiveType::UInt64 => Value::UInt64(0),
            PrimitiveType::Float  => Value::Float(0.0),
            PrimitiveType::Double => Value::Double(0.0),
            PrimitiveType::Bool   => Value::Bool(false),
            PrimitiveType::Char   => Value::Char('\0'),
        }
    }

    /// Decode one value from the front of `reader`.
    pub fn read_value<R: Read>(self, mut reader: R) -> io::Result<Value> {
        Ok(match self {
            PrimitiveType::Int8   => Value::Int8(reader.read_i8()?),
            PrimitiveType::UInt8  => Value::UInt8(reader.read_u8()?),
            PrimitiveType::Int16  => Value::Int16(reader.read_i16::<LittleEndian>()?),
            PrimitiveType::UInt16 => Value::UInt16(reader.read_u16::<LittleEndian>()?),
            PrimitiveType::Int32  => Value::Int32(reader.read_i32::<LittleEndian>()?),
            PrimitiveType::UInt32 => Value::UInt32(reader.read_u32::<LittleEndian>()?),
            PrimitiveType::Int64  => Value::Int64(reader.read_i64::<LittleEndian>()?),
            PrimitiveType::UInt64 => Value::UInt64(reader.read_u64::<LittleEndian>()?),
            PrimitiveType::Float  => Value::Float(reader.read_f32::<LittleEndian>()?),
            PrimitiveType::Double => Value::Double(reader.read_f64::<LittleEndian>()?),
            PrimitiveType::Bool   => Value::Bool(reader.read_u8()? != 0),
            // Single byte, widened as Latin-1.
            PrimitiveType::Char   => Value::Char(char::from(reader.read_u8()?)),
        })
    }

    /// Decode one value from the first `width()` bytes of `bytes`.
    /// Returns `None` if `bytes` is too short.
    pub fn decode(self, bytes: &[u8]) -> Option<Value> {
        if bytes.len() < self.width() {
            return None;
        }
        self.read_value(bytes).ok()
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Value ─────────────────────────────────────────────────────────────────────

/// A decoded primitive.  Every unsigned type keeps its full range.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Char(char),
}

impl Value {
    pub fn primitive_type(&self) -> PrimitiveType {
        match self {
            Value::Int8(_)   => PrimitiveType::Int8,
            Value::UInt8(_)  => PrimitiveType::UInt8,
            Value::Int16(_)  => PrimitiveType::Int16,
            Value::UInt16(_) => PrimitiveType::UInt16,
            Value::Int32(_)  => PrimitiveType::Int32,
            Value::UInt32(_) => PrimitiveType::UInt32,
            Value::Int64(_)  => PrimitiveType::Int64,
            Value::UInt64(_) => PrimitiveType::UInt64,
            Value::Float(_)  => PrimitiveType::Float,
            Value::Double(_) => PrimitiveType::Double,
            Value::Bool(_)   => PrimitiveType::Bool,
            Value::Char(_)   => PrimitiveType::Char,
        }
    }

    /// Encode in wire format.  A `Char` is written as its single raw byte.
    pub fn write_le<W: Write>(&self, mut writer: W) -> io::Result<()> {
        match *self {
            Value::Int8(v)   => writer.write_i8(v),
            Value::UInt8(v)  => writer.write_u8(v),
            Value::Int16(v)  => writer.write_i16::<LittleEndian>(v),
            Value::UInt16(v) => writer.write_u16::<LittleEndian>(v),
            Value::Int32(v)  => writer.write_i32::<LittleEndian>(v),
            Value::UInt32(v) => writer.write_u32::<LittleEndian>(v),
            Value::Int64(v)  => writer.write_i64::<LittleEndian>(v),
            Value::UInt64(v) => writer.write_u64::<LittleEndian>(v),
            Value::Float(v)  => writer.write_f32::<LittleEndian>(v),
            Value::Double(v) => writer.write_f64::<LittleEndian>(v),
            Value::Bool(v)   => writer.write_u8(v as u8),
            Value::Char(c)   => writer.write_u8(c as u32 as u8),
        }
    }

    /// Integer view, for packed version words and timestamps.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int8(v)   => Some(v as i64),
            Value::UInt8(v)  => Some(v as i64),
            Value::Int16(v)  => Some(v as i64),
            Value::UInt16(v) => Some(v as i64),
            Value::Int32(v)  => Some(v as i64),
            Value::UInt32(v) => Some(v as i64),
            Value::Int64(v)  => Some(v),
            Value::UInt64(v) => i64::try_from(v).ok(),
            _                => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::UInt64(v) => Some(v),
            _ => self.as_i64().and_then(|v| u64::try_from(v).ok()),
        }
    }
}

/// Floats compare by bit pattern so that a NaN sample equals itself across a
/// decode/encode round trip.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int8(a), Value::Int8(b))     => a == b,
            (Value::UInt8(a), Value::UInt8(b))   => a == b,
            (Value::Int16(a), Value::Int16(b))   => a == b,
            (Value::UInt16(a), Value::UInt16(b)) => a == b,
            (Value::Int32(a), Value::Int32(b))   => a == b,
            (Value::UInt32(a), Value::UInt32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b))   => a == b,
            (Value::UInt64(a), Value::UInt64(b)) => a == b,
            (Value::Float(a), Value::Float(b))   => a.to_bits() == b.to_bits(),
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Bool(a), Value::Bool(b))     => a == b,
            (Value::Char(a), Value::Char(b))     => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int8(v)   => write!(f, "{v}"),
            Value::UInt8(v)  => write!(f, "{v}"),
            Value::Int16(v)  => write!(f, "{v}"),
            Value::UInt16(v) => write!(f, "{v}"),
            Value::Int32(v)  => write!(f, "{v}"),
            Value::UInt32(v) => write!(f, "{v}"),
            Value::Int64(v)  => write!(f, "{v}"),
            Value::UInt64(v) => write!(f, "{v}"),
            Value::Float(v)  => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Bool(v)   => write!(f, "{}", *v as u8),
            Value::Char(v)   => write!(f, "{v}"),
        }
    }
}
