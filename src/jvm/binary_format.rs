use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Result;

/// Utility trait for serializing data inside class files
///
/// Java class files have some peculiarities that make it useful to define an extra trait (instead
/// of just using `serde`):
///
///   - tags are always `u8`
///   - when serializing a sequence, the length of the sequence is usually `u16`
///   - everything is big-endian
///
pub trait Serialize: Sized {
    /// Serialize construct into a binary output stream
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()>;
}

/// Mirror of [`Serialize`] for reading class files back in
///
/// Running out of input surfaces as `UnexpectedEof`, which the error layer maps to a format
/// error (a damaged class file), never a panic.
pub trait Deserialize: Sized {
    /// Deserialize construct from a binary input stream
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self>;
}

macro_rules! primitive_format {
    ($ty:ty, $write:ident, $read:ident) => {
        impl Serialize for $ty {
            fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
                writer.$write::<BigEndian>(*self)
            }
        }
        impl Deserialize for $ty {
            fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<$ty> {
                reader.$read::<BigEndian>()
            }
        }
    };
}

primitive_format!(u16, write_u16, read_u16);
primitive_format!(u32, write_u32, read_u32);
primitive_format!(u64, write_u64, read_u64);
primitive_format!(i16, write_i16, read_i16);
primitive_format!(i32, write_i32, read_i32);
primitive_format!(i64, write_i64, read_i64);
primitive_format!(f32, write_f32, read_f32);
primitive_format!(f64, write_f64, read_f64);

// Single bytes take no endianness argument, so they fall outside the macro
impl Serialize for u8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(*self)
    }
}

impl Deserialize for u8 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<u8> {
        reader.read_u8()
    }
}

impl Serialize for i8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_i8(*self)
    }
}

impl Deserialize for i8 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<i8> {
        reader.read_i8()
    }
}

/// Size in `u16` is the first thing serialized/deserialized
impl<A: Serialize> Serialize for Vec<A> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        (self.len() as u16).serialize(writer)?;
        for elem in self {
            elem.serialize(writer)?;
        }
        Ok(())
    }
}

impl<A: Deserialize> Deserialize for Vec<A> {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Vec<A>> {
        let length = u16::deserialize(reader)? as usize;
        let mut elems = Vec::with_capacity(length.min(1024));
        for _ in 0..length {
            elems.push(A::deserialize(reader)?);
        }
        Ok(elems)
    }
}
