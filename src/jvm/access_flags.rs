use super::{Deserialize, Serialize};
use bitflags::bitflags;
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::Result;

bitflags! {
    /// Access flags on classes
    ///
    /// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.1-200-E.1
    pub struct ClassAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const MODULE = 0x8000;
    }
}

bitflags! {
    /// Access flags on methods
    ///
    /// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.6-200-A.1
    pub struct MethodAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const BRIDGE = 0x0040;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
    }
}

bitflags! {
    /// Access flags on fields
    ///
    /// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.5-200-A.1
    pub struct FieldAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const SYNTHETIC = 0x1000;
        const ENUM = 0x4000;
    }
}

macro_rules! flags_format {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
                self.bits().serialize(writer)
            }
        }
        impl Deserialize for $ty {
            fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<$ty> {
                // Unknown bits are reserved by the JVM spec and ignored on input
                Ok(<$ty>::from_bits_truncate(u16::deserialize(reader)?))
            }
        }
    };
}

flags_format!(ClassAccessFlags);
flags_format!(MethodAccessFlags);
flags_format!(FieldAccessFlags);
