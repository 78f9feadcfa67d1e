use super::{Deserialize, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::Result;

/// Version of the class file, which is used to verify that the JVM has the
/// necessary features to interpret the class
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Version {
    pub minor_version: u16,
    pub major_version: u16,
}

impl Version {
    /// JVM class file version corresponding to Java SE 6
    pub const JAVA6: Version = Version::major(50);

    /// JVM class file version corresponding to Java SE 7 (first to require `MethodHandle` support)
    pub const JAVA7: Version = Version::major(51);

    /// JVM class file version corresponding to Java SE 8 (released March 2014)
    pub const JAVA8: Version = Version::major(52);

    /// JVM class file version corresponding to Java SE 9 (first with `Module`/`Package` constants)
    pub const JAVA9: Version = Version::major(53);

    /// JVM class file version corresponding to Java SE 11 (first with `Dynamic` constants)
    pub const JAVA11: Version = Version::major(55);

    /// JVM class file version corresponding to Java SE 17
    pub const JAVA17: Version = Version::major(61);

    const fn major(major_version: u16) -> Version {
        Version {
            minor_version: 0,
            major_version,
        }
    }
}

impl Serialize for Version {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.minor_version.serialize(writer)?;
        self.major_version.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for Version {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Version> {
        let minor_version = u16::deserialize(reader)?;
        let major_version = u16::deserialize(reader)?;
        Ok(Version {
            minor_version,
            major_version,
        })
    }
}
