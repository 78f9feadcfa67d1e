use crate::jvm::class_file::{Attribute, Field, Method};
use crate::jvm::{
    ClassAccessFlags, ConstantPool, Deserialize, Error, FormatError, Serialize, Version,
};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::fs;
use std::path::Path;

/// Representation of the [`class` file format of the JVM][0]
///
/// Everything here is already resolved down to constant-pool indices; [`model`] is the view with
/// names still in it.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html
/// [`model`]: crate::jvm::model
pub struct ClassFile {
    pub version: Version,
    pub pool: ConstantPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Magic header bytes that go at the front of the serialized class file
    const MAGIC: u32 = 0xCAFE_BABE;

    /// Write the class file to a binary output stream
    pub fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        ClassFile::MAGIC.serialize(writer)?;
        self.version.serialize(writer)?;
        self.pool.serialize(writer)?;
        self.access_flags.serialize(writer)?;
        self.this_class.serialize(writer)?;
        self.super_class.serialize(writer)?;
        self.interfaces.serialize(writer)?;
        self.fields.serialize(writer)?;
        self.methods.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }

    /// Read a class file from a binary input stream
    pub fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<ClassFile, Error> {
        let magic = u32::deserialize(reader)?;
        if magic != ClassFile::MAGIC {
            return Err(FormatError::BadMagic(magic).into());
        }
        let version = Version::deserialize(reader)?;
        let pool = ConstantPool::deserialize(reader, version)?;
        let access_flags = ClassAccessFlags::deserialize(reader)?;
        let this_class = u16::deserialize(reader)?;
        let super_class = u16::deserialize(reader)?;
        let interfaces = Vec::deserialize(reader)?;
        let fields = Vec::deserialize(reader)?;
        let methods = Vec::deserialize(reader)?;
        let attributes = Vec::deserialize(reader)?;
        Ok(ClassFile {
            version,
            pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// Save the class file to disk
    pub fn save_to_path<P: AsRef<Path>>(
        &self,
        path: P,
        create_missing_directories: bool,
    ) -> Result<(), Error> {
        let path = path.as_ref();
        if create_missing_directories {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut class_file = fs::File::create(path)?;
        self.serialize(&mut class_file)
    }

    /// Load a class file from disk
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<ClassFile, Error> {
        let mut class_file = std::io::BufReader::new(fs::File::open(path)?);
        ClassFile::deserialize(&mut class_file)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::Constant;
    use std::io::Cursor;

    #[test]
    fn minimal_class_round_trips() {
        let mut pool = ConstantPool::new(Version::JAVA8);
        pool.register(&Constant::Class("Empty".to_string())).unwrap();
        pool.register(&Constant::Class("java/lang/Object".to_string()))
            .unwrap();
        pool.freeze().unwrap();

        let class = ClassFile {
            version: Version::JAVA8,
            this_class: pool.index_of(&Constant::Class("Empty".to_string())).unwrap(),
            super_class: pool
                .index_of(&Constant::Class("java/lang/Object".to_string()))
                .unwrap(),
            pool,
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
            attributes: vec![],
        };

        let mut bytes = vec![];
        class.serialize(&mut bytes).unwrap();
        let reread = ClassFile::deserialize(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(reread.version, Version::JAVA8);
        assert_eq!(reread.pool.get_class_name(reread.this_class).unwrap(), "Empty");

        let mut bytes2 = vec![];
        reread.serialize(&mut bytes2).unwrap();
        assert_eq!(bytes, bytes2);
    }

    #[test]
    fn bad_magic_is_a_format_error() {
        let bytes = [0xde, 0xad, 0xbe, 0xef];
        assert!(matches!(
            ClassFile::deserialize(&mut Cursor::new(&bytes)),
            Err(Error::Format(FormatError::BadMagic(0xdead_beef)))
        ));
    }
}
