use crate::jvm::{Constant, ConstantPool, Deserialize, Error, FormatError, Serialize};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io;

/// Attributes (used on classes, fields, methods, and even on some attributes)
///
/// In the serialized format, every attribute is a name index plus an opaque byte blob; the typed
/// views below each know how to produce or consume one of those blobs. Unrecognized attributes
/// round-trip untouched as the raw bytes.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7
#[derive(Debug, PartialEq, Eq)]
pub struct Attribute {
    pub name_index: u16,
    pub info: Vec<u8>,
}

impl Attribute {
    /// Wrap a typed attribute, resolving its name against the frozen pool
    pub fn wrap<A: AttributeLike>(pool: &ConstantPool, attribute: &A) -> Result<Attribute, Error> {
        let name_index = pool.index_of(&Constant::Utf8(A::NAME.to_string()))?;
        let mut info = vec![];
        attribute.serialize(&mut info)?;
        Ok(Attribute { name_index, info })
    }

    /// Name of this attribute, as resolved through the pool
    pub fn name<'p>(&self, pool: &'p ConstantPool) -> Result<&'p str, Error> {
        pool.get_utf8(self.name_index)
    }

    /// Decode the typed view of this attribute, if its name matches
    pub fn decode_as<A: AttributeLike + Deserialize>(
        &self,
        pool: &ConstantPool,
    ) -> Result<Option<A>, Error> {
        if self.name(pool)? != A::NAME {
            return Ok(None);
        }
        let mut reader = io::Cursor::new(&self.info);
        let decoded = A::deserialize(&mut reader)?;
        if (reader.position() as usize) < self.info.len() {
            return Err(FormatError::Truncated.into());
        }
        Ok(Some(decoded))
    }
}

impl Serialize for Attribute {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
        self.name_index.serialize(writer)?;

        // Attribute info length is 4 bytes
        (self.info.len() as u32).serialize(writer)?;
        writer.write_all(&self.info)?;

        Ok(())
    }
}

impl Deserialize for Attribute {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> io::Result<Attribute> {
        let name_index = u16::deserialize(reader)?;
        let length = u32::deserialize(reader)? as usize;
        let mut info = vec![0u8; length];
        reader.read_exact(&mut info)?;
        Ok(Attribute { name_index, info })
    }
}

/// Attributes are all stored in the same way (see [`Attribute`]), but internally they represent
/// very different things. This trait is implemented by things which can be turned into
/// attributes.
pub trait AttributeLike: Serialize {
    /// Name of the attribute
    const NAME: &'static str;
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.2
#[derive(Debug)]
pub struct ConstantValue(pub u16);

impl AttributeLike for ConstantValue {
    const NAME: &'static str = "ConstantValue";
}

impl Serialize for ConstantValue {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for ConstantValue {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> io::Result<ConstantValue> {
        Ok(ConstantValue(u16::deserialize(reader)?))
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.3
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<Attribute>,
}

impl AttributeLike for Code {
    const NAME: &'static str = "Code";
}

impl Serialize for Code {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
        self.max_stack.serialize(writer)?;
        self.max_locals.serialize(writer)?;

        // Bytecode length is 4 bytes
        (self.code.len() as u32).serialize(writer)?;
        writer.write_all(&self.code)?;

        self.exception_table.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for Code {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> io::Result<Code> {
        let max_stack = u16::deserialize(reader)?;
        let max_locals = u16::deserialize(reader)?;
        let code_length = u32::deserialize(reader)?;
        let mut code = vec![0u8; code_length as usize];
        reader.read_exact(&mut code)?;
        let exception_table = Vec::deserialize(reader)?;
        let attributes = Vec::deserialize(reader)?;
        Ok(Code {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }
}

/// One exception-table row of a `Code` attribute
#[derive(Debug, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Start of the guarded range (inclusive)
    pub start_pc: u16,

    /// End of the guarded range (exclusive)
    pub end_pc: u16,

    /// Start of the exception handler
    pub handler_pc: u16,

    /// Class of exception caught; 0 catches everything (used for `finally`)
    pub catch_type: u16,
}

impl Serialize for ExceptionHandler {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.end_pc.serialize(writer)?;
        self.handler_pc.serialize(writer)?;
        self.catch_type.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for ExceptionHandler {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> io::Result<ExceptionHandler> {
        let start_pc = u16::deserialize(reader)?;
        let end_pc = u16::deserialize(reader)?;
        let handler_pc = u16::deserialize(reader)?;
        let catch_type = u16::deserialize(reader)?;
        Ok(ExceptionHandler {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        })
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.12
#[derive(Debug)]
pub struct LineNumberTable(pub Vec<LineNumber>);

#[derive(Debug)]
pub struct LineNumber {
    pub start_pc: u16,
    pub line_number: u16,
}

impl AttributeLike for LineNumberTable {
    const NAME: &'static str = "LineNumberTable";
}

impl Serialize for LineNumberTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for LineNumberTable {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> io::Result<LineNumberTable> {
        Ok(LineNumberTable(Vec::deserialize(reader)?))
    }
}

impl Serialize for LineNumber {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.line_number.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for LineNumber {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> io::Result<LineNumber> {
        let start_pc = u16::deserialize(reader)?;
        let line_number = u16::deserialize(reader)?;
        Ok(LineNumber {
            start_pc,
            line_number,
        })
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.13
#[derive(Debug)]
pub struct LocalVariableTable(pub Vec<LocalVariable>);

#[derive(Debug)]
pub struct LocalVariable {
    pub start_pc: u16,
    pub length: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub index: u16,
}

impl AttributeLike for LocalVariableTable {
    const NAME: &'static str = "LocalVariableTable";
}

impl Serialize for LocalVariableTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for LocalVariableTable {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> io::Result<LocalVariableTable> {
        Ok(LocalVariableTable(Vec::deserialize(reader)?))
    }
}

impl Serialize for LocalVariable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.length.serialize(writer)?;
        self.name_index.serialize(writer)?;
        self.descriptor_index.serialize(writer)?;
        self.index.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for LocalVariable {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> io::Result<LocalVariable> {
        let start_pc = u16::deserialize(reader)?;
        let length = u16::deserialize(reader)?;
        let name_index = u16::deserialize(reader)?;
        let descriptor_index = u16::deserialize(reader)?;
        let index = u16::deserialize(reader)?;
        Ok(LocalVariable {
            start_pc,
            length,
            name_index,
            descriptor_index,
            index,
        })
    }
}

/// The `throws` clause of a method
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.5
#[derive(Debug)]
pub struct Exceptions(pub Vec<u16>);

impl AttributeLike for Exceptions {
    const NAME: &'static str = "Exceptions";
}

impl Serialize for Exceptions {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for Exceptions {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> io::Result<Exceptions> {
        Ok(Exceptions(Vec::deserialize(reader)?))
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.10
#[derive(Debug)]
pub struct SourceFile(pub u16);

impl AttributeLike for SourceFile {
    const NAME: &'static str = "SourceFile";
}

impl Serialize for SourceFile {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for SourceFile {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> io::Result<SourceFile> {
        Ok(SourceFile(u16::deserialize(reader)?))
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.9
#[derive(Debug)]
pub struct Signature(pub u16);

impl AttributeLike for Signature {
    const NAME: &'static str = "Signature";
}

impl Serialize for Signature {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for Signature {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> io::Result<Signature> {
        Ok(Signature(u16::deserialize(reader)?))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::Version;

    #[test]
    fn raw_attribute_round_trips() {
        let attribute = Attribute {
            name_index: 7,
            info: vec![1, 2, 3, 4, 5],
        };
        let mut bytes = vec![];
        attribute.serialize(&mut bytes).unwrap();
        let reread = Attribute::deserialize(&mut io::Cursor::new(&bytes)).unwrap();
        assert_eq!(attribute, reread);
    }

    #[test]
    fn typed_decode_checks_the_name() {
        let mut pool = ConstantPool::new(Version::JAVA8);
        pool.register(&Constant::Utf8("ConstantValue".to_string())).unwrap();
        pool.register(&Constant::Utf8("SourceFile".to_string())).unwrap();
        pool.freeze().unwrap();

        let attribute = Attribute::wrap(&pool, &ConstantValue(3)).unwrap();
        assert!(matches!(
            attribute.decode_as::<ConstantValue>(&pool).unwrap(),
            Some(ConstantValue(3))
        ));
        assert!(attribute.decode_as::<SourceFile>(&pool).unwrap().is_none());
    }

    #[test]
    fn code_attribute_round_trips() {
        let code = Code {
            max_stack: 2,
            max_locals: 3,
            code: vec![0x03, 0xac],
            exception_table: vec![ExceptionHandler {
                start_pc: 0,
                end_pc: 1,
                handler_pc: 1,
                catch_type: 0,
            }],
            attributes: vec![],
        };
        let mut bytes = vec![];
        code.serialize(&mut bytes).unwrap();
        let reread = Code::deserialize(&mut io::Cursor::new(&bytes)).unwrap();
        assert_eq!(reread.max_stack, 2);
        assert_eq!(reread.code, vec![0x03, 0xac]);
        assert_eq!(reread.exception_table, code.exception_table);
    }
}
