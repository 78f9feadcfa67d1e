use super::{ContractError, Deserialize, Error, FormatError, Serialize, Version};
use crate::jvm::CapacityError;
use crate::util::{Offset, OffsetVec, Width};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Symbolic reference to a field or method: class + name + descriptor
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MemberRef {
    /// Binary class name, eg. `java/lang/Object`
    pub class: String,
    pub name: String,
    pub descriptor: String,
}

/// One constant-pool entry, as a self-contained structural value
///
/// Identity is structural: two constants are the same pool entry iff they (and everything they
/// reference) compare equal. References to other constants hold the referenced *values*, not
/// indices; indices only exist once a [`ConstantPool`] is frozen.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4
#[derive(Clone, Debug)]
pub enum Constant {
    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (the encoding of the null character
    /// `\u{0000}` and the encoding of supplementary characters is different).
    Utf8(String),

    /// Constant primitive of type `int`
    Integer(i32),

    /// Constant primitive of type `float`
    Float(f32),

    /// Constant primitive of type `long` (occupies two pool slots)
    Long(i64),

    /// Constant primitive of type `double` (occupies two pool slots)
    Double(f64),

    /// Class or interface, by binary name
    Class(String),

    /// Constant object of type `java.lang.String`
    String(String),

    FieldRef(MemberRef),
    MethodRef(MemberRef),
    InterfaceMethodRef(MemberRef),

    /// Name and a type (eg. for a field or a method)
    NameAndType { name: String, descriptor: String },

    /// Constant object of type `java.lang.invoke.MethodHandle`
    MethodHandle {
        kind: HandleKind,

        /// `FieldRef` for the field kinds, `MethodRef`/`InterfaceMethodRef` for the rest
        member: Box<Constant>,
    },

    /// Method type, by descriptor
    MethodType(String),

    /// Dynamically-computed constant
    Dynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        name: String,
        descriptor: String,
    },

    /// Dynamically-computed call site
    InvokeDynamic {
        bootstrap_method: u16,
        name: String,
        descriptor: String,
    },

    Module(String),
    Package(String),
}

impl Constant {
    /// Tag byte introducing this constant in the class file
    pub fn tag(&self) -> u8 {
        match self {
            Constant::Utf8(_) => 1,
            Constant::Integer(_) => 3,
            Constant::Float(_) => 4,
            Constant::Long(_) => 5,
            Constant::Double(_) => 6,
            Constant::Class(_) => 7,
            Constant::String(_) => 8,
            Constant::FieldRef(_) => 9,
            Constant::MethodRef(_) => 10,
            Constant::InterfaceMethodRef(_) => 11,
            Constant::NameAndType { .. } => 12,
            Constant::MethodHandle { .. } => 15,
            Constant::MethodType(_) => 16,
            Constant::Dynamic { .. } => 17,
            Constant::InvokeDynamic { .. } => 18,
            Constant::Module(_) => 19,
            Constant::Package(_) => 20,
        }
    }

    /// Constants this one references; registering a constant registers these first
    pub fn dependents(&self) -> Vec<Constant> {
        match self {
            Constant::Utf8(_)
            | Constant::Integer(_)
            | Constant::Float(_)
            | Constant::Long(_)
            | Constant::Double(_) => vec![],

            Constant::Class(name) | Constant::Module(name) | Constant::Package(name) => {
                vec![Constant::Utf8(name.clone())]
            }
            Constant::String(value) => vec![Constant::Utf8(value.clone())],
            Constant::MethodType(descriptor) => vec![Constant::Utf8(descriptor.clone())],

            Constant::FieldRef(member)
            | Constant::MethodRef(member)
            | Constant::InterfaceMethodRef(member) => vec![
                Constant::Class(member.class.clone()),
                Constant::NameAndType {
                    name: member.name.clone(),
                    descriptor: member.descriptor.clone(),
                },
            ],

            Constant::NameAndType { name, descriptor } => vec![
                Constant::Utf8(name.clone()),
                Constant::Utf8(descriptor.clone()),
            ],

            Constant::MethodHandle { member, .. } => vec![(**member).clone()],

            Constant::Dynamic {
                name, descriptor, ..
            }
            | Constant::InvokeDynamic {
                name, descriptor, ..
            } => vec![Constant::NameAndType {
                name: name.clone(),
                descriptor: descriptor.clone(),
            }],
        }
    }

    /// Lowest class-file major version at which this constant kind is permitted, if gated
    pub fn min_version(&self) -> Option<Version> {
        match self {
            Constant::MethodHandle { .. }
            | Constant::MethodType(_)
            | Constant::InvokeDynamic { .. } => Some(Version::JAVA7),
            Constant::Module(_) | Constant::Package(_) => Some(Version::JAVA9),
            Constant::Dynamic { .. } => Some(Version::JAVA11),
            _ => None,
        }
    }

    /// Does loading this constant take the `ldc2_w` form (category-2 value)?
    pub fn loads_wide(&self) -> bool {
        match self {
            Constant::Long(_) | Constant::Double(_) => true,
            Constant::Dynamic { descriptor, .. } => {
                descriptor.starts_with('J') || descriptor.starts_with('D')
            }
            _ => false,
        }
    }

    /// Can this constant be the operand of `ldc`/`ldc_w`/`ldc2_w`?
    pub fn is_loadable(&self) -> bool {
        matches!(
            self,
            Constant::Integer(_)
                | Constant::Float(_)
                | Constant::Long(_)
                | Constant::Double(_)
                | Constant::String(_)
                | Constant::Class(_)
                | Constant::MethodHandle { .. }
                | Constant::MethodType(_)
                | Constant::Dynamic { .. }
        )
    }

    fn validate(&self, version: Version) -> Result<(), Error> {
        if let Some(required) = self.min_version() {
            if version.major_version < required.major_version {
                return Err(ContractError::ConstantVersion {
                    constant: self.clone(),
                    required,
                    actual: version,
                }
                .into());
            }
        }

        if let Constant::MethodHandle { kind, member } = self {
            let valid = match kind {
                HandleKind::GetField
                | HandleKind::GetStatic
                | HandleKind::PutField
                | HandleKind::PutStatic => matches!(**member, Constant::FieldRef(_)),

                HandleKind::InvokeVirtual => matches!(**member, Constant::MethodRef(_)),

                HandleKind::NewInvokeSpecial => {
                    matches!(**member, Constant::MethodRef(ref m) if m.name == "<init>")
                }

                // Interface-typed targets for these two kinds only appeared in class format 52
                HandleKind::InvokeStatic | HandleKind::InvokeSpecial => match **member {
                    Constant::MethodRef(_) => true,
                    Constant::InterfaceMethodRef(_) => {
                        version.major_version >= Version::JAVA8.major_version
                    }
                    _ => false,
                },

                HandleKind::InvokeInterface => {
                    matches!(**member, Constant::InterfaceMethodRef(_))
                }
            };
            if !valid {
                return Err(ContractError::InvalidMethodHandle(self.clone()).into());
            }
        }

        Ok(())
    }
}

/// Long/double-category constants occupy two consecutive pool slots, the second unusable
impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Structural equality; floats and doubles compare by bit pattern so that a pool can key on them
impl PartialEq for Constant {
    fn eq(&self, other: &Constant) -> bool {
        use Constant::*;
        match (self, other) {
            (Utf8(a), Utf8(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Long(a), Long(b)) => a == b,
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (Class(a), Class(b)) => a == b,
            (String(a), String(b)) => a == b,
            (FieldRef(a), FieldRef(b)) => a == b,
            (MethodRef(a), MethodRef(b)) => a == b,
            (InterfaceMethodRef(a), InterfaceMethodRef(b)) => a == b,
            (
                NameAndType {
                    name: n1,
                    descriptor: d1,
                },
                NameAndType {
                    name: n2,
                    descriptor: d2,
                },
            ) => n1 == n2 && d1 == d2,
            (
                MethodHandle {
                    kind: k1,
                    member: m1,
                },
                MethodHandle {
                    kind: k2,
                    member: m2,
                },
            ) => k1 == k2 && m1 == m2,
            (MethodType(a), MethodType(b)) => a == b,
            (
                Dynamic {
                    bootstrap_method: b1,
                    name: n1,
                    descriptor: d1,
                },
                Dynamic {
                    bootstrap_method: b2,
                    name: n2,
                    descriptor: d2,
                },
            ) => b1 == b2 && n1 == n2 && d1 == d2,
            (
                InvokeDynamic {
                    bootstrap_method: b1,
                    name: n1,
                    descriptor: d1,
                },
                InvokeDynamic {
                    bootstrap_method: b2,
                    name: n2,
                    descriptor: d2,
                },
            ) => b1 == b2 && n1 == n2 && d1 == d2,
            (Module(a), Module(b)) => a == b,
            (Package(a), Package(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Constant {}

impl Hash for Constant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Constant::Utf8(s)
            | Constant::Class(s)
            | Constant::String(s)
            | Constant::MethodType(s)
            | Constant::Module(s)
            | Constant::Package(s) => s.hash(state),
            Constant::Integer(i) => i.hash(state),
            Constant::Float(f) => f.to_bits().hash(state),
            Constant::Long(l) => l.hash(state),
            Constant::Double(d) => d.to_bits().hash(state),
            Constant::FieldRef(m)
            | Constant::MethodRef(m)
            | Constant::InterfaceMethodRef(m) => m.hash(state),
            Constant::NameAndType { name, descriptor } => {
                name.hash(state);
                descriptor.hash(state);
            }
            Constant::MethodHandle { kind, member } => {
                kind.hash(state);
                member.hash(state);
            }
            Constant::Dynamic {
                bootstrap_method,
                name,
                descriptor,
            }
            | Constant::InvokeDynamic {
                bootstrap_method,
                name,
                descriptor,
            } => {
                bootstrap_method.hash(state);
                name.hash(state);
                descriptor.hash(state);
            }
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Utf8(s) => write!(f, "Utf8 {:?}", s),
            Constant::Integer(i) => write!(f, "Integer {}", i),
            Constant::Float(x) => write!(f, "Float {}", x),
            Constant::Long(l) => write!(f, "Long {}", l),
            Constant::Double(d) => write!(f, "Double {}", d),
            Constant::Class(name) => write!(f, "Class {}", name),
            Constant::String(s) => write!(f, "String {:?}", s),
            Constant::FieldRef(m) => write!(f, "Fieldref {}.{}:{}", m.class, m.name, m.descriptor),
            Constant::MethodRef(m) => {
                write!(f, "Methodref {}.{}:{}", m.class, m.name, m.descriptor)
            }
            Constant::InterfaceMethodRef(m) => {
                write!(f, "InterfaceMethodref {}.{}:{}", m.class, m.name, m.descriptor)
            }
            Constant::NameAndType { name, descriptor } => {
                write!(f, "NameAndType {}:{}", name, descriptor)
            }
            Constant::MethodHandle { kind, member } => {
                write!(f, "MethodHandle {:?} {}", kind, member)
            }
            Constant::MethodType(descriptor) => write!(f, "MethodType {}", descriptor),
            Constant::Dynamic {
                bootstrap_method,
                name,
                descriptor,
            } => write!(f, "Dynamic #{} {}:{}", bootstrap_method, name, descriptor),
            Constant::InvokeDynamic {
                bootstrap_method,
                name,
                descriptor,
            } => write!(f, "InvokeDynamic #{} {}:{}", bootstrap_method, name, descriptor),
            Constant::Module(name) => write!(f, "Module {}", name),
            Constant::Package(name) => write!(f, "Package {}", name),
        }
    }
}

/// Type of method handle
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-5.html#jvms-5.4.3.5-220
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum HandleKind {
    GetField,
    GetStatic,
    PutField,
    PutStatic,
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    NewInvokeSpecial,
    InvokeInterface,
}

impl HandleKind {
    pub fn byte(self) -> u8 {
        match self {
            HandleKind::GetField => 1,
            HandleKind::GetStatic => 2,
            HandleKind::PutField => 3,
            HandleKind::PutStatic => 4,
            HandleKind::InvokeVirtual => 5,
            HandleKind::InvokeStatic => 6,
            HandleKind::InvokeSpecial => 7,
            HandleKind::NewInvokeSpecial => 8,
            HandleKind::InvokeInterface => 9,
        }
    }

    pub fn from_byte(byte: u8) -> Result<HandleKind, FormatError> {
        Ok(match byte {
            1 => HandleKind::GetField,
            2 => HandleKind::GetStatic,
            3 => HandleKind::PutField,
            4 => HandleKind::PutStatic,
            5 => HandleKind::InvokeVirtual,
            6 => HandleKind::InvokeStatic,
            7 => HandleKind::InvokeSpecial,
            8 => HandleKind::NewInvokeSpecial,
            9 => HandleKind::InvokeInterface,
            other => return Err(FormatError::BadHandleKind(other)),
        })
    }
}

/// Deduplicating two-phase constant pool
///
/// Life cycle: constants are *registered* (collected and deduplicated by structural equality,
/// with their dependents), then the pool is *frozen* (every constant gets its final 1-based
/// index), and only then can indices be asked for or the pool serialized. Registering after the
/// freeze is an error.
///
/// Freezing hands out indices ≤ 255 first to constants that were registered through
/// [`ConstantPool::register_loadable`], since those are the ones the 2-byte `ldc` form can
/// address.
pub struct ConstantPool {
    version: Version,

    /// Required set, in registration order
    pending: Vec<Constant>,
    pending_index: HashMap<Constant, usize>,

    /// Flags parallel to `pending`: constant wants an index the 1-byte `ldc` operand can reach
    compact: Vec<bool>,

    frozen: Option<FrozenPool>,
}

struct FrozenPool {
    entries: OffsetVec<Constant>,
    index_map: HashMap<Constant, u16>,
}

impl ConstantPool {
    pub fn new(version: Version) -> ConstantPool {
        ConstantPool {
            version,
            pending: Vec::new(),
            pending_index: HashMap::new(),
            compact: Vec::new(),
            frozen: None,
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.is_some()
    }

    /// Add a constant (and, recursively, everything it references) to the required set
    ///
    /// Idempotent: a structurally-equal constant is only ever entered once.
    pub fn register(&mut self, constant: &Constant) -> Result<(), Error> {
        if self.frozen.is_some() {
            return Err(ContractError::PoolFrozen.into());
        }
        if self.pending_index.contains_key(constant) {
            return Ok(());
        }
        constant.validate(self.version)?;
        for dependent in constant.dependents() {
            self.register(&dependent)?;
        }
        self.pending_index
            .insert(constant.clone(), self.pending.len());
        self.pending.push(constant.clone());
        self.compact.push(false);
        Ok(())
    }

    /// Register a constant that will be addressed by the 1-byte `ldc` operand form
    ///
    /// Category-2 constants are loaded by `ldc2_w`, whose operand is always two bytes, so they
    /// get no placement preference.
    pub fn register_loadable(&mut self, constant: &Constant) -> Result<(), Error> {
        if !constant.is_loadable() {
            return Err(ContractError::NotLoadable(constant.clone()).into());
        }
        self.register(constant)?;
        if !constant.loads_wide() {
            let idx = self.pending_index[constant];
            self.compact[idx] = true;
        }
        Ok(())
    }

    /// Assign final indices to every registered constant
    pub fn freeze(&mut self) -> Result<(), Error> {
        if self.frozen.is_some() {
            return Err(ContractError::PoolFrozen.into());
        }

        let mut entries: OffsetVec<Constant> = OffsetVec::new_starting_at(Offset(1));
        let mut index_map: HashMap<Constant, u16> = HashMap::new();

        let compact_first = self
            .pending
            .iter()
            .enumerate()
            .filter(|(i, _)| self.compact[*i])
            .chain(
                self.pending
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !self.compact[*i]),
            );
        for (_, constant) in compact_first {
            let offset = entries.push(constant.clone());
            index_map.insert(constant.clone(), offset.0 as u16);
        }

        // The serialized pool count is offset_len and must itself fit in a u16
        if entries.offset_len().0 > 0xFFFF {
            return Err(CapacityError::ConstantPoolOverflow.into());
        }

        self.frozen = Some(FrozenPool { entries, index_map });
        Ok(())
    }

    /// Final index of a registered constant; only valid once the pool is frozen
    pub fn index_of(&self, constant: &Constant) -> Result<u16, Error> {
        let frozen = self
            .frozen
            .as_ref()
            .ok_or(ContractError::PoolNotFrozen)?;
        frozen
            .index_map
            .get(constant)
            .copied()
            .ok_or_else(|| ContractError::MissingConstant(constant.clone()).into())
    }

    /// Iterate frozen entries as `(index, constant)`
    pub fn entries(&self) -> impl Iterator<Item = (u16, &Constant)> {
        self.frozen
            .iter()
            .flat_map(|frozen| frozen.entries.iter())
            .map(|(offset, _, constant)| (offset.0 as u16, constant))
    }

    /// Look up a frozen entry by pool index
    pub fn get(&self, index: u16) -> Result<&Constant, Error> {
        let frozen = self
            .frozen
            .as_ref()
            .ok_or(ContractError::PoolNotFrozen)?;
        frozen
            .entries
            .get_offset(Offset(index as usize))
            .ok_or_else(|| FormatError::BadConstantIndex(index).into())
    }

    /// Expect the entry at `index` to be a `Utf8` and return its text
    pub fn get_utf8(&self, index: u16) -> Result<&str, Error> {
        match self.get(index)? {
            Constant::Utf8(text) => Ok(text),
            _ => Err(FormatError::WrongConstantKind {
                index,
                expected: "Utf8",
            }
            .into()),
        }
    }

    /// Expect the entry at `index` to be a `Class` and return its binary name
    pub fn get_class_name(&self, index: u16) -> Result<&str, Error> {
        match self.get(index)? {
            Constant::Class(name) => Ok(name),
            _ => Err(FormatError::WrongConstantKind {
                index,
                expected: "Class",
            }
            .into()),
        }
    }

    /// Rebuild an already-frozen pool from decoded entries, preserving entry order
    ///
    /// When the input pool held structural duplicates, `index_of` answers with the first
    /// occurrence.
    pub fn from_entries(decoded: Vec<Constant>, version: Version) -> ConstantPool {
        let mut entries: OffsetVec<Constant> = OffsetVec::new_starting_at(Offset(1));
        let mut index_map: HashMap<Constant, u16> = HashMap::new();
        for constant in decoded {
            let offset = entries.push(constant.clone());
            index_map.entry(constant).or_insert(offset.0 as u16);
        }
        ConstantPool {
            version,
            pending: Vec::new(),
            pending_index: HashMap::new(),
            compact: Vec::new(),
            frozen: Some(FrozenPool { entries, index_map }),
        }
    }

    /// Write the pool (count word plus every entry) to a class-file stream
    pub fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        let frozen = self
            .frozen
            .as_ref()
            .ok_or(ContractError::PoolNotFrozen)?;
        (frozen.entries.offset_len().0 as u16)
            .serialize(writer)
            .map_err(Error::from)?;
        for (_, _, constant) in frozen.entries.iter() {
            self.serialize_constant(constant, writer)?;
        }
        Ok(())
    }

    fn serialize_constant<W: WriteBytesExt>(
        &self,
        constant: &Constant,
        writer: &mut W,
    ) -> Result<(), Error> {
        constant.tag().serialize(writer)?;
        match constant {
            Constant::Utf8(text) => {
                let buffer = encode_modified_utf8(text);
                (buffer.len() as u16).serialize(writer)?;
                writer.write_all(&buffer)?;
            }
            Constant::Integer(value) => value.serialize(writer)?,
            Constant::Float(value) => value.serialize(writer)?,
            Constant::Long(value) => value.serialize(writer)?,
            Constant::Double(value) => value.serialize(writer)?,
            Constant::Class(name) | Constant::Module(name) | Constant::Package(name) => {
                self.index_of(&Constant::Utf8(name.clone()))?.serialize(writer)?;
            }
            Constant::String(value) => {
                self.index_of(&Constant::Utf8(value.clone()))?.serialize(writer)?;
            }
            Constant::FieldRef(member)
            | Constant::MethodRef(member)
            | Constant::InterfaceMethodRef(member) => {
                self.index_of(&Constant::Class(member.class.clone()))?
                    .serialize(writer)?;
                self.index_of(&Constant::NameAndType {
                    name: member.name.clone(),
                    descriptor: member.descriptor.clone(),
                })?
                .serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                self.index_of(&Constant::Utf8(name.clone()))?.serialize(writer)?;
                self.index_of(&Constant::Utf8(descriptor.clone()))?
                    .serialize(writer)?;
            }
            Constant::MethodHandle { kind, member } => {
                kind.byte().serialize(writer)?;
                self.index_of(member)?.serialize(writer)?;
            }
            Constant::MethodType(descriptor) => {
                self.index_of(&Constant::Utf8(descriptor.clone()))?
                    .serialize(writer)?;
            }
            Constant::Dynamic {
                bootstrap_method,
                name,
                descriptor,
            }
            | Constant::InvokeDynamic {
                bootstrap_method,
                name,
                descriptor,
            } => {
                bootstrap_method.serialize(writer)?;
                self.index_of(&Constant::NameAndType {
                    name: name.clone(),
                    descriptor: descriptor.clone(),
                })?
                .serialize(writer)?;
            }
        }
        Ok(())
    }

    /// Read a pool (count word plus entries) from a class-file stream
    pub fn deserialize<R: ReadBytesExt>(
        reader: &mut R,
        version: Version,
    ) -> Result<ConstantPool, Error> {
        let count = u16::deserialize(reader)? as usize;
        let mut raw: Vec<Option<RawConstant>> = vec![None; count.max(1)];

        let mut slot = 1;
        while slot < count {
            let entry = RawConstant::deserialize(reader)?;
            let wide = entry.is_wide();
            raw[slot] = Some(entry);
            slot += if wide { 2 } else { 1 };
        }
        if slot != count {
            // A long/double in the final slot claimed the nonexistent one after it
            return Err(FormatError::BadConstantIndex(count as u16).into());
        }

        let mut cache: Vec<Option<Constant>> = vec![None; count];
        let mut resolving = vec![false; count];
        let mut decoded = Vec::new();
        for index in 1..count {
            if raw[index].is_some() {
                decoded.push(resolve_constant(
                    index as u16,
                    &raw,
                    &mut cache,
                    &mut resolving,
                )?);
            }
        }

        Ok(ConstantPool::from_entries(decoded, version))
    }
}

/// Pool entry as read off disk, cross-references still unresolved indices
#[derive(Clone, Debug)]
enum RawConstant {
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    String(u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    InterfaceMethodRef(u16, u16),
    NameAndType(u16, u16),
    MethodHandle(u8, u16),
    MethodType(u16),
    Dynamic(u16, u16),
    InvokeDynamic(u16, u16),
    Module(u16),
    Package(u16),
}

impl RawConstant {
    fn is_wide(&self) -> bool {
        matches!(self, RawConstant::Long(_) | RawConstant::Double(_))
    }

    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<RawConstant, Error> {
        let tag = u8::deserialize(reader)?;
        Ok(match tag {
            1 => {
                let length = u16::deserialize(reader)? as usize;
                let mut bytes = vec![0u8; length];
                reader.read_exact(&mut bytes)?;
                RawConstant::Utf8(decode_modified_utf8(&bytes)?)
            }
            3 => RawConstant::Integer(i32::deserialize(reader)?),
            4 => RawConstant::Float(f32::deserialize(reader)?),
            5 => RawConstant::Long(i64::deserialize(reader)?),
            6 => RawConstant::Double(f64::deserialize(reader)?),
            7 => RawConstant::Class(u16::deserialize(reader)?),
            8 => RawConstant::String(u16::deserialize(reader)?),
            9 => RawConstant::FieldRef(u16::deserialize(reader)?, u16::deserialize(reader)?),
            10 => RawConstant::MethodRef(u16::deserialize(reader)?, u16::deserialize(reader)?),
            11 => RawConstant::InterfaceMethodRef(
                u16::deserialize(reader)?,
                u16::deserialize(reader)?,
            ),
            12 => RawConstant::NameAndType(u16::deserialize(reader)?, u16::deserialize(reader)?),
            15 => RawConstant::MethodHandle(u8::deserialize(reader)?, u16::deserialize(reader)?),
            16 => RawConstant::MethodType(u16::deserialize(reader)?),
            17 => RawConstant::Dynamic(u16::deserialize(reader)?, u16::deserialize(reader)?),
            18 => {
                RawConstant::InvokeDynamic(u16::deserialize(reader)?, u16::deserialize(reader)?)
            }
            19 => RawConstant::Module(u16::deserialize(reader)?),
            20 => RawConstant::Package(u16::deserialize(reader)?),
            other => return Err(FormatError::UnknownConstantTag(other).into()),
        })
    }
}

fn resolve_constant(
    index: u16,
    raw: &[Option<RawConstant>],
    cache: &mut Vec<Option<Constant>>,
    resolving: &mut Vec<bool>,
) -> Result<Constant, Error> {
    let slot = index as usize;
    let entry = raw
        .get(slot)
        .and_then(|c| c.as_ref())
        .ok_or(FormatError::BadConstantIndex(index))?;
    if let Some(cached) = &cache[slot] {
        return Ok(cached.clone());
    }
    if resolving[slot] {
        // Reference cycle; a well-formed pool bottoms out in Utf8 entries
        return Err(FormatError::BadConstantIndex(index).into());
    }
    resolving[slot] = true;

    let utf8_at = |i: u16, cache: &mut Vec<Option<Constant>>, resolving: &mut Vec<bool>| {
        match resolve_constant(i, raw, cache, resolving)? {
            Constant::Utf8(text) => Ok(text),
            _ => Err(Error::from(FormatError::WrongConstantKind {
                index: i,
                expected: "Utf8",
            })),
        }
    };
    let class_at = |i: u16, cache: &mut Vec<Option<Constant>>, resolving: &mut Vec<bool>| {
        match resolve_constant(i, raw, cache, resolving)? {
            Constant::Class(name) => Ok(name),
            _ => Err(Error::from(FormatError::WrongConstantKind {
                index: i,
                expected: "Class",
            })),
        }
    };
    let name_and_type_at =
        |i: u16, cache: &mut Vec<Option<Constant>>, resolving: &mut Vec<bool>| {
            match resolve_constant(i, raw, cache, resolving)? {
                Constant::NameAndType { name, descriptor } => Ok((name, descriptor)),
                _ => Err(Error::from(FormatError::WrongConstantKind {
                    index: i,
                    expected: "NameAndType",
                })),
            }
        };
    let member_at = |class: u16,
                     nat: u16,
                     cache: &mut Vec<Option<Constant>>,
                     resolving: &mut Vec<bool>| {
        let class = class_at(class, cache, resolving)?;
        let (name, descriptor) = name_and_type_at(nat, cache, resolving)?;
        Ok::<MemberRef, Error>(MemberRef {
            class,
            name,
            descriptor,
        })
    };

    let constant = match entry.clone() {
        RawConstant::Utf8(text) => Constant::Utf8(text),
        RawConstant::Integer(value) => Constant::Integer(value),
        RawConstant::Float(value) => Constant::Float(value),
        RawConstant::Long(value) => Constant::Long(value),
        RawConstant::Double(value) => Constant::Double(value),
        RawConstant::Class(name) => Constant::Class(utf8_at(name, cache, resolving)?),
        RawConstant::String(value) => Constant::String(utf8_at(value, cache, resolving)?),
        RawConstant::FieldRef(class, nat) => {
            Constant::FieldRef(member_at(class, nat, cache, resolving)?)
        }
        RawConstant::MethodRef(class, nat) => {
            Constant::MethodRef(member_at(class, nat, cache, resolving)?)
        }
        RawConstant::InterfaceMethodRef(class, nat) => {
            Constant::InterfaceMethodRef(member_at(class, nat, cache, resolving)?)
        }
        RawConstant::NameAndType(name, descriptor) => Constant::NameAndType {
            name: utf8_at(name, cache, resolving)?,
            descriptor: utf8_at(descriptor, cache, resolving)?,
        },
        RawConstant::MethodHandle(kind, member) => {
            let member = resolve_constant(member, raw, cache, resolving)?;
            match member {
                Constant::FieldRef(_)
                | Constant::MethodRef(_)
                | Constant::InterfaceMethodRef(_) => Constant::MethodHandle {
                    kind: HandleKind::from_byte(kind)?,
                    member: Box::new(member),
                },
                _ => {
                    return Err(FormatError::WrongConstantKind {
                        index,
                        expected: "Fieldref/Methodref/InterfaceMethodref",
                    }
                    .into())
                }
            }
        }
        RawConstant::MethodType(descriptor) => {
            Constant::MethodType(utf8_at(descriptor, cache, resolving)?)
        }
        RawConstant::Dynamic(bootstrap_method, nat) => {
            let (name, descriptor) = name_and_type_at(nat, cache, resolving)?;
            Constant::Dynamic {
                bootstrap_method,
                name,
                descriptor,
            }
        }
        RawConstant::InvokeDynamic(bootstrap_method, nat) => {
            let (name, descriptor) = name_and_type_at(nat, cache, resolving)?;
            Constant::InvokeDynamic {
                bootstrap_method,
                name,
                descriptor,
            }
        }
        RawConstant::Module(name) => Constant::Module(utf8_at(name, cache, resolving)?),
        RawConstant::Package(name) => Constant::Package(utf8_at(name, cache, resolving)?),
    };

    resolving[slot] = false;
    cache[slot] = Some(constant.clone());
    Ok(constant)
}

/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. Quoting from that section:
///
/// > The differences between this format and the standard UTF-8 format are the following:
/// >
/// >  * The null byte `\u0000` is encoded in 2-byte format rather than 1-byte, so that the encoded
/// >    strings never have embedded nulls.
/// >  * Only the 1-byte, 2-byte, and 3-byte formats are used.
/// >  * Supplementary characters are represented in the form of surrogate pairs.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = vec![];
    for c in string.chars() {
        // Handle the exception for how `\u{0000}` is represented
        let len: usize = if c == '\u{0000}' { 2 } else { c.len_utf8() };
        let code: u32 = c as u32;

        match len {
            1 => buffer.push(code as u8),
            2 => {
                buffer.push((code >> 6 & 0x1F) as u8 | 0b1100_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
            3 => {
                buffer.push((code >> 12 & 0x0F) as u8 | 0b1110_0000);
                buffer.push((code >> 6 & 0x3F) as u8 | 0b1000_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }

            // Supplementary characters: main divergence from unicode
            _ => {
                let code = code - 0x10000;
                let high = 0xD800 + (code >> 10);
                let low = 0xDC00 + (code & 0x3FF);
                for surrogate in [high, low] {
                    buffer.push((surrogate >> 12 & 0x0F) as u8 | 0b1110_0000);
                    buffer.push((surrogate >> 6 & 0x3F) as u8 | 0b1000_0000);
                    buffer.push((surrogate & 0x3F) as u8 | 0b1000_0000);
                }
            }
        }
    }
    buffer
}

/// Inverse of [`encode_modified_utf8`]
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String, FormatError> {
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;

    // Decode one 1-3 byte group into a code unit
    fn code_unit(bytes: &[u8], i: &mut usize) -> Result<u32, FormatError> {
        let b0 = *bytes.get(*i).ok_or(FormatError::BadUtf8)? as u32;
        let continuation = |offset: usize| -> Result<u32, FormatError> {
            let b = *bytes.get(*i + offset).ok_or(FormatError::BadUtf8)? as u32;
            if b & 0xC0 != 0x80 {
                return Err(FormatError::BadUtf8);
            }
            Ok(b & 0x3F)
        };
        if b0 & 0x80 == 0 {
            if b0 == 0 {
                // Embedded nulls are exactly what this format exists to avoid
                return Err(FormatError::BadUtf8);
            }
            *i += 1;
            Ok(b0)
        } else if b0 & 0xE0 == 0xC0 {
            let unit = (b0 & 0x1F) << 6 | continuation(1)?;
            *i += 2;
            Ok(unit)
        } else if b0 & 0xF0 == 0xE0 {
            let unit = (b0 & 0x0F) << 12 | continuation(1)? << 6 | continuation(2)?;
            *i += 3;
            Ok(unit)
        } else {
            Err(FormatError::BadUtf8)
        }
    }

    while i < bytes.len() {
        let unit = code_unit(bytes, &mut i)?;
        let scalar = if (0xD800..=0xDBFF).contains(&unit) {
            // High surrogate must pair with an immediately following low surrogate
            let low = code_unit(bytes, &mut i)?;
            if !(0xDC00..=0xDFFF).contains(&low) {
                return Err(FormatError::BadUtf8);
            }
            0x10000 + ((unit - 0xD800) << 10) + (low - 0xDC00)
        } else {
            unit
        };
        out.push(char::from_u32(scalar).ok_or(FormatError::BadUtf8)?);
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    fn utf8(text: &str) -> Constant {
        Constant::Utf8(text.to_string())
    }

    #[test]
    fn structurally_equal_constants_share_one_entry() {
        let mut pool = ConstantPool::new(Version::JAVA8);
        pool.register(&utf8("foo")).unwrap();
        pool.register(&utf8("foo")).unwrap();
        pool.register(&utf8("bar")).unwrap();
        pool.freeze().unwrap();

        assert_eq!(
            pool.index_of(&utf8("foo")).unwrap(),
            pool.index_of(&utf8("foo")).unwrap()
        );
        assert_eq!(pool.entries().count(), 2);
    }

    #[test]
    fn dependents_registered_recursively() {
        let mut pool = ConstantPool::new(Version::JAVA8);
        let field = Constant::FieldRef(MemberRef {
            class: "Foo".to_string(),
            name: "x".to_string(),
            descriptor: "I".to_string(),
        });
        pool.register(&field).unwrap();
        pool.freeze().unwrap();

        pool.index_of(&field).unwrap();
        pool.index_of(&Constant::Class("Foo".to_string())).unwrap();
        pool.index_of(&Constant::NameAndType {
            name: "x".to_string(),
            descriptor: "I".to_string(),
        })
        .unwrap();
        pool.index_of(&utf8("Foo")).unwrap();
        pool.index_of(&utf8("x")).unwrap();
        pool.index_of(&utf8("I")).unwrap();
    }

    #[test]
    fn two_equal_member_refs_resolve_to_same_index() {
        let member = MemberRef {
            class: "Foo".to_string(),
            name: "f".to_string(),
            descriptor: "()V".to_string(),
        };
        let mut pool = ConstantPool::new(Version::JAVA8);
        pool.register(&Constant::MethodRef(member.clone())).unwrap();
        pool.register(&Constant::MethodRef(member.clone())).unwrap();
        pool.freeze().unwrap();
        assert_eq!(
            pool.entries()
                .filter(|(_, c)| matches!(c, Constant::MethodRef(_)))
                .count(),
            1
        );
    }

    #[test]
    fn loadable_constants_get_low_indices() {
        let mut pool = ConstantPool::new(Version::JAVA8);
        // Something registered earlier that has no compact preference
        pool.register(&utf8("SourceFile")).unwrap();
        pool.register(&Constant::String("hello".to_string())).unwrap();
        pool.register_loadable(&Constant::Integer(100_000)).unwrap();
        pool.freeze().unwrap();

        let int_index = pool.index_of(&Constant::Integer(100_000)).unwrap();
        let plain_index = pool.index_of(&utf8("SourceFile")).unwrap();
        assert_eq!(int_index, 1);
        assert!(plain_index > int_index);
    }

    #[test]
    fn long_and_double_occupy_two_slots() {
        let mut pool = ConstantPool::new(Version::JAVA8);
        pool.register(&Constant::Long(7)).unwrap();
        pool.register(&Constant::Integer(1)).unwrap();
        pool.freeze().unwrap();

        assert_eq!(pool.index_of(&Constant::Long(7)).unwrap(), 1);
        assert_eq!(pool.index_of(&Constant::Integer(1)).unwrap(), 3);
    }

    #[test]
    fn register_after_freeze_is_an_error() {
        let mut pool = ConstantPool::new(Version::JAVA8);
        pool.register(&utf8("a")).unwrap();
        pool.freeze().unwrap();
        match pool.register(&utf8("b")) {
            Err(Error::Contract(ContractError::PoolFrozen)) => {}
            other => panic!("expected PoolFrozen, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn version_gates_enforced() {
        let mut pool = ConstantPool::new(Version::JAVA6);
        let err = pool.register(&Constant::MethodType("()V".to_string()));
        assert!(matches!(
            err,
            Err(Error::Contract(ContractError::ConstantVersion { .. }))
        ));
    }

    #[test]
    fn method_handle_kind_must_match_member() {
        let mut pool = ConstantPool::new(Version::JAVA8);
        let bogus = Constant::MethodHandle {
            kind: HandleKind::GetField,
            member: Box::new(Constant::MethodRef(MemberRef {
                class: "Foo".to_string(),
                name: "f".to_string(),
                descriptor: "()V".to_string(),
            })),
        };
        assert!(matches!(
            pool.register(&bogus),
            Err(Error::Contract(ContractError::InvalidMethodHandle(_)))
        ));
    }

    #[test]
    fn pool_round_trips_through_bytes() {
        let mut pool = ConstantPool::new(Version::JAVA8);
        pool.register(&Constant::String("hi".to_string())).unwrap();
        pool.register(&Constant::Long(1 << 40)).unwrap();
        pool.register(&Constant::Double(2.5)).unwrap();
        pool.register(&Constant::MethodRef(MemberRef {
            class: "java/lang/Object".to_string(),
            name: "<init>".to_string(),
            descriptor: "()V".to_string(),
        }))
        .unwrap();
        pool.freeze().unwrap();

        let mut bytes = vec![];
        pool.serialize(&mut bytes).unwrap();
        let decoded =
            ConstantPool::deserialize(&mut std::io::Cursor::new(&bytes), Version::JAVA8).unwrap();

        let original: Vec<(u16, Constant)> =
            pool.entries().map(|(i, c)| (i, c.clone())).collect();
        let reread: Vec<(u16, Constant)> =
            decoded.entries().map(|(i, c)| (i, c.clone())).collect();
        assert_eq!(original, reread);

        // And the re-serialized bytes are identical
        let mut bytes2 = vec![];
        decoded.serialize(&mut bytes2).unwrap();
        assert_eq!(bytes, bytes2);
    }
}

#[cfg(test)]
mod modified_utf8_tests {
    use super::*;

    #[test]
    fn containing_null_byte() {
        assert_eq!(encode_modified_utf8("a\x00a"), vec![97, 192, 128, 97]);
        assert_eq!(
            decode_modified_utf8(&[97, 192, 128, 97]).unwrap(),
            "a\x00a"
        );
    }

    #[test]
    fn simple_ascii() {
        assert_eq!(encode_modified_utf8("foo"), vec![102, 111, 111]);
        assert_eq!(decode_modified_utf8(&[102, 111, 111]).unwrap(), "foo");
    }

    #[test]
    fn two_and_three_byte_encodings_round_trip() {
        for text in ["ĄǍǞǠǺȀȂȦȺӐӒ", "ऄअॲঅਅઅଅஅఅಅഅะະ༁ཨ"] {
            assert_eq!(decode_modified_utf8(&encode_modified_utf8(text)).unwrap(), text);
        }
    }

    #[test]
    fn supplementary_characters() {
        let text = "\u{10000}\u{dffff}\u{10FFFF}";
        let encoded = encode_modified_utf8(text);
        // Each supplementary character takes a 6-byte surrogate pair encoding
        assert_eq!(encoded.len(), 18);
        assert_eq!(decode_modified_utf8(&encoded).unwrap(), text);
    }

    #[test]
    fn rejects_embedded_null_and_truncation() {
        assert!(decode_modified_utf8(&[0]).is_err());
        assert!(decode_modified_utf8(&[0xC0]).is_err());
        assert!(decode_modified_utf8(&[0xED, 0xA0, 0x80]).is_err()); // unpaired high surrogate
    }
}
