use crate::jvm::class_file;
use crate::jvm::class_file::{Attribute, AttributeLike, ConstantValue, Signature};
use crate::jvm::{Constant, ConstantPool, Error, FieldAccessFlags};

/// Semantic representation of a field, names still as strings
pub struct Field {
    pub access_flags: FieldAccessFlags,
    pub name: String,
    pub descriptor: String,

    /// Initial value, for `static final` primitive and `String` fields
    pub constant_value: Option<Constant>,

    pub generic_signature: Option<String>,
}

impl Field {
    pub fn new(name: &str, descriptor: &str, access_flags: FieldAccessFlags) -> Field {
        Field {
            access_flags,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            constant_value: None,
            generic_signature: None,
        }
    }

    pub(crate) fn register_constants(&self, pool: &mut ConstantPool) -> Result<(), Error> {
        pool.register(&Constant::Utf8(self.name.clone()))?;
        pool.register(&Constant::Utf8(self.descriptor.clone()))?;
        if let Some(value) = &self.constant_value {
            pool.register(value)?;
            pool.register(&Constant::Utf8(ConstantValue::NAME.to_string()))?;
        }
        if let Some(signature) = &self.generic_signature {
            pool.register(&Constant::Utf8(signature.clone()))?;
            pool.register(&Constant::Utf8(Signature::NAME.to_string()))?;
        }
        Ok(())
    }

    pub(crate) fn assemble(&self, pool: &ConstantPool) -> Result<class_file::Field, Error> {
        let mut attributes = vec![];
        if let Some(value) = &self.constant_value {
            attributes.push(Attribute::wrap(pool, &ConstantValue(pool.index_of(value)?))?);
        }
        if let Some(signature) = &self.generic_signature {
            let index = pool.index_of(&Constant::Utf8(signature.clone()))?;
            attributes.push(Attribute::wrap(pool, &Signature(index))?);
        }
        Ok(class_file::Field {
            access_flags: self.access_flags,
            name_index: pool.index_of(&Constant::Utf8(self.name.clone()))?,
            descriptor_index: pool.index_of(&Constant::Utf8(self.descriptor.clone()))?,
            attributes,
        })
    }
}
