use crate::jvm::class_file::{Attribute, AttributeLike, ClassFile, SourceFile};
use crate::jvm::code::AssembleOptions;
use crate::jvm::model::{Field, Method};
use crate::jvm::{ClassAccessFlags, Constant, ConstantPool, Error, Version};

/// Semantic representation of a class
///
/// Everything is held by name; [`Class::assemble`] runs the full pipeline (register constants,
/// freeze the pool, verify and lay out every method body, emit) and produces the index-resolved
/// [`ClassFile`].
pub struct Class {
    pub version: Version,
    pub access_flags: ClassAccessFlags,

    /// Binary name, eg. `foo/bar/Baz`
    pub name: String,

    /// Binary name of the superclass; `None` only for `java/lang/Object` itself
    pub super_class: Option<String>,

    pub interfaces: Vec<String>,
    pub source_file: Option<String>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
}

impl Class {
    pub fn new(
        name: &str,
        super_class: &str,
        access_flags: ClassAccessFlags,
        version: Version,
    ) -> Class {
        Class {
            version,
            access_flags,
            name: name.to_string(),
            super_class: Some(super_class.to_string()),
            interfaces: vec![],
            source_file: None,
            fields: vec![],
            methods: vec![],
        }
    }

    /// Add a field to the class
    pub fn add_field(&mut self, field: Field) {
        self.fields.push(field);
    }

    /// Add a method to the class
    pub fn add_method(&mut self, method: Method) {
        self.methods.push(method);
    }

    /// Run the whole assembly pipeline and produce the serialized view
    pub fn assemble(&self, options: &AssembleOptions) -> Result<ClassFile, Error> {
        // Registration pass over every structure that will reference the pool
        let mut pool = ConstantPool::new(self.version);
        pool.register(&Constant::Class(self.name.clone()))?;
        if let Some(super_class) = &self.super_class {
            pool.register(&Constant::Class(super_class.clone()))?;
        }
        for interface in &self.interfaces {
            pool.register(&Constant::Class(interface.clone()))?;
        }
        for field in &self.fields {
            field.register_constants(&mut pool)?;
        }
        for method in &self.methods {
            method.register_constants(&mut pool)?;
        }
        if let Some(source_file) = &self.source_file {
            pool.register(&Constant::Utf8(source_file.clone()))?;
            pool.register(&Constant::Utf8(SourceFile::NAME.to_string()))?;
        }
        pool.freeze()?;

        let fields = self
            .fields
            .iter()
            .map(|field| field.assemble(&pool))
            .collect::<Result<_, _>>()?;
        let methods = self
            .methods
            .iter()
            .map(|method| method.assemble(&pool, options))
            .collect::<Result<_, _>>()?;

        let mut attributes = vec![];
        if let Some(source_file) = &self.source_file {
            let index = pool.index_of(&Constant::Utf8(source_file.clone()))?;
            attributes.push(Attribute::wrap(&pool, &SourceFile(index))?);
        }

        let this_class = pool.index_of(&Constant::Class(self.name.clone()))?;
        let super_class = match &self.super_class {
            Some(super_class) => pool.index_of(&Constant::Class(super_class.clone()))?,
            None => 0,
        };
        let interfaces = self
            .interfaces
            .iter()
            .map(|interface| pool.index_of(&Constant::Class(interface.clone())))
            .collect::<Result<_, _>>()?;

        Ok(ClassFile {
            version: self.version,
            pool,
            access_flags: self.access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }
}
