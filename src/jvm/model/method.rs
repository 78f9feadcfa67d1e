use crate::jvm::class_file;
use crate::jvm::class_file::{
    Attribute, AttributeLike, Code, ExceptionHandler, Exceptions, LineNumber, LineNumberTable,
    LocalVariable, LocalVariableTable, Signature,
};
use crate::jvm::code::{AssembleOptions, CodeBody};
use crate::jvm::{Constant, ConstantPool, Error, MethodAccessFlags};

/// Semantic representation of a method: a [`CodeBody`] plus everything around it
pub struct Method {
    pub access_flags: MethodAccessFlags,
    pub name: String,
    pub descriptor: String,

    /// Absent for `abstract` and `native` methods
    pub code: Option<CodeBody>,

    /// Classes in the `throws` clause
    pub exceptions: Vec<String>,

    pub generic_signature: Option<String>,
}

impl Method {
    pub fn new(name: &str, descriptor: &str, access_flags: MethodAccessFlags) -> Method {
        Method {
            access_flags,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            code: None,
            exceptions: vec![],
            generic_signature: None,
        }
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    pub(crate) fn register_constants(&self, pool: &mut ConstantPool) -> Result<(), Error> {
        pool.register(&Constant::Utf8(self.name.clone()))?;
        pool.register(&Constant::Utf8(self.descriptor.clone()))?;

        if let Some(body) = &self.code {
            pool.register(&Constant::Utf8(Code::NAME.to_string()))?;
            body.register_constants(pool)?;

            if body.tracks_lines() {
                pool.register(&Constant::Utf8(LineNumberTable::NAME.to_string()))?;
            }
            let mut any_debug = false;
            for decl in body.variables() {
                if let Some(debug) = &decl.debug {
                    pool.register(&Constant::Utf8(debug.name.clone()))?;
                    pool.register(&Constant::Utf8(debug.descriptor.clone()))?;
                    any_debug = true;
                }
            }
            if any_debug {
                pool.register(&Constant::Utf8(LocalVariableTable::NAME.to_string()))?;
            }
        }

        if !self.exceptions.is_empty() {
            pool.register(&Constant::Utf8(Exceptions::NAME.to_string()))?;
            for class in &self.exceptions {
                pool.register(&Constant::Class(class.clone()))?;
            }
        }
        if let Some(signature) = &self.generic_signature {
            pool.register(&Constant::Utf8(signature.clone()))?;
            pool.register(&Constant::Utf8(Signature::NAME.to_string()))?;
        }
        Ok(())
    }

    pub(crate) fn assemble(
        &self,
        pool: &ConstantPool,
        options: &AssembleOptions,
    ) -> Result<class_file::Method, Error> {
        let mut attributes = vec![];

        if let Some(body) = &self.code {
            let output = body.assemble(&self.descriptor, self.is_static(), pool, options)?;

            let exception_table = output
                .exception_table
                .iter()
                .map(|row| -> Result<ExceptionHandler, Error> {
                    let catch_type = match &row.class {
                        Some(class) => pool.index_of(&Constant::Class(class.clone()))?,
                        None => 0,
                    };
                    Ok(ExceptionHandler {
                        start_pc: row.start,
                        end_pc: row.end,
                        handler_pc: row.handler,
                        catch_type,
                    })
                })
                .collect::<Result<_, _>>()?;

            let mut nested = vec![];
            if !output.line_numbers.is_empty() {
                let rows = output
                    .line_numbers
                    .iter()
                    .map(|(start_pc, line_number)| LineNumber {
                        start_pc: *start_pc,
                        line_number: *line_number,
                    })
                    .collect();
                nested.push(Attribute::wrap(pool, &LineNumberTable(rows))?);
            }
            if !output.local_vars.is_empty() {
                let rows = output
                    .local_vars
                    .iter()
                    .map(|row| -> Result<LocalVariable, Error> {
                        Ok(LocalVariable {
                            start_pc: row.start,
                            length: row.length,
                            name_index: pool.index_of(&Constant::Utf8(row.name.clone()))?,
                            descriptor_index: pool
                                .index_of(&Constant::Utf8(row.descriptor.clone()))?,
                            index: row.slot,
                        })
                    })
                    .collect::<Result<_, _>>()?;
                nested.push(Attribute::wrap(pool, &LocalVariableTable(rows))?);
            }

            attributes.push(Attribute::wrap(
                pool,
                &Code {
                    max_stack: output.max_stack,
                    max_locals: output.max_locals,
                    code: output.bytes,
                    exception_table,
                    attributes: nested,
                },
            )?);
        }

        if !self.exceptions.is_empty() {
            let indices = self
                .exceptions
                .iter()
                .map(|class| pool.index_of(&Constant::Class(class.clone())))
                .collect::<Result<_, _>>()?;
            attributes.push(Attribute::wrap(pool, &Exceptions(indices))?);
        }
        if let Some(signature) = &self.generic_signature {
            let index = pool.index_of(&Constant::Utf8(signature.clone()))?;
            attributes.push(Attribute::wrap(pool, &Signature(index))?);
        }

        Ok(class_file::Method {
            access_flags: self.access_flags,
            name_index: pool.index_of(&Constant::Utf8(self.name.clone()))?,
            descriptor_index: pool.index_of(&Constant::Utf8(self.descriptor.clone()))?,
            attributes,
        })
    }
}
