//! Assembler and disassembler for JVM class files
//!
//! ### Simple example
//!
//! Consider the following simple Java class:
//!
//! ```java,ignore,no_run
//! public class Point {
//!     public final int x;
//!     public final int y;
//!
//!     public Point(int x, int y) {
//!         this.x = x;
//!         this.y = y;
//!     }
//! }
//! ```
//!
//! Generating an analogous class file can be done as follows:
//!
//! ```
//! use jasm::jvm::code::{AssembleOptions, CodeBody, Instruction, VarKind};
//! use jasm::jvm::model::{Class, Field, Method};
//! use jasm::jvm::{
//!     ClassAccessFlags, Error, FieldAccessFlags, MemberRef, MethodAccessFlags, Version,
//! };
//!
//! # fn generate_class() -> Result<(), Error> {
//! let mut class = Class::new(
//!     "me/alec/Point",
//!     "java/lang/Object",
//!     ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
//!     Version::JAVA8,
//! );
//!
//! // Add the fields to the class
//! class.add_field(Field::new(
//!     "x",
//!     "I",
//!     FieldAccessFlags::PUBLIC | FieldAccessFlags::FINAL,
//! ));
//! class.add_field(Field::new(
//!     "y",
//!     "I",
//!     FieldAccessFlags::PUBLIC | FieldAccessFlags::FINAL,
//! ));
//!
//! // Generate the constructor method body
//! let mut code = CodeBody::new();
//! code.begin()?;
//! let this = code.declare(VarKind::Reference, None)?;
//! let x = code.declare(VarKind::Int, None)?;
//! let y = code.declare(VarKind::Int, None)?;
//! code.push(Instruction::Load(this))?;
//! code.push(Instruction::InvokeSpecial(MemberRef {
//!     class: "java/lang/Object".to_string(),
//!     name: "<init>".to_string(),
//!     descriptor: "()V".to_string(),
//! }))?;
//! code.push(Instruction::Load(this))?;
//! code.push(Instruction::Load(x))?;
//! code.push(Instruction::PutField(MemberRef {
//!     class: "me/alec/Point".to_string(),
//!     name: "x".to_string(),
//!     descriptor: "I".to_string(),
//! }))?;
//! code.push(Instruction::Load(this))?;
//! code.push(Instruction::Load(y))?;
//! code.push(Instruction::PutField(MemberRef {
//!     class: "me/alec/Point".to_string(),
//!     name: "y".to_string(),
//!     descriptor: "I".to_string(),
//! }))?;
//! code.push(Instruction::Return)?;
//! code.end()?;
//!
//! // Add the constructor method to the class
//! let mut constructor = Method::new("<init>", "(II)V", MethodAccessFlags::PUBLIC);
//! constructor.code = Some(code);
//! class.add_method(constructor);
//!
//! // Finally, encode the class into bytes
//! let class_file = class.assemble(&AssembleOptions::default())?;
//! let mut class_bytes: Vec<u8> = vec![];
//! class_file.serialize(&mut class_bytes)?;
//! # Ok(())
//! # }
//! # generate_class().unwrap();
//! ```

pub mod jvm;
pub mod util;
