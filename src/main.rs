use jasm::jvm;
use jasm::jvm::class_file::{ClassFile, Code, ConstantValue, SourceFile};
use jasm::jvm::code;

use clap::{App, Arg};

fn main() -> Result<(), jvm::Error> {
    env_logger::init();

    let matches = App::new("jasm")
        .version("0.1.0")
        .about("Disassembles JVM class files into a readable listing")
        .arg(
            Arg::with_name("INPUT")
                .help("Sets the input class file to use")
                .required(true)
                .index(1),
        )
        .get_matches();

    let class_path = matches.value_of("INPUT").unwrap();
    log::info!("Reading '{}'", class_path);
    let class = ClassFile::load_from_path(class_path)?;
    dump(&class)
}

fn dump(class: &ClassFile) -> Result<(), jvm::Error> {
    let pool = &class.pool;

    println!(
        "class {} (version {}.{})",
        pool.get_class_name(class.this_class)?,
        class.version.major_version,
        class.version.minor_version,
    );
    if class.super_class != 0 {
        println!("  extends {}", pool.get_class_name(class.super_class)?);
    }
    for interface in &class.interfaces {
        println!("  implements {}", pool.get_class_name(*interface)?);
    }
    println!("  flags: {:?}", class.access_flags);
    for attribute in &class.attributes {
        if let Some(SourceFile(index)) = attribute.decode_as::<SourceFile>(pool)? {
            println!("  source: {}", pool.get_utf8(index)?);
        }
    }

    println!();
    println!("constant pool:");
    for (index, constant) in pool.entries() {
        println!("  #{} = {}", index, constant);
    }

    if !class.fields.is_empty() {
        println!();
        println!("fields:");
    }
    for field in &class.fields {
        println!(
            "  {}: {} ({:?})",
            pool.get_utf8(field.name_index)?,
            pool.get_utf8(field.descriptor_index)?,
            field.access_flags,
        );
        for attribute in &field.attributes {
            if let Some(ConstantValue(index)) = attribute.decode_as::<ConstantValue>(pool)? {
                println!("    value: {}", pool.get(index)?);
            }
        }
    }

    if !class.methods.is_empty() {
        println!();
        println!("methods:");
    }
    for method in &class.methods {
        println!(
            "  {}{} ({:?})",
            pool.get_utf8(method.name_index)?,
            pool.get_utf8(method.descriptor_index)?,
            method.access_flags,
        );
        for attribute in &method.attributes {
            let code_attr = match attribute.decode_as::<Code>(pool)? {
                Some(code_attr) => code_attr,
                None => continue,
            };
            println!(
                "    max_stack={} max_locals={}",
                code_attr.max_stack, code_attr.max_locals,
            );
            for (offset, text) in code::listing(&code_attr.code, pool)? {
                println!("    {:>6}: {}", offset, text);
            }
            if !code_attr.exception_table.is_empty() {
                println!("    exception table:");
            }
            for row in &code_attr.exception_table {
                let caught = if row.catch_type == 0 {
                    "any"
                } else {
                    pool.get_class_name(row.catch_type)?
                };
                println!(
                    "      [{}, {}) -> {} catching {}",
                    row.start_pc, row.end_pc, row.handler_pc, caught,
                );
            }
        }
    }

    Ok(())
}
