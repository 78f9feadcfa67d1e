//! Just enough descriptor parsing to answer width questions
//!
//! Stack-effect computation and local-slot allocation only need to know how many operand words a
//! field type occupies, never its full structure, so descriptors stay as strings everywhere else
//! in the crate.

use super::ContractError;

/// Number of operand-stack or local-variable words a field type occupies (`long`/`double` = 2)
pub fn field_width(descriptor: &str) -> Result<u16, ContractError> {
    let mut chars = descriptor.chars();
    let width = single_type_width(&mut chars)?;
    if chars.next().is_some() {
        return Err(ContractError::BadDescriptor(descriptor.to_string()));
    }
    Ok(width)
}

/// Argument words consumed and return words produced by a method descriptor
pub fn method_widths(descriptor: &str) -> Result<(u16, u16), ContractError> {
    let bad = || ContractError::BadDescriptor(descriptor.to_string());

    let mut chars = descriptor.chars();
    if chars.next() != Some('(') {
        return Err(bad());
    }

    let mut arg_words: u16 = 0;
    loop {
        match chars.clone().next() {
            Some(')') => {
                chars.next();
                break;
            }
            Some(_) => {
                arg_words = arg_words
                    .checked_add(single_type_width(&mut chars).map_err(|_| bad())?)
                    .ok_or_else(bad)?
            }
            None => return Err(bad()),
        }
    }

    let ret_words = if chars.clone().next() == Some('V') {
        chars.next();
        0
    } else {
        single_type_width(&mut chars).map_err(|_| bad())?
    };
    if chars.next().is_some() {
        return Err(bad());
    }

    Ok((arg_words, ret_words))
}

/// Net stack effect of invoking a method with this descriptor
pub fn invoke_effect(descriptor: &str, has_receiver: bool) -> Result<i32, ContractError> {
    let (arg_words, ret_words) = method_widths(descriptor)?;
    let receiver = if has_receiver { 1 } else { 0 };
    Ok(ret_words as i32 - arg_words as i32 - receiver)
}

/// Number of local-variable slots the method parameters occupy on entry
pub fn parameter_words(descriptor: &str, is_static: bool) -> Result<u16, ContractError> {
    let (arg_words, _) = method_widths(descriptor)?;
    Ok(arg_words + if is_static { 0 } else { 1 })
}

fn single_type_width(chars: &mut std::str::Chars) -> Result<u16, ContractError> {
    let bad = || ContractError::BadDescriptor(chars.as_str().to_string());
    match chars.next() {
        Some('B' | 'C' | 'F' | 'I' | 'S' | 'Z') => Ok(1),
        Some('J' | 'D') => Ok(2),
        Some('L') => {
            for c in chars.by_ref() {
                if c == ';' {
                    return Ok(1);
                }
            }
            Err(bad())
        }
        Some('[') => {
            // Array of anything is one reference word
            single_type_width(chars)?;
            Ok(1)
        }
        _ => Err(bad()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn field_widths() {
        assert_eq!(field_width("I").unwrap(), 1);
        assert_eq!(field_width("J").unwrap(), 2);
        assert_eq!(field_width("D").unwrap(), 2);
        assert_eq!(field_width("Ljava/lang/String;").unwrap(), 1);
        assert_eq!(field_width("[[D").unwrap(), 1);
        assert!(field_width("II").is_err());
        assert!(field_width("Ljava/lang/String").is_err());
    }

    #[test]
    fn method_effects() {
        // static int max(int, int)
        assert_eq!(invoke_effect("(II)I", false).unwrap(), -1);
        // virtual void println(String)
        assert_eq!(invoke_effect("(Ljava/lang/String;)V", true).unwrap(), -2);
        // static long mix(long, int)
        assert_eq!(invoke_effect("(JI)J", false).unwrap(), -1);
        assert!(invoke_effect("II)I", false).is_err());
        assert!(invoke_effect("(II", false).is_err());
    }

    #[test]
    fn parameter_slots() {
        assert_eq!(parameter_words("(IJ)V", true).unwrap(), 3);
        assert_eq!(parameter_words("(IJ)V", false).unwrap(), 4);
        assert_eq!(parameter_words("()V", false).unwrap(), 1);
    }
}
