//! Command canonicalization.
//!
//! Desired commands are shell strings; engines report the split argv
//! (`Path` + `Args`). Splitting follows POSIX shell word rules: whitespace
//! separates words, single quotes are literal, double quotes allow `\"`,
//! `\\`, `\$` and `` \` `` escapes, and a bare backslash escapes the next
//! character.

use crate::error::{Error, Result};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Single,
    Double,
}

/// Splits a shell command line into words.
pub fn split_command(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut quote = Quote::None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                } else {
                    word.push(c);
                }
            }
            Quote::Double => match c {
                '"' => quote = Quote::None,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\' | '$' | '`')) => word.push(next),
                    Some('\n') => {}
                    Some(next) => {
                        word.push('\\');
                        word.push(next);
                    }
                    None => return Err(unbalanced(line)),
                },
                _ => word.push(c),
            },
            Quote::None => match c {
                '\'' => {
                    quote = Quote::Single;
                    in_word = true;
                }
                '"' => {
                    quote = Quote::Double;
                    in_word = true;
                }
                '\\' => match chars.next() {
                    Some('\n') => {}
                    Some(next) => {
                        word.push(next);
                        in_word = true;
                    }
                    None => return Err(unbalanced(line)),
                },
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut word));
                        in_word = false;
                    }
                }
                _ => {
                    word.push(c);
                    in_word = true;
                }
            },
        }
    }

    if quote != Quote::None {
        return Err(unbalanced(line));
    }
    if in_word {
        words.push(word);
    }
    Ok(words)
}

/// Compares two command lines with all whitespace runs collapsed.
pub fn whitespace_equal(a: &str, b: &str) -> bool {
    a.split_whitespace().eq(b.split_whitespace())
}

fn unbalanced(line: &str) -> Error {
    Error::InvalidParameters(format!("cannot split command {line:?}: unbalanced quoting"))
}
