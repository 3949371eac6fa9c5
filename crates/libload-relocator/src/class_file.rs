//! Constant pool rewriting for JVM class files.
//!
//! Every class reference in a class file bottoms out in a `CONSTANT_Utf8`
//! entry: class constants, field and method descriptors, generic signatures
//! and package constants all point at one. Relocation therefore only needs to
//! rewrite those strings; everything after the constant pool refers to it by
//! index and is copied unchanged.

use std::collections::HashSet;

use thiserror::Error;

use crate::rule::CompiledRule;

const MAGIC: u32 = 0xCAFE_BABE;
const HEADER_LEN: usize = 10;

const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELDREF: u8 = 9;
const TAG_METHODREF: u8 = 10;
const TAG_INTERFACE_METHODREF: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;
const TAG_METHOD_HANDLE: u8 = 15;
const TAG_METHOD_TYPE: u8 = 16;
const TAG_DYNAMIC: u8 = 17;
const TAG_INVOKE_DYNAMIC: u8 = 18;
const TAG_MODULE: u8 = 19;
const TAG_PACKAGE: u8 = 20;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ClassFileError {
    #[error("unexpected end of class file")]
    Truncated,

    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),

    #[error("unknown constant pool tag {tag} at index {index}")]
    UnknownTag { tag: u8, index: u16 },

    #[error("constant {index} exceeds 65535 bytes after relocation")]
    ConstantTooLong { index: u16 },
}

/// One constant pool slot as it appears in the input.
#[derive(Debug)]
struct Constant {
    index: u16,
    tag: u8,
    /// Byte range of the whole entry, tag included.
    start: usize,
    end: usize,
}

/// A parsed view over a class file's constant pool.
#[derive(Debug)]
pub(crate) struct ConstantPool<'a> {
    bytes: &'a [u8],
    constants: Vec<Constant>,
    /// Utf8 entries referenced from `CONSTANT_String`, i.e. source literals.
    literals: HashSet<u16>,
    end: usize,
}

impl<'a> ConstantPool<'a> {
    pub(crate) fn parse(bytes: &'a [u8]) -> Result<Self, ClassFileError> {
        let mut reader = Reader { bytes, pos: 0 };

        let magic = reader.u32()?;
        if magic != MAGIC {
            return Err(ClassFileError::BadMagic(magic));
        }
        reader.skip(4)?; // minor + major version
        let count = reader.u16()?;

        let mut constants = Vec::with_capacity(count as usize);
        let mut literals = HashSet::new();
        let mut index = 1u16;

        while index < count {
            let start = reader.pos;
            let tag = reader.u8()?;
            let mut slots = 1;

            match tag {
                TAG_UTF8 => {
                    let len = reader.u16()? as usize;
                    reader.skip(len)?;
                }
                TAG_STRING => {
                    literals.insert(reader.u16()?);
                }
                TAG_CLASS | TAG_METHOD_TYPE | TAG_MODULE | TAG_PACKAGE => reader.skip(2)?,
                TAG_METHOD_HANDLE => reader.skip(3)?,
                TAG_INTEGER | TAG_FLOAT | TAG_FIELDREF | TAG_METHODREF
                | TAG_INTERFACE_METHODREF | TAG_NAME_AND_TYPE | TAG_DYNAMIC
                | TAG_INVOKE_DYNAMIC => reader.skip(4)?,
                TAG_LONG | TAG_DOUBLE => {
                    reader.skip(8)?;
                    slots = 2;
                }
                _ => return Err(ClassFileError::UnknownTag { tag, index }),
            }

            constants.push(Constant {
                index,
                tag,
                start,
                end: reader.pos,
            });
            index = index.saturating_add(slots);
        }

        Ok(Self {
            bytes,
            constants,
            literals,
            end: reader.pos,
        })
    }

    /// All Utf8 constants with their pool index.
    #[cfg(test)]
    pub(crate) fn utf8_constants(&self) -> impl Iterator<Item = (u16, &'a [u8])> + '_ {
        let bytes = self.bytes;
        self.constants
            .iter()
            .filter(|c| c.tag == TAG_UTF8)
            .map(move |c| (c.index, &bytes[c.start + 3..c.end]))
    }

    fn rewrite(&self, rules: &[CompiledRule]) -> Result<Vec<u8>, ClassFileError> {
        let mut out = Vec::with_capacity(self.bytes.len() + 64);
        out.extend_from_slice(&self.bytes[..HEADER_LEN]);

        for constant in &self.constants {
            let raw = &self.bytes[constant.start..constant.end];
            if constant.tag != TAG_UTF8 {
                out.extend_from_slice(raw);
                continue;
            }

            let value = &raw[3..];
            let literal = self.literals.contains(&constant.index);
            match relocate_utf8(value, literal, rules) {
                Some(relocated) => {
                    let len = u16::try_from(relocated.len()).map_err(|_| {
                        ClassFileError::ConstantTooLong {
                            index: constant.index,
                        }
                    })?;
                    out.push(TAG_UTF8);
                    out.extend_from_slice(&len.to_be_bytes());
                    out.extend_from_slice(&relocated);
                }
                None => out.extend_from_slice(raw),
            }
        }

        out.extend_from_slice(&self.bytes[self.end..]);
        Ok(out)
    }
}

/// Relocate every class reference inside a class file.
pub(crate) fn relocate_class(bytes: &[u8], rules: &[CompiledRule]) -> Result<Vec<u8>, ClassFileError> {
    ConstantPool::parse(bytes)?.rewrite(rules)
}

fn relocate_utf8(value: &[u8], literal: bool, rules: &[CompiledRule]) -> Option<Vec<u8>> {
    let mut current: Option<Vec<u8>> = None;
    for rule in rules {
        let input = current.as_deref().unwrap_or(value);
        let relocated = if literal {
            relocate_literal(input, rule)
        } else {
            relocate_descriptor(input, rule)
        };
        if relocated.is_some() {
            current = relocated;
        }
    }
    current
}

/// Rewrite class names in an internal name, descriptor or signature.
///
/// Values that parse as a field or method descriptor, or as a generic
/// signature, have each class type rewritten (`(ILcom/example/Foo;)V`,
/// `Ljava/util/List<Lcom/example/Foo;>;`). Anything else is treated as a
/// plain internal name or package name (`com/example/Foo`, `com/example`).
fn relocate_descriptor(value: &[u8], rule: &CompiledRule) -> Option<Vec<u8>> {
    let mut scanner = SignatureScanner::new(value, rule);
    if scanner.signature().is_some() && scanner.pos == value.len() && scanner.changed {
        return Some(scanner.out);
    }
    relocate_internal_name(value, rule)
}

fn relocate_internal_name(value: &[u8], rule: &CompiledRule) -> Option<Vec<u8>> {
    let from = rule.from_slash.as_bytes();
    let rest = value.strip_prefix(from)?;
    if !rest.is_empty() && rest[0] != b'/' {
        return None;
    }
    if !rule.selects(&String::from_utf8_lossy(value)) {
        return None;
    }

    let mut out = Vec::with_capacity(rule.to_slash.len() + rest.len());
    out.extend_from_slice(rule.to_slash.as_bytes());
    out.extend_from_slice(rest);
    Some(out)
}

/// Walks the JVM descriptor and signature grammar, copying its input and
/// relocating the name of every class type it passes.
///
/// Each method returns `None` as soon as the input stops following the
/// grammar; the caller then treats the value as something else.
struct SignatureScanner<'a> {
    value: &'a [u8],
    pos: usize,
    out: Vec<u8>,
    rule: &'a CompiledRule,
    changed: bool,
}

impl<'a> SignatureScanner<'a> {
    fn new(value: &'a [u8], rule: &'a CompiledRule) -> Self {
        Self {
            value,
            pos: 0,
            out: Vec::with_capacity(value.len() + 16),
            rule,
            changed: false,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.value.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.out.push(b);
        self.pos += 1;
        Some(b)
    }

    fn expect(&mut self, expected: u8) -> Option<()> {
        (self.peek()? == expected).then(|| {
            self.out.push(expected);
            self.pos += 1;
        })
    }

    /// Copy a non-empty identifier up to (not including) one of `terminators`.
    fn identifier(&mut self, terminators: &[u8]) -> Option<()> {
        let len = self.value[self.pos..]
            .iter()
            .position(|b| terminators.contains(b))?;
        if len == 0 {
            return None;
        }
        self.out.extend_from_slice(&self.value[self.pos..self.pos + len]);
        self.pos += len;
        Some(())
    }

    /// A field descriptor, a method descriptor or a class, method or field
    /// signature.
    fn signature(&mut self) -> Option<()> {
        if self.peek()? == b'<' {
            self.type_parameters()?;
        }

        if self.peek()? == b'(' {
            self.bump();
            while self.peek()? != b')' {
                self.type_signature()?;
            }
            self.bump();
            self.type_signature()?;
            while self.peek() == Some(b'^') {
                self.bump();
                self.type_signature()?;
            }
        } else {
            // A single field type, or a superclass followed by interfaces
            while self.pos < self.value.len() {
                self.type_signature()?;
            }
        }
        Some(())
    }

    fn type_parameters(&mut self) -> Option<()> {
        self.expect(b'<')?;
        while self.peek()? != b'>' {
            self.identifier(b":")?;
            while self.peek()? == b':' {
                self.bump();
                // An empty class bound is followed directly by an interface bound
                if !matches!(self.peek()?, b':' | b'>') {
                    self.type_signature()?;
                }
            }
        }
        self.bump();
        Some(())
    }

    fn type_signature(&mut self) -> Option<()> {
        match self.peek()? {
            b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b'V' => {
                self.bump();
                Some(())
            }
            b'[' => {
                self.bump();
                self.type_signature()
            }
            b'L' => self.class_type(),
            b'T' => {
                self.bump();
                self.identifier(b";")?;
                self.expect(b';')
            }
            _ => None,
        }
    }

    fn class_type(&mut self) -> Option<()> {
        self.expect(b'L')?;
        let start = self.pos;
        let len = self.value[start..]
            .iter()
            .position(|&b| b == b';' || b == b'<')?;
        if len == 0 {
            return None;
        }
        self.class_name(start, start + len);

        self.type_arguments()?;
        while self.peek()? == b'.' {
            self.bump();
            self.identifier(b";<.")?;
            self.type_arguments()?;
        }
        self.expect(b';')
    }

    fn type_arguments(&mut self) -> Option<()> {
        if self.peek()? != b'<' {
            return Some(());
        }
        self.bump();
        while self.peek()? != b'>' {
            match self.peek()? {
                b'*' => {
                    self.bump();
                }
                b'+' | b'-' => {
                    self.bump();
                    self.type_signature()?;
                }
                _ => self.type_signature()?,
            }
        }
        self.bump();
        Some(())
    }

    fn class_name(&mut self, start: usize, end: usize) {
        let name = &self.value[start..end];
        self.pos = end;

        let from = self.rule.from_slash.as_bytes();
        if let Some(rest) = name.strip_prefix(from) {
            if (rest.is_empty() || rest[0] == b'/')
                && self.rule.selects(&String::from_utf8_lossy(name))
            {
                self.out.extend_from_slice(self.rule.to_slash.as_bytes());
                self.out.extend_from_slice(rest);
                self.changed = true;
                return;
            }
        }
        self.out.extend_from_slice(name);
    }
}

/// Rewrite a string literal that starts with the package, in dotted or
/// slashed form (`Class.forName("com.example.Foo")`, resource paths).
fn relocate_literal(value: &[u8], rule: &CompiledRule) -> Option<Vec<u8>> {
    let forms = [
        (rule.from_dot.as_bytes(), rule.to_dot.as_bytes(), b'.'),
        (rule.from_slash.as_bytes(), rule.to_slash.as_bytes(), b'/'),
    ];

    for (from, to, separator) in forms {
        let Some(rest) = value.strip_prefix(from) else {
            continue;
        };
        if !rest.is_empty() && rest[0] != separator {
            continue;
        }

        let class_name = String::from_utf8_lossy(value).replace('.', "/");
        if !rule.selects(&class_name) {
            return None;
        }

        let mut out = Vec::with_capacity(to.len() + rest.len());
        out.extend_from_slice(to);
        out.extend_from_slice(rest);
        return Some(out);
    }

    None
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8], ClassFileError> {
        let end = self.pos.checked_add(n).ok_or(ClassFileError::Truncated)?;
        let slice = self.bytes.get(self.pos..end).ok_or(ClassFileError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<(), ClassFileError> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8, ClassFileError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ClassFileError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ClassFileError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}
