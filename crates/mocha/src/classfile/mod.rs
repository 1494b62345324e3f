//! JVM class-file container writer.
//!
//! Assembles the instruction stream produced by the code generator plus the
//! fixed class/method metadata (single public class `Main`, one static
//! entry-point method, a synthesized no-argument constructor) into the bytes
//! of a loadable `.class` file.

use std::collections::HashMap;
use std::io;

use bitflags::bitflags;
use byteorder::{BigEndian, WriteBytesExt};
use thiserror::Error;

pub mod code;

use code::CodeBuilder;

/// Name of the single class every compilation produces.
pub const CLASS_NAME: &str = "Main";
/// File name of the produced artifact.
pub const CLASS_FILE_NAME: &str = "Main.class";

const SUPER_CLASS: &str = "java/lang/Object";
const MAGIC: u32 = 0xCAFE_BABE;
// 49.0 is the newest version whose Code attributes are verified without
// StackMapTable frames.
const MAJOR_VERSION: u16 = 49;
const MINOR_VERSION: u16 = 0;

// constant pool tags
const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELDREF: u8 = 9;
const TAG_METHODREF: u8 = 10;
const TAG_NAME_AND_TYPE: u8 = 12;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct AccessFlags: u16 {
        const PUBLIC = 0x0001;
        const STATIC = 0x0008;
        const SUPER = 0x0020;
    }
}

#[derive(Error, Debug)]
pub enum ClassFileError {
    #[error("label {0} referenced by a branch was never bound")]
    UnboundLabel(usize),
    #[error("label {0} bound to more than one position")]
    LabelRebound(usize),
    #[error("branch from byte offset {from} to {to} exceeds the 16-bit offset range")]
    BranchOffsetOverflow { from: u32, to: u32 },
    #[error("instruction {at} reached with stack depth {first} and {second}")]
    InconsistentStackDepth { at: usize, first: i32, second: i32 },
    #[error("operand stack underflow at instruction {at}")]
    OperandStackUnderflow { at: usize },
    #[error("execution can fall off the end of the bytecode")]
    MissingReturn,
    #[error("constant pool limit of 65534 entries exceeded")]
    ConstantPoolOverflow,
    #[error("i/o error while serializing")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PoolEntry {
    Utf8(String),
    Integer(i32),
    // f64 bit pattern, so the entry is hashable
    Double(u64),
    Class(u16),
    Str(u16),
    Fieldref(u16, u16),
    Methodref(u16, u16),
    NameAndType(u16, u16),
}

impl PoolEntry {
    /// Doubles occupy two constant-pool index slots.
    fn width(&self) -> u16 {
        match self {
            PoolEntry::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Deduplicating class-file constant pool. Indices are 1-based.
#[derive(Debug)]
pub struct ConstantPool {
    entries: Vec<PoolEntry>,
    indices: HashMap<PoolEntry, u16>,
    next_index: u16,
}

impl ConstantPool {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            indices: HashMap::new(),
            next_index: 1,
        }
    }

    fn intern(&mut self, entry: PoolEntry) -> u16 {
        if let Some(index) = self.indices.get(&entry) {
            return *index;
        }
        let index = self.next_index;
        self.next_index += entry.width();
        self.indices.insert(entry.clone(), index);
        self.entries.push(entry);
        index
    }

    pub fn utf8(&mut self, value: &str) -> u16 {
        self.intern(PoolEntry::Utf8(value.to_string()))
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        self.intern(PoolEntry::Integer(value))
    }

    pub fn double(&mut self, value: f64) -> u16 {
        self.intern(PoolEntry::Double(value.to_bits()))
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        self.intern(PoolEntry::Class(name_index))
    }

    pub fn string(&mut self, value: &str) -> u16 {
        let value_index = self.utf8(value);
        self.intern(PoolEntry::Str(value_index))
    }

    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(class);
        let name_and_type = self.name_and_type(name, descriptor);
        self.intern(PoolEntry::Fieldref(class_index, name_and_type))
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(class);
        let name_and_type = self.name_and_type(name, descriptor);
        self.intern(PoolEntry::Methodref(class_index, name_and_type))
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.intern(PoolEntry::NameAndType(name_index, descriptor_index))
    }

    fn check_overflow(&self) -> Result<(), ClassFileError> {
        // next_index is one past the last used slot; the count field is u16
        if self.next_index == u16::MAX {
            return Err(ClassFileError::ConstantPoolOverflow);
        }
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<(), ClassFileError> {
        self.check_overflow()?;
        out.write_u16::<BigEndian>(self.next_index)?;
        for entry in &self.entries {
            match entry {
                PoolEntry::Utf8(value) => {
                    out.write_u8(TAG_UTF8)?;
                    let encoded = modified_utf8(value);
                    out.write_u16::<BigEndian>(encoded.len() as u16)?;
                    out.extend_from_slice(&encoded);
                }
                PoolEntry::Integer(value) => {
                    out.write_u8(TAG_INTEGER)?;
                    out.write_i32::<BigEndian>(*value)?;
                }
                PoolEntry::Double(bits) => {
                    out.write_u8(TAG_DOUBLE)?;
                    out.write_u64::<BigEndian>(*bits)?;
                }
                PoolEntry::Class(name) => {
                    out.write_u8(TAG_CLASS)?;
                    out.write_u16::<BigEndian>(*name)?;
                }
                PoolEntry::Str(value) => {
                    out.write_u8(TAG_STRING)?;
                    out.write_u16::<BigEndian>(*value)?;
                }
                PoolEntry::Fieldref(class, name_and_type) => {
                    out.write_u8(TAG_FIELDREF)?;
                    out.write_u16::<BigEndian>(*class)?;
                    out.write_u16::<BigEndian>(*name_and_type)?;
                }
                PoolEntry::Methodref(class, name_and_type) => {
                    out.write_u8(TAG_METHODREF)?;
                    out.write_u16::<BigEndian>(*class)?;
                    out.write_u16::<BigEndian>(*name_and_type)?;
                }
                PoolEntry::NameAndType(name, descriptor) => {
                    out.write_u8(TAG_NAME_AND_TYPE)?;
                    out.write_u16::<BigEndian>(*name)?;
                    out.write_u16::<BigEndian>(*descriptor)?;
                }
            }
        }
        Ok(())
    }
}

// CONSTANT_Utf8 uses the JVM's modified UTF-8: NUL becomes a two-byte
// sequence and supplementary characters are encoded as surrogate pairs of
// three bytes each.
fn modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for ch in value.chars() {
        let code = ch as u32;
        match code {
            0 => out.extend_from_slice(&[0xc0, 0x80]),
            0x01..=0x7f => out.push(code as u8),
            0x80..=0x7ff => {
                out.push(0xc0 | (code >> 6) as u8);
                out.push(0x80 | (code & 0x3f) as u8);
            }
            0x800..=0xffff => {
                out.push(0xe0 | (code >> 12) as u8);
                out.push(0x80 | ((code >> 6) & 0x3f) as u8);
                out.push(0x80 | (code & 0x3f) as u8);
            }
            _ => {
                let high = 0xd800 + ((code - 0x10000) >> 10);
                let low = 0xdc00 + ((code - 0x10000) & 0x3ff);
                for unit in [high, low] {
                    out.push(0xe0 | (unit >> 12) as u8);
                    out.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                    out.push(0x80 | (unit & 0x3f) as u8);
                }
            }
        }
    }
    out
}

/// Builder for the single-class executable image.
///
/// Owns the constant pool and the entry-point method's instruction stream;
/// the code generator appends through [`ClassEmitter::code`] and
/// [`ClassEmitter::pool`], and [`ClassEmitter::finish`] assembles the final
/// container bytes. One emitter per compilation; nothing is shared.
#[derive(Debug)]
pub struct ClassEmitter {
    pool: ConstantPool,
    main_code: CodeBuilder,
}

impl Default for ClassEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassEmitter {
    pub fn new() -> Self {
        Self {
            pool: ConstantPool::new(),
            main_code: CodeBuilder::new(),
        }
    }

    pub fn pool(&mut self) -> &mut ConstantPool {
        &mut self.pool
    }

    pub fn code(&mut self) -> &mut CodeBuilder {
        &mut self.main_code
    }

    /// Assemble the container: terminate the entry-point method, compute its
    /// stack/frame metadata, synthesize the constructor, and serialize.
    ///
    /// `max_locals` is the local-variable high-water mark of the entry-point
    /// method (including the reserved argument slot).
    pub fn finish(mut self, max_locals: u16) -> Result<Vec<u8>, ClassFileError> {
        self.main_code.emit(code::Instruction::Return);
        let main = self.main_code.assemble()?;

        let constructor = {
            let super_init = self.pool.method_ref(SUPER_CLASS, "<init>", "()V");
            let mut builder = CodeBuilder::new();
            builder.emit(code::Instruction::Aload(0));
            builder.emit(code::Instruction::Invokespecial(super_init));
            builder.emit(code::Instruction::Return);
            builder.assemble()?
        };

        let this_class = self.pool.class(CLASS_NAME);
        let super_class = self.pool.class(SUPER_CLASS);
        let code_attribute = self.pool.utf8("Code");
        let main_name = self.pool.utf8("main");
        let main_descriptor = self.pool.utf8("([Ljava/lang/String;)V");
        let constructor_name = self.pool.utf8("<init>");
        let constructor_descriptor = self.pool.utf8("()V");

        let mut out = Vec::new();
        out.write_u32::<BigEndian>(MAGIC)?;
        out.write_u16::<BigEndian>(MINOR_VERSION)?;
        out.write_u16::<BigEndian>(MAJOR_VERSION)?;
        self.pool.write(&mut out)?;
        out.write_u16::<BigEndian>((AccessFlags::PUBLIC | AccessFlags::SUPER).bits())?;
        out.write_u16::<BigEndian>(this_class)?;
        out.write_u16::<BigEndian>(super_class)?;
        out.write_u16::<BigEndian>(0)?; // interfaces
        out.write_u16::<BigEndian>(0)?; // fields
        out.write_u16::<BigEndian>(2)?; // methods

        write_method(
            &mut out,
            AccessFlags::PUBLIC | AccessFlags::STATIC,
            main_name,
            main_descriptor,
            code_attribute,
            &main,
            max_locals,
        )?;
        write_method(
            &mut out,
            AccessFlags::PUBLIC,
            constructor_name,
            constructor_descriptor,
            code_attribute,
            &constructor,
            1, // `this` only
        )?;

        out.write_u16::<BigEndian>(0)?; // class attributes
        Ok(out)
    }
}

fn write_method(
    out: &mut Vec<u8>,
    flags: AccessFlags,
    name: u16,
    descriptor: u16,
    code_attribute: u16,
    assembled: &code::AssembledCode,
    max_locals: u16,
) -> Result<(), ClassFileError> {
    out.write_u16::<BigEndian>(flags.bits())?;
    out.write_u16::<BigEndian>(name)?;
    out.write_u16::<BigEndian>(descriptor)?;
    out.write_u16::<BigEndian>(1)?; // one attribute: Code

    out.write_u16::<BigEndian>(code_attribute)?;
    // max_stack + max_locals + code_length + code + exception_table_length
    // + attributes_count
    let attribute_length = 2 + 2 + 4 + assembled.bytecode.len() as u32 + 2 + 2;
    out.write_u32::<BigEndian>(attribute_length)?;
    out.write_u16::<BigEndian>(assembled.max_stack)?;
    out.write_u16::<BigEndian>(max_locals)?;
    out.write_u32::<BigEndian>(assembled.bytecode.len() as u32)?;
    out.extend_from_slice(&assembled.bytecode);
    out.write_u16::<BigEndian>(0)?; // exception table
    out.write_u16::<BigEndian>(0)?; // code attributes
    Ok(())
}
