//! # Error types
//!
//! Two families of failure:
//!
//! - [`CompileError`] — structural problems that abort a compilation
//!   invocation (parse errors, a construct left open at end of input,
//!   markers outside their construct). Unknown words are *not* here:
//!   they are reported to stderr and compilation keeps going.
//! - [`VmError`] — unrecoverable execution faults (an opcode byte that
//!   does not decode, running off the end of the buffer). Everything
//!   recoverable — stack underflow, type mismatches, bad indices — is an
//!   `Error` *value* on the stack instead, and the VM keeps running.

use std::fmt;
use std::rc::Rc;

/// Aborting compilation failure.
#[derive(Clone, Debug, PartialEq)]
pub enum CompileError {
    /// Reader produced a malformed token; payload is its message.
    Parse(Rc<str>),
    /// End of input inside a definition, array, or if/else/then.
    UnexpectedEof,
    /// `:` was not followed by a name.
    ExpectedDefName { got: String },
    /// A structural marker outside its construct (`;` with no `:` …).
    UnexpectedToken { line: u32, col: u32, what: String },
    /// Name literals carry a 1-byte length; longer cannot be encoded.
    NameTooLong(String),
    /// The bytecode buffer does not end with END from a previous run.
    CorruptBuffer(u8),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Parse(msg) => write!(f, "{}", msg),
            CompileError::UnexpectedEof => {
                write!(f, "Compilation failed, unexpected end of input")
            }
            CompileError::ExpectedDefName { got } => {
                write!(f, "Compilation failed, expected name for definition, got: {}", got)
            }
            CompileError::UnexpectedToken { line, col, what } => {
                write!(f, "Compile error at line {}, col {}: unexpected {}", line, col, what)
            }
            CompileError::NameTooLong(name) => {
                write!(f, "Compilation failed, name too long to compile: {}", name)
            }
            CompileError::CorruptBuffer(byte) => write!(
                f,
                "Existing bytecode in bad state, expected empty or END, got {}",
                byte
            ),
        }
    }
}

impl std::error::Error for CompileError {}

/// Unrecoverable execution fault.
#[derive(Clone, Debug, PartialEq)]
pub enum VmError {
    /// A byte in the code stream is not an opcode.
    UnknownOpcode { op: u8, at: usize },
    /// An invoke index with no registered native word.
    UnknownNative(u16),
    /// The program counter ran past the end of the buffer.
    CodeOverrun(usize),
    /// Return executed with an empty return stack.
    ReturnStackEmpty,
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::UnknownOpcode { op, at } => {
                write!(f, "Unknown bytecode op: {} at {}", op, at)
            }
            VmError::UnknownNative(idx) => write!(f, "Unknown native word index: {}", idx),
            VmError::CodeOverrun(pc) => {
                write!(f, "Program counter ran past end of code at {}", pc)
            }
            VmError::ReturnStackEmpty => write!(f, "Return with an empty return stack"),
        }
    }
}

impl std::error::Error for VmError {}
