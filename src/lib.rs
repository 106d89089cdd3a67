//! # Kokoki
//!
//! A small Forth-like concatenative language. Source text streams
//! through a tokenizing [`reader`], a single-pass [`compiler`] appends
//! flat bytecode with back-patched control flow, and a stack [`vm`]
//! executes it against a shared dictionary of words and variable cells.
//!
//! ```text
//! source → Reader tokens → Compiler bytecode → VM (stack, heap)
//! ```
//!
//! Embedding:
//!
//! ```no_run
//! kokoki::init(|ctx| {
//!     kokoki::eval(ctx, ": squared dup * ; 7 squared .");
//! });
//! ```
//!
//! Hosts can extend the vocabulary with [`register_native`]; registered
//! words are invoked from compiled bytecode like any builtin.

mod bytecode;
mod compiler;
mod error;
mod map;
mod reader;
mod value;
mod vm;

pub use error::{CompileError, VmError};
pub use map::KvMap;
pub use value::Value;
pub use vm::natives::NativeFn;
pub use vm::Ctx;

use bytecode::Op;
use reader::Reader;

/// Create a context with the builtin words installed, hand it to the
/// callback, and tear everything down when the callback returns.
pub fn init<F: FnOnce(&mut Ctx)>(callback: F) {
    let mut ctx = Ctx::new();
    callback(&mut ctx);
}

/// Compile and execute a source buffer against the context.
///
/// Compilation is best-effort: unknown words are reported to stderr and
/// skipped, and the rest still runs. A structural compile error seals
/// the buffer and skips execution. Returns true only when the program
/// compiled cleanly and ran to completion.
pub fn eval(ctx: &mut Ctx, source: &str) -> bool {
    match try_eval(ctx, source) {
        Ok(clean) => clean,
        Err(e) => {
            eprintln!("{}", e);
            false
        }
    }
}

/// Like [`eval`], but unrecoverable machine faults come back as
/// `Err(VmError)` instead of being folded into the boolean, so a driver
/// can terminate the process as those faults require. `Ok(false)` still
/// covers the best-effort cases: unknown words and sealed compiles.
pub fn try_eval(ctx: &mut Ctx, source: &str) -> Result<bool, VmError> {
    let mut reader = Reader::new(source);
    match compiler::compile(ctx, &mut reader) {
        Ok(soft_errors) => {
            vm::execute(ctx)?;
            Ok(soft_errors == 0)
        }
        Err(e) => {
            eprintln!("{}", e);
            // keep the buffer well-formed for the next evaluation
            ctx.emit(Op::End);
            Ok(false)
        }
    }
}

/// Install a host word under `name`. Compiled code calls it through the
/// `Invoke` opcode; blocks resolve it through the dictionary like any
/// other word.
pub fn register_native(ctx: &mut Ctx, name: &str, word: NativeFn) {
    vm::natives::register(ctx, name, word);
}
