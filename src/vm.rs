//! # Stack virtual machine
//!
//! Executes the flat bytecode produced by the compiler.
//!
//! ## Model
//! - **Value stack** (`stack`): every operation consumes and produces
//!   values here.
//! - **Dictionary** (`names`): shared with the compiler; maps names to
//!   compiled words, native indices and variable cells.
//! - **Bytecode buffer** (`code`): append-only byte stream indexed by
//!   the program counter. Addresses handed out during compilation stay
//!   valid for the lifetime of the context.
//! - **Return stack** (`return_addr`): 32-bit return addresses, disjoint
//!   from the value stack. Calls from native words push a sentinel so a
//!   compiled word can be driven to completion and control handed back
//!   to the host.
//!
//! ## Failure contract
//! Recoverable faults never unwind: an operation that underflows the
//! stack or receives the wrong type pushes an `Error` value and the loop
//! continues. Only structural faults — a byte that is not an opcode, a
//! program counter past the end of the buffer — stop execution with a
//! [`VmError`].

use tracing::trace;

use crate::bytecode::{read_addr24, read_u16be, Op};
use crate::error::VmError;
use crate::map::KvMap;
use crate::value::Value;

pub mod natives;


use natives::NativeDef;

/// Return-stack sentinel marking a call driven by the host rather than
/// by a `Call` opcode.
const HOST_RETURN: u32 = u32::MAX;

/// One interpreter instance: stacks, dictionary, bytecode and the
/// native word table. All state is owned here; contexts are independent
/// and single-threaded.
pub struct Ctx {
    /// The value stack.
    pub stack: Vec<Value>,
    /// Dictionary of words and variable cells.
    pub(crate) names: KvMap,
    /// Append-only bytecode buffer.
    pub(crate) code: Vec<u8>,
    /// Program counter: index of the next byte to execute.
    pub(crate) pc: usize,
    /// Return addresses for `Call`/`Return`.
    pub(crate) return_addr: Vec<u32>,
    /// Installed native words; `Value::Native` holds indices into this.
    pub(crate) natives: Vec<NativeDef>,
}

impl Ctx {
    /// Fresh context with the builtin word set installed.
    pub fn new() -> Ctx {
        let mut ctx = Ctx {
            stack: Vec::new(),
            names: KvMap::new(),
            code: Vec::new(),
            pc: 0,
            return_addr: Vec::new(),
            natives: Vec::new(),
        };
        natives::install(&mut ctx);
        ctx
    }

    /// Pop the top of the stack; an empty stack yields an error value.
    pub fn pop(&mut self) -> Value {
        self.stack
            .pop()
            .unwrap_or_else(|| Value::error("Stack underflow!"))
    }

    /// Copy of the top of the stack; an empty stack yields an error value.
    pub fn peek(&self) -> Value {
        self.stack
            .last()
            .cloned()
            .unwrap_or_else(|| Value::error("Stack underflow!"))
    }

    pub fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    pub(crate) fn emit(&mut self, op: Op) {
        self.code.push(op.into());
    }

    pub(crate) fn emit_byte(&mut self, byte: u8) {
        self.code.push(byte);
    }

    pub(crate) fn emit_bytes(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    /// Current end of the bytecode buffer.
    pub(crate) fn here(&self) -> usize {
        self.code.len()
    }
}

impl Default for Ctx {
    fn default() -> Ctx {
        Ctx::new()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Flow {
    Running,
    Halted,
}

/// Run from the current program counter until `End` halts the machine.
pub fn execute(ctx: &mut Ctx) -> Result<(), VmError> {
    while step(ctx)? == Flow::Running {}
    Ok(())
}

/// Drive a compiled word to completion from a native word or the host.
///
/// Pushes a sentinel return address, runs until the word's `Return`
/// (or a stray `End`) pops it, then restores the program counter.
pub(crate) fn run_word(ctx: &mut Ctx, addr: u32) -> Result<(), VmError> {
    let saved_pc = ctx.pc;
    ctx.return_addr.push(HOST_RETURN);
    ctx.pc = addr as usize;
    let mut result = Ok(());
    loop {
        match step(ctx) {
            Ok(Flow::Running) => {}
            Ok(Flow::Halted) => break,
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }
    if ctx.return_addr.last() == Some(&HOST_RETURN) {
        ctx.return_addr.pop();
    }
    ctx.pc = saved_pc;
    result
}

fn fetch(ctx: &mut Ctx) -> Result<u8, VmError> {
    let byte = *ctx.code.get(ctx.pc).ok_or(VmError::CodeOverrun(ctx.pc))?;
    ctx.pc += 1;
    Ok(byte)
}

fn fetch_slice(ctx: &mut Ctx, len: usize) -> Result<Vec<u8>, VmError> {
    if ctx.pc + len > ctx.code.len() {
        return Err(VmError::CodeOverrun(ctx.pc));
    }
    let bytes = ctx.code[ctx.pc..ctx.pc + len].to_vec();
    ctx.pc += len;
    Ok(bytes)
}

fn fetch_addr(ctx: &mut Ctx) -> Result<u32, VmError> {
    if ctx.pc + 3 > ctx.code.len() {
        return Err(VmError::CodeOverrun(ctx.pc));
    }
    let addr = read_addr24(&ctx.code, ctx.pc);
    ctx.pc += 3;
    Ok(addr)
}

/// Fetch and execute one instruction.
fn step(ctx: &mut Ctx) -> Result<Flow, VmError> {
    let at = ctx.pc;
    let byte = fetch(ctx)?;
    let op = Op::try_from(byte).map_err(|_| VmError::UnknownOpcode { op: byte, at })?;
    trace!(pc = at, op = ?op, stack = ctx.stack.len(), "dispatch");
    match op {
        Op::End => return Ok(Flow::Halted),

        Op::PushInt8 => {
            let v = fetch(ctx)? as i8;
            ctx.push(Value::Number(f64::from(v)));
        }
        Op::PushInt16 => {
            let bytes = [fetch(ctx)?, fetch(ctx)?];
            ctx.push(Value::Number(f64::from(i16::from_le_bytes(bytes))));
        }
        Op::PushNumber => {
            let bytes: [u8; 8] = fetch_slice(ctx, 8)?.try_into().unwrap();
            ctx.push(Value::Number(f64::from_le_bytes(bytes)));
        }
        Op::PushString => {
            let len = fetch(ctx)? as usize;
            let bytes = fetch_slice(ctx, len)?;
            ctx.push(Value::string(bytes));
        }
        Op::PushStringLong => {
            let len_bytes: [u8; 4] = fetch_slice(ctx, 4)?.try_into().unwrap();
            let len = u32::from_le_bytes(len_bytes) as usize;
            let bytes = fetch_slice(ctx, len)?;
            ctx.push(Value::string(bytes));
        }
        Op::PushName => {
            let len = fetch(ctx)? as usize;
            let bytes = fetch_slice(ctx, len)?;
            ctx.push(Value::Name(String::from_utf8_lossy(&bytes).into_owned().into()));
        }
        Op::PushRef => {
            let len = fetch(ctx)? as usize;
            let bytes = fetch_slice(ctx, len)?;
            ctx.push(Value::RefName(
                String::from_utf8_lossy(&bytes).into_owned().into(),
            ));
        }

        Op::Jmp => {
            ctx.pc = fetch_addr(ctx)? as usize;
        }
        Op::JmpTrue | Op::JmpFalse => {
            // the address bytes are consumed either way
            let addr = fetch_addr(ctx)?;
            if !underflow(ctx, 1) {
                let cond = ctx.pop().truthy();
                if cond == (op == Op::JmpTrue) {
                    ctx.pc = addr as usize;
                }
            }
        }
        Op::Call => {
            let addr = fetch_addr(ctx)?;
            ctx.return_addr.push(ctx.pc as u32);
            ctx.pc = addr as usize;
        }
        Op::Return => match ctx.return_addr.pop() {
            Some(HOST_RETURN) => return Ok(Flow::Halted),
            Some(addr) => ctx.pc = addr as usize,
            None => return Err(VmError::ReturnStackEmpty),
        },
        Op::Invoke => {
            if ctx.pc + 2 > ctx.code.len() {
                return Err(VmError::CodeOverrun(ctx.pc));
            }
            let idx = read_u16be(&ctx.code, ctx.pc);
            ctx.pc += 2;
            natives::invoke(ctx, idx)?;
        }

        other => apply_op(ctx, other),
    }
    Ok(Flow::Running)
}

/// Check for `need` operands; on underflow push the error value and
/// report true so the caller skips the operation.
fn underflow(ctx: &mut Ctx, need: usize) -> bool {
    let have = ctx.stack.len();
    if have < need {
        ctx.push(Value::error(format!("Stack underflow! ({} < {})", have, need)));
        true
    } else {
        false
    }
}

fn bin_num(ctx: &mut Ctx, f: impl Fn(f64, f64) -> f64) {
    if underflow(ctx, 2) {
        return;
    }
    let b = ctx.pop();
    let a = ctx.pop();
    match (a.as_number(), b.as_number()) {
        (Some(a), Some(b)) => ctx.push(Value::Number(f(a, b))),
        _ => ctx.push(Value::error("Expected two numbers")),
    }
}

fn bin_cmp(ctx: &mut Ctx, f: impl Fn(f64, f64) -> bool) {
    if underflow(ctx, 2) {
        return;
    }
    let b = ctx.pop();
    let a = ctx.pop();
    match (a.as_number(), b.as_number()) {
        (Some(a), Some(b)) => ctx.push(Value::bool(f(a, b))),
        _ => ctx.push(Value::error("Expected two numbers")),
    }
}

/// Integer pair for the modulo and shift operations.
fn bin_int(ctx: &mut Ctx) -> Option<(i64, i64)> {
    if underflow(ctx, 2) {
        return None;
    }
    let b = ctx.pop();
    let a = ctx.pop();
    match (a.as_number(), b.as_number()) {
        (Some(a), Some(b)) => Some((a as i64, b as i64)),
        _ => {
            ctx.push(Value::error("Expected two numbers"));
            None
        }
    }
}

/// Depth operand of a pick/move: encoded in the fused opcode, or popped
/// for the generic form.
fn depth_arg(ctx: &mut Ctx, op: Op, base: Op) -> Option<usize> {
    let fused = u8::from(op) - u8::from(base);
    if fused > 0 {
        return Some(fused as usize);
    }
    if underflow(ctx, 1) {
        return None;
    }
    match ctx.pop() {
        Value::Number(n) if n >= 0.0 => Some(n as usize),
        _ => {
            ctx.push(Value::error("Expected a non-negative number of places"));
            None
        }
    }
}

/// Execute an operand-free opcode. Shared between the dispatch loop and
/// dynamic block execution, where opcode-backed native words land here.
pub(crate) fn apply_op(ctx: &mut Ctx, op: Op) {
    match op {
        Op::PushNil => ctx.push(Value::Nil),
        Op::PushTrue => ctx.push(Value::True),
        Op::PushFalse => ctx.push(Value::False),
        Op::PushArray => ctx.push(Value::array()),
        Op::PushHashMap => ctx.push(Value::HashMap(std::rc::Rc::new(
            std::cell::RefCell::new(KvMap::new()),
        ))),

        Op::Plus => bin_num(ctx, |a, b| a + b),
        Op::Minus => bin_num(ctx, |a, b| a - b),
        Op::Mul => bin_num(ctx, |a, b| a * b),
        Op::Div => bin_num(ctx, |a, b| a / b),
        Op::Lt => bin_cmp(ctx, |a, b| a < b),
        Op::Gt => bin_cmp(ctx, |a, b| a > b),
        Op::Lte => bin_cmp(ctx, |a, b| a <= b),
        Op::Gte => bin_cmp(ctx, |a, b| a >= b),
        Op::Mod => {
            if let Some((a, b)) = bin_int(ctx) {
                if b == 0 {
                    ctx.push(Value::error("Division by zero"));
                } else {
                    ctx.push(Value::Number((a % b) as f64));
                }
            }
        }
        Op::Shl => {
            if let Some((a, b)) = bin_int(ctx) {
                ctx.push(Value::Number(a.wrapping_shl(b as u32) as f64));
            }
        }
        Op::Shr => {
            if let Some((a, b)) = bin_int(ctx) {
                ctx.push(Value::Number(a.wrapping_shr(b as u32) as f64));
            }
        }

        Op::Eq => {
            if !underflow(ctx, 2) {
                let b = ctx.pop();
                let a = ctx.pop();
                ctx.push(Value::bool(a == b));
            }
        }
        Op::And => {
            if !underflow(ctx, 2) {
                let b = ctx.pop().truthy();
                let a = ctx.pop().truthy();
                ctx.push(Value::bool(a && b));
            }
        }
        Op::Or => {
            if !underflow(ctx, 2) {
                let b = ctx.pop().truthy();
                let a = ctx.pop().truthy();
                ctx.push(Value::bool(a || b));
            }
        }

        Op::Dup => {
            if !underflow(ctx, 1) {
                let v = ctx.peek();
                ctx.push(v);
            }
        }
        Op::Drop => {
            if !underflow(ctx, 1) {
                ctx.pop();
            }
        }
        Op::Swap => {
            if !underflow(ctx, 2) {
                let len = ctx.stack.len();
                ctx.stack.swap(len - 1, len - 2);
            }
        }
        Op::Rot => {
            // (a b c -- b c a)
            if !underflow(ctx, 3) {
                let len = ctx.stack.len();
                ctx.stack[len - 3..].rotate_left(1);
            }
        }
        Op::Over => {
            if !underflow(ctx, 2) {
                let v = ctx.stack[ctx.stack.len() - 2].clone();
                ctx.push(v);
            }
        }
        Op::Nip => {
            if !underflow(ctx, 2) {
                let len = ctx.stack.len();
                ctx.stack.remove(len - 2);
            }
        }
        Op::Tuck => {
            // (a b -- b a b)
            if !underflow(ctx, 2) {
                let len = ctx.stack.len();
                let top = ctx.stack[len - 1].clone();
                ctx.stack.insert(len - 2, top);
            }
        }
        Op::MoveN | Op::Move1 | Op::Move2 | Op::Move3 | Op::Move4 | Op::Move5 => {
            if let Some(n) = depth_arg(ctx, op, Op::MoveN) {
                if !underflow(ctx, n + 1) {
                    let idx = ctx.stack.len() - 1 - n;
                    let v = ctx.stack.remove(idx);
                    ctx.push(v);
                }
            }
        }
        Op::PickN | Op::Pick1 | Op::Pick2 | Op::Pick3 | Op::Pick4 | Op::Pick5 => {
            if let Some(n) = depth_arg(ctx, op, Op::PickN) {
                if !underflow(ctx, n + 1) {
                    let v = ctx.stack[ctx.stack.len() - 1 - n].clone();
                    ctx.push(v);
                }
            }
        }

        Op::APush => {
            if !underflow(ctx, 2) {
                let item = ctx.pop();
                match ctx.peek() {
                    Value::Array(a) => a.borrow_mut().push(item),
                    _ => ctx.push(Value::error("Expected array to push to")),
                }
            }
        }
        Op::HmPut => {
            if !underflow(ctx, 3) {
                let value = ctx.pop();
                let key = ctx.pop();
                match ctx.peek() {
                    Value::HashMap(h) => h.borrow_mut().put(key, value),
                    _ => ctx.push(Value::error("Expected hashmap to put to")),
                }
            }
        }

        Op::Print => {
            if !underflow(ctx, 1) {
                print!("{}", ctx.pop());
            }
        }

        // operand-carrying opcodes are handled by the dispatch loop
        other => unreachable!("{:?} requires inline operands", other),
    }
}
