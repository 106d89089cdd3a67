//! # Single-pass compiler
//!
//! Pulls tokens from the [`Reader`] and appends bytecode to the context
//! buffer in one forward pass. Control flow uses reserve-then-patch:
//! at a fork the compiler emits a 4-byte placeholder, compiles on to
//! learn the target, then overwrites the slot with the jump. Word
//! definitions install `name → CodeAddr` in the dictionary as they
//! finish, so later words call earlier ones by raw address.
//!
//! A compilation invocation runs in one of five modes, each with its own
//! terminator. The terminator token stays in the reader's `last_token`
//! for the enclosing invocation to inspect:
//!
//! | mode       | terminates on      | epilogue   |
//! |------------|--------------------|------------|
//! | TopLevel   | end of input       | `End`      |
//! | Definition | `;`                | `Return`   |
//! | Array      | `,` or `]`         | —          |
//! | If         | `else` or `then`   | —          |
//! | IfElse     | `then`             | —          |
//!
//! Inside an array literal every element token is followed by `APush`,
//! and names are *quoted* (compiled to `PushName` instead of resolved),
//! which is what makes `[2 *]` a block rather than a multiplication.
//!
//! Failure handling is best-effort: an unknown word is reported to
//! stderr and compilation continues; structural problems (parse errors,
//! a construct left open) abort the invocation with a [`CompileError`].

use tracing::debug;

use crate::bytecode::{patch_jump, push_addr24, Op};
use crate::error::CompileError;
use crate::reader::{Reader, Token};
use crate::value::Value;
use crate::vm::Ctx;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Mode {
    TopLevel,
    Definition,
    Array,
    If,
    IfElse,
}

/// Compile one top-level program, appending to the context's buffer.
///
/// When the previous program has run to completion the trailing `End`
/// is dropped first so successive evaluations share one buffer. Sets
/// the program counter to the start of the newly compiled code and
/// returns the number of non-aborting errors reported along the way.
pub(crate) fn compile(ctx: &mut Ctx, reader: &mut Reader) -> Result<usize, CompileError> {
    if !ctx.code.is_empty() && ctx.pc == ctx.code.len() {
        let last = ctx.code[ctx.code.len() - 1];
        if last == u8::from(Op::End) {
            ctx.code.pop();
        } else {
            return Err(CompileError::CorruptBuffer(last));
        }
    }
    ctx.pc = ctx.code.len();
    debug!(at = ctx.pc, "compile");
    let mut compiler = Compiler {
        ctx,
        reader,
        soft_errors: 0,
    };
    compiler.block(Mode::TopLevel)?;
    Ok(compiler.soft_errors)
}

struct Compiler<'c, 'r, 's> {
    ctx: &'c mut Ctx,
    reader: &'r mut Reader<'s>,
    soft_errors: usize,
}

fn terminated(mode: Mode, token: &Token) -> bool {
    match mode {
        Mode::TopLevel => matches!(token, Token::Eof),
        Mode::Definition => matches!(token, Token::DefEnd),
        Mode::Array => matches!(token, Token::Comma | Token::ArrayEnd),
        Mode::If => token.is_name("else") || token.is_name("then"),
        Mode::IfElse => token.is_name("then"),
    }
}

/// Small positive integer eligible for a fused pick/move opcode.
fn fusable(n: f64) -> bool {
    n == n.trunc() && (1.0..=5.0).contains(&n)
}

fn describe(token: &Token) -> String {
    match token {
        Token::Lit(v) => format!("{} {}", v.type_name(), v),
        Token::ArrayStart => "[".to_string(),
        Token::ArrayEnd => "]".to_string(),
        Token::DefStart => ":".to_string(),
        Token::DefEnd => ";".to_string(),
        Token::Comma => ",".to_string(),
        Token::Err(msg) => msg.to_string(),
        Token::Eof => "end of input".to_string(),
    }
}

impl Compiler<'_, '_, '_> {
    /// Compile tokens until the mode's terminator, then emit its epilogue.
    fn block(&mut self, mode: Mode) -> Result<(), CompileError> {
        let mut token = self.reader.next_token();
        loop {
            if terminated(mode, &token) {
                break;
            }
            match token {
                Token::Eof => return Err(CompileError::UnexpectedEof),
                Token::Err(msg) => return Err(CompileError::Parse(msg)),

                Token::Lit(Value::Number(n)) if mode != Mode::Array && fusable(n) => {
                    // one-token lookahead for the fused forms; a peeked
                    // token that is neither becomes the next to compile
                    let next = self.reader.next_token();
                    if next.is_name("pick") {
                        self.ctx.emit_byte(u8::from(Op::PickN) + n as u8);
                    } else if next.is_name("move") {
                        self.ctx.emit_byte(u8::from(Op::MoveN) + n as u8);
                    } else {
                        self.emit_number(n);
                        token = next;
                        continue;
                    }
                }
                Token::Lit(Value::Number(n)) => {
                    self.emit_number(n);
                    self.end_element(mode);
                }
                Token::Lit(Value::Nil) => {
                    self.ctx.emit(Op::PushNil);
                    self.end_element(mode);
                }
                Token::Lit(Value::True) => {
                    self.ctx.emit(Op::PushTrue);
                    self.end_element(mode);
                }
                Token::Lit(Value::False) => {
                    self.ctx.emit(Op::PushFalse);
                    self.end_element(mode);
                }
                Token::Lit(Value::Str(s)) => {
                    self.emit_string(&s.borrow());
                    self.end_element(mode);
                }
                Token::Lit(Value::RefName(name)) => {
                    self.emit_counted(Op::PushRef, &name)?;
                    self.end_element(mode);
                }
                Token::Lit(Value::Name(name)) => {
                    if mode == Mode::Array {
                        self.emit_counted(Op::PushName, &name)?;
                        self.end_element(mode);
                    } else if &*name == "if" {
                        self.compile_if()?;
                    } else {
                        self.compile_word(&name);
                    }
                }
                Token::Lit(other) => {
                    return Err(CompileError::UnexpectedToken {
                        line: self.reader.line(),
                        col: self.reader.col(),
                        what: format!("{} {}", other.type_name(), other),
                    })
                }

                Token::DefStart => self.compile_definition()?,
                Token::ArrayStart => {
                    self.compile_array()?;
                    self.end_element(mode);
                }

                Token::DefEnd | Token::ArrayEnd | Token::Comma => {
                    return Err(CompileError::UnexpectedToken {
                        line: self.reader.line(),
                        col: self.reader.col(),
                        what: describe(&token),
                    })
                }
            }
            token = self.reader.next_token();
        }
        match mode {
            Mode::TopLevel => self.ctx.emit(Op::End),
            Mode::Definition => self.ctx.emit(Op::Return),
            _ => {}
        }
        Ok(())
    }

    /// Inside an array literal each element is appended as it is pushed.
    fn end_element(&mut self, mode: Mode) {
        if mode == Mode::Array {
            self.ctx.emit(Op::APush);
        }
    }

    /// Narrowest push encoding for a number literal.
    fn emit_number(&mut self, n: f64) {
        if n == n.trunc() && (-128.0..=127.0).contains(&n) {
            self.ctx.emit(Op::PushInt8);
            self.ctx.emit_byte(n as i8 as u8);
        } else if n == n.trunc() && (-32768.0..=32767.0).contains(&n) {
            self.ctx.emit(Op::PushInt16);
            self.ctx.emit_bytes(&(n as i16).to_le_bytes());
        } else {
            self.ctx.emit(Op::PushNumber);
            self.ctx.emit_bytes(&n.to_le_bytes());
        }
    }

    fn emit_string(&mut self, bytes: &[u8]) {
        if bytes.len() <= 255 {
            self.ctx.emit(Op::PushString);
            self.ctx.emit_byte(bytes.len() as u8);
        } else {
            self.ctx.emit(Op::PushStringLong);
            self.ctx.emit_bytes(&(bytes.len() as u32).to_le_bytes());
        }
        self.ctx.emit_bytes(bytes);
    }

    /// Name and ref literals carry a single length byte.
    fn emit_counted(&mut self, op: Op, name: &str) -> Result<(), CompileError> {
        if name.len() > 255 {
            return Err(CompileError::NameTooLong(name.to_string()));
        }
        self.ctx.emit(op);
        self.ctx.emit_byte(name.len() as u8);
        self.ctx.emit_bytes(name.as_bytes());
        Ok(())
    }

    /// Resolve a name against the dictionary: compiled words become
    /// calls, natives their opcode or an invoke. Unknown words are
    /// reported and skipped; compilation continues.
    fn compile_word(&mut self, name: &str) {
        match self.ctx.names.get(&Value::Name(name.into())) {
            Some(Value::CodeAddr(addr)) => {
                self.ctx.emit(Op::Call);
                push_addr24(&mut self.ctx.code, addr as usize);
            }
            Some(Value::Native(idx)) => match self.ctx.natives[idx as usize].op {
                Some(op) => self.ctx.emit(op),
                None => {
                    self.ctx.emit(Op::Invoke);
                    self.ctx.emit_byte((idx >> 8) as u8);
                    self.ctx.emit_byte(idx as u8);
                }
            },
            _ => {
                self.soft_errors += 1;
                eprintln!("Compilation error, undefined word: {}", name);
            }
        }
    }

    /// `cond if THEN-body [ else ELSE-body ] then`
    ///
    /// Reserves a 4-byte slot at the fork, compiles the branch bodies,
    /// then patches the slot (and for if/else, a second slot that skips
    /// the else branch after the then branch has run).
    fn compile_if(&mut self) -> Result<(), CompileError> {
        let fork = self.ctx.here();
        self.ctx.emit_bytes(&[0, 0, 0, 0]);
        self.block(Mode::If)?;
        if self.reader.last_token().is_name("then") {
            let after = self.ctx.here();
            patch_jump(&mut self.ctx.code, fork, Op::JmpFalse, after);
        } else {
            // terminated at "else": reserve a slot that skips the else
            // branch, compile it, then patch both slots
            let skip = self.ctx.here();
            self.ctx.emit_bytes(&[0, 0, 0, 0]);
            let else_entry = self.ctx.here();
            self.block(Mode::IfElse)?;
            patch_jump(&mut self.ctx.code, fork, Op::JmpFalse, else_entry);
            let after = self.ctx.here();
            patch_jump(&mut self.ctx.code, skip, Op::Jmp, after);
        }
        Ok(())
    }

    /// `: name body ;` — jump over the body at the definition site,
    /// then bind the name to the body's entry address.
    fn compile_definition(&mut self) -> Result<(), CompileError> {
        let fork = self.ctx.here();
        self.ctx.emit(Op::Jmp);
        self.ctx.emit_bytes(&[0, 0, 0]);
        let entry = self.ctx.here();
        let name = match self.reader.next_token() {
            Token::Lit(Value::Name(n)) => n,
            other => {
                return Err(CompileError::ExpectedDefName {
                    got: describe(&other),
                })
            }
        };
        self.block(Mode::Definition)?;
        let after = self.ctx.here();
        patch_jump(&mut self.ctx.code, fork, Op::Jmp, after);
        debug!(word = %name, entry, end = after, "defined word");
        self.ctx
            .names
            .put(Value::Name(name), Value::CodeAddr(entry as u32));
        Ok(())
    }

    /// `[ … ]` — push a fresh array, then compile elements until `]`;
    /// commas separate (possibly empty) items.
    fn compile_array(&mut self) -> Result<(), CompileError> {
        self.ctx.emit(Op::PushArray);
        loop {
            self.block(Mode::Array)?;
            if *self.reader.last_token() != Token::Comma {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiled(src: &str) -> (Ctx, usize) {
        let mut ctx = Ctx::new();
        let mut reader = Reader::new(src);
        let soft = compile(&mut ctx, &mut reader).expect("compile failed");
        (ctx, soft)
    }

    fn code(src: &str) -> Vec<u8> {
        let (ctx, soft) = compiled(src);
        assert_eq!(soft, 0, "unexpected soft errors for {:?}", src);
        ctx.code
    }

    #[test]
    fn integer_encodings_are_narrowest() {
        // opcode + operand (+ trailing End)
        assert_eq!(code("7").len(), 2 + 1);
        assert_eq!(code("-128").len(), 2 + 1);
        assert_eq!(code("300").len(), 3 + 1);
        assert_eq!(code("-32768").len(), 3 + 1);
        assert_eq!(code("70000").len(), 9 + 1);
        assert_eq!(code("3.25").len(), 9 + 1);
        assert_eq!(
            code("7")[0..2],
            [u8::from(Op::PushInt8), 7u8]
        );
        assert_eq!(code("-2")[1] as i8, -2);
    }

    #[test]
    fn fused_pick_and_move_are_single_bytes() {
        assert_eq!(code("2 pick"), vec![u8::from(Op::PickN) + 2, u8::from(Op::End)]);
        assert_eq!(code("5 move"), vec![u8::from(Op::MoveN) + 5, u8::from(Op::End)]);
        // 0 and 42 are outside the fused range
        assert_eq!(
            code("0 pick"),
            vec![
                u8::from(Op::PushInt8),
                0,
                u8::from(Op::PickN),
                u8::from(Op::End)
            ]
        );
        assert_eq!(
            code("42 pick"),
            vec![
                u8::from(Op::PushInt8),
                42,
                u8::from(Op::PickN),
                u8::from(Op::End)
            ]
        );
    }

    #[test]
    fn lookahead_token_is_not_lost() {
        // "3 4" peeks 4 while considering fusion for 3; both must compile
        assert_eq!(
            code("3 4"),
            vec![
                u8::from(Op::PushInt8),
                3,
                u8::from(Op::PushInt8),
                4,
                u8::from(Op::End)
            ]
        );
        assert_eq!(
            code("2 dup"),
            vec![
                u8::from(Op::PushInt8),
                2,
                u8::from(Op::Dup),
                u8::from(Op::End)
            ]
        );
    }

    #[test]
    fn if_without_else_backpatches_past_the_branch() {
        let bytes = code("true if 1 then");
        assert_eq!(bytes[0], u8::from(Op::PushTrue));
        assert_eq!(bytes[1], u8::from(Op::JmpFalse));
        let target = crate::bytecode::read_addr24(&bytes, 2) as usize;
        // the branch target is the end of the then-body
        assert_eq!(bytes[target], u8::from(Op::End));
        assert_eq!(bytes[5..7], [u8::from(Op::PushInt8), 1]);
    }

    #[test]
    fn if_else_backpatches_both_forks() {
        let bytes = code("true if 1 else 2 then");
        assert_eq!(bytes[1], u8::from(Op::JmpFalse));
        let else_entry = crate::bytecode::read_addr24(&bytes, 2) as usize;
        // the then-body ends with a jump over the else-body
        assert_eq!(bytes[else_entry - 4], u8::from(Op::Jmp));
        let after_else = crate::bytecode::read_addr24(&bytes, else_entry - 3) as usize;
        assert_eq!(bytes[else_entry], u8::from(Op::PushInt8));
        assert_eq!(bytes[after_else], u8::from(Op::End));
    }

    #[test]
    fn definitions_jump_over_their_body_and_bind_the_name() {
        let (ctx, soft) = compiled(": pi 3.1415 ;");
        assert_eq!(soft, 0);
        assert_eq!(ctx.code[0], u8::from(Op::Jmp));
        let over = crate::bytecode::read_addr24(&ctx.code, 1) as usize;
        assert_eq!(ctx.code[over], u8::from(Op::End));
        match ctx.names.get(&Value::Name("pi".into())) {
            Some(Value::CodeAddr(entry)) => {
                assert_eq!(entry, 4);
                // definition body ends with Return
                assert_eq!(ctx.code[over - 1], u8::from(Op::Return));
            }
            other => panic!("expected code address for pi, got {:?}", other),
        }
    }

    #[test]
    fn array_mode_quotes_names_and_appends_each_element() {
        assert_eq!(
            code("[2 *]"),
            vec![
                u8::from(Op::PushArray),
                u8::from(Op::PushInt8),
                2,
                u8::from(Op::APush),
                u8::from(Op::PushName),
                1,
                b'*',
                u8::from(Op::APush),
                u8::from(Op::End)
            ]
        );
        // commas are separators; empty arrays emit no APush
        assert_eq!(
            code("[]"),
            vec![u8::from(Op::PushArray), u8::from(Op::End)]
        );
    }

    #[test]
    fn toplevel_reuse_rewinds_the_end_opcode() {
        let mut ctx = Ctx::new();
        assert!(crate::eval(&mut ctx, "1"));
        let first_len = ctx.code.len();
        assert!(crate::eval(&mut ctx, "2"));
        // second program appended over the first End
        assert_eq!(ctx.code.len(), first_len + 2);
        assert_eq!(ctx.stack, vec![Value::Number(1.0), Value::Number(2.0)]);
    }

    #[test]
    fn unknown_words_are_soft_errors() {
        let (ctx, soft) = compiled("1 frobnicate 2");
        assert_eq!(soft, 1);
        // both numbers still compiled
        assert_eq!(
            ctx.code,
            vec![
                u8::from(Op::PushInt8),
                1,
                u8::from(Op::PushInt8),
                2,
                u8::from(Op::End)
            ]
        );
    }

    #[test]
    fn structural_markers_outside_their_construct_abort() {
        let mut ctx = Ctx::new();
        let mut reader = Reader::new("1 ;");
        assert!(matches!(
            compile(&mut ctx, &mut reader),
            Err(CompileError::UnexpectedToken { .. })
        ));
        let mut ctx = Ctx::new();
        let mut reader = Reader::new(": f 1");
        assert_eq!(
            compile(&mut ctx, &mut reader),
            Err(CompileError::UnexpectedEof)
        );
    }

    #[test]
    fn long_strings_use_the_four_byte_length() {
        let long = format!("\"{}\"", "x".repeat(300));
        let bytes = code(&long);
        assert_eq!(bytes[0], u8::from(Op::PushStringLong));
        assert_eq!(u32::from_le_bytes(bytes[1..5].try_into().unwrap()), 300);
    }
}
