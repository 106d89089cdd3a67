//! Interactive read–eval–print loop.
//!
//! Lines accumulate into a buffer until every `:` definition, `[`
//! array and string literal opened so far is closed again, so word
//! definitions can span lines before anything is compiled. After each
//! evaluation the value stack is echoed, which is the whole "print"
//! part of the loop — the stack persists between lines.

use std::io::{self, BufRead, Write};
use std::process;

use kokoki::{try_eval, Ctx};

/// Run the REPL until end of input or an explicit `exit`/`quit`.
///
/// Compile errors are reported and the loop continues; an unrecoverable
/// machine fault terminates the process with status 1, the same way a
/// failing script run does.
pub fn run(ctx: &mut Ctx) {
    println!("Kokoki {}", env!("CARGO_PKG_VERSION"));
    println!("Type exit or quit to leave.");

    let stdin = io::stdin();
    let mut buffer = String::new();
    loop {
        let prompt = if buffer.is_empty() { "> " } else { "... " };
        print!("{}", prompt);
        io::stdout().flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                println!();
                return;
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("Could not read input: {}", e);
                return;
            }
        }

        let trimmed = line.trim();
        if buffer.is_empty() && (trimmed == "exit" || trimmed == "quit") {
            return;
        }

        buffer.push_str(&line);
        if open_constructs(&buffer) > 0 {
            continue;
        }

        let source = std::mem::take(&mut buffer);
        // compile errors keep the loop alive; machine faults do not
        match try_eval(ctx, &source) {
            Ok(_) => echo_stack(ctx),
            Err(e) => {
                eprintln!("{}", e);
                process::exit(1);
            }
        }
    }
}

fn echo_stack(ctx: &Ctx) {
    if ctx.stack.is_empty() {
        return;
    }
    print!("STACK:");
    for (i, v) in ctx.stack.iter().enumerate() {
        print!("{}{}", if i == 0 { " " } else { " | " }, v);
    }
    println!();
}

/// Count constructs still open, ignoring delimiters inside strings,
/// comments and char literals. Positive means "wait for more input".
fn open_constructs(src: &str) -> i32 {
    let bytes = src.as_bytes();
    let mut depth = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'(' => {
                while i < bytes.len() && bytes[i] != b')' {
                    i += 1;
                }
            }
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    i += 1;
                }
                if i >= bytes.len() {
                    // string still open
                    return depth + 1;
                }
            }
            b'\'' if i + 2 < bytes.len() && bytes[i + 2] == b'\'' => i += 2,
            b':' | b'[' => depth += 1,
            b';' | b']' => depth -= 1,
            _ => {}
        }
        i += 1;
    }
    depth
}
