//! # Native words
//!
//! The builtin vocabulary. Every entry is either **opcode-backed** (the
//! compiler inlines a single bytecode op — `+`, `dup`, `apush`, …) or
//! **function-backed** (the compiler emits `Invoke` with the word's
//! 16-bit table index). Hosts extend the table at runtime through
//! [`crate::register_native`].
//!
//! Function-backed words follow one convention: pop operands, check
//! types, push either the result or an `Error` value. They return
//! `Result` only for structural VM faults bubbling out of nested block
//! execution; ordinary failures never unwind.
//!
//! ## Blocks
//! An array is data until a word treats it as code. `exec`, `each`,
//! `fold`, `filter`, `while`, `times`, `cond` and the reference-update
//! words walk the array: literal elements push themselves and names
//! resolve through the dictionary — to an opcode, a native function, or
//! a compiled word which is then driven on the VM. `[2 *] each` works
//! because array literals quote their names.

use std::cell::RefCell;
use std::io::BufRead;
use std::rc::Rc;

use crate::bytecode::Op;
use crate::error::VmError;
use crate::reader::{Reader, Token};
use crate::value::Value;
use crate::vm::{apply_op, run_word, Ctx};

/// Host-callable native word implementation.
pub type NativeFn = fn(&mut Ctx) -> Result<(), VmError>;

/// One entry of the native word table.
pub(crate) struct NativeDef {
    pub(crate) name: String,
    /// Dedicated opcode; the compiler inlines this instead of `Invoke`.
    pub(crate) op: Option<Op>,
    pub(crate) run: Option<NativeFn>,
}

struct Builtin {
    name: &'static str,
    op: Option<Op>,
    run: Option<NativeFn>,
}

const fn op_word(name: &'static str, op: Op) -> Builtin {
    Builtin {
        name,
        op: Some(op),
        run: None,
    }
}

const fn fn_word(name: &'static str, run: NativeFn) -> Builtin {
    Builtin {
        name,
        op: None,
        run: Some(run),
    }
}

/// The builtin vocabulary, installed into every fresh context.
const BUILTINS: &[Builtin] = &[
    op_word("+", Op::Plus),
    op_word("-", Op::Minus),
    op_word("*", Op::Mul),
    op_word("/", Op::Div),
    op_word("<", Op::Lt),
    op_word(">", Op::Gt),
    op_word("<=", Op::Lte),
    op_word(">=", Op::Gte),
    op_word("%", Op::Mod),
    op_word("<<", Op::Shl),
    op_word(">>", Op::Shr),
    op_word("=", Op::Eq),
    op_word("and", Op::And),
    op_word("or", Op::Or),
    op_word("dup", Op::Dup),
    op_word("drop", Op::Drop),
    op_word("swap", Op::Swap),
    op_word("rot", Op::Rot),
    op_word("over", Op::Over),
    op_word("nip", Op::Nip),
    op_word("tuck", Op::Tuck),
    op_word("move", Op::MoveN),
    op_word("pick", Op::PickN),
    op_word(".", Op::Print),
    op_word("apush", Op::APush),
    op_word("hmput", Op::HmPut),
    op_word("hashmap", Op::PushHashMap),
    fn_word("slurp", native_slurp),
    fn_word("nl", native_nl),
    fn_word("cat", native_cat),
    fn_word("sort", native_sort),
    fn_word("compare", native_compare),
    fn_word("len", native_len),
    fn_word("aget", native_aget),
    fn_word("reverse", native_reverse),
    fn_word("aset", native_aset),
    fn_word("adel", native_adel),
    fn_word("slice", native_slice),
    fn_word("?", native_deref),
    fn_word("!", native_reset),
    fn_word("!!", native_update_ref),
    fn_word("!?", native_update_ref_keep),
    fn_word("copy", native_copy),
    fn_word("dump", native_dump),
    fn_word("read", native_read),
    fn_word("not", native_not),
    fn_word("exec", native_exec),
    fn_word("each", native_each),
    fn_word("fold", native_fold),
    fn_word("foldi", native_foldi),
    fn_word("while", native_while),
    fn_word("filter", native_filter),
    fn_word("times", native_times),
    fn_word("cond", native_cond),
    fn_word("eval", native_eval),
    fn_word("use", native_use),
    fn_word("hmget", native_hmget),
    fn_word("hmdel", native_hmdel),
    fn_word("lines", native_lines),
    fn_word("split", native_split),
    fn_word("join", native_join),
];

/// Install the builtin table and bind every word in the dictionary.
pub(crate) fn install(ctx: &mut Ctx) {
    for builtin in BUILTINS {
        let idx = ctx.natives.len() as u16;
        ctx.natives.push(NativeDef {
            name: builtin.name.to_string(),
            op: builtin.op,
            run: builtin.run,
        });
        ctx.names
            .put(Value::Name(builtin.name.into()), Value::Native(idx));
    }
}

/// Append a host word to the table and bind its name.
pub(crate) fn register(ctx: &mut Ctx, name: &str, run: NativeFn) {
    let idx = ctx.natives.len() as u16;
    ctx.natives.push(NativeDef {
        name: name.to_string(),
        op: None,
        run: Some(run),
    });
    ctx.names.put(Value::Name(name.into()), Value::Native(idx));
}

/// Dispatch a native word by table index.
pub(crate) fn invoke(ctx: &mut Ctx, idx: u16) -> Result<(), VmError> {
    let (op, run) = match ctx.natives.get(idx as usize) {
        Some(def) => (def.op, def.run),
        None => return Err(VmError::UnknownNative(idx)),
    };
    if let Some(op) = op {
        apply_op(ctx, op);
        return Ok(());
    }
    match run {
        Some(run) => run(ctx),
        None => Err(VmError::UnknownNative(idx)),
    }
}

/// Execute one quoted value: names resolve through the dictionary,
/// everything else pushes itself.
pub(crate) fn exec_value(ctx: &mut Ctx, v: &Value) -> Result<(), VmError> {
    match v {
        Value::Name(name) => match ctx.names.get(v) {
            Some(Value::Native(idx)) => invoke(ctx, idx),
            Some(Value::CodeAddr(addr)) => run_word(ctx, addr),
            _ => {
                eprintln!("Undefined name: {}", name);
                Ok(())
            }
        },
        other => {
            ctx.push(other.clone());
            Ok(())
        }
    }
}

/// Run a value as code: an array is a block and is walked element by
/// element; anything else executes as a single quoted value.
pub(crate) fn exec_block(ctx: &mut Ctx, code: &Value) -> Result<(), VmError> {
    match code {
        Value::Array(a) => {
            let items: Vec<Value> = a.borrow().clone();
            for item in &items {
                exec_value(ctx, item)?;
            }
            Ok(())
        }
        other => exec_value(ctx, other),
    }
}

fn fail(ctx: &mut Ctx, msg: impl Into<String>) {
    ctx.push(Value::error(msg));
}

/// `(filename -- contents)` read a whole file onto the stack.
fn native_slurp(ctx: &mut Ctx) -> Result<(), VmError> {
    let name = ctx.pop();
    let Value::Str(s) = &name else {
        fail(ctx, "Slurp requires a string filename");
        return Ok(());
    };
    let path = String::from_utf8_lossy(&s.borrow()).into_owned();
    match std::fs::read(&path) {
        Ok(bytes) => ctx.push(Value::string(bytes)),
        Err(e) => fail(ctx, format!("Could not read file {}: {}", path, e)),
    }
    Ok(())
}

/// `( -- )` print a newline.
fn native_nl(_ctx: &mut Ctx) -> Result<(), VmError> {
    println!();
    Ok(())
}

/// Number usable as a string byte.
fn byte_of(v: &Value) -> Option<u8> {
    match v.as_number() {
        Some(n) if (0.0..=255.0).contains(&n.trunc()) => Some(n as i64 as u8),
        _ => None,
    }
}

/// `(a b -- ab)` join two strings, or a string and a byte value.
fn native_cat(ctx: &mut Ctx) -> Result<(), VmError> {
    let b = ctx.pop();
    let a = ctx.pop();
    match (&a, &b) {
        (Value::Str(sa), Value::Str(sb)) => {
            let mut out = sa.borrow().clone();
            out.extend_from_slice(&sb.borrow());
            ctx.push(Value::string(out));
        }
        (Value::Str(sa), _) if byte_of(&b).is_some() => {
            let mut out = sa.borrow().clone();
            out.push(byte_of(&b).unwrap());
            ctx.push(Value::string(out));
        }
        (_, Value::Str(sb)) if byte_of(&a).is_some() => {
            let mut out = vec![byte_of(&a).unwrap()];
            out.extend_from_slice(&sb.borrow());
            ctx.push(Value::string(out));
        }
        _ => fail(
            ctx,
            "Expected two strings or a string and a number (0-255) to join",
        ),
    }
    Ok(())
}

/// `(arr -- arr)` sort the array in place.
fn native_sort(ctx: &mut Ctx) -> Result<(), VmError> {
    let v = ctx.pop();
    match &v {
        Value::Array(a) => {
            a.borrow_mut().sort_by(|x, y| x.compare(y));
            ctx.push(v.clone());
        }
        _ => fail(ctx, "Expected array to sort"),
    }
    Ok(())
}

/// `(a b -- order)` push -1, 0 or 1.
fn native_compare(ctx: &mut Ctx) -> Result<(), VmError> {
    let b = ctx.pop();
    let a = ctx.pop();
    let order = match a.compare(&b) {
        std::cmp::Ordering::Less => -1.0,
        std::cmp::Ordering::Equal => 0.0,
        std::cmp::Ordering::Greater => 1.0,
    };
    ctx.push(Value::Number(order));
    Ok(())
}

/// `(v -- v len)` length of an array or string.
fn native_len(ctx: &mut Ctx) -> Result<(), VmError> {
    let v = ctx.pop();
    let len = match &v {
        Value::Array(a) => Some(a.borrow().len() as f64),
        Value::Str(s) => Some(s.borrow().len() as f64),
        _ => None,
    };
    ctx.push(v);
    match len {
        Some(n) => ctx.push(Value::Number(n)),
        None => fail(ctx, "Expected array or string for len"),
    }
    Ok(())
}

/// `(arr idx -- arr val)` element of an array, or byte of a string.
fn native_aget(ctx: &mut Ctx) -> Result<(), VmError> {
    let idx = ctx.pop();
    let arr = ctx.peek();
    let result = match (&arr, idx.as_number()) {
        (Value::Array(_) | Value::Str(_), None) => Value::error("Expected number index to get"),
        (Value::Array(a), Some(n)) => {
            let items = a.borrow();
            index_of(n, items.len())
                .map(|i| items[i].clone())
                .unwrap_or_else(|| bounds_error(n, items.len()))
        }
        (Value::Str(s), Some(n)) => {
            let bytes = s.borrow();
            index_of(n, bytes.len())
                .map(|i| Value::Number(f64::from(bytes[i])))
                .unwrap_or_else(|| bounds_error(n, bytes.len()))
        }
        _ => Value::error("Expected array or string to get from"),
    };
    ctx.push(result);
    Ok(())
}

fn index_of(n: f64, len: usize) -> Option<usize> {
    let i = n as i64;
    if i >= 0 && (i as usize) < len {
        Some(i as usize)
    } else {
        None
    }
}

fn bounds_error(n: f64, len: usize) -> Value {
    Value::error(format!(
        "Index out of bounds {} (0 - {} inclusive)",
        n as i64,
        len as i64 - 1
    ))
}

/// `(v -- v)` reverse a string's bytes or an array's elements in place.
fn native_reverse(ctx: &mut Ctx) -> Result<(), VmError> {
    let v = ctx.pop();
    match &v {
        Value::Str(s) => s.borrow_mut().reverse(),
        Value::Array(a) => a.borrow_mut().reverse(),
        _ => {
            fail(ctx, "Expected string or array to reverse");
            return Ok(());
        }
    }
    ctx.push(v);
    Ok(())
}

/// `(arr idx val -- arr)` store an element; index == length appends.
fn native_aset(ctx: &mut Ctx) -> Result<(), VmError> {
    let val = ctx.pop();
    let idx = ctx.pop();
    let arr = ctx.peek();
    let Value::Array(a) = &arr else {
        fail(ctx, "Expected array to set");
        return Ok(());
    };
    let Some(n) = idx.as_number() else {
        fail(ctx, "Expected number index to set");
        return Ok(());
    };
    let mut items = a.borrow_mut();
    let i = n as i64;
    let size = items.len() as i64;
    if i < 0 || i > size {
        let msg = format!("Index out of bounds {} (0 - {} inclusive)", i, size);
        drop(items);
        fail(ctx, msg);
    } else if i == size {
        items.push(val);
    } else {
        items[i as usize] = val;
    }
    Ok(())
}

/// `(arr idx -- arr)` delete an element, closing the gap.
fn native_adel(ctx: &mut Ctx) -> Result<(), VmError> {
    let idx = ctx.pop();
    let arr = ctx.peek();
    let Value::Array(a) = &arr else {
        fail(ctx, "Expected array to delete from");
        return Ok(());
    };
    let Some(n) = idx.as_number() else {
        fail(ctx, "Expected number index to delete");
        return Ok(());
    };
    let mut items = a.borrow_mut();
    match index_of(n, items.len()) {
        Some(i) => {
            items.remove(i);
        }
        None => {
            let msg = format!(
                "Index out of bounds {} (0 - {} inclusive)",
                n as i64,
                items.len() as i64 - 1
            );
            drop(items);
            fail(ctx, msg);
        }
    }
    Ok(())
}

/// `(v from to -- v copy)` copy a slice of an array or string.
fn native_slice(ctx: &mut Ctx) -> Result<(), VmError> {
    let to = ctx.pop();
    let from = ctx.pop();
    let v = ctx.pop();
    let (Some(from_n), Some(to_n)) = (from.as_number(), to.as_number()) else {
        fail(ctx, "Expected number range to slice");
        return Ok(());
    };
    let len = match &v {
        Value::Str(s) => s.borrow().len(),
        Value::Array(a) => a.borrow().len(),
        _ => {
            fail(ctx, "Expected array or string to copy");
            return Ok(());
        }
    };
    let (start, end) = (from_n as i64, to_n as i64);
    if start < 0 || start > len as i64 || end < 0 || end > len as i64 {
        fail(
            ctx,
            format!(
                "Copy range ({} - {}) out of bounds, valid range: 0 - {}",
                start, end, len
            ),
        );
        return Ok(());
    }
    if start > end {
        fail(
            ctx,
            format!("Copy start can't be after end ({} > {})", start, end),
        );
        return Ok(());
    }
    let (start, end) = (start as usize, end as usize);
    let copy = match &v {
        Value::Str(s) => Value::string(s.borrow()[start..end].to_vec()),
        Value::Array(a) => Value::array_from(a.borrow()[start..end].to_vec()),
        _ => unreachable!(),
    };
    ctx.push(v);
    ctx.push(copy);
    Ok(())
}

/// `(@ref -- val)` dereference a variable cell; nil when unbound.
fn native_deref(ctx: &mut Ctx) -> Result<(), VmError> {
    let r = ctx.pop();
    if !matches!(r, Value::RefName(_)) {
        fail(ctx, "Expected variable reference.");
        return Ok(());
    }
    match ctx.names.get(&r) {
        Some(Value::RefValue(cell)) => {
            let v = cell.borrow().clone();
            ctx.push(v);
        }
        _ => ctx.push(Value::Nil),
    }
    Ok(())
}

/// `(@ref val -- )` store into a variable cell, creating it on first use.
fn native_reset(ctx: &mut Ctx) -> Result<(), VmError> {
    let val = ctx.pop();
    let r = ctx.pop();
    if !matches!(r, Value::RefName(_)) {
        fail(ctx, "Expected variable reference.");
        return Ok(());
    }
    match ctx.names.get(&r) {
        Some(Value::RefValue(cell)) => *cell.borrow_mut() = val,
        _ => {
            ctx.names
                .put(r, Value::RefValue(Rc::new(RefCell::new(val))));
        }
    }
    Ok(())
}

fn update_ref(ctx: &mut Ctx, keep: bool) -> Result<(), VmError> {
    let code = ctx.pop();
    let r = ctx.pop();
    if !matches!(r, Value::RefName(_)) {
        fail(ctx, "Expected variable reference.");
        return Ok(());
    }
    let cell = match ctx.names.get(&r) {
        Some(Value::RefValue(cell)) => cell,
        _ => {
            let cell = Rc::new(RefCell::new(Value::Nil));
            ctx.names.put(r, Value::RefValue(cell.clone()));
            cell
        }
    };
    let current = cell.borrow().clone();
    ctx.push(current);
    exec_block(ctx, &code)?;
    let next = ctx.pop();
    *cell.borrow_mut() = next.clone();
    if keep {
        ctx.push(next);
    }
    Ok(())
}

/// `(@ref code -- )` run code on the cell's value, store the result.
fn native_update_ref(ctx: &mut Ctx) -> Result<(), VmError> {
    update_ref(ctx, false)
}

/// `(@ref code -- val)` like `!!` but leaves the new value on the stack.
fn native_update_ref_keep(ctx: &mut Ctx) -> Result<(), VmError> {
    update_ref(ctx, true)
}

/// `(v -- copy)` recursive copy with fresh storage.
fn native_copy(ctx: &mut Ctx) -> Result<(), VmError> {
    let v = ctx.pop();
    ctx.push(v.deep_copy());
    Ok(())
}

/// `( -- )` print the whole stack for debugging.
fn native_dump(ctx: &mut Ctx) -> Result<(), VmError> {
    print!("STACK({}):", ctx.stack.len());
    for v in &ctx.stack {
        print!(" {}", v);
    }
    println!();
    Ok(())
}

/// `( -- val)` read one token from standard input.
fn native_read(ctx: &mut Ctx) -> Result<(), VmError> {
    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line).is_err() {
        ctx.push(Value::Nil);
        return Ok(());
    }
    match Reader::new(&line).next_token() {
        Token::Lit(v) => ctx.push(v),
        Token::Err(msg) => ctx.push(Value::Error(msg)),
        _ => ctx.push(Value::Nil),
    }
    Ok(())
}

/// `(v -- bool)` truthiness negation.
fn native_not(ctx: &mut Ctx) -> Result<(), VmError> {
    let v = ctx.pop();
    ctx.push(Value::bool(!v.truthy()));
    Ok(())
}

/// `(code -- …)` run a block or a single quoted value.
fn native_exec(ctx: &mut Ctx) -> Result<(), VmError> {
    let code = ctx.pop();
    exec_block(ctx, &code)
}

/// `(v code -- v)` run code on every element (or string byte), storing
/// each result back in place.
fn native_each(ctx: &mut Ctx) -> Result<(), VmError> {
    let code = ctx.pop();
    let target = ctx.pop();
    match &target {
        Value::Array(a) => {
            let mut i = 0;
            loop {
                let item = {
                    let items = a.borrow();
                    if i >= items.len() {
                        break;
                    }
                    items[i].clone()
                };
                ctx.push(item);
                exec_block(ctx, &code)?;
                let result = ctx.pop();
                let mut items = a.borrow_mut();
                if i < items.len() {
                    items[i] = result;
                }
                i += 1;
            }
        }
        Value::Str(s) => {
            let mut i = 0;
            loop {
                let byte = {
                    let bytes = s.borrow();
                    if i >= bytes.len() {
                        break;
                    }
                    bytes[i]
                };
                ctx.push(Value::Number(f64::from(byte)));
                exec_block(ctx, &code)?;
                let result = ctx.pop();
                let Some(n) = result.as_number() else {
                    fail(
                        ctx,
                        format!("Can't store non-number value to string index: {}", i),
                    );
                    return Ok(());
                };
                let mut bytes = s.borrow_mut();
                if i < bytes.len() {
                    bytes[i] = n as i64 as u8;
                }
                i += 1;
            }
        }
        _ => {
            fail(ctx, "Expected array or string to go through");
            return Ok(());
        }
    }
    ctx.push(target);
    Ok(())
}

fn fold_impl(ctx: &mut Ctx, init: bool) -> Result<(), VmError> {
    let code = ctx.pop();
    let target = ctx.pop();
    match &target {
        Value::Array(a) => {
            let items = a.borrow().clone();
            for (i, item) in items.into_iter().enumerate() {
                ctx.push(item);
                if i > 0 || init {
                    exec_block(ctx, &code)?;
                }
            }
        }
        Value::Str(s) => {
            let bytes = s.borrow().clone();
            for (i, byte) in bytes.into_iter().enumerate() {
                ctx.push(Value::Number(f64::from(byte)));
                if i > 0 || init {
                    exec_block(ctx, &code)?;
                }
            }
        }
        _ => fail(ctx, "Expected array or string to fold"),
    }
    Ok(())
}

/// `(v code -- acc)` fold elements pairwise: `[1 2 3 0] [+] fold` → 6.
fn native_fold(ctx: &mut Ctx) -> Result<(), VmError> {
    fold_impl(ctx, false)
}

/// Like `fold`, but the code also runs for the first element.
fn native_foldi(ctx: &mut Ctx) -> Result<(), VmError> {
    fold_impl(ctx, true)
}

/// `(code -- …)` run the block while it leaves a truthy value; always
/// runs at least once.
fn native_while(ctx: &mut Ctx) -> Result<(), VmError> {
    let code = ctx.pop();
    loop {
        exec_block(ctx, &code)?;
        let condition = ctx.pop();
        if !condition.truthy() {
            return Ok(());
        }
    }
}

/// `(arr code -- arr)` keep the elements for which code yields truthy.
fn native_filter(ctx: &mut Ctx) -> Result<(), VmError> {
    let code = ctx.pop();
    let target = ctx.pop();
    let Value::Array(a) = &target else {
        fail(ctx, "Expected array to filter");
        return Ok(());
    };
    let items = a.borrow().clone();
    let mut kept = Vec::new();
    for item in items {
        ctx.push(item.clone());
        exec_block(ctx, &code)?;
        if ctx.pop().truthy() {
            kept.push(item);
        }
    }
    *a.borrow_mut() = kept;
    ctx.push(target);
    Ok(())
}

/// `(code n -- …)` run the block n times.
fn native_times(ctx: &mut Ctx) -> Result<(), VmError> {
    let times = ctx.pop();
    let code = ctx.pop();
    let Some(n) = times.as_number() else {
        fail(ctx, "Expected number of times");
        return Ok(());
    };
    for _ in 0..(n as i64) {
        exec_block(ctx, &code)?;
    }
    Ok(())
}

/// `(arr -- …)` run condition/action pairs until a condition is truthy,
/// then run its action.
fn native_cond(ctx: &mut Ctx) -> Result<(), VmError> {
    let v = ctx.pop();
    let pairs = match &v {
        Value::Array(a) if a.borrow().len() % 2 == 0 => a.borrow().clone(),
        _ => {
            fail(
                ctx,
                "Cond requires an array with alternating condition/action pairs.",
            );
            return Ok(());
        }
    };
    for pair in pairs.chunks(2) {
        exec_block(ctx, &pair[0])?;
        if ctx.pop().truthy() {
            exec_block(ctx, &pair[1])?;
            return Ok(());
        }
    }
    Ok(())
}

/// `(source -- …)` compile and run a string against this context.
fn native_eval(ctx: &mut Ctx) -> Result<(), VmError> {
    let v = ctx.pop();
    let Value::Str(s) = &v else {
        fail(ctx, "Expected string to eval");
        return Ok(());
    };
    let source = String::from_utf8_lossy(&s.borrow()).into_owned();
    // the appended program executes with its own pc; ours is restored
    let saved_pc = ctx.pc;
    let result = crate::try_eval(ctx, &source);
    ctx.pc = saved_pc;
    result.map(|_| ())
}

/// `(filename -- …)` slurp a file and eval its contents.
fn native_use(ctx: &mut Ctx) -> Result<(), VmError> {
    native_slurp(ctx)?;
    if matches!(ctx.peek(), Value::Error(_)) {
        return Ok(());
    }
    native_eval(ctx)
}

/// `(hm key -- hm val)` look up a mapping; nil when absent.
fn native_hmget(ctx: &mut Ctx) -> Result<(), VmError> {
    let key = ctx.pop();
    let hm = ctx.peek();
    match &hm {
        Value::HashMap(h) => {
            let v = h.borrow().get(&key).unwrap_or(Value::Nil);
            ctx.push(v);
        }
        _ => fail(ctx, "Expected hashmap to get from"),
    }
    Ok(())
}

/// `(hm key -- hm)` delete a mapping.
fn native_hmdel(ctx: &mut Ctx) -> Result<(), VmError> {
    let key = ctx.pop();
    let hm = ctx.peek();
    match &hm {
        Value::HashMap(h) => {
            h.borrow_mut().remove(&key);
        }
        _ => fail(ctx, "Expected hashmap to delete from"),
    }
    Ok(())
}

/// `(str -- arr)` split a string into an array of lines.
fn native_lines(ctx: &mut Ctx) -> Result<(), VmError> {
    let v = ctx.pop();
    let Value::Str(s) = &v else {
        fail(ctx, "Expected string to split into lines");
        return Ok(());
    };
    let bytes = s.borrow();
    let mut out: Vec<Value> = bytes
        .split(|&b| b == b'\n')
        .map(|line| Value::string(line.to_vec()))
        .collect();
    if bytes.last() == Some(&b'\n') {
        out.pop();
    }
    drop(bytes);
    ctx.push(Value::array_from(out));
    Ok(())
}

/// `(str sep -- arr)` split a string by a separator string.
fn native_split(ctx: &mut Ctx) -> Result<(), VmError> {
    let sep = ctx.pop();
    let v = ctx.pop();
    let (Value::Str(s), Value::Str(sep)) = (&v, &sep) else {
        fail(ctx, "Expected string and separator to split");
        return Ok(());
    };
    let sep = sep.borrow();
    if sep.is_empty() {
        fail(ctx, "Expected non-empty separator");
        return Ok(());
    }
    let bytes = s.borrow();
    let mut out = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + sep.len() <= bytes.len() {
        if bytes[i..i + sep.len()] == sep[..] {
            out.push(Value::string(bytes[start..i].to_vec()));
            i += sep.len();
            start = i;
        } else {
            i += 1;
        }
    }
    out.push(Value::string(bytes[start..].to_vec()));
    drop(bytes);
    ctx.push(Value::array_from(out));
    Ok(())
}

/// `(arr sep -- str)` join an array of strings with a separator.
fn native_join(ctx: &mut Ctx) -> Result<(), VmError> {
    let sep = ctx.pop();
    let v = ctx.pop();
    let (Value::Array(a), Value::Str(sep)) = (&v, &sep) else {
        fail(ctx, "Expected array and separator to join");
        return Ok(());
    };
    let mut out = Vec::new();
    for (i, item) in a.borrow().iter().enumerate() {
        let Value::Str(s) = item else {
            fail(ctx, "Expected array of strings to join");
            return Ok(());
        };
        if i > 0 {
            out.extend_from_slice(&sep.borrow());
        }
        out.extend_from_slice(&s.borrow());
    }
    ctx.push(Value::string(out));
    Ok(())
}
