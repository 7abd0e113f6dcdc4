//! SC-011: RPN — the bundled reference engine.
//!
//! A postfix stack language. Tokens are whitespace separated:
//! - literals: `42`, `-7`, `2.5`, `"text"`, `true`, `false`, `null`
//! - names: read from parameters, captured variables, then the scope
//! - `=name`: pop and store into the scope
//! - `+ - * /`, `sum`, `len`, `neg`, `dup`, `swap`, `drop`
//!
//! `//` line comments and `/* */` block comments are skipped, so the cache
//! trailer and header lines are invisible to the compiler. The result is the
//! top of the stack, or null for a `Void` signature.

use super::{CompileUnit, CompiledBody, Engine};
use crate::core::error::{Result, ScriptError};
use crate::core::executable::{Body, ExecutableKind, Frame};
use crate::core::header;
use crate::core::types::{Type, Value};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const NAME: &str = "RPN";

fn fail(message: impl Into<String>) -> ScriptError {
    ScriptError::engine(NAME, message)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Op {
    Push(Value),
    Load(String),
    Store(String),
    Add,
    Sub,
    Mul,
    Div,
    Sum,
    Len,
    Neg,
    Dup,
    Swap,
    Drop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Program {
    ops: Vec<Op>,
    void: bool,
}

/// RPN engine. The `interpret` option produces bodies that cannot be cached.
#[derive(Debug, Clone, Default)]
pub struct RpnEngine {
    interpret: bool,
}

impl RpnEngine {
    pub fn interpreted() -> Self {
        Self { interpret: true }
    }
}

impl Engine for RpnEngine {
    fn name(&self) -> &str {
        NAME
    }

    fn short_name(&self) -> &str {
        "rpn"
    }

    fn parameter(&self) -> Option<&str> {
        self.interpret.then_some("interpret")
    }

    fn with_option(&self, param: Option<&str>) -> Result<Arc<dyn Engine>> {
        match param.map(str::trim) {
            None | Some("") | Some("compile") => Ok(Arc::new(RpnEngine::default())),
            Some("interpret") => Ok(Arc::new(RpnEngine::interpreted())),
            Some(other) => Err(fail(format!("unknown option '{}'", other))),
        }
    }

    fn is_compiled_code_serializable(&self) -> bool {
        !self.interpret
    }

    fn compile_body(&self, unit: &CompileUnit<'_>) -> Result<CompiledBody> {
        let source = &unit.code[header::end_of_ignored(unit.code)..];
        let ops = parse(source)?;
        let void = match unit.info.executable_kind() {
            ExecutableKind::Script => false,
            _ => unit.info.call_shape().0.return_type() == &Type::Void,
        };

        let stored: IndexSet<&str> = ops
            .iter()
            .filter_map(|op| match op {
                Op::Store(n) => Some(n.as_str()),
                _ => None,
            })
            .collect();
        let free: IndexSet<String> = ops
            .iter()
            .filter_map(|op| match op {
                Op::Load(n) => Some(n),
                _ => None,
            })
            .filter(|n| !unit.param_names.contains(*n) && !stored.contains(n.as_str()))
            .cloned()
            .collect();

        Ok(CompiledBody {
            body: Arc::new(RpnBody {
                program: Program { ops, void },
            }),
            free_names: free.into_iter().collect(),
        })
    }

    fn load_body(&self, image: &[u8]) -> Result<Arc<dyn Body>> {
        if self.interpret {
            return Err(fail("interpreted bodies have no image"));
        }
        let program: Program = bincode::deserialize(image)?;
        Ok(Arc::new(RpnBody { program }))
    }
}

#[derive(Debug)]
struct RpnBody {
    program: Program,
}

impl Body for RpnBody {
    fn image(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self.program)?)
    }

    fn run(&self, frame: &mut Frame<'_, '_>) -> Result<Value> {
        let mut stack: Vec<Value> = Vec::new();
        for op in &self.program.ops {
            match op {
                Op::Push(v) => stack.push(v.clone()),
                Op::Load(name) => {
                    let v = frame
                        .lookup(name)
                        .ok_or_else(|| fail(format!("undefined name '{}'", name)))?;
                    stack.push(v);
                }
                Op::Store(name) => {
                    let v = pop(&mut stack)?;
                    frame.store(name, v)?;
                }
                Op::Add | Op::Sub | Op::Mul | Op::Div => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    stack.push(arith(op, &a, &b)?);
                }
                Op::Sum => {
                    let items = match pop(&mut stack)? {
                        Value::Array { items, .. } => items,
                        other => return Err(fail(format!("sum needs an array, got {}", other.describe()))),
                    };
                    let mut total = Value::Int(0);
                    for item in items.iter().filter(|v| !v.is_null()) {
                        total = arith(&Op::Add, &total, item)?;
                    }
                    stack.push(total);
                }
                Op::Len => {
                    let n = match pop(&mut stack)? {
                        Value::Array { items, .. } => items.len(),
                        Value::Text(s) => s.chars().count(),
                        other => return Err(fail(format!("len needs an array or text, got {}", other.describe()))),
                    };
                    let n = i32::try_from(n).map_err(|_| fail("length does not fit an Integer"))?;
                    stack.push(Value::Int(n));
                }
                Op::Neg => {
                    let v = pop(&mut stack)?;
                    stack.push(arith(&Op::Sub, &Value::Int(0), &v)?);
                }
                Op::Dup => {
                    let v = stack.last().cloned().ok_or_else(|| fail("stack underflow"))?;
                    stack.push(v);
                }
                Op::Swap => {
                    let n = stack.len();
                    if n < 2 {
                        return Err(fail("stack underflow"));
                    }
                    stack.swap(n - 1, n - 2);
                }
                Op::Drop => {
                    pop(&mut stack)?;
                }
            }
        }
        if self.program.void {
            return Ok(Value::Null);
        }
        Ok(stack.pop().unwrap_or(Value::Null))
    }
}

fn pop(stack: &mut Vec<Value>) -> Result<Value> {
    stack.pop().ok_or_else(|| fail("stack underflow"))
}

fn symbol(op: &Op) -> &'static str {
    match op {
        Op::Add => "+",
        Op::Sub => "-",
        Op::Mul => "*",
        _ => "/",
    }
}

fn arith(op: &Op, a: &Value, b: &Value) -> Result<Value> {
    if matches!(op, Op::Add) && (matches!(a, Value::Text(_)) || matches!(b, Value::Text(_))) {
        return Ok(Value::Text(format!("{}{}", a, b)));
    }
    let mismatch = || {
        fail(format!(
            "cannot apply {} to {} and {}",
            symbol(op),
            a.describe(),
            b.describe()
        ))
    };
    if !a.is_numeric() || !b.is_numeric() {
        return Err(mismatch());
    }

    if a.is_real() || b.is_real() {
        let (x, y) = (a.as_f64().ok_or_else(mismatch)?, b.as_f64().ok_or_else(mismatch)?);
        let r = match op {
            Op::Add => x + y,
            Op::Sub => x - y,
            Op::Mul => x * y,
            _ => x / y,
        };
        return Ok(Value::Double(r));
    }

    let (x, y) = (a.as_i64().ok_or_else(mismatch)?, b.as_i64().ok_or_else(mismatch)?);
    let r = match op {
        Op::Add => x.checked_add(y),
        Op::Sub => x.checked_sub(y),
        Op::Mul => x.checked_mul(y),
        _ => {
            if y == 0 {
                return Err(fail("division by zero"));
            }
            x.checked_div(y)
        }
    }
    .ok_or_else(|| fail("integer overflow"))?;

    let wide = matches!(a, Value::Long(_)) || matches!(b, Value::Long(_));
    match i32::try_from(r) {
        Ok(small) if !wide => Ok(Value::Int(small)),
        _ => Ok(Value::Long(r)),
    }
}

fn parse(src: &str) -> Result<Vec<Op>> {
    let mut ops = Vec::new();
    let mut pos = 0;
    while pos < src.len() {
        let rest = &src[pos..];
        let Some(c) = rest.chars().next() else {
            break;
        };
        if c.is_whitespace() {
            pos += c.len_utf8();
            continue;
        }
        if rest.starts_with("//") {
            pos += rest.find('\n').unwrap_or(rest.len());
            continue;
        }
        if rest.starts_with("/*") {
            let end = rest[2..]
                .find("*/")
                .ok_or_else(|| fail(format!("unterminated comment at offset {}", pos)))?;
            pos += end + 4;
            continue;
        }
        if c == '"' {
            let (text, used) = parse_string(rest).ok_or_else(|| fail(format!("unterminated string at offset {}", pos)))?;
            ops.push(Op::Push(Value::Text(text)));
            pos += used;
            continue;
        }
        let word_len = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let word = &rest[..word_len];
        ops.push(parse_word(word).ok_or_else(|| fail(format!("unexpected token '{}' at offset {}", word, pos)))?);
        pos += word_len;
    }
    Ok(ops)
}

/// Decoded string and the number of bytes consumed, quotes included.
fn parse_string(rest: &str) -> Option<(String, usize)> {
    let mut out = String::new();
    let mut chars = rest.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Some((out, i + 1)),
            '\\' => {
                let (_, e) = chars.next()?;
                out.push(match e {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
            }
            c => out.push(c),
        }
    }
    None
}

fn is_name(word: &str) -> bool {
    let mut chars = word.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn parse_word(word: &str) -> Option<Op> {
    let op = match word {
        "+" => Op::Add,
        "-" => Op::Sub,
        "*" => Op::Mul,
        "/" => Op::Div,
        "sum" => Op::Sum,
        "len" => Op::Len,
        "neg" => Op::Neg,
        "dup" => Op::Dup,
        "swap" => Op::Swap,
        "drop" => Op::Drop,
        "true" => Op::Push(Value::Bool(true)),
        "false" => Op::Push(Value::Bool(false)),
        "null" => Op::Push(Value::Null),
        _ => {
            if let Some(target) = word.strip_prefix('=') {
                return is_name(target).then(|| Op::Store(target.to_string()));
            }
            if is_name(word) {
                return Some(Op::Load(word.to_string()));
            }
            if let Ok(v) = word.parse::<i32>() {
                return Some(Op::Push(Value::Int(v)));
            }
            if let Ok(v) = word.parse::<i64>() {
                return Some(Op::Push(Value::Long(v)));
            }
            let numeric = word.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '.');
            return match word.parse::<f64>() {
                Ok(v) if numeric && v.is_finite() => Some(Op::Push(Value::Double(v))),
                _ => None,
            };
        }
    };
    Some(op)
}
