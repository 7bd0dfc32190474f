//! Callable values: user functions (closures) and host-provided natives.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use chrono::Utc;
use log::debug;

use crate::ast::FunctionDecl;
use crate::class::LoxInstance;
use crate::environment::{CapturedScopes, EnvRef, Environment};
use crate::value::Value;

/// A user-defined function or method paired with the scope it was declared
/// in.
pub struct LoxFunction {
    pub declaration: Rc<FunctionDecl>,
    pub closure: EnvRef,

    /// `init` methods always hand back `this`, whatever their body returns.
    pub is_initializer: bool,
}

impl LoxFunction {
    pub fn new(declaration: Rc<FunctionDecl>, closure: EnvRef, is_initializer: bool) -> Self {
        Self {
            declaration,
            closure,
            is_initializer,
        }
    }

    pub fn name(&self) -> &str {
        &self.declaration.name.lexeme
    }

    pub fn arity(&self) -> usize {
        self.declaration.params.len()
    }

    /// Produce a copy of this method whose closure binds `this` to
    /// `instance`, so the method keeps its receiver when passed around.
    ///
    /// The new scope is registered with `captured`: storing the bound method
    /// on its own instance would otherwise leave an unreachable cycle.
    pub fn bind(
        &self,
        instance: Rc<RefCell<LoxInstance>>,
        captured: &mut CapturedScopes,
    ) -> LoxFunction {
        debug!("Binding method '{}' to an instance", self.name());

        let env = Environment::child_of(&self.closure);
        env.borrow_mut().define("this", Value::Instance(instance));
        captured.track(&env);

        LoxFunction::new(Rc::clone(&self.declaration), env, self.is_initializer)
    }
}

// The closure may (indirectly) contain this very function, so never recurse
// into it when formatting.
impl fmt::Debug for LoxFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoxFunction")
            .field("name", &self.name())
            .field("arity", &self.arity())
            .field("is_initializer", &self.is_initializer)
            .finish()
    }
}

/// Signature of a host function.  Errors are plain messages; the interpreter
/// attaches the call-site line.
pub type NativeFn = fn(&[Value]) -> Result<Value, String>;

/// A function implemented by the host.
#[derive(Debug)]
pub struct NativeFunction {
    pub name: &'static str,
    pub arity: usize,
    pub func: NativeFn,
}

impl NativeFunction {
    pub const fn new(name: &'static str, arity: usize, func: NativeFn) -> Self {
        Self { name, arity, func }
    }
}

/// The natives every fresh global environment is seeded with.
pub fn natives() -> Vec<NativeFunction> {
    vec![
        NativeFunction::new("arrayLength", 1, array_length),
        NativeFunction::new("clock", 0, clock),
        NativeFunction::new("floor", 1, floor),
        NativeFunction::new("stringSplit", 2, string_split),
        NativeFunction::new("stringToNumber", 1, string_to_number),
    ]
}

/// Seconds since the Unix epoch, with sub-second precision.
fn clock(_args: &[Value]) -> Result<Value, String> {
    let micros = Utc::now().timestamp_micros();

    Ok(Value::Number(micros as f64 / 1_000_000.0))
}

fn array_length(args: &[Value]) -> Result<Value, String> {
    match args.first() {
        Some(Value::Array(items)) => Ok(Value::Number(items.len() as f64)),
        Some(other) => Err(format!(
            "Expected an array argument but got {}.",
            other.type_name()
        )),
        None => Err("Expected 1 argument but got 0.".to_string()),
    }
}

/// Splits on a literal separator.  An empty separator yields the characters;
/// trailing empty pieces are dropped unless the separator never occurs.
fn string_split(args: &[Value]) -> Result<Value, String> {
    let (text, separator) = match args {
        [Value::String(text), Value::String(separator)] => (text, separator),
        [Value::String(_), other] | [other, _] => {
            return Err(format!(
                "Expected a string argument but got {}.",
                other.type_name()
            ))
        }
        _ => return Err(format!("Expected 2 arguments but got {}.", args.len())),
    };

    let mut pieces: Vec<Value> = if text.is_empty() || !text.contains(separator.as_str()) {
        vec![Value::String(text.clone())]
    } else if separator.is_empty() {
        text.chars().map(|c| Value::String(c.to_string())).collect()
    } else {
        text.split(separator.as_str())
            .map(|piece| Value::String(piece.to_string()))
            .collect()
    };

    if !separator.is_empty() && pieces.len() > 1 {
        while matches!(pieces.last(), Some(Value::String(piece)) if piece.is_empty()) {
            pieces.pop();
        }
    }

    Ok(Value::Array(Rc::new(pieces)))
}

fn floor(args: &[Value]) -> Result<Value, String> {
    match args.first() {
        Some(Value::Number(n)) => Ok(Value::Number(n.floor())),
        Some(other) => Err(format!(
            "Expected a number argument but got {}.",
            other.type_name()
        )),
        None => Err("Expected 1 argument but got 0.".to_string()),
    }
}

fn string_to_number(args: &[Value]) -> Result<Value, String> {
    match args.first() {
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Value::Number)
            .map_err(|_| format!("Cannot convert '{}' to number.", s)),
        Some(other) => Err(format!(
            "Expected a string argument but got {}.",
            other.type_name()
        )),
        None => Err("Expected 1 argument but got 0.".to_string()),
    }
}
