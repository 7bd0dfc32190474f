//! Tree-walking evaluator.
//!
//! Statements execute against `self.environment`, a chain of [`Environment`]s
//! rooted at the globals.  Non-local control transfers (`return`, `break`,
//! `continue`) travel back up as a [`Flow`] value rather than as errors: a
//! loop stops `Break`/`Continue`, a function call stops `Return`, so neither
//! can leak past its own boundary.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::ops::Range;
use std::rc::Rc;

use log::{debug, info};

use crate::ast::{Expr, ExprId, FunctionDecl, LiteralValue, Stmt};
use crate::ast_printer::AstPrinter;
use crate::class::{get_property, LoxClass, LoxInstance};
use crate::environment::{CapturedScopes, EnvRef, Environment};
use crate::error::{LoxError, Result};
use crate::function::{natives, LoxFunction, NativeFunction};
use crate::resolver::Locals;
use crate::stack::ensure_sufficient_stack;
use crate::token::{Token, TokenType};
use crate::value::Value;

/// How a statement finished.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Deepest chain of nested Lox calls before a runaway recursion is reported.
pub const MAX_CALL_DEPTH: usize = 1024;

pub struct Interpreter<W: Write> {
    globals: EnvRef,
    environment: EnvRef,
    locals: Locals,
    out: W,
    captured: CapturedScopes,
    call_depth: usize,
}

impl<W: Write> Interpreter<W> {
    /// Creates a new Interpreter writing `print` output to `out`, with the
    /// native functions (`clock`, …) defined as globals.
    pub fn new(out: W) -> Self {
        info!("Initializing Interpreter");

        let globals: EnvRef = Rc::new(RefCell::new(Environment::new()));
        let mut captured = CapturedScopes::new();
        captured.track(&globals);

        let mut interpreter = Self {
            environment: Rc::clone(&globals),
            globals,
            locals: Locals::new(),
            out,
            captured,
            call_depth: 0,
        };

        for native in natives() {
            interpreter.define_native(native);
        }

        interpreter
    }

    /// Expose a host function to scripts as a global.
    pub fn define_native(&mut self, native: NativeFunction) {
        debug!("Defining native function '{}'", native.name);

        let name = native.name;
        self.globals
            .borrow_mut()
            .define(name, Value::NativeFunction(Rc::new(native)));
    }

    /// Merge scope depths computed by the resolver.
    ///
    /// Entries live as long as the session unless dropped through
    /// [`Self::forget_locals`]; function bodies from earlier chunks may still
    /// run, so nothing is pruned implicitly.
    pub fn add_locals(&mut self, locals: Locals) {
        debug!("Recording {} resolved local(s)", locals.len());

        self.locals.extend(locals);
    }

    /// Drop the scope depths of every node whose id falls in `ids`.  Only
    /// sound once no closure over those nodes can run again.
    pub fn forget_locals(&mut self, ids: Range<usize>) {
        let before = self.locals.len();
        self.locals.retain(|id, _| !ids.contains(&id.0));

        debug!("Forgot {} resolved local(s)", before - self.locals.len());
    }

    /// Number of resolved locals currently held.
    pub fn resolved_locals(&self) -> usize {
        self.locals.len()
    }

    pub fn globals(&self) -> &EnvRef {
        &self.globals
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Interprets a list of statements (a "program").  The first runtime
    /// error stops execution; output already written stays written.
    pub fn interpret(&mut self, statements: &[Stmt]) -> Result<()> {
        debug!("Interpreting {} statements", statements.len());

        // A failed run may have left us inside a nested scope.
        self.environment = Rc::clone(&self.globals);

        for stmt in statements {
            debug!("Executing statement: {}", AstPrinter::print_stmt(stmt));

            match self.execute(stmt) {
                Ok(Flow::Normal) => {}
                Ok(flow) => debug!("Ignoring stray {:?} at top level", flow),
                Err(e) => {
                    self.environment = Rc::clone(&self.globals);
                    debug!("Runtime error: {}", e);

                    // Keep what was printed before the failure.
                    let _ = self.out.flush();
                    return Err(e);
                }
            }
        }

        self.out.flush()?;

        info!("Interpretation completed successfully");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Statements
    // ─────────────────────────────────────────────────────────────────────────

    /// Executes a single statement.
    pub fn execute(&mut self, stmt: &Stmt) -> Result<Flow> {
        ensure_sufficient_stack(|| self.execute_stmt(stmt))
    }

    fn execute_stmt(&mut self, stmt: &Stmt) -> Result<Flow> {
        match stmt {
            Stmt::Expression(expr) => {
                self.evaluate(expr)?;
                Ok(Flow::Normal)
            }

            Stmt::Print(expr) => {
                let value = self.evaluate(expr)?;
                writeln!(self.out, "{}", value)?;
                debug!("Printed value: {}", value);
                Ok(Flow::Normal)
            }

            Stmt::Var { name, initializer } => {
                let value = match initializer {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };
                debug!("Defining variable '{}' = {}", name.lexeme, value);
                self.environment.borrow_mut().define(&name.lexeme, value);
                Ok(Flow::Normal)
            }

            Stmt::Block(statements) => {
                let env = Environment::child_of(&self.environment);
                self.execute_block(statements, env)
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute(then_branch)
                } else if let Some(else_stmt) = else_branch {
                    self.execute(else_stmt)
                } else {
                    Ok(Flow::Normal)
                }
            }

            Stmt::While {
                condition,
                body,
                increment,
            } => self.execute_while(condition, body, increment.as_ref()),

            Stmt::Function(decl) => {
                debug!("Defining function '{}'", decl.name.lexeme);

                let function = self.make_function(decl, Rc::clone(&self.environment), false);
                self.environment
                    .borrow_mut()
                    .define(&decl.name.lexeme, Value::Function(function));
                Ok(Flow::Normal)
            }

            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(e) => self.evaluate(e)?,
                    None => Value::Nil,
                };
                debug!("Returning value: {}", value);
                Ok(Flow::Return(value))
            }

            Stmt::Break { .. } => Ok(Flow::Break),

            Stmt::Continue { .. } => Ok(Flow::Continue),

            Stmt::Class {
                name,
                superclass,
                methods,
            } => self.execute_class(name, superclass.as_ref(), methods),
        }
    }

    /// Run `statements` inside `env`, restoring the previous environment
    /// afterwards whether they finish, jump out, or fail.
    pub fn execute_block(&mut self, statements: &[Stmt], env: EnvRef) -> Result<Flow> {
        let previous = std::mem::replace(&mut self.environment, env);

        let mut result = Ok(Flow::Normal);
        for stmt in statements {
            match self.execute(stmt) {
                Ok(Flow::Normal) => {}
                other => {
                    result = other;
                    break;
                }
            }
        }

        self.environment = previous;
        result
    }

    fn execute_while(
        &mut self,
        condition: &Expr,
        body: &Stmt,
        increment: Option<&Expr>,
    ) -> Result<Flow> {
        while self.evaluate(condition)?.is_truthy() {
            match self.execute(body)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }

            if let Some(increment) = increment {
                self.evaluate(increment)?;
            }
        }

        Ok(Flow::Normal)
    }

    fn execute_class(
        &mut self,
        name: &Token,
        superclass: Option<&Expr>,
        methods: &[Rc<FunctionDecl>],
    ) -> Result<Flow> {
        debug!("Defining class '{}'", name.lexeme);

        let superclass = match superclass {
            Some(expr) => match self.evaluate(expr)? {
                Value::Class(class) => Some(class),
                other => {
                    return Err(LoxError::runtime(
                        expr.line(),
                        format!("Superclass must be a class, got {}.", other.type_name()),
                    ));
                }
            },
            None => None,
        };

        self.environment
            .borrow_mut()
            .define(&name.lexeme, Value::Nil);

        // Methods of a subclass see `super` one scope above their `this`.
        let method_env = match &superclass {
            Some(superclass) => {
                let env = Environment::child_of(&self.environment);
                env.borrow_mut()
                    .define("super", Value::Class(Rc::clone(superclass)));
                env
            }
            None => Rc::clone(&self.environment),
        };

        let mut table: HashMap<String, Rc<LoxFunction>> = HashMap::new();
        for method in methods {
            let is_initializer = method.name.lexeme == "init";
            let function = self.make_function(method, Rc::clone(&method_env), is_initializer);
            table.insert(method.name.lexeme.clone(), function);
        }

        let class = LoxClass::new(name.lexeme.clone(), superclass, table);

        self.environment
            .borrow_mut()
            .define(&name.lexeme, Value::Class(Rc::new(class)));

        Ok(Flow::Normal)
    }

    fn make_function(
        &mut self,
        decl: &Rc<FunctionDecl>,
        closure: EnvRef,
        is_initializer: bool,
    ) -> Rc<LoxFunction> {
        self.captured.track(&closure);

        Rc::new(LoxFunction::new(Rc::clone(decl), closure, is_initializer))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Expressions
    // ─────────────────────────────────────────────────────────────────────────

    fn index_array(target: &Value, position: &Value, line: usize) -> Result<Value> {
        let items = match target {
            Value::Array(items) => items,
            other => {
                return Err(LoxError::runtime(
                    line,
                    format!("Only arrays can be indexed, got {}.", other.type_name()),
                ))
            }
        };

        let n = match position {
            Value::Number(n) => *n,
            other => {
                return Err(LoxError::runtime(
                    line,
                    format!("Array index must be a number, got {}.", other.type_name()),
                ))
            }
        };

        let slot = (n >= 0.0 && n.fract() == 0.0)
            .then(|| items.get(n as usize))
            .flatten();

        match slot {
            Some(item) => Ok(item.clone()),
            None => Err(LoxError::runtime(
                line,
                format!(
                    "Array index {} out of bounds for length {}.",
                    position,
                    items.len()
                ),
            )),
        }
    }

    /// Evaluates an expression and returns a Value.
    pub fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        ensure_sufficient_stack(|| self.evaluate_expr(expr))
    }

    fn evaluate_expr(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                LiteralValue::Number(n) => Value::Number(*n),
                LiteralValue::Str(s) => Value::String(s.clone()),
                LiteralValue::True => Value::Bool(true),
                LiteralValue::False => Value::Bool(false),
                LiteralValue::Nil => Value::Nil,
            }),

            Expr::Grouping(inner) => self.evaluate(inner),

            Expr::Unary { operator, right } => self.evaluate_unary(operator, right),

            Expr::Binary {
                left,
                operator,
                right,
            } => self.evaluate_binary(left, operator, right),

            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let left_val = self.evaluate(left)?;

                let short_circuits = match operator.token_type {
                    TokenType::OR => left_val.is_truthy(),
                    _ => !left_val.is_truthy(),
                };

                if short_circuits {
                    Ok(left_val)
                } else {
                    self.evaluate(right)
                }
            }

            Expr::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.evaluate(then_branch)
                } else {
                    self.evaluate(else_branch)
                }
            }

            Expr::Variable { id, name } => self.look_up_variable(*id, name),

            Expr::Assign { id, name, value } => {
                let value = self.evaluate(value)?;

                match self.locals.get(id) {
                    Some(&hops) => Environment::assign_at(
                        &self.environment,
                        hops,
                        &name.lexeme,
                        value.clone(),
                        name.line,
                    )?,
                    None => self
                        .globals
                        .borrow_mut()
                        .assign(&name.lexeme, value.clone(), name.line)?,
                }

                debug!("Assigned {} to '{}'", value, name.lexeme);
                Ok(value)
            }

            Expr::Call {
                callee,
                paren,
                arguments,
            } => {
                let callee_val = self.evaluate(callee)?;

                let mut arg_values = Vec::with_capacity(arguments.len());
                for arg in arguments {
                    arg_values.push(self.evaluate(arg)?);
                }

                self.call_value(callee_val, arg_values, paren.line)
            }

            Expr::Get { object, name } => match self.evaluate(object)? {
                Value::Instance(instance) => get_property(&instance, name, &mut self.captured),
                other => Err(LoxError::runtime(
                    name.line,
                    format!("Only instances have properties, got {}.", other.type_name()),
                )),
            },

            Expr::Index {
                object,
                bracket,
                index,
            } => {
                let target = self.evaluate(object)?;
                let position = self.evaluate(index)?;

                Self::index_array(&target, &position, bracket.line)
            }

            Expr::Set {
                object,
                name,
                value,
            } => {
                let Value::Instance(instance) = self.evaluate(object)? else {
                    return Err(LoxError::runtime(name.line, "Only instances have fields."));
                };

                let value = self.evaluate(value)?;
                instance.borrow_mut().set(&name.lexeme, value.clone());
                Ok(value)
            }

            Expr::This { id, keyword } => self.look_up_variable(*id, keyword),

            Expr::Super {
                id,
                keyword,
                method,
            } => self.evaluate_super(*id, keyword, method),
        }
    }

    fn evaluate_unary(&mut self, op: &Token, expr: &Expr) -> Result<Value> {
        let right_val = self.evaluate(expr)?;

        match op.token_type {
            TokenType::MINUS => match right_val {
                Value::Number(n) => Ok(Value::Number(-n)),
                other => Err(LoxError::runtime(
                    op.line,
                    format!("Operand of '-' must be a number, got {}.", other.type_name()),
                )),
            },
            TokenType::BANG => Ok(Value::Bool(!right_val.is_truthy())),
            _ => Err(LoxError::runtime(
                op.line,
                format!("Invalid unary operator '{}'.", op.lexeme),
            )),
        }
    }

    fn evaluate_binary(&mut self, left: &Expr, op: &Token, right: &Expr) -> Result<Value> {
        let left_val = self.evaluate(left)?;
        let right_val = self.evaluate(right)?;
        debug!("Binary '{}' on {} and {}", op.lexeme, left_val, right_val);

        match op.token_type {
            TokenType::COMMA => return Ok(right_val),
            TokenType::EQUAL_EQUAL => return Ok(Value::Bool(left_val == right_val)),
            TokenType::BANG_EQUAL => return Ok(Value::Bool(left_val != right_val)),
            _ => {}
        }

        match (op.token_type.clone(), left_val, right_val) {
            (TokenType::PLUS, Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (TokenType::PLUS, Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
            (TokenType::PLUS, a, b) => Err(LoxError::runtime(
                op.line,
                format!(
                    "Operands of '+' must be two numbers or two strings, got {} and {}.",
                    a.type_name(),
                    b.type_name()
                ),
            )),

            (TokenType::SLASH, Value::Number(_), Value::Number(b)) if b == 0.0 => {
                Err(LoxError::runtime(op.line, "Division by zero."))
            }

            (tt, Value::Number(a), Value::Number(b)) => match tt {
                TokenType::MINUS => Ok(Value::Number(a - b)),
                TokenType::STAR => Ok(Value::Number(a * b)),
                TokenType::SLASH => Ok(Value::Number(a / b)),
                TokenType::GREATER => Ok(Value::Bool(a > b)),
                TokenType::GREATER_EQUAL => Ok(Value::Bool(a >= b)),
                TokenType::LESS => Ok(Value::Bool(a < b)),
                TokenType::LESS_EQUAL => Ok(Value::Bool(a <= b)),
                _ => Err(LoxError::runtime(
                    op.line,
                    format!("Invalid binary operator '{}'.", op.lexeme),
                )),
            },

            (_, a, b) => Err(LoxError::runtime(
                op.line,
                format!(
                    "Operands of '{}' must be numbers, got {} and {}.",
                    op.lexeme,
                    a.type_name(),
                    b.type_name()
                ),
            )),
        }
    }

    fn look_up_variable(&self, id: ExprId, name: &Token) -> Result<Value> {
        match self.locals.get(&id) {
            Some(&hops) => Environment::get_at(&self.environment, hops, &name.lexeme, name.line),
            None => self.globals.borrow().get(&name.lexeme, name.line),
        }
    }

    /// `super.method`: the superclass sits in the scope the resolver pointed
    /// at, and `this` one scope closer.
    fn evaluate_super(&mut self, id: ExprId, keyword: &Token, method: &Token) -> Result<Value> {
        let hops = self.locals.get(&id).copied().ok_or_else(|| {
            LoxError::runtime(keyword.line, "Can't use 'super' outside of a class.")
        })?;

        let Value::Class(superclass) =
            Environment::get_at(&self.environment, hops, "super", keyword.line)?
        else {
            return Err(LoxError::runtime(keyword.line, "Superclass must be a class."));
        };

        let Value::Instance(instance) =
            Environment::get_at(&self.environment, hops.saturating_sub(1), "this", keyword.line)?
        else {
            return Err(LoxError::runtime(keyword.line, "'this' is not an instance."));
        };

        match superclass.find_method(&method.lexeme) {
            Some(found) => Ok(Value::Function(Rc::new(
                found.bind(instance, &mut self.captured),
            ))),
            None => Err(LoxError::runtime(
                method.line,
                format!("Undefined property '{}'.", method.lexeme),
            )),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Calls
    // ─────────────────────────────────────────────────────────────────────────

    /// Invokes a callable (native, user-defined function, or class).
    fn call_value(&mut self, callee: Value, args: Vec<Value>, line: usize) -> Result<Value> {
        match callee {
            Value::NativeFunction(native) => {
                debug!("Calling native function '{}'", native.name);
                check_arity(native.arity, args.len(), line)?;

                (native.func)(&args).map_err(|message| LoxError::runtime(line, message))
            }

            Value::Function(function) => {
                debug!("Calling user-defined function '{}'", function.name());
                check_arity(function.arity(), args.len(), line)?;

                self.call_function(&function, args, line)
            }

            Value::Class(class) => {
                debug!("Instantiating class '{}'", class.name);
                check_arity(class.arity(), args.len(), line)?;

                let instance = Rc::new(RefCell::new(LoxInstance::new(Rc::clone(&class))));

                if let Some(init) = class.find_method("init") {
                    let bound = init.bind(Rc::clone(&instance), &mut self.captured);
                    self.call_function(&bound, args, line)?;
                }

                Ok(Value::Instance(instance))
            }

            other => Err(LoxError::runtime(
                line,
                format!(
                    "Can only call functions and classes, got {}.",
                    other.type_name()
                ),
            )),
        }
    }

    /// Run a user function's body in a fresh scope under its closure.  Arity
    /// has already been checked.
    fn call_function(
        &mut self,
        function: &LoxFunction,
        args: Vec<Value>,
        line: usize,
    ) -> Result<Value> {
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(LoxError::runtime(line, "Stack overflow."));
        }

        let env = Environment::child_of(&function.closure);

        for (param, arg) in function.declaration.params.iter().zip(args) {
            env.borrow_mut().define(&param.lexeme, arg);
        }

        self.call_depth += 1;
        let result = self.execute_block(&function.declaration.body, env);
        self.call_depth -= 1;

        let flow = result?;

        if function.is_initializer {
            return Environment::get_at(&function.closure, 0, "this", line);
        }

        match flow {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::Nil),
        }
    }
}

fn check_arity(expected: usize, got: usize, line: usize) -> Result<()> {
    if expected != got {
        return Err(LoxError::runtime(
            line,
            format!("Expected {} arguments but got {}.", expected, got),
        ));
    }

    Ok(())
}
