//! A tree-walking interpreter for the Lox scripting language.
//!
//! The pipeline is `scanner` → `parser` → `resolver` → `interpreter`.  Each
//! phase hands its diagnostics back as values; [`Lox`] strings the phases
//! together for hosts that just want to run source text.
//!
//! ```rust
//! use rox::{Lox, Outcome};
//!
//! let mut lox = Lox::new(Vec::<u8>::new(), Vec::<u8>::new());
//! assert_eq!(lox.run("print 1 + 2 * 3;"), Outcome::Success);
//! assert_eq!(String::from_utf8_lossy(lox.output()), "7\n");
//! ```

pub mod ast;
pub mod ast_printer;
pub mod class;
pub mod environment;
pub mod error;
pub mod function;
pub mod interpreter;
pub mod parser;
pub mod resolver;
pub mod scanner;
pub mod stack;
pub mod token;
pub mod value;

use std::io::Write;

use log::{debug, info};

use crate::ast::Stmt;
use crate::ast_printer::AstPrinter;
use crate::error::{Diagnostic, LoxError};
use crate::interpreter::Interpreter;
use crate::parser::Parser;
use crate::resolver::Resolver;

/// Result of running one chunk of source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,

    /// Syntax or resolution errors; nothing was executed.
    CompileError(Vec<Diagnostic>),

    /// Execution started and stopped at this error.
    RuntimeError(Diagnostic),
}

/// An interpreter session.  Globals persist across [`Lox::run`] calls, which
/// is what a REPL needs.  `print` output goes to `out`, diagnostics to `err`.
pub struct Lox<W: Write, E: Write> {
    interpreter: Interpreter<W>,
    err: E,
    next_id: usize,
}

impl<W: Write, E: Write> Lox<W, E> {
    pub fn new(out: W, err: E) -> Self {
        info!("Starting Lox session");

        Self {
            interpreter: Interpreter::new(out),
            err,
            next_id: 0,
        }
    }

    /// Scan and parse `source`.  Expression ids continue from the previous
    /// call, so nodes from different chunks never collide.
    pub fn scan_and_parse(&mut self, source: &str) -> (Vec<Stmt>, Vec<LoxError>) {
        let (tokens, mut errors) = scanner::scan(source);

        let mut parser = Parser::new(tokens).with_id_base(self.next_id);
        let (program, parse_errors) = parser.parse();
        self.next_id = parser.next_id();

        errors.extend(parse_errors);

        debug!("AST:\n{}", AstPrinter::print_program(&program));

        (program, errors)
    }

    /// Run the static pass over `program`; on success its scope depths are
    /// handed to the interpreter.
    pub fn resolve(&mut self, program: &[Stmt]) -> Vec<LoxError> {
        let mut resolver = Resolver::new();
        let errors = resolver.resolve(program);

        if errors.is_empty() {
            self.interpreter.add_locals(resolver.into_locals());
        }

        errors
    }

    /// Execute an already resolved program against the session's globals.
    pub fn interpret(&mut self, program: &[Stmt]) -> Result<(), LoxError> {
        self.interpreter.interpret(program)
    }

    /// Scan, parse, resolve and execute `source`, reporting every diagnostic
    /// to the error sink.
    ///
    /// A chunk that declares no function or class leaves nothing behind
    /// that could run its nodes again, so its resolved locals are dropped
    /// once it finishes.
    pub fn run(&mut self, source: &str) -> Outcome {
        info!("Running {} byte(s) of source", source.len());

        let first_id = self.next_id;

        let (program, errors) = self.scan_and_parse(source);
        if !errors.is_empty() {
            return self.compile_error(errors);
        }

        let errors = self.resolve(&program);
        if !errors.is_empty() {
            return self.compile_error(errors);
        }

        let outcome = match self.interpret(&program) {
            Ok(()) => Outcome::Success,
            Err(e) => {
                self.report(&e);
                Outcome::RuntimeError(Diagnostic::from(&e))
            }
        };

        if !declares_callables(&program) {
            self.interpreter.forget_locals(first_id..self.next_id);
        }

        outcome
    }

    pub fn interpreter(&self) -> &Interpreter<W> {
        &self.interpreter
    }

    pub fn interpreter_mut(&mut self) -> &mut Interpreter<W> {
        &mut self.interpreter
    }

    /// Everything `print` has written so far.
    pub fn output(&self) -> &W {
        self.interpreter.output()
    }

    /// Everything reported to the error sink so far.
    pub fn errors(&self) -> &E {
        &self.err
    }

    pub fn into_sinks(self) -> (W, E) {
        (self.interpreter.into_output(), self.err)
    }

    fn compile_error(&mut self, errors: Vec<LoxError>) -> Outcome {
        for e in &errors {
            self.report(e);
        }

        Outcome::CompileError(errors.iter().map(Diagnostic::from).collect())
    }

    fn report(&mut self, error: &LoxError) {
        debug!("Reporting {}: {}", error.severity(), error);

        // A broken error sink leaves nowhere to report to.
        let _ = writeln!(self.err, "{}", error);
    }
}

/// Whether any statement in `program`, at any nesting, declares a function or
/// class whose body could outlive the chunk.
fn declares_callables(program: &[Stmt]) -> bool {
    program.iter().any(|stmt| match stmt {
        Stmt::Function(_) | Stmt::Class { .. } => true,
        Stmt::Block(statements) => declares_callables(statements),
        Stmt::If {
            then_branch,
            else_branch,
            ..
        } => {
            declares_callables(std::slice::from_ref(&**then_branch))
                || else_branch
                    .as_deref()
                    .is_some_and(|branch| declares_callables(std::slice::from_ref(branch)))
        }
        Stmt::While { body, .. } => declares_callables(std::slice::from_ref(&**body)),
        _ => false,
    })
}
