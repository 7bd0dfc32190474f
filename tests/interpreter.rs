#[cfg(test)]
mod interpreter_tests {
    use std::rc::Rc;

    use pretty_assertions::assert_eq;

    use rox::error::{Diagnostic, Severity};
    use rox::function::NativeFunction;
    use rox::value::Value;
    use rox::{Lox, Outcome};

    type Session = Lox<Vec<u8>, Vec<u8>>;

    fn session() -> Session {
        Lox::new(Vec::new(), Vec::new())
    }

    fn stdout(lox: &Session) -> String {
        String::from_utf8_lossy(lox.output()).into_owned()
    }

    fn stderr(lox: &Session) -> String {
        String::from_utf8_lossy(lox.errors()).into_owned()
    }

    /// Run `source` in a fresh session, returning the outcome and what was
    /// printed.
    fn run(source: &str) -> (Outcome, String) {
        let mut lox = session();
        let outcome = lox.run(source);
        (outcome, stdout(&lox))
    }

    /// Run a program expected to succeed, returning its output.
    fn output(source: &str) -> String {
        let mut lox = session();
        let outcome = lox.run(source);
        assert_eq!(outcome, Outcome::Success, "stderr: {}", stderr(&lox));
        stdout(&lox)
    }

    fn runtime_error(message: &str, line: usize) -> Outcome {
        Outcome::RuntimeError(Diagnostic {
            severity: Severity::Runtime,
            message: message.to_string(),
            line,
        })
    }

    // ─────────────────────────── end to end ───────────────────────────

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(output("print 1 + 2 * 3;"), "7\n");
    }

    #[test]
    fn test_function_reads_global() {
        assert_eq!(
            output("var x = 10; fun f() { return x + 1; } print f();"),
            "11\n"
        );
    }

    #[test]
    fn test_inherited_method() {
        assert_eq!(
            output("class A { greet() { print \"hi\"; } } class B < A {} B().greet();"),
            "hi\n"
        );
    }

    #[test]
    fn test_runtime_error_in_function() {
        let mut lox = session();
        let outcome = lox.run("fun bad() {\n  return \"x\" + 1;\n}\nbad();");

        let message = "Operands of '+' must be two numbers or two strings, got string and number.";
        assert_eq!(outcome, runtime_error(message, 2));
        assert_eq!(stdout(&lox), "");
        assert_eq!(stderr(&lox), format!("{}\n[line 2]\n", message));
    }

    // ─────────────────────────── values ───────────────────────────────

    #[test]
    fn test_number_formatting() {
        assert_eq!(
            output("print 10 / 4; print 10 / 2; print -0.5; print 3 == 3.0;"),
            "2.5\n5\n-0.5\ntrue\n"
        );
    }

    #[test]
    fn test_string_concatenation_and_equality() {
        assert_eq!(
            output("var s = \"ab\" + \"cd\"; print s; print s == \"abcd\"; print \"1\" == 1;"),
            "abcd\ntrue\nfalse\n"
        );
    }

    #[test]
    fn test_truthiness() {
        assert_eq!(
            output(
                "if (0) print \"zero\"; if (\"\") print \"empty\";
                 if (nil) print \"nil\"; else print \"falsey\";
                 print !nil; print !0;"
            ),
            "zero\nempty\nfalsey\ntrue\nfalse\n"
        );
    }

    #[test]
    fn test_logical_operators_short_circuit() {
        assert_eq!(
            output(
                "var hits = 0;
                 fun hit() { hits = hits + 1; return true; }
                 print nil or \"fallback\";
                 print false and hit();
                 print true or hit();
                 print 1 and 2;
                 print hits;"
            ),
            "fallback\nfalse\ntrue\n2\n0\n"
        );
    }

    #[test]
    fn test_conditional_expression() {
        assert_eq!(
            output("var n = 3; print n > 2 ? \"big\" : n > 1 ? \"medium\" : \"small\";"),
            "big\n"
        );
    }

    #[test]
    fn test_callable_display() {
        assert_eq!(
            output(
                "fun f() {} class A { m() {} } var a = A();
                 print f; print A; print a; print a.m; print clock;"
            ),
            "<fn f>\nA\nA instance\n<fn m>\n<native fn clock>\n"
        );
    }

    #[test]
    fn test_objects_compare_by_identity() {
        assert_eq!(
            output(
                "class A {} var a = A(); var b = A(); var c = a;
                 print a == b; print a == c; print A == A;"
            ),
            "false\ntrue\ntrue\n"
        );
    }

    // ─────────────────────────── scoping ──────────────────────────────

    #[test]
    fn test_block_shadowing() {
        assert_eq!(
            output("var a = \"outer\"; { var a = \"inner\"; print a; } print a;"),
            "inner\nouter\n"
        );
    }

    #[test]
    fn test_closure_binding_is_static() {
        // `show` keeps seeing the global `a` declared before it.
        assert_eq!(
            output(
                "var a = \"global\";
                 {
                   fun show() { print a; }
                   show();
                   var a = \"block\";
                   show();
                 }"
            ),
            "global\nglobal\n"
        );
    }

    #[test]
    fn test_closures_capture_per_iteration_variables() {
        assert_eq!(
            output(
                "var first; var second;
                 for (var i = 1; i <= 2; i = i + 1) {
                   var j = i;
                   fun show() { print j; }
                   if (j == 1) first = show; else second = show;
                 }
                 first(); second();"
            ),
            "1\n2\n"
        );
    }

    #[test]
    fn test_counter_closure_outlives_its_frame() {
        assert_eq!(
            output(
                "fun makeCounter() {
                   var n = 0;
                   fun count() { n = n + 1; return n; }
                   return count;
                 }
                 var a = makeCounter(); var b = makeCounter();
                 a(); a(); b();
                 print a(); print b();"
            ),
            "3\n2\n"
        );
    }

    #[test]
    fn test_recursion() {
        assert_eq!(
            output(
                "fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }
                 print fib(15);"
            ),
            "610\n"
        );
    }

    #[test]
    fn test_mutual_recursion() {
        assert_eq!(
            output(
                "fun isEven(n) { if (n == 0) return true; return isOdd(n - 1); }
                 fun isOdd(n) { if (n == 0) return false; return isEven(n - 1); }
                 print isEven(10);
                 print isOdd(7);"
            ),
            "true\ntrue\n"
        );
    }

    // ─────────────────────────── control flow ─────────────────────────

    #[test]
    fn test_while_loop() {
        assert_eq!(
            output("var i = 0; while (i < 3) { print i; i = i + 1; }"),
            "0\n1\n2\n"
        );
    }

    #[test]
    fn test_break_and_continue_in_for() {
        assert_eq!(
            output(
                "for (var i = 0; i < 10; i = i + 1) {
                   if (i == 1) continue;
                   if (i == 4) break;
                   print i;
                 }"
            ),
            "0\n2\n3\n"
        );
    }

    #[test]
    fn test_continue_in_while() {
        assert_eq!(
            output(
                "var i = 0;
                 while (i < 4) { i = i + 1; if (i == 2) continue; print i; }"
            ),
            "1\n3\n4\n"
        );
    }

    #[test]
    fn test_break_only_leaves_inner_loop() {
        assert_eq!(
            output(
                "for (var i = 0; i < 2; i = i + 1) {
                   while (true) break;
                   print i;
                 }"
            ),
            "0\n1\n"
        );
    }

    #[test]
    fn test_return_unwinds_out_of_loops() {
        assert_eq!(
            output(
                "fun find() {
                   for (var i = 0; i < 10; i = i + 1) {
                     while (true) { if (i == 3) return i; break; }
                   }
                   return -1;
                 }
                 print find();"
            ),
            "3\n"
        );
    }

    #[test]
    fn test_function_without_return_yields_nil() {
        assert_eq!(output("fun f() {} print f();"), "nil\n");
    }

    // ─────────────────────────── classes ──────────────────────────────

    #[test]
    fn test_fields_and_methods() {
        assert_eq!(
            output(
                "class Point {
                   init(x, y) { this.x = x; this.y = y; }
                   sum() { return this.x + this.y; }
                 }
                 var p = Point(1, 2);
                 print p.sum();
                 p.x = 10;
                 print p.sum();"
            ),
            "3\n12\n"
        );
    }

    #[test]
    fn test_fields_shadow_methods() {
        assert_eq!(
            output(
                "class A { m() { return \"method\"; } }
                 var a = A();
                 a.m = \"field\";
                 print a.m;"
            ),
            "field\n"
        );
    }

    #[test]
    fn test_bound_method_keeps_receiver() {
        assert_eq!(
            output(
                "class Person {
                   init(name) { this.name = name; }
                   greet() { print \"hi \" + this.name; }
                 }
                 var greet = Person(\"ann\").greet;
                 greet();"
            ),
            "hi ann\n"
        );
    }

    #[test]
    fn test_initializer_returns_instance() {
        assert_eq!(
            output(
                "class A {
                   init(v) { this.v = v; if (v > 1) return; this.v = 0; }
                 }
                 var a = A(5);
                 print a.v;
                 print a.init(1) == a;
                 print a.v;"
            ),
            "5\ntrue\n0\n"
        );
    }

    #[test]
    fn test_super_calls_superclass_method() {
        assert_eq!(
            output(
                "class A { name() { return \"A\"; } }
                 class B < A { name() { return \"B<\" + super.name(); } }
                 class C < B { name() { return \"C<\" + super.name(); } }
                 print C().name();"
            ),
            "C<B<A\n"
        );
    }

    #[test]
    fn test_super_is_bound_statically() {
        // `super` inside B refers to A even when called on a C.
        assert_eq!(
            output(
                "class A { m() { print \"A.m\"; } }
                 class B < A { test() { super.m(); } }
                 class C < B { m() { print \"C.m\"; } }
                 C().test();"
            ),
            "A.m\n"
        );
    }

    #[test]
    fn test_inherited_initializer_arity() {
        assert_eq!(
            output(
                "class A { init(a, b) { this.sum = a + b; } }
                 class B < A {}
                 print B(1, 2).sum;"
            ),
            "3\n"
        );
    }

    // ─────────────────────────── natives ──────────────────────────────

    #[test]
    fn test_native_functions() {
        assert_eq!(
            output(
                "print floor(3.7);
                 print stringToNumber(\" 42 \") + 1;
                 print clock() > 0;"
            ),
            "3\n43\ntrue\n"
        );
    }

    #[test]
    fn test_native_failure_is_runtime_error() {
        let (outcome, _) = run("print stringToNumber(\"abc\");");

        assert_eq!(
            outcome,
            runtime_error("Cannot convert 'abc' to number.", 1)
        );
    }

    #[test]
    fn test_host_defined_native() {
        fn double(args: &[Value]) -> Result<Value, String> {
            match args {
                [Value::Number(n)] => Ok(Value::Number(n * 2.0)),
                _ => Err("double() takes a number.".to_string()),
            }
        }

        let mut lox = session();
        lox.interpreter_mut()
            .define_native(NativeFunction::new("double", 1, double));

        assert_eq!(lox.run("print double(21);"), Outcome::Success);
        assert_eq!(stdout(&lox), "42\n");
    }

    // ─────────────────────────── runtime errors ───────────────────────

    #[test]
    fn test_runtime_errors() {
        let cases = [
            ("print -\"a\";", "Operand of '-' must be a number, got string."),
            ("print 1 < \"2\";", "Operands of '<' must be numbers, got number and string."),
            ("print 1 / 0;", "Division by zero."),
            ("print y;", "Undefined variable 'y'."),
            ("y = 1;", "Undefined variable 'y'."),
            ("\"str\"();", "Can only call functions and classes, got string."),
            ("fun f(a) {} f(1, 2);", "Expected 1 arguments but got 2."),
            ("class A { init(a, b) {} } A(1);", "Expected 2 arguments but got 1."),
            ("class A {} A(1);", "Expected 0 arguments but got 1."),
            ("print clock(1);", "Expected 0 arguments but got 1."),
            ("class A {} print A().missing;", "Undefined property 'missing'."),
            ("print 1.field;", "Only instances have properties, got number."),
            ("var s = \"s\"; s.field = 1;", "Only instances have fields."),
            ("var N = 1; class A < N {}", "Superclass must be a class, got number."),
        ];

        for (source, message) in cases {
            let (outcome, _) = run(source);
            assert_eq!(outcome, runtime_error(message, 1), "source: {}", source);
        }
    }

    #[test]
    fn test_output_before_runtime_error_is_kept() {
        let (outcome, out) = run("print 1;\nprint 2;\nprint nil + 1;\nprint 4;");

        assert!(matches!(outcome, Outcome::RuntimeError(Diagnostic { line: 3, .. })));
        assert_eq!(out, "1\n2\n");
    }

    #[test]
    fn test_nested_calls_unwind_cleanly() {
        let (outcome, out) = run(
            "fun f(n) { if (n == 0) return 0; return 1 + f(n - 1); }
             print f(50);",
        );

        assert_eq!(outcome, Outcome::Success);
        assert_eq!(out, "50\n");
    }

    // ─────────────────────────── compile errors ───────────────────────

    #[test]
    fn test_syntax_error_prevents_execution() {
        let mut lox = session();
        let outcome = lox.run("print 1;\nprint ;");

        assert_eq!(
            outcome,
            Outcome::CompileError(vec![Diagnostic {
                severity: Severity::Syntax,
                message: "Expected expression.".to_string(),
                line: 2,
            }])
        );
        assert_eq!(stdout(&lox), "");
        assert_eq!(
            stderr(&lox),
            "[line 2] Error at ';': Expected expression.\n"
        );
    }

    #[test]
    fn test_resolution_error_prevents_execution() {
        let (outcome, out) = run("print \"before\";\nreturn 1;");

        assert_eq!(
            outcome,
            Outcome::CompileError(vec![Diagnostic {
                severity: Severity::Resolution,
                message: "Can't return from top-level code.".to_string(),
                line: 2,
            }])
        );
        assert_eq!(out, "");
    }

    #[test]
    fn test_lex_and_parse_errors_reported_together() {
        let (outcome, _) = run("var a = 1 @ 2;");

        match outcome {
            Outcome::CompileError(diagnostics) => {
                let messages: Vec<&str> =
                    diagnostics.iter().map(|d| d.message.as_str()).collect();
                assert_eq!(
                    messages,
                    vec![
                        "Unexpected character: @",
                        "Expected ';' after variable declaration."
                    ]
                );
            }
            other => panic!("Expected compile error, got {:?}", other),
        }
    }

    // ─────────────────────────── sessions ─────────────────────────────

    #[test]
    fn test_globals_persist_across_runs() {
        let mut lox = session();

        assert_eq!(lox.run("var a = 1;"), Outcome::Success);
        assert_eq!(lox.run("fun f() { return a + 1; }"), Outcome::Success);
        assert_eq!(lox.run("print f();"), Outcome::Success);
        assert_eq!(stdout(&lox), "2\n");

        let names = lox.interpreter().globals().borrow().names();
        assert!(names.contains(&"a".to_string()));
        assert!(names.contains(&"f".to_string()));
    }

    #[test]
    fn test_closures_survive_across_runs() {
        let mut lox = session();

        lox.run(
            "fun makeCounter() {
               var n = 0;
               fun count() { n = n + 1; return n; }
               return count;
             }",
        );
        lox.run("var c = makeCounter();");
        lox.run("c();");

        assert_eq!(lox.run("print c();"), Outcome::Success);
        assert_eq!(stdout(&lox), "2\n");
    }

    #[test]
    fn test_session_recovers_after_errors() {
        let mut lox = session();

        assert!(matches!(
            lox.run("{ var inner = 1; print missing; }"),
            Outcome::RuntimeError(_)
        ));
        assert!(matches!(lox.run("print ;"), Outcome::CompileError(_)));

        // Back at global scope: `inner` did not leak, `x` is a global.
        assert_eq!(lox.run("var x = 3; print x;"), Outcome::Success);
        assert!(matches!(lox.run("print inner;"), Outcome::RuntimeError(_)));
        assert_eq!(stdout(&lox), "3\n");
    }

    // ─────────────────────────── arrays and commas ────────────────────

    #[test]
    fn test_comma_yields_right_operand() {
        assert_eq!(
            output(
                "var a = 0;
                 var b = (a = 1, a + 1);
                 print a; print b;
                 fun second(x, y) { return y; }
                 print second(1, 2);"
            ),
            "1\n2\n2\n"
        );
    }

    #[test]
    fn test_string_split_and_indexing() {
        assert_eq!(
            output(
                "var parts = stringSplit(\"a,b,,c,,\", \",\");
                 print parts;
                 print arrayLength(parts);
                 print parts[1] + parts[3];
                 print parts[2] == \"\";
                 print stringSplit(\"abc\", \"\");
                 print stringSplit(\"abc\", \"-\");
                 print arrayLength(stringSplit(\",,\", \",\"));"
            ),
            "[a, b, , c]\n4\nbc\ntrue\n[a, b, c]\n[abc]\n0\n"
        );
    }

    #[test]
    fn test_arrays_compare_by_identity() {
        assert_eq!(
            output(
                "var p = stringSplit(\"a\", \",\");
                 print p == p;
                 print p == stringSplit(\"a\", \",\");"
            ),
            "true\nfalse\n"
        );
    }

    #[test]
    fn test_index_errors() {
        let cases = [
            ("print 1[0];", "Only arrays can be indexed, got number."),
            (
                "print stringSplit(\"a b\", \" \")[\"0\"];",
                "Array index must be a number, got string.",
            ),
            (
                "print stringSplit(\"a b\", \" \")[2];",
                "Array index 2 out of bounds for length 2.",
            ),
            (
                "print stringSplit(\"a b\", \" \")[0.5];",
                "Array index 0.5 out of bounds for length 2.",
            ),
            (
                "print arrayLength(\"x\");",
                "Expected an array argument but got string.",
            ),
            (
                "print stringSplit(1, \",\");",
                "Expected a string argument but got number.",
            ),
        ];

        for (source, message) in cases {
            let (outcome, _) = run(source);
            assert_eq!(outcome, runtime_error(message, 1), "source: {}", source);
        }
    }

    // ─────────────────────────── limits ───────────────────────────────

    #[test]
    fn test_unbounded_recursion_is_a_runtime_error() {
        let mut lox = session();

        assert_eq!(
            lox.run("fun f(n) { return f(n + 1); }\nf(0);"),
            runtime_error("Stack overflow.", 1)
        );

        // The call depth unwinds with the error.
        assert_eq!(
            lox.run(
                "fun count(n) { if (n == 0) return 0; return 1 + count(n - 1); }
                 print count(1000);"
            ),
            Outcome::Success
        );
        assert_eq!(stdout(&lox), "1000\n");
    }

    #[test]
    fn test_deeply_nested_source_is_a_compile_error() {
        let source = format!("print {}1{};", "(".repeat(5000), ")".repeat(5000));

        let mut lox = session();
        match lox.run(&source) {
            Outcome::CompileError(diagnostics) => {
                assert_eq!(diagnostics.len(), 1);
                assert_eq!(diagnostics[0].message, "Nesting too deep.");
            }
            other => panic!("Expected compile error, got {:?}", other),
        }
    }

    // ─────────────────────────── memory ───────────────────────────────

    #[test]
    fn test_bound_method_stored_on_its_instance_is_released() {
        let mut lox = session();
        assert_eq!(
            lox.run("class A { m() {} } var a = A(); a.f = a.m;"),
            Outcome::Success
        );

        let instance = match lox.interpreter().globals().borrow().get("a", 1) {
            Ok(Value::Instance(instance)) => Rc::downgrade(&instance),
            other => panic!("Expected an instance, got {:?}", other),
        };

        // Unreachable from Lox, but the method still points back at it.
        lox.run("a = nil;");
        assert!(instance.upgrade().is_some());

        drop(lox);
        assert!(instance.upgrade().is_none());
    }

    #[test]
    fn test_plain_chunks_do_not_accumulate_locals() {
        let mut lox = session();

        lox.run("{ var a = 1; print a; }");
        lox.run("{ var b = 2; { print b; } }");
        lox.run("{ var c = 3; print c + nil; }");
        assert_eq!(lox.interpreter().resolved_locals(), 0);

        lox.run(
            "var counter;
             { var n = 0; fun inc() { n = n + 1; return n; } counter = inc; }",
        );
        let kept = lox.interpreter().resolved_locals();
        assert!(kept > 0);

        lox.run("print counter(); { var d = 4; print d; }");
        assert_eq!(lox.interpreter().resolved_locals(), kept);
        assert_eq!(stdout(&lox), "1\n2\n1\n4\n");
    }

    #[test]
    fn test_number_display_extremes() {
        assert_eq!(
            output(
                "print 10000000;
                 print 1 / 10000;
                 print 100000 * 100000 * 10000000000;
                 print 12345678.9;
                 print 1234567.5;
                 print 0.001;"
            ),
            "1.0E7\n1.0E-4\n1.0E20\n1.23456789E7\n1234567.5\n0.001\n"
        );

        assert_eq!(
            output(
                "var big = 1;
                 for (var i = 0; i < 400; i = i + 1) big = big * 10;
                 print big; print -big; print big - big;"
            ),
            "Infinity\n-Infinity\nNaN\n"
        );
    }
}
