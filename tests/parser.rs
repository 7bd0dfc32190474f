#[cfg(test)]
mod parser_tests {
    use pretty_assertions::assert_eq;

    use rox::ast::{Expr, ExprId, Stmt};
    use rox::ast_printer::AstPrinter;
    use rox::error::LoxError;
    use rox::parser::{self, Parser};
    use rox::scanner::scan;

    fn parse_source(source: &str) -> (Vec<Stmt>, Vec<LoxError>) {
        let (tokens, errors) = scan(source);
        assert!(errors.is_empty(), "unexpected scan errors: {:?}", errors);

        parser::parse(tokens)
    }

    fn print(source: &str) -> String {
        let (program, errors) = parse_source(source);
        assert!(errors.is_empty(), "unexpected parse errors: {:?}", errors);

        AstPrinter::print_program(&program)
    }

    fn error_messages(source: &str) -> Vec<String> {
        let (_, errors) = parse_source(source);
        errors.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(print("1 + 2 * 3;"), "(; (+ 1.0 (* 2.0 3.0)))");
        assert_eq!(
            print("-(1 - 2) >= 3 == true;"),
            "(; (== (>= (- (group (- 1.0 2.0))) 3.0) true))"
        );
        assert_eq!(print("!a or b and c;"), "(; (or (! a) (and b c)))");
    }

    #[test]
    fn test_binary_is_left_associative() {
        assert_eq!(print("1 - 2 - 3;"), "(; (- (- 1.0 2.0) 3.0))");
    }

    #[test]
    fn test_assignment_is_right_associative() {
        assert_eq!(print("a = b = 3;"), "(; (= a (= b 3.0)))");
    }

    #[test]
    fn test_conditional() {
        assert_eq!(
            print("print a ? b : c ? d : e;"),
            "(print (?: a b (?: c d e)))"
        );
    }

    #[test]
    fn test_calls_and_properties() {
        assert_eq!(
            print("a.b(1, \"two\").c = nil;"),
            "(; (= (. (call (. a b) 1.0 two) c) nil))"
        );
    }

    #[test]
    fn test_for_desugars_to_while() {
        assert_eq!(
            print("for (var i = 0; i < 3; i = i + 1) print i;"),
            "(block (var i 0.0) (while (< i 3.0) (print i) (= i (+ i 1.0))))"
        );

        // Every clause is optional.
        assert_eq!(print("for (;;) break;"), "(block (while true (break)))");
    }

    #[test]
    fn test_declarations() {
        assert_eq!(
            print("fun add(a, b) { return a + b; }"),
            "(fun add(a b) (return (+ a b)))"
        );
        assert_eq!(
            print("class B < A { init(x) { this.x = x; } get() { return super.get(); } }"),
            "(class B < A (method init(x) (; (= (. this x) x))) (method get() (return (super get))))"
        );
        assert_eq!(
            print("if (a) print 1; else { var b; continue; }"),
            "(if a (print 1.0) (block (var b) (continue)))"
        );
    }

    #[test]
    fn test_dangling_else_binds_to_nearest_if() {
        assert_eq!(
            print("if (a) if (b) print 1; else print 2;"),
            "(if a (if b (print 1.0) (print 2.0)))"
        );
    }

    #[test]
    fn test_parsing_is_deterministic() {
        let source = "var x = 1; { var y = x; fun f() { return y; } }";

        let (first, _) = parse_source(source);
        let (second, _) = parse_source(source);

        assert_eq!(first, second);
    }

    #[test]
    fn test_expression_ids_continue_from_base() {
        let (tokens, _) = scan("a = b;");
        let mut parser = Parser::new(tokens).with_id_base(10);
        let (program, errors) = parser.parse();

        assert!(errors.is_empty());
        assert_eq!(parser.next_id(), 13);

        match &program[0] {
            Stmt::Expression(Expr::Assign { id, value, .. }) => {
                // `a` was first parsed as a variable (id 10), then the value.
                assert_eq!(*id, ExprId(12));
                assert!(matches!(**value, Expr::Variable { id: ExprId(11), .. }));
            }
            other => panic!("Expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_semicolon() {
        assert_eq!(
            error_messages("print 1"),
            vec!["[line 1] Error at end: Expected ';' after value."]
        );
    }

    #[test]
    fn test_error_recovery_reports_each_statement() {
        let (program, errors) = parse_source("var = 1;\nprint 2;\nvar 3;\nprint 4;");

        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        assert_eq!(
            messages,
            vec![
                "[line 1] Error at '=': Expected variable name.",
                "[line 3] Error at '3': Expected variable name.",
            ]
        );

        // The well-formed statements survive.
        assert_eq!(
            AstPrinter::print_program(&program),
            "(print 2.0)\n(print 4.0)"
        );
    }

    #[test]
    fn test_invalid_assignment_target() {
        let (program, errors) = parse_source("1 + 2 = 3;");

        assert_eq!(program.len(), 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].to_string(),
            "[line 1] Error at '=': Invalid assignment target."
        );
    }

    #[test]
    fn test_expected_expression() {
        assert_eq!(
            error_messages("print );"),
            vec!["[line 1] Error at ')': Expected expression."]
        );
    }

    #[test]
    fn test_super_requires_method_name() {
        assert_eq!(
            error_messages("super;"),
            vec!["[line 1] Error at ';': Expected '.' after 'super'."]
        );
    }

    #[test]
    fn test_argument_limit() {
        let args: Vec<String> = (0..256).map(|i| i.to_string()).collect();
        let source = format!("f({});", args.join(", "));

        let (program, errors) = parse_source(&source);

        // Reported, but the call still parses.
        assert_eq!(program.len(), 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message(), "Can't have more than 255 arguments.");
    }

    #[test]
    fn test_parameter_limit() {
        let params: Vec<String> = (0..256).map(|i| format!("p{}", i)).collect();
        let source = format!("fun f({}) {{}}", params.join(", "));

        let (_, errors) = parse_source(&source);

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message(), "Can't have more than 255 parameters.");
    }

    #[test]
    fn test_empty_token_list_gets_eof() {
        let (program, errors) = Parser::new(Vec::new()).parse();

        assert!(program.is_empty());
        assert!(errors.is_empty());
    }

    #[test]
    fn test_comma_operator() {
        assert_eq!(
            print("print (1, 2), 3;"),
            "(print (, (group (, 1.0 2.0)) 3.0))"
        );

        // Inside an argument list commas separate arguments.
        assert_eq!(print("f(a, (b, c));"), "(; (call f a (group (, b c))))");
    }

    #[test]
    fn test_index_expressions() {
        assert_eq!(
            print("a[0][i + 1].b;"),
            "(; (. (index (index a 0.0) (+ i 1.0)) b))"
        );
        assert_eq!(
            error_messages("a[0;"),
            vec!["[line 1] Error at ';': Expected ']' after array index."]
        );
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |depth: usize| {
            format!("print {}1{};", "(".repeat(depth), ")".repeat(depth))
        };

        let (program, errors) = parse_source(&nested(100));
        assert!(errors.is_empty());
        assert_eq!(program.len(), 1);

        let (program, errors) = parse_source(&nested(300));
        assert!(program.is_empty());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message(), "Nesting too deep.");
    }

    #[test]
    fn test_nested_blocks_report_once() {
        let source = format!("{}{}", "{".repeat(300), "}".repeat(300));

        let (_, errors) = parse_source(&source);

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message(), "Nesting too deep.");
    }
}
