use mocha::codegen::SemanticError;
use mocha::semantics::types::VarType;
use mocha::{CompileError, compile};

fn assert_is_class_file(bytes: &[u8]) {
    assert_eq!(&bytes[0..4], &[0xca, 0xfe, 0xba, 0xbe]);
    let needle = b"Main";
    assert!(bytes.windows(needle.len()).any(|window| window == needle));
}

#[test]
fn test_declare_and_print() {
    let bytes = compile("var x = 1\nprint x\n").unwrap();
    assert_is_class_file(&bytes);
}

#[test]
fn test_duplicate_declaration_fails_at_second_position() {
    let error = compile("var x = 1\nvar x = 2\n").unwrap_err();
    match error {
        CompileError::Semantic(SemanticError::DuplicateDeclaration { name, span, .. }) => {
            assert_eq!(name, "x");
            assert_eq!(span.start, 10);
        }
        other => panic!("expected duplicate declaration, got {other:?}"),
    }
}

#[test]
fn test_conditional_print() {
    let bytes = compile("var x = 1\nif x == 1 {\nprint x\n}\n").unwrap();
    assert_is_class_file(&bytes);
}

#[test]
fn test_counting_loop() {
    let bytes = compile("var x = 0\nwhile x < 3 {\nprint x\nx = x + 1\n}\n").unwrap();
    assert_is_class_file(&bytes);
}

#[test]
fn test_mixed_numeric_sum_is_rejected() {
    let error = compile("var x = 1\nvar y = 1.0\nprint x + y\n").unwrap_err();
    assert!(matches!(
        error,
        CompileError::Semantic(SemanticError::TypeMismatch {
            expected: VarType::Int,
            found: VarType::Double,
            ..
        })
    ));
}

#[test]
fn test_string_concatenation_is_rejected() {
    let error = compile("print \"a\" + \"b\"\n").unwrap_err();
    assert!(matches!(
        error,
        CompileError::Semantic(SemanticError::UnsupportedOperation {
            op: "+",
            var_type: VarType::Str,
            ..
        })
    ));
}

#[test]
fn test_syntax_error_reports_position() {
    let error = compile("print\n").unwrap_err();
    let CompileError::Syntax(syntax) = error else {
        panic!("expected syntax error");
    };
    assert_eq!(syntax.position, 5);
}

#[test]
fn test_shadowing_program_compiles() {
    let source = "var x = 1\nif x == 1 {\nvar x = 2.0\nprint x\n}\nprint x\n";
    let bytes = compile(source).unwrap();
    assert_is_class_file(&bytes);
}

#[test]
fn test_all_print_overloads_compile() {
    let source = "print 1\nprint 1.5\nprint 'c'\nprint true\nprint \"s\"\n";
    let bytes = compile(source).unwrap();
    assert_is_class_file(&bytes);
}

#[test]
fn test_compilations_are_independent_and_deterministic() {
    let source = "var x = 2\nprint x * x\n";
    let first = compile(source).unwrap();
    let second = compile(source).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_diagnostic_includes_position_and_snippet() {
    let source = "var x = 1\nvar x = 2\n";
    let error = compile(source).unwrap_err();
    let rendered = error.format_with_source(source);
    assert!(rendered.contains("2:1"), "rendered: {rendered}");
    assert!(rendered.contains("var x = 2"), "rendered: {rendered}");
}

#[test]
fn test_nested_control_flow_compiles() {
    let source = "var x = 0\nwhile x < 10 {\nif x > 5 {\nprint x\n}\nx = x + 1\n}\n";
    let bytes = compile(source).unwrap();
    assert_is_class_file(&bytes);
}
