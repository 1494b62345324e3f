use super::*;
use crate::classfile::code::Instruction::*;
use crate::parser::parse;

fn generate(source: &str) -> Result<(Vec<Instruction>, u16), SemanticError> {
    let program = parse(source).expect("program should parse");
    let mut emitter = ClassEmitter::new();
    let mut generator = CodeGenerator::new(&mut emitter);
    generator.compile_program(&program)?;
    let max_locals = generator.max_locals();
    drop(generator);
    Ok((emitter.code().instructions().to_vec(), max_locals))
}

fn generate_ok(source: &str) -> Vec<Instruction> {
    generate(source).expect("program should compile").0
}

fn generate_err(source: &str) -> SemanticError {
    generate(source).expect_err("program should be rejected")
}

#[test]
fn test_declare_and_print() {
    let (instructions, max_locals) = generate("var x = 1\nprint x\n").unwrap();
    assert!(matches!(
        instructions[..],
        [
            Ldc(_),
            Istore(1),
            Getstatic(_),
            Iload(1),
            Invokevirtual { arg_slots: 1, .. },
        ]
    ));
    assert_eq!(max_locals, 2);
}

#[test]
fn test_store_selected_by_kind() {
    let (instructions, max_locals) =
        generate("var d = 1.0\nvar s = \"hi\"\nvar n = 1\n").unwrap();
    assert!(matches!(
        instructions[..],
        [Ldc2W(_), Dstore(1), Ldc(_), Astore(3), Ldc(_), Istore(4)]
    ));
    // the double occupies two slots
    assert_eq!(max_locals, 5);
}

#[test]
fn test_print_dispatches_on_type() {
    // double argument takes two stack slots
    let instructions = generate_ok("print 1.5\n");
    assert!(matches!(
        instructions[..],
        [Getstatic(_), Ldc2W(_), Invokevirtual { arg_slots: 2, .. }]
    ));
}

#[test]
fn test_int_comparison_idiom() {
    // the receiver for the print sits below the comparison operands
    let instructions = generate_ok("print 1 < 2\n");
    assert!(matches!(
        instructions[..],
        [
            Getstatic(_),
            Ldc(_),
            Ldc(_),
            IfIcmp(JumpCondition::Lt, _),
            Goto(_),
            Bipush(1),
            Goto(_),
            Bipush(0),
            Invokevirtual { arg_slots: 1, .. },
        ]
    ));
}

#[test]
fn test_double_comparison_reduces_through_dcmpg() {
    let instructions = generate_ok("print 1.0 < 2.0\n");
    assert!(matches!(
        instructions[..],
        [
            Getstatic(_),
            Ldc2W(_),
            Ldc2W(_),
            Dcmpg,
            Bipush(-1),
            IfIcmp(JumpCondition::Eq, _),
            ..
        ]
    ));
}

#[test]
fn test_double_ge_compares_indicator_against_zero() {
    let instructions = generate_ok("print 1.0 >= 2.0\n");
    assert!(matches!(
        instructions[..],
        [
            Getstatic(_),
            Ldc2W(_),
            Ldc2W(_),
            Dcmpg,
            Bipush(0),
            IfIcmp(JumpCondition::Ge, _),
            ..
        ]
    ));
}

#[test]
fn test_string_equality_is_reference_identity() {
    let instructions = generate_ok("print \"a\" == \"a\"\n");
    assert!(instructions.iter().any(|i| matches!(i, IfAcmpEq(_))));
}

#[test]
fn test_char_ordering_uses_int_comparison() {
    let instructions = generate_ok("print 'a' < 'b'\n");
    assert!(
        instructions
            .iter()
            .any(|i| matches!(i, IfIcmp(JumpCondition::Lt, _)))
    );
}

#[test]
fn test_if_skips_body_when_false() {
    let instructions = generate_ok("var x = 1\nif x == 1 {\nprint x\n}\n");
    // condition idiom, then branch-if-false over the body
    let branch_position = instructions
        .iter()
        .position(|i| matches!(i, IfIcmp(JumpCondition::Eq, _)))
        .unwrap();
    assert!(matches!(
        instructions[branch_position + 5..branch_position + 7],
        [Bipush(0), IfIcmp(JumpCondition::Eq, _)]
    ));
    assert!(matches!(instructions[instructions.len() - 1], Invokevirtual { .. }));
}

#[test]
fn test_while_loops_back_to_condition() {
    let instructions = generate_ok("var x = 0\nwhile x < 3 {\nx = x + 1\n}\n");
    assert!(instructions.iter().any(|i| matches!(i, Goto(_))));
    assert!(matches!(instructions[instructions.len() - 1], Goto(_)));
}

#[test]
fn test_arithmetic_chain_is_left_to_right() {
    let instructions = generate_ok("print 1 + 2 - 3\n");
    assert!(matches!(
        instructions[..],
        [Getstatic(_), Ldc(_), Ldc(_), Iadd, Ldc(_), Isub, Invokevirtual { .. }]
    ));
}

#[test]
fn test_unary_minus_on_double() {
    let instructions = generate_ok("print -1.5\n");
    assert!(matches!(
        instructions[..],
        [Getstatic(_), Ldc2W(_), Dneg, Invokevirtual { .. }]
    ));
}

#[test]
fn test_shadowing_gets_its_own_slot() {
    let (instructions, max_locals) =
        generate("var x = 1\nif x == 1 {\nvar x = 2.0\nprint x\n}\nprint x\n").unwrap();
    // inner x is a double in slots 2-3, outer x stays in slot 1
    assert!(instructions.iter().any(|i| matches!(i, Dstore(2))));
    assert!(instructions.iter().any(|i| matches!(i, Dload(2))));
    assert!(matches!(instructions[instructions.len() - 2], Iload(1)));
    assert_eq!(max_locals, 4);
}

#[test]
fn test_sibling_scopes_do_not_share_slots() {
    let (instructions, max_locals) = generate(
        "if true {\nvar a = 1\nprint a\n}\nif true {\nvar b = 2\nprint b\n}\n",
    )
    .unwrap();
    assert!(instructions.iter().any(|i| matches!(i, Istore(1))));
    assert!(instructions.iter().any(|i| matches!(i, Istore(2))));
    assert_eq!(max_locals, 3);
}

#[test]
fn test_duplicate_declaration_rejected() {
    let error = generate_err("var x = 1\nvar x = 2\n");
    assert!(matches!(
        error,
        SemanticError::DuplicateDeclaration { ref name, span, .. }
            if name == "x" && span.start == 10
    ));
}

#[test]
fn test_redeclaration_in_inner_scope_is_allowed() {
    assert!(generate("var x = 1\nif x == 1 {\nvar x = 2\n}\n").is_ok());
}

#[test]
fn test_undeclared_variable_in_expression() {
    let error = generate_err("print x\n");
    assert!(matches!(
        error,
        SemanticError::UndeclaredVariable { ref name, .. } if name == "x"
    ));
}

#[test]
fn test_assignment_to_undeclared_variable() {
    let error = generate_err("x = 1\n");
    assert!(matches!(error, SemanticError::UndeclaredVariable { .. }));
}

#[test]
fn test_declaration_does_not_see_its_own_name() {
    let error = generate_err("var x = x\n");
    assert!(matches!(error, SemanticError::UndeclaredVariable { .. }));
}

#[test]
fn test_variable_left_in_scope_after_block() {
    let error = generate_err("if true {\nvar a = 1\n}\nprint a\n");
    assert!(matches!(
        error,
        SemanticError::UndeclaredVariable { ref name, .. } if name == "a"
    ));
}

#[test]
fn test_mixed_sum_rejected() {
    let error = generate_err("var x = 1\nvar y = 1.0\nprint x + y\n");
    assert!(matches!(
        error,
        SemanticError::TypeMismatch {
            expected: VarType::Int,
            found: VarType::Double,
            ..
        }
    ));
}

#[test]
fn test_reassignment_with_different_type_rejected() {
    let error = generate_err("var x = 1\nx = 2.0\n");
    assert!(matches!(
        error,
        SemanticError::TypeMismatch {
            expected: VarType::Int,
            found: VarType::Double,
            ..
        }
    ));
}

#[test]
fn test_mixed_comparison_rejected() {
    let error = generate_err("print 1 == 1.0\n");
    assert!(matches!(error, SemanticError::TypeMismatch { .. }));
}

#[test]
fn test_string_concatenation_rejected() {
    let error = generate_err("print \"a\" + \"b\"\n");
    assert!(matches!(
        error,
        SemanticError::UnsupportedOperation {
            op: "+",
            var_type: VarType::Str,
            ..
        }
    ));
}

#[test]
fn test_string_ordering_rejected() {
    let error = generate_err("print \"a\" < \"b\"\n");
    assert!(matches!(
        error,
        SemanticError::UnsupportedOperation {
            op: "<",
            var_type: VarType::Str,
            ..
        }
    ));
}

#[test]
fn test_bool_ordering_rejected() {
    let error = generate_err("print true < false\n");
    assert!(matches!(
        error,
        SemanticError::UnsupportedOperation {
            op: "<",
            var_type: VarType::Bool,
            ..
        }
    ));
}

#[test]
fn test_bool_equality_allowed() {
    assert!(generate("print true == false\n").is_ok());
}

#[test]
fn test_negating_a_string_rejected() {
    let error = generate_err("print -\"a\"\n");
    assert!(matches!(
        error,
        SemanticError::UnsupportedOperation {
            op: "-",
            var_type: VarType::Str,
            ..
        }
    ));
}

#[test]
fn test_if_condition_must_be_bool() {
    let error = generate_err("if 1 {\nprint 1\n}\n");
    assert!(matches!(
        error,
        SemanticError::TypeMismatch {
            expected: VarType::Bool,
            found: VarType::Int,
            ..
        }
    ));
}

#[test]
fn test_while_condition_must_be_bool() {
    let error = generate_err("while 1.0 {\nprint 1\n}\n");
    assert!(matches!(
        error,
        SemanticError::TypeMismatch {
            expected: VarType::Bool,
            found: VarType::Double,
            ..
        }
    ));
}
