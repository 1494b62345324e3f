//! Tree-walking semantic analyzer and code generator.
//!
//! Walks the typed AST top-down, resolving variables against the scope
//! stack and type-checking bottom-up: every expression-compiling method
//! returns the static type of the value it leaves on the operand stack.
//! Instructions are appended to the [`ClassEmitter`] as the walk proceeds;
//! the first error aborts the whole compilation, so the emitter is never
//! finalized on a failed analysis.

use thiserror::Error;

use crate::classfile::ClassEmitter;
use crate::classfile::code::{Instruction, JumpCondition, Label};
use crate::parser::ast::{CompareOp, Constant, Expression, Identifier, Span, Statement};
use crate::semantics::symtab::{SymbolTable, SymtabError, Variable};
use crate::semantics::types::{StorageKind, VarType};

#[cfg(test)]
mod tests;

const SYSTEM_CLASS: &str = "java/lang/System";
const PRINT_STREAM_CLASS: &str = "java/io/PrintStream";

#[derive(Error, Debug, PartialEq)]
pub enum SemanticError {
    #[error("variable `{name}` is not declared")]
    UndeclaredVariable { name: String, span: Span },
    #[error("variable `{name}` is already declared in this scope")]
    DuplicateDeclaration {
        name: String,
        span: Span,
        #[source]
        source: SymtabError,
    },
    #[error("mismatched types: expected {expected}, found {found}")]
    TypeMismatch {
        expected: VarType,
        found: VarType,
        span: Span,
    },
    #[error("operator `{op}` is not supported for {var_type}")]
    UnsupportedOperation {
        op: &'static str,
        var_type: VarType,
        span: Span,
    },
}

impl SemanticError {
    pub fn span(&self) -> Span {
        match self {
            SemanticError::UndeclaredVariable { span, .. }
            | SemanticError::DuplicateDeclaration { span, .. }
            | SemanticError::TypeMismatch { span, .. }
            | SemanticError::UnsupportedOperation { span, .. } => *span,
        }
    }
}

/// Drives one compilation. Owns the scope stack; borrows the emitter so the
/// caller keeps control of finalization.
pub struct CodeGenerator<'e> {
    emitter: &'e mut ClassEmitter,
    symtab: SymbolTable,
}

impl<'e> CodeGenerator<'e> {
    pub fn new(emitter: &'e mut ClassEmitter) -> Self {
        Self {
            emitter,
            symtab: SymbolTable::new(),
        }
    }

    /// Compile the whole program into the emitter's entry-point method.
    pub fn compile_program(&mut self, statements: &[Statement]) -> Result<(), SemanticError> {
        self.compile_block(statements)
    }

    /// Local-frame size needed by the compiled program, valid once
    /// [`CodeGenerator::compile_program`] has succeeded.
    pub fn max_locals(&self) -> u16 {
        self.symtab.max_locals()
    }

    fn compile_block(&mut self, statements: &[Statement]) -> Result<(), SemanticError> {
        self.symtab.open_scope();
        for statement in statements {
            self.compile_statement(statement)?;
        }
        self.symtab.close_scope();
        Ok(())
    }

    fn compile_statement(&mut self, statement: &Statement) -> Result<(), SemanticError> {
        match statement {
            Statement::Assign {
                declares,
                target,
                value,
                span,
            } => self.compile_assign(*declares, target, value, *span),
            Statement::If {
                condition, body, ..
            } => self.compile_if(condition, body),
            Statement::While {
                condition, body, ..
            } => self.compile_while(condition, body),
            Statement::Print { value, .. } => self.compile_print(value),
        }
    }

    // The right-hand side is compiled first: it both produces the value and
    // synthesizes the type a fresh declaration takes, and it means
    // `var x = x` resolves `x` before the declaration exists.
    fn compile_assign(
        &mut self,
        declares: bool,
        target: &Identifier,
        value: &Expression,
        span: Span,
    ) -> Result<(), SemanticError> {
        let value_type = self.compile_expr(value)?;
        let variable = if declares {
            self.symtab
                .declare(&target.name, value_type)
                .map_err(|source| SemanticError::DuplicateDeclaration {
                    name: target.name.clone(),
                    span,
                    source,
                })?
        } else {
            let variable = self.resolve(target)?.clone();
            if variable.var_type != value_type {
                return Err(SemanticError::TypeMismatch {
                    expected: variable.var_type,
                    found: value_type,
                    span: value.span(),
                });
            }
            variable
        };
        let store = match variable.var_type.storage_kind() {
            StorageKind::Int => Instruction::Istore(variable.slot),
            StorageKind::Double => Instruction::Dstore(variable.slot),
            StorageKind::Reference => Instruction::Astore(variable.slot),
        };
        self.emitter.code().emit(store);
        Ok(())
    }

    fn compile_if(
        &mut self,
        condition: &Expression,
        body: &[Statement],
    ) -> Result<(), SemanticError> {
        self.compile_condition(condition)?;
        let skip = self.emitter.code().new_label();
        self.emit_branch_if_false(skip);
        self.compile_block(body)?;
        self.emitter.code().bind(skip);
        Ok(())
    }

    fn compile_while(
        &mut self,
        condition: &Expression,
        body: &[Statement],
    ) -> Result<(), SemanticError> {
        let code = self.emitter.code();
        let condition_label = code.new_label();
        let exit = code.new_label();
        code.bind(condition_label);
        self.compile_condition(condition)?;
        self.emit_branch_if_false(exit);
        self.compile_block(body)?;
        let code = self.emitter.code();
        code.emit(Instruction::Goto(condition_label));
        code.bind(exit);
        Ok(())
    }

    fn compile_condition(&mut self, condition: &Expression) -> Result<(), SemanticError> {
        let condition_type = self.compile_expr(condition)?;
        if condition_type != VarType::Bool {
            return Err(SemanticError::TypeMismatch {
                expected: VarType::Bool,
                found: condition_type,
                span: condition.span(),
            });
        }
        Ok(())
    }

    // consumes the 0/1 value left by a Boolean expression
    fn emit_branch_if_false(&mut self, target: Label) {
        let code = self.emitter.code();
        code.emit(Instruction::Bipush(0));
        code.emit(Instruction::IfIcmp(JumpCondition::Eq, target));
    }

    // The receiver is pushed before the argument is evaluated, so the
    // argument sits above `System.out` when `println` is invoked.
    fn compile_print(&mut self, value: &Expression) -> Result<(), SemanticError> {
        let out_field =
            self.emitter
                .pool()
                .field_ref(SYSTEM_CLASS, "out", "Ljava/io/PrintStream;");
        self.emitter.code().emit(Instruction::Getstatic(out_field));
        let value_type = self.compile_expr(value)?;
        let println = self.emitter.pool().method_ref(
            PRINT_STREAM_CLASS,
            "println",
            value_type.print_descriptor(),
        );
        self.emitter.code().emit(Instruction::Invokevirtual {
            index: println,
            arg_slots: value_type.slot_width(),
        });
        Ok(())
    }

    fn compile_expr(&mut self, expression: &Expression) -> Result<VarType, SemanticError> {
        match expression {
            Expression::Compare(op, lhs, rhs, _) => self.compile_compare(*op, lhs, rhs),
            Expression::Add(lhs, rhs, span) => {
                self.compile_arithmetic("+", Instruction::Iadd, Instruction::Dadd, lhs, rhs, *span)
            }
            Expression::Sub(lhs, rhs, span) => {
                self.compile_arithmetic("-", Instruction::Isub, Instruction::Dsub, lhs, rhs, *span)
            }
            Expression::Mul(lhs, rhs, span) => {
                self.compile_arithmetic("*", Instruction::Imul, Instruction::Dmul, lhs, rhs, *span)
            }
            Expression::Div(lhs, rhs, span) => {
                self.compile_arithmetic("/", Instruction::Idiv, Instruction::Ddiv, lhs, rhs, *span)
            }
            Expression::Negate(operand, span) => self.compile_negate(operand, *span),
            Expression::Literal(constant, _) => Ok(self.compile_literal(constant)),
            Expression::Variable(identifier) => self.compile_variable(identifier),
        }
    }

    fn compile_arithmetic(
        &mut self,
        op: &'static str,
        int_insn: Instruction,
        double_insn: Instruction,
        lhs: &Expression,
        rhs: &Expression,
        span: Span,
    ) -> Result<VarType, SemanticError> {
        let lhs_type = self.compile_expr(lhs)?;
        let rhs_type = self.compile_expr(rhs)?;
        if lhs_type != rhs_type {
            return Err(SemanticError::TypeMismatch {
                expected: lhs_type,
                found: rhs_type,
                span: rhs.span(),
            });
        }
        let instruction = match lhs_type {
            VarType::Int => int_insn,
            VarType::Double => double_insn,
            other => {
                return Err(SemanticError::UnsupportedOperation {
                    op,
                    var_type: other,
                    span,
                });
            }
        };
        self.emitter.code().emit(instruction);
        Ok(lhs_type)
    }

    fn compile_negate(
        &mut self,
        operand: &Expression,
        span: Span,
    ) -> Result<VarType, SemanticError> {
        let operand_type = self.compile_expr(operand)?;
        let instruction = match operand_type {
            VarType::Int => Instruction::Ineg,
            VarType::Double => Instruction::Dneg,
            other => {
                return Err(SemanticError::UnsupportedOperation {
                    op: "-",
                    var_type: other,
                    span,
                });
            }
        };
        self.emitter.code().emit(instruction);
        Ok(operand_type)
    }

    fn compile_compare(
        &mut self,
        op: CompareOp,
        lhs: &Expression,
        rhs: &Expression,
    ) -> Result<VarType, SemanticError> {
        let lhs_type = self.compile_expr(lhs)?;
        let rhs_type = self.compile_expr(rhs)?;
        if lhs_type != rhs_type {
            return Err(SemanticError::TypeMismatch {
                expected: lhs_type,
                found: rhs_type,
                span: lhs.span(),
            });
        }
        match op {
            CompareOp::Lt | CompareOp::Gt | CompareOp::Ge | CompareOp::Le => {
                // ordering exists for the numeric representations only
                match lhs_type {
                    VarType::Int | VarType::Char => self.emit_int_compare(int_condition(op)),
                    VarType::Double => {
                        let (condition, target) = double_condition(op);
                        self.emit_double_compare(condition, target);
                    }
                    other => {
                        return Err(SemanticError::UnsupportedOperation {
                            op: op.symbol(),
                            var_type: other,
                            span: lhs.span(),
                        });
                    }
                }
            }
            CompareOp::Eq | CompareOp::Ne => match lhs_type {
                VarType::Int | VarType::Char | VarType::Bool => {
                    self.emit_int_compare(int_condition(op));
                }
                VarType::Double => {
                    let (condition, target) = double_condition(op);
                    self.emit_double_compare(condition, target);
                }
                // reference identity, not content equality
                VarType::Str => {
                    let branch: fn(Label) -> Instruction = if op == CompareOp::Eq {
                        Instruction::IfAcmpEq
                    } else {
                        Instruction::IfAcmpNe
                    };
                    self.emit_branch_idiom(branch);
                }
            },
        }
        Ok(VarType::Bool)
    }

    fn emit_int_compare(&mut self, condition: JumpCondition) {
        self.emit_branch_idiom(|label| Instruction::IfIcmp(condition, label));
    }

    // Reduce the two doubles to a -1/0/1 indicator, then compare the
    // indicator against the target constant with the integer idiom.
    fn emit_double_compare(&mut self, condition: JumpCondition, target: i8) {
        let code = self.emitter.code();
        code.emit(Instruction::Dcmpg);
        code.emit(Instruction::Bipush(target));
        self.emit_int_compare(condition);
    }

    // Materializes a 0/1 value from a conditional branch:
    //   <branch> success; goto failure;
    //   success: bipush 1; goto end;
    //   failure: bipush 0;
    //   end:
    fn emit_branch_idiom(&mut self, branch: impl FnOnce(Label) -> Instruction) {
        let code = self.emitter.code();
        let success = code.new_label();
        let failure = code.new_label();
        let end = code.new_label();
        code.emit(branch(success));
        code.emit(Instruction::Goto(failure));
        code.bind(success);
        code.emit(Instruction::Bipush(1));
        code.emit(Instruction::Goto(end));
        code.bind(failure);
        code.emit(Instruction::Bipush(0));
        code.bind(end);
    }

    fn compile_literal(&mut self, constant: &Constant) -> VarType {
        match constant {
            Constant::Int(value) => {
                let index = self.emitter.pool().integer(*value);
                self.emitter.code().emit(Instruction::Ldc(index));
                VarType::Int
            }
            Constant::Double(value) => {
                let index = self.emitter.pool().double(*value);
                self.emitter.code().emit(Instruction::Ldc2W(index));
                VarType::Double
            }
            Constant::Char(value) => {
                let index = self.emitter.pool().integer(*value as i32);
                self.emitter.code().emit(Instruction::Ldc(index));
                VarType::Char
            }
            Constant::Bool(value) => {
                let index = self.emitter.pool().integer(i32::from(*value));
                self.emitter.code().emit(Instruction::Ldc(index));
                VarType::Bool
            }
            Constant::Str(value) => {
                let index = self.emitter.pool().string(value);
                self.emitter.code().emit(Instruction::Ldc(index));
                VarType::Str
            }
        }
    }

    fn compile_variable(&mut self, identifier: &Identifier) -> Result<VarType, SemanticError> {
        let variable = self.resolve(identifier)?.clone();
        let load = match variable.var_type.storage_kind() {
            StorageKind::Int => Instruction::Iload(variable.slot),
            StorageKind::Double => Instruction::Dload(variable.slot),
            StorageKind::Reference => Instruction::Aload(variable.slot),
        };
        self.emitter.code().emit(load);
        Ok(variable.var_type)
    }

    fn resolve(&self, identifier: &Identifier) -> Result<&Variable, SemanticError> {
        self.symtab
            .lookup(&identifier.name)
            .ok_or_else(|| SemanticError::UndeclaredVariable {
                name: identifier.name.clone(),
                span: identifier.span,
            })
    }
}

fn int_condition(op: CompareOp) -> JumpCondition {
    match op {
        CompareOp::Lt => JumpCondition::Lt,
        CompareOp::Gt => JumpCondition::Gt,
        CompareOp::Eq => JumpCondition::Eq,
        CompareOp::Ne => JumpCondition::Ne,
        CompareOp::Ge => JumpCondition::Ge,
        CompareOp::Le => JumpCondition::Le,
    }
}

// branch condition and dcmpg target for each double comparison
fn double_condition(op: CompareOp) -> (JumpCondition, i8) {
    match op {
        CompareOp::Lt => (JumpCondition::Eq, -1),
        CompareOp::Gt => (JumpCondition::Eq, 1),
        CompareOp::Eq => (JumpCondition::Eq, 0),
        CompareOp::Ne => (JumpCondition::Ne, 0),
        CompareOp::Ge => (JumpCondition::Ge, 0),
        CompareOp::Le => (JumpCondition::Le, 0),
    }
}
