//! Hand-written recursive-descent parser for the source grammar.
//!
//! The grammar is a PEG: alternatives are tried in order, the first match
//! wins, and a failed alternative restores the cursor before the next one is
//! tried. All keywords and operators are whitespace-exact (`"var "`,
//! `" = "`, `" + "`, `" {\n"` are literal), so there is no separate lexer.
//! The whole input must be consumed; the error position is the furthest
//! offset any rule reached before failing.

use thiserror::Error;

use super::ast::{CompareOp, Constant, Expression, Identifier, Span, Statement};


/// The input did not fully match the grammar.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("syntax error at offset {position}: unexpected {found}")]
pub struct SyntaxError {
    /// Byte offset of the first position that could not be matched.
    pub position: usize,
    /// Short description of what sits at that position.
    pub found: String,
}

/// Parse a complete program. Trailing unconsumed input is an error.
pub fn parse(source: &str) -> Result<Vec<Statement>, SyntaxError> {
    let mut cursor = Cursor::new(source);
    match parse_program(&mut cursor) {
        Some(statements) if cursor.at_end() => Ok(statements),
        _ => {
            cursor.note_failure(cursor.position);
            Err(cursor.syntax_error())
        }
    }
}

struct Cursor<'src> {
    source: &'src str,
    position: usize,
    furthest: usize,
}

impl<'src> Cursor<'src> {
    fn new(source: &'src str) -> Self {
        Self {
            source,
            position: 0,
            furthest: 0,
        }
    }

    fn mark(&self) -> usize {
        self.position
    }

    fn reset(&mut self, mark: usize) {
        self.position = mark;
    }

    fn at_end(&self) -> bool {
        self.position == self.source.len()
    }

    fn rest(&self) -> &'src str {
        &self.source[self.position..]
    }

    /// Match an exact literal. On mismatch, records the offset of the first
    /// diverging byte and leaves the position untouched.
    fn eat(&mut self, literal: &str) -> bool {
        let rest = self.rest();
        if rest.starts_with(literal) {
            self.position += literal.len();
            return true;
        }
        let matched = literal
            .bytes()
            .zip(rest.bytes())
            .take_while(|(expected, actual)| expected == actual)
            .count();
        self.note_failure(self.position + matched);
        false
    }

    /// Consume one character satisfying `predicate`.
    fn eat_if(&mut self, predicate: impl Fn(char) -> bool) -> Option<char> {
        match self.rest().chars().next() {
            Some(ch) if predicate(ch) => {
                self.position += ch.len_utf8();
                Some(ch)
            }
            _ => {
                self.note_failure(self.position);
                None
            }
        }
    }

    fn note_failure(&mut self, at: usize) {
        if at > self.furthest {
            self.furthest = at;
        }
    }

    fn syntax_error(&self) -> SyntaxError {
        let rest = &self.source[self.furthest..];
        let found = if rest.is_empty() {
            "end of input".to_string()
        } else {
            let line = rest.lines().next().unwrap_or("");
            let mut snippet: String = line.chars().take(24).collect();
            if snippet.len() < line.len() {
                snippet.push_str("...");
            }
            format!("`{snippet}`")
        };
        SyntaxError {
            position: self.furthest,
            found,
        }
    }
}

// Program := (Statement '\n')+
fn parse_program(cursor: &mut Cursor) -> Option<Vec<Statement>> {
    let mut statements = Vec::new();
    loop {
        let mark = cursor.mark();
        let statement = parse_statement(cursor);
        if let Some(statement) = statement {
            if cursor.eat("\n") {
                statements.push(statement);
                continue;
            }
        }
        cursor.reset(mark);
        break;
    }
    if statements.is_empty() {
        None
    } else {
        Some(statements)
    }
}

// Statement := [ \t]* (Assign | If | While | Print)
fn parse_statement(cursor: &mut Cursor) -> Option<Statement> {
    skip_blanks(cursor);
    let mark = cursor.mark();
    if let Some(statement) = parse_assign(cursor) {
        return Some(statement);
    }
    cursor.reset(mark);
    if let Some(statement) = parse_if(cursor) {
        return Some(statement);
    }
    cursor.reset(mark);
    if let Some(statement) = parse_while(cursor) {
        return Some(statement);
    }
    cursor.reset(mark);
    if let Some(statement) = parse_print(cursor) {
        return Some(statement);
    }
    cursor.reset(mark);
    None
}

fn skip_blanks(cursor: &mut Cursor) {
    while cursor.eat_if(|ch| ch == ' ' || ch == '\t').is_some() {}
}

// Assign := ('var ')? Var ' = ' Expr
fn parse_assign(cursor: &mut Cursor) -> Option<Statement> {
    let start = cursor.mark();
    let declares = cursor.eat("var ");
    let target = parse_identifier(cursor)?;
    if !cursor.eat(" = ") {
        return None;
    }
    let value = parse_expr(cursor)?;
    Some(Statement::Assign {
        declares,
        target,
        value,
        span: Span::new(start, cursor.position),
    })
}

// If := 'if ' Expr Block
fn parse_if(cursor: &mut Cursor) -> Option<Statement> {
    let start = cursor.mark();
    if !cursor.eat("if ") {
        return None;
    }
    let condition = parse_expr(cursor)?;
    let body = parse_block(cursor)?;
    Some(Statement::If {
        condition,
        body,
        span: Span::new(start, cursor.position),
    })
}

// While := 'while ' Expr Block
fn parse_while(cursor: &mut Cursor) -> Option<Statement> {
    let start = cursor.mark();
    if !cursor.eat("while ") {
        return None;
    }
    let condition = parse_expr(cursor)?;
    let body = parse_block(cursor)?;
    Some(Statement::While {
        condition,
        body,
        span: Span::new(start, cursor.position),
    })
}

// Print := 'print ' Expr
fn parse_print(cursor: &mut Cursor) -> Option<Statement> {
    let start = cursor.mark();
    if !cursor.eat("print ") {
        return None;
    }
    let value = parse_expr(cursor)?;
    Some(Statement::Print {
        value,
        span: Span::new(start, cursor.position),
    })
}

// Block := ' {\n' Program [ \t]* '}'
fn parse_block(cursor: &mut Cursor) -> Option<Vec<Statement>> {
    if !cursor.eat(" {\n") {
        return None;
    }
    let body = parse_program(cursor)?;
    skip_blanks(cursor);
    if !cursor.eat("}") {
        return None;
    }
    Some(body)
}

// Expr := Sum ( (' < '|' > '|' == '|' != '|' >= '|' <= ') Sum )?
fn parse_expr(cursor: &mut Cursor) -> Option<Expression> {
    let start = cursor.mark();
    let lhs = parse_sum(cursor)?;
    let mark = cursor.mark();
    if let Some(op) = parse_compare_op(cursor) {
        if let Some(rhs) = parse_sum(cursor) {
            return Some(Expression::Compare(
                op,
                Box::new(lhs),
                Box::new(rhs),
                Span::new(start, cursor.position),
            ));
        }
        // the optional comparison tail matched nothing
        cursor.reset(mark);
    }
    Some(lhs)
}

fn parse_compare_op(cursor: &mut Cursor) -> Option<CompareOp> {
    // each operator carries its surrounding spaces, so ' < ' cannot eat the
    // prefix of ' <= '
    const OPERATORS: [(&str, CompareOp); 6] = [
        (" < ", CompareOp::Lt),
        (" > ", CompareOp::Gt),
        (" == ", CompareOp::Eq),
        (" != ", CompareOp::Ne),
        (" >= ", CompareOp::Ge),
        (" <= ", CompareOp::Le),
    ];
    for (literal, op) in OPERATORS {
        if cursor.eat(literal) {
            return Some(op);
        }
    }
    None
}

// Sum := Prod ( (' + '|' - ') Prod )*
fn parse_sum(cursor: &mut Cursor) -> Option<Expression> {
    let start = cursor.mark();
    let mut lhs = parse_prod(cursor)?;
    loop {
        let mark = cursor.mark();
        let add = if cursor.eat(" + ") {
            true
        } else if cursor.eat(" - ") {
            false
        } else {
            break;
        };
        match parse_prod(cursor) {
            Some(rhs) => {
                let span = Span::new(start, cursor.position);
                lhs = if add {
                    Expression::Add(Box::new(lhs), Box::new(rhs), span)
                } else {
                    Expression::Sub(Box::new(lhs), Box::new(rhs), span)
                };
            }
            None => {
                cursor.reset(mark);
                break;
            }
        }
    }
    Some(lhs)
}

// Prod := Unary ( (' * '|' / ') Unary )*
fn parse_prod(cursor: &mut Cursor) -> Option<Expression> {
    let start = cursor.mark();
    let mut lhs = parse_unary(cursor)?;
    loop {
        let mark = cursor.mark();
        let multiply = if cursor.eat(" * ") {
            true
        } else if cursor.eat(" / ") {
            false
        } else {
            break;
        };
        match parse_unary(cursor) {
            Some(rhs) => {
                let span = Span::new(start, cursor.position);
                lhs = if multiply {
                    Expression::Mul(Box::new(lhs), Box::new(rhs), span)
                } else {
                    Expression::Div(Box::new(lhs), Box::new(rhs), span)
                };
            }
            None => {
                cursor.reset(mark);
                break;
            }
        }
    }
    Some(lhs)
}

// Unary := '-'? Brackets
// A consumed '-' commits: `-` followed by a non-expression fails the rule.
fn parse_unary(cursor: &mut Cursor) -> Option<Expression> {
    let start = cursor.mark();
    let negated = cursor.eat("-");
    let operand = parse_brackets(cursor)?;
    if negated {
        Some(Expression::Negate(
            Box::new(operand),
            Span::new(start, cursor.position),
        ))
    } else {
        Some(operand)
    }
}

// Brackets := Literal | Var | '(' Expr ')'
fn parse_brackets(cursor: &mut Cursor) -> Option<Expression> {
    let mark = cursor.mark();
    if let Some(expression) = parse_literal(cursor) {
        return Some(expression);
    }
    cursor.reset(mark);
    if let Some(identifier) = parse_identifier(cursor) {
        return Some(Expression::Variable(identifier));
    }
    cursor.reset(mark);
    if cursor.eat("(") {
        let inner = parse_expr(cursor)?;
        if cursor.eat(")") {
            return Some(inner);
        }
    }
    cursor.reset(mark);
    None
}

// Var := Letter (Letter|Digit|'_')*
fn parse_identifier(cursor: &mut Cursor) -> Option<Identifier> {
    let start = cursor.mark();
    cursor.eat_if(|ch| ch.is_ascii_alphabetic())?;
    while cursor
        .eat_if(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        .is_some()
    {}
    Some(Identifier {
        name: cursor.source[start..cursor.position].to_string(),
        span: Span::new(start, cursor.position),
    })
}

// Literal := DoubleLiteral | IntLiteral | StringLiteral | CharLiteral | BoolLiteral
// Double before Int, so a literal with a decimal point is never split.
fn parse_literal(cursor: &mut Cursor) -> Option<Expression> {
    let start = cursor.mark();
    if let Some(value) = parse_double_literal(cursor) {
        return Some(literal(Constant::Double(value), start, cursor));
    }
    cursor.reset(start);
    if let Some(value) = parse_int_literal(cursor) {
        return Some(literal(Constant::Int(value), start, cursor));
    }
    cursor.reset(start);
    if let Some(value) = parse_string_literal(cursor) {
        return Some(literal(Constant::Str(value), start, cursor));
    }
    cursor.reset(start);
    if let Some(value) = parse_char_literal(cursor) {
        return Some(literal(Constant::Char(value), start, cursor));
    }
    cursor.reset(start);
    if cursor.eat("true") {
        return Some(literal(Constant::Bool(true), start, cursor));
    }
    cursor.reset(start);
    if cursor.eat("false") {
        return Some(literal(Constant::Bool(false), start, cursor));
    }
    cursor.reset(start);
    None
}

fn literal(constant: Constant, start: usize, cursor: &Cursor) -> Expression {
    Expression::Literal(constant, Span::new(start, cursor.position))
}

// DoubleLiteral := '-'? Digit* '.' Digit+
fn parse_double_literal(cursor: &mut Cursor) -> Option<f64> {
    let start = cursor.mark();
    cursor.eat("-");
    while cursor.eat_if(|ch| ch.is_ascii_digit()).is_some() {}
    if !cursor.eat(".") {
        return None;
    }
    cursor.eat_if(|ch| ch.is_ascii_digit())?;
    while cursor.eat_if(|ch| ch.is_ascii_digit()).is_some() {}
    cursor.source[start..cursor.position].parse().ok()
}

// IntLiteral := '-'? Digit+
// A value outside the 32-bit range fails the rule (and thereby the parse).
fn parse_int_literal(cursor: &mut Cursor) -> Option<i32> {
    let start = cursor.mark();
    cursor.eat("-");
    cursor.eat_if(|ch| ch.is_ascii_digit())?;
    while cursor.eat_if(|ch| ch.is_ascii_digit()).is_some() {}
    cursor.source[start..cursor.position].parse().ok()
}

// StringLiteral := '"' (any char except '"')* '"'  -- no escapes
fn parse_string_literal(cursor: &mut Cursor) -> Option<String> {
    if !cursor.eat("\"") {
        return None;
    }
    let content_start = cursor.position;
    match cursor.rest().find('"') {
        Some(offset) => {
            cursor.position += offset;
            let content = cursor.source[content_start..cursor.position].to_string();
            cursor.eat("\"");
            Some(content)
        }
        None => {
            cursor.note_failure(cursor.source.len());
            None
        }
    }
}

// CharLiteral := '\'' <one char that is not '\''> '\''
fn parse_char_literal(cursor: &mut Cursor) -> Option<char> {
    if !cursor.eat("'") {
        return None;
    }
    let value = cursor.eat_if(|ch| ch != '\'')?;
    if !cursor.eat("'") {
        return None;
    }
    Some(value)
}
