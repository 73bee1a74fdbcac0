//! Expression parsing (Pratt rules)
//!
//! Each token kind maps to a `(prefix, infix, precedence)` rule. Parselets
//! emit bytecode directly and maintain `last_type`, the statically inferred
//! type of the expression just parsed, which selects the typed arithmetic
//! opcodes.

use super::{Compiler, StaticType};
use crate::bytecode::Opcode;
use crate::token::TokenKind;
use crate::value::Value;

/// Operator precedence, lowest to highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(super) enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    /// The next-tighter level, used for left-associative infix recursion
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn = fn(&mut Compiler, bool);

struct ParseRule {
    prefix: Option<ParseFn>,
    infix: Option<ParseFn>,
    precedence: Precedence,
}

const fn rule(prefix: Option<ParseFn>, infix: Option<ParseFn>, precedence: Precedence) -> ParseRule {
    ParseRule {
        prefix,
        infix,
        precedence,
    }
}

/// The Pratt table, expressed as a dense match over token kinds
fn rule_for(kind: &TokenKind) -> ParseRule {
    match kind {
        TokenKind::LeftParen => rule(Some(grouping), Some(call), Precedence::Call),
        TokenKind::Dot => rule(None, Some(dot), Precedence::Call),
        TokenKind::Minus => rule(Some(unary), Some(binary), Precedence::Term),
        TokenKind::Plus => rule(None, Some(binary), Precedence::Term),
        TokenKind::Slash | TokenKind::Star => rule(None, Some(binary), Precedence::Factor),
        TokenKind::Bang => rule(Some(unary), None, Precedence::None),
        TokenKind::BangEqual | TokenKind::EqualEqual => {
            rule(None, Some(binary), Precedence::Equality)
        }
        TokenKind::Greater
        | TokenKind::GreaterEqual
        | TokenKind::Less
        | TokenKind::LessEqual => rule(None, Some(binary), Precedence::Comparison),
        TokenKind::Ident(_) => rule(Some(variable), None, Precedence::None),
        TokenKind::StrLit(_) => rule(Some(string), None, Precedence::None),
        TokenKind::IntLit(_) => rule(Some(integer), None, Precedence::None),
        TokenKind::FloatLit(_) => rule(Some(float), None, Precedence::None),
        TokenKind::And => rule(None, Some(and_op), Precedence::And),
        TokenKind::Or => rule(None, Some(or_op), Precedence::Or),
        TokenKind::False | TokenKind::True | TokenKind::Nil => {
            rule(Some(literal), None, Precedence::None)
        }
        TokenKind::Super => rule(Some(super_), None, Precedence::None),
        TokenKind::This => rule(Some(this_), None, Precedence::None),
        _ => rule(None, None, Precedence::None),
    }
}

impl Compiler {
    /// Parse anything at assignment precedence or higher
    pub(super) fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    /// Core Pratt loop: one prefix parselet, then infix parselets while the
    /// next operator binds at least as tightly as `precedence`
    pub(super) fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = rule_for(&self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };
        // Assignment is only legal where the whole expression could be a target
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= rule_for(&self.current.kind).precedence {
            self.advance();
            if let Some(infix) = rule_for(&self.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        if can_assign && self.match_token(&TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    /// Compile a variable reference or assignment, resolving locals, then
    /// upvalues, then falling back to a global by name
    pub(super) fn named_variable(&mut self, name: &str, can_assign: bool) {
        let top = self.frames.len() - 1;
        let (get_op, set_op, arg, ty) = if let Some((slot, ty)) = self.resolve_local(top, name) {
            (Opcode::GetLocal, Opcode::SetLocal, slot, ty)
        } else if let Some((index, ty)) = self.resolve_upvalue(top, name) {
            (Opcode::GetUpvalue, Opcode::SetUpvalue, index, ty)
        } else {
            let arg = self.identifier_constant(name);
            let ty = self
                .global_types
                .get(name)
                .copied()
                .unwrap_or(StaticType::Unknown);
            (Opcode::GetGlobal, Opcode::SetGlobal, arg, ty)
        };

        if can_assign && self.match_token(&TokenKind::Equal) {
            self.expression();
            self.emit_op_byte(set_op, arg);
        } else {
            self.emit_op_byte(get_op, arg);
            self.last_type = ty;
        }
    }

    /// Parse a parenthesized argument list, returning the argument count
    pub(super) fn argument_list(&mut self) -> u8 {
        let mut count: u8 = 0;
        if !self.check(&TokenKind::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("Can't have more than 255 arguments.");
                } else {
                    count += 1;
                }
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightParen, "Expect ')' after arguments.");
        count
    }

    /// Select the typed arithmetic opcode for the operand-type pair; any
    /// combination without one compiles to the deferred `TypeError`
    fn emit_arithmetic(
        &mut self,
        left: StaticType,
        right: StaticType,
        int_op: Opcode,
        float_op: Opcode,
        concat: Option<Opcode>,
    ) {
        match (left, right) {
            (StaticType::Int, StaticType::Int) => self.emit_op(int_op),
            (StaticType::Float, StaticType::Float) => self.emit_op(float_op),
            (StaticType::Str, StaticType::Str) => match concat {
                Some(concat) => self.emit_op(concat),
                None => self.emit_op(Opcode::TypeError),
            },
            _ => self.emit_op(Opcode::TypeError),
        }
        // The expression type ties to the first operand; no int→float widening
        self.last_type = left;
    }
}

// ── Parselets ─────────────────────────────────────────────────────────────

fn grouping(c: &mut Compiler, _can_assign: bool) {
    c.expression();
    c.consume(&TokenKind::RightParen, "Expect ')' after expression.");
}

fn call(c: &mut Compiler, _can_assign: bool) {
    let argc = c.argument_list();
    c.emit_op_byte(Opcode::Call, argc);
    c.last_type = StaticType::Unknown;
}

fn dot(c: &mut Compiler, can_assign: bool) {
    let Some(name) = c.consume_identifier("Expect property name after '.'.") else {
        return;
    };
    let name_constant = c.identifier_constant(&name);
    if can_assign && c.match_token(&TokenKind::Equal) {
        c.expression();
        c.emit_op_byte(Opcode::SetProperty, name_constant);
    } else if c.match_token(&TokenKind::LeftParen) {
        let argc = c.argument_list();
        c.emit_op_byte(Opcode::Invoke, name_constant);
        c.emit_byte(argc);
        c.last_type = StaticType::Unknown;
    } else {
        c.emit_op_byte(Opcode::GetProperty, name_constant);
        c.last_type = StaticType::Unknown;
    }
}

fn unary(c: &mut Compiler, _can_assign: bool) {
    let operator = c.previous.kind.clone();
    c.parse_precedence(Precedence::Unary);
    match operator {
        TokenKind::Bang => {
            c.emit_op(Opcode::Not);
            c.last_type = StaticType::Bool;
        }
        TokenKind::Minus => match c.last_type {
            StaticType::Int => c.emit_op(Opcode::NegateInt),
            StaticType::Float => c.emit_op(Opcode::NegateFloat),
            _ => c.emit_op(Opcode::TypeError),
        },
        _ => {}
    }
}

fn binary(c: &mut Compiler, _can_assign: bool) {
    let operator = c.previous.kind.clone();
    let left = c.last_type;
    c.parse_precedence(rule_for(&operator).precedence.next());
    let right = c.last_type;

    match operator {
        TokenKind::BangEqual => {
            c.emit_op(Opcode::Equal);
            c.emit_op(Opcode::Not);
            c.last_type = StaticType::Bool;
        }
        TokenKind::EqualEqual => {
            c.emit_op(Opcode::Equal);
            c.last_type = StaticType::Bool;
        }
        TokenKind::Greater => {
            c.emit_op(Opcode::Greater);
            c.last_type = StaticType::Bool;
        }
        TokenKind::GreaterEqual => {
            c.emit_op(Opcode::Less);
            c.emit_op(Opcode::Not);
            c.last_type = StaticType::Bool;
        }
        TokenKind::Less => {
            c.emit_op(Opcode::Less);
            c.last_type = StaticType::Bool;
        }
        TokenKind::LessEqual => {
            c.emit_op(Opcode::Greater);
            c.emit_op(Opcode::Not);
            c.last_type = StaticType::Bool;
        }
        TokenKind::Plus => {
            c.emit_arithmetic(left, right, Opcode::AddInt, Opcode::AddFloat, Some(Opcode::Add));
        }
        TokenKind::Minus => {
            c.emit_arithmetic(left, right, Opcode::SubInt, Opcode::SubFloat, None);
        }
        TokenKind::Star => {
            c.emit_arithmetic(left, right, Opcode::MulInt, Opcode::MulFloat, None);
        }
        TokenKind::Slash => {
            c.emit_arithmetic(left, right, Opcode::DivInt, Opcode::DivFloat, None);
        }
        _ => {}
    }
}

fn variable(c: &mut Compiler, can_assign: bool) {
    let TokenKind::Ident(name) = c.previous.kind.clone() else {
        return;
    };
    c.named_variable(&name, can_assign);
}

fn string(c: &mut Compiler, _can_assign: bool) {
    let TokenKind::StrLit(text) = c.previous.kind.clone() else {
        return;
    };
    let interned = c.interner.intern(&text);
    let constant = c.make_constant(Value::Str(interned));
    c.emit_op_byte(Opcode::ConstString, constant);
    c.last_type = StaticType::Str;
}

fn integer(c: &mut Compiler, _can_assign: bool) {
    let TokenKind::IntLit(value) = c.previous.kind else {
        return;
    };
    let constant = c.make_constant(Value::Int(value));
    c.emit_op_byte(Opcode::ConstInt, constant);
    c.last_type = StaticType::Int;
}

fn float(c: &mut Compiler, _can_assign: bool) {
    let TokenKind::FloatLit(value) = c.previous.kind else {
        return;
    };
    let constant = c.make_constant(Value::Float(value));
    c.emit_op_byte(Opcode::ConstFloat, constant);
    c.last_type = StaticType::Float;
}

fn literal(c: &mut Compiler, _can_assign: bool) {
    match c.previous.kind {
        TokenKind::False => {
            c.emit_op(Opcode::False);
            c.last_type = StaticType::Bool;
        }
        TokenKind::True => {
            c.emit_op(Opcode::True);
            c.last_type = StaticType::Bool;
        }
        TokenKind::Nil => {
            c.emit_op(Opcode::Nil);
            c.last_type = StaticType::Nil;
        }
        _ => {}
    }
}

/// Short-circuit `and`: skip the right operand when the left is falsey
fn and_op(c: &mut Compiler, _can_assign: bool) {
    let end_jump = c.emit_jump(Opcode::JumpIfFalse);
    c.emit_op(Opcode::Pop);
    c.parse_precedence(Precedence::And);
    c.patch_jump(end_jump);
    c.last_type = StaticType::Unknown;
}

/// Short-circuit `or`: keep the left operand when it is truthy
fn or_op(c: &mut Compiler, _can_assign: bool) {
    let else_jump = c.emit_jump(Opcode::JumpIfFalse);
    let end_jump = c.emit_jump(Opcode::Jump);
    c.patch_jump(else_jump);
    c.emit_op(Opcode::Pop);
    c.parse_precedence(Precedence::Or);
    c.patch_jump(end_jump);
    c.last_type = StaticType::Unknown;
}

fn super_(c: &mut Compiler, _can_assign: bool) {
    if c.classes.is_empty() {
        c.error("Can't use 'super' outside of a class.");
    } else if !c.classes.last().is_some_and(|class| class.has_superclass) {
        c.error("Can't use 'super' in a class with no superclass.");
    }
    c.consume(&TokenKind::Dot, "Expect '.' after 'super'.");
    let Some(method) = c.consume_identifier("Expect superclass method name.") else {
        return;
    };
    let name_constant = c.identifier_constant(&method);

    c.named_variable("this", false);
    if c.match_token(&TokenKind::LeftParen) {
        let argc = c.argument_list();
        c.named_variable("super", false);
        c.emit_op_byte(Opcode::SuperInvoke, name_constant);
        c.emit_byte(argc);
    } else {
        c.named_variable("super", false);
        c.emit_op_byte(Opcode::GetSuper, name_constant);
    }
    c.last_type = StaticType::Unknown;
}

fn this_(c: &mut Compiler, _can_assign: bool) {
    if c.classes.is_empty() {
        c.error("Can't use 'this' outside of a class.");
        return;
    }
    c.named_variable("this", false);
}
