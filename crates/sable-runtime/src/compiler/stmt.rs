//! Declarations and statements
//!
//! Statement compilation drives the Pratt expression layer and owns scope
//! bookkeeping, function and class compilation, and panic-mode recovery.

use std::rc::Rc;

use super::{Compiler, FunctionKind, ClassCompiler, StaticType};
use crate::bytecode::Opcode;
use crate::token::TokenKind;
use crate::value::Value;

impl Compiler {
    /// Parse one declaration, resynchronizing afterwards if it panicked
    pub(super) fn declaration(&mut self) {
        if self.match_token(&TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(&TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(&TokenKind::Int) {
            self.var_declaration(StaticType::Int);
        } else if self.match_token(&TokenKind::Float) {
            self.var_declaration(StaticType::Float);
        } else if self.match_token(&TokenKind::Str) {
            self.var_declaration(StaticType::Str);
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.match_token(&TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(&TokenKind::For) {
            self.for_statement();
        } else if self.match_token(&TokenKind::If) {
            self.if_statement();
        } else if self.match_token(&TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(&TokenKind::While) {
            self.while_statement();
        } else if self.match_token(&TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    /// Skip tokens until a statement boundary so one syntax error does not
    /// cascade into spurious diagnostics
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Int
                | TokenKind::Float
                | TokenKind::Str
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    /// Parse declarations until the closing brace
    pub(super) fn block(&mut self) {
        while !self.check(&TokenKind::RightBrace) && !self.check(&TokenKind::Eof) {
            self.declaration();
        }
        self.consume(&TokenKind::RightBrace, "Expect '}' after block.");
    }

    // ── Declarations ──────────────────────────────────────────────────────

    /// `int|float|string IDENT [= expr];`
    fn var_declaration(&mut self, declared: StaticType) {
        let Some(name) = self.consume_identifier("Expect variable name.") else {
            return;
        };
        self.declare_variable(&name, declared);
        let global = if self.frame().scope_depth > 0 {
            0
        } else {
            self.identifier_constant(&name)
        };

        if self.match_token(&TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(Opcode::Nil);
        }
        self.consume(
            &TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );

        // Top-level declarations feed the global type table so later
        // references infer the declared type
        if self.frame().scope_depth == 0 {
            self.global_types.insert(name, declared);
        }
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let Some(name) = self.consume_identifier("Expect function name.") else {
            return;
        };
        self.declare_variable(&name, StaticType::Unknown);
        let global = if self.frame().scope_depth > 0 {
            0
        } else {
            self.identifier_constant(&name)
        };
        // Initialized before the body so the function can call itself
        self.mark_initialized();
        self.function(FunctionKind::Function, &name);
        self.define_variable(global);
    }

    /// Compile a function body in a fresh compiler frame and emit the
    /// `Closure` instruction with its upvalue descriptors
    fn function(&mut self, kind: FunctionKind, name: &str) {
        let function_name = self.interner.intern(name);
        self.frames
            .push(super::FunctionCompiler::new(kind, Some(function_name)));
        self.begin_scope();

        self.consume(&TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(&TokenKind::RightParen) {
            loop {
                if self.frame().function.arity == 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.frame_mut().function.arity += 1;
                }
                let constant = self.parse_variable("Expect parameter name.", StaticType::Unknown);
                self.define_variable(constant);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(&TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let (function, upvalues) = self.end_compiler();
        let constant = self.make_constant(Value::Function(Rc::new(function)));
        self.emit_op_byte(Opcode::Closure, constant);
        for upvalue in upvalues {
            self.emit_byte(upvalue.is_local as u8);
            self.emit_byte(upvalue.index);
        }
    }

    fn method(&mut self) {
        let Some(name) = self.consume_identifier("Expect method name.") else {
            return;
        };
        let constant = self.identifier_constant(&name);
        let kind = if name == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind, &name);
        self.emit_op_byte(Opcode::Method, constant);
    }

    fn class_declaration(&mut self) {
        let Some(name) = self.consume_identifier("Expect class name.") else {
            return;
        };
        let name_constant = self.identifier_constant(&name);
        self.declare_variable(&name, StaticType::Unknown);
        self.emit_op_byte(Opcode::Class, name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassCompiler {
            has_superclass: false,
        });

        if self.match_token(&TokenKind::Less) {
            if let Some(superclass) = self.consume_identifier("Expect superclass name.") {
                self.named_variable(&superclass, false);
                if superclass == name {
                    self.error("A class can't inherit from itself.");
                }
                // The superclass value stays on the stack, captured as the
                // synthetic local `super` for the span of the class body
                self.begin_scope();
                self.add_local("super".to_string(), StaticType::Unknown);
                self.mark_initialized();
                self.named_variable(&name, false);
                self.emit_op(Opcode::Inherit);
                if let Some(class) = self.classes.last_mut() {
                    class.has_superclass = true;
                }
            }
        }

        self.named_variable(&name, false);
        self.consume(&TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(&TokenKind::RightBrace) && !self.check(&TokenKind::Eof) {
            self.method();
        }
        self.consume(&TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(Opcode::Pop);

        let has_superclass = self
            .classes
            .last()
            .map(|class| class.has_superclass)
            .unwrap_or(false);
        if has_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }

    // ── Statements ────────────────────────────────────────────────────────

    fn print_statement(&mut self) {
        self.expression();
        self.consume(&TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(Opcode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(&TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(Opcode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(&TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(&TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(Opcode::JumpIfFalse);
        self.emit_op(Opcode::Pop);
        self.statement();
        let else_jump = self.emit_jump(Opcode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(Opcode::Pop);
        if self.match_token(&TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_offset();
        self.consume(&TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(&TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(Opcode::JumpIfFalse);
        self.emit_op(Opcode::Pop);
        self.statement();
        self.emit_loop(loop_start);
        self.patch_jump(exit_jump);
        self.emit_op(Opcode::Pop);
    }

    /// C-style `for (init; cond; incr)` desugared to jumps; the increment
    /// clause compiles ahead of the body and is reached by looping back
    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(&TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(&TokenKind::Semicolon) {
            // No initializer.
        } else if self.match_token(&TokenKind::Int) {
            self.var_declaration(StaticType::Int);
        } else if self.match_token(&TokenKind::Float) {
            self.var_declaration(StaticType::Float);
        } else if self.match_token(&TokenKind::Str) {
            self.var_declaration(StaticType::Str);
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_offset();
        let mut exit_jump = None;
        if !self.match_token(&TokenKind::Semicolon) {
            self.expression();
            self.consume(&TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(Opcode::JumpIfFalse));
            self.emit_op(Opcode::Pop);
        }

        if !self.match_token(&TokenKind::RightParen) {
            let body_jump = self.emit_jump(Opcode::Jump);
            let increment_start = self.current_offset();
            self.expression();
            self.emit_op(Opcode::Pop);
            self.consume(&TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);
        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(Opcode::Pop);
        }
        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.frame().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }

        if self.match_token(&TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.frame().kind == FunctionKind::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(&TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(Opcode::Return);
        }
    }
}
