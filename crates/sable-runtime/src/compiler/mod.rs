//! Single-pass bytecode compiler
//!
//! Consumes tokens straight from the lexer and emits bytecode as it parses;
//! there is no AST. One [`FunctionCompiler`] frame exists per function being
//! compiled, stacked for nesting, with the top-level script at the bottom.
//! Expression parsing (the Pratt rules) lives in `expr`; declarations and
//! statements live in `stmt`.

mod expr;
mod stmt;

use std::collections::HashMap;
use std::rc::Rc;

use crate::bytecode::{Chunk, JumpHandle, Opcode};
use crate::diagnostic::CompileError;
use crate::lexer::Lexer;
use crate::object::{Function, Interner};
use crate::token::{Token, TokenKind};
use crate::value::Value;

/// Maximum locals per function (single-byte slot operand)
pub const MAX_LOCALS: usize = 256;
/// Maximum upvalues per function (single-byte index operand)
pub const MAX_UPVALUES: usize = 256;

/// Statically inferred type of the last-parsed expression
///
/// Drives the typed-opcode selection for arithmetic; `Unknown` covers call
/// results, property reads, and undeclared globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticType {
    Int,
    Float,
    Str,
    Bool,
    Nil,
    Unknown,
}

/// What kind of function body a compiler frame is building
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

/// A local variable slot during compilation
#[derive(Debug)]
struct Local {
    name: String,
    /// Lexical depth; `-1` from declaration until the initializer completes
    depth: i32,
    /// Set when a nested function captures this slot
    is_captured: bool,
    /// Declared type for typed-opcode inference
    ty: StaticType,
}

/// An upvalue recorded while compiling a function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UpvalueDesc {
    /// Slot in the enclosing frame (`is_local`) or index into its upvalues
    index: u8,
    is_local: bool,
}

/// Per-function compilation state
struct FunctionCompiler {
    function: Function,
    kind: FunctionKind,
    locals: Vec<Local>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: i32,
}

impl FunctionCompiler {
    fn new(kind: FunctionKind, name: Option<Rc<str>>) -> Self {
        // Slot 0 belongs to the callee; methods expose it as `this`
        let slot_zero = match kind {
            FunctionKind::Method | FunctionKind::Initializer => "this",
            _ => "",
        };
        let mut locals = Vec::with_capacity(8);
        locals.push(Local {
            name: slot_zero.to_string(),
            depth: 0,
            is_captured: false,
            ty: StaticType::Unknown,
        });
        Self {
            function: Function::new(name),
            kind,
            locals,
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

/// Per-class compilation state
struct ClassCompiler {
    has_superclass: bool,
}

/// Compiler context for one source unit
pub struct Compiler {
    lexer: Lexer,
    previous: Token,
    current: Token,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    /// Type of the last-parsed expression
    last_type: StaticType,
    /// Stack of functions being compiled; the script frame sits at index 0
    frames: Vec<FunctionCompiler>,
    /// Stack of enclosing class declarations
    classes: Vec<ClassCompiler>,
    /// Declared types of top-level variables, for global reference inference
    global_types: HashMap<String, StaticType>,
    interner: Interner,
}

/// Compile a source unit into its top-level function
pub fn compile(source: &str) -> Result<Rc<Function>, Vec<CompileError>> {
    Compiler::new(source).compile()
}

impl Compiler {
    /// Create a compiler over the given source
    pub fn new(source: &str) -> Self {
        Self {
            lexer: Lexer::new(source),
            previous: Token::eof(1),
            current: Token::eof(1),
            had_error: false,
            panic_mode: false,
            errors: Vec::new(),
            last_type: StaticType::Unknown,
            frames: vec![FunctionCompiler::new(FunctionKind::Script, None)],
            classes: Vec::new(),
            global_types: HashMap::new(),
            interner: Interner::new(),
        }
    }

    /// Run the compilation, producing the script function or every
    /// diagnostic the pass surfaced
    pub fn compile(mut self) -> Result<Rc<Function>, Vec<CompileError>> {
        self.advance();
        while !self.match_token(&TokenKind::Eof) {
            self.declaration();
        }
        let (function, _) = self.end_compiler();
        if self.had_error {
            Err(self.errors)
        } else {
            Ok(Rc::new(function))
        }
    }

    // ── Token plumbing ────────────────────────────────────────────────────

    fn advance(&mut self) {
        self.previous = std::mem::replace(&mut self.current, Token::eof(0));
        loop {
            self.current = self.lexer.next_token();
            if let TokenKind::Error(message) = &self.current.kind {
                let message = message.clone();
                let token = self.current.clone();
                self.error_at(&token, &message);
            } else {
                break;
            }
        }
    }

    fn consume(&mut self, kind: &TokenKind, message: &str) {
        if self.current.kind == *kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn consume_identifier(&mut self, message: &str) -> Option<String> {
        if let TokenKind::Ident(name) = &self.current.kind {
            let name = name.clone();
            self.advance();
            Some(name)
        } else {
            self.error_at_current(message);
            None
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.current.kind == *kind
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    // ── Error reporting ───────────────────────────────────────────────────

    fn error(&mut self, message: &str) {
        let token = self.previous.clone();
        self.error_at(&token, message);
    }

    fn error_at_current(&mut self, message: &str) {
        let token = self.current.clone();
        self.error_at(&token, message);
    }

    /// Record an error unless already panicking; panic mode suppresses the
    /// cascade until `synchronize` finds a statement boundary
    fn error_at(&mut self, token: &Token, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let error = match &token.kind {
            TokenKind::Eof => CompileError::at_eof(token.line, message),
            TokenKind::Error(_) => CompileError::bare(token.line, message),
            kind => CompileError::at_token(token.line, kind.to_string(), message),
        };
        self.errors.push(error);
    }

    // ── Emission ──────────────────────────────────────────────────────────

    fn frame(&self) -> &FunctionCompiler {
        self.frames.last().expect("compiler frame stack empty")
    }

    fn frame_mut(&mut self) -> &mut FunctionCompiler {
        self.frames.last_mut().expect("compiler frame stack empty")
    }

    fn chunk_mut(&mut self) -> &mut Chunk {
        &mut self.frame_mut().function.chunk
    }

    fn current_offset(&self) -> usize {
        self.frame().function.chunk.len()
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.chunk_mut().write(byte, line);
    }

    fn emit_op(&mut self, op: Opcode) {
        let line = self.previous.line;
        self.chunk_mut().write_op(op, line);
    }

    fn emit_op_byte(&mut self, op: Opcode, byte: u8) {
        self.emit_op(op);
        self.emit_byte(byte);
    }

    fn emit_jump(&mut self, op: Opcode) -> JumpHandle {
        let line = self.previous.line;
        self.chunk_mut().emit_jump(op, line)
    }

    fn patch_jump(&mut self, jump: JumpHandle) {
        if self.chunk_mut().patch_jump(jump).is_err() {
            self.error("Too much code to jump over.");
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        let line = self.previous.line;
        if self.chunk_mut().emit_loop(loop_start, line).is_err() {
            self.error("Loop body too large.");
        }
    }

    /// Implicit return: initializers return `this` (slot 0), all else nil
    fn emit_return(&mut self) {
        if self.frame().kind == FunctionKind::Initializer {
            self.emit_op_byte(Opcode::GetLocal, 0);
        } else {
            self.emit_op(Opcode::Nil);
        }
        self.emit_op(Opcode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        match self.chunk_mut().add_constant(value) {
            Some(index) => index,
            None => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let interned = self.interner.intern(name);
        self.make_constant(Value::Str(interned))
    }

    /// Seal the innermost function: emit its implicit return, fix up the
    /// upvalue count, and pop its frame
    fn end_compiler(&mut self) -> (Function, Vec<UpvalueDesc>) {
        self.emit_return();
        let frame = self.frames.pop().expect("compiler frame stack empty");
        let mut function = frame.function;
        function.upvalue_count = frame.upvalues.len();
        (function, frame.upvalues)
    }

    // ── Scopes & locals ───────────────────────────────────────────────────

    fn begin_scope(&mut self) {
        self.frame_mut().scope_depth += 1;
    }

    /// Leave a scope, popping its locals; captured slots close instead
    fn end_scope(&mut self) {
        self.frame_mut().scope_depth -= 1;
        loop {
            let frame = self.frame();
            let captured = match frame.locals.last() {
                Some(local) if local.depth > frame.scope_depth => local.is_captured,
                _ => break,
            };
            self.frame_mut().locals.pop();
            if captured {
                self.emit_op(Opcode::CloseUpvalue);
            } else {
                self.emit_op(Opcode::Pop);
            }
        }
    }

    fn add_local(&mut self, name: String, ty: StaticType) {
        if self.frame().locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.frame_mut().locals.push(Local {
            name,
            depth: -1,
            is_captured: false,
            ty,
        });
    }

    /// Register a new local in the current scope; a no-op at top level,
    /// where variables live in the globals table instead
    fn declare_variable(&mut self, name: &str, ty: StaticType) {
        if self.frame().scope_depth == 0 {
            return;
        }
        let frame = self.frame();
        let mut redeclared = false;
        for local in frame.locals.iter().rev() {
            if local.depth != -1 && local.depth < frame.scope_depth {
                break;
            }
            if local.name == name {
                redeclared = true;
                break;
            }
        }
        if redeclared {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name.to_string(), ty);
    }

    /// Complete a local's declaration so it can be referenced
    fn mark_initialized(&mut self) {
        let depth = self.frame().scope_depth;
        if depth == 0 {
            return;
        }
        if let Some(local) = self.frame_mut().locals.last_mut() {
            local.depth = depth;
        }
    }

    /// Bind a declared variable: locals get initialized in place, globals
    /// get a `DefineGlobal` keyed by the name constant
    fn define_variable(&mut self, global: u8) {
        if self.frame().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op_byte(Opcode::DefineGlobal, global);
    }

    /// Consume an identifier and declare it, returning the name constant
    /// for globals (0 for locals, which need none)
    fn parse_variable(&mut self, message: &str, ty: StaticType) -> u8 {
        let Some(name) = self.consume_identifier(message) else {
            return 0;
        };
        self.declare_variable(&name, ty);
        if self.frame().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(&name)
    }

    // ── Name resolution ───────────────────────────────────────────────────

    /// Resolve a name against the locals of the frame at `frame_idx`,
    /// innermost declaration first
    fn resolve_local(&mut self, frame_idx: usize, name: &str) -> Option<(u8, StaticType)> {
        let mut found = None;
        for (slot, local) in self.frames[frame_idx].locals.iter().enumerate().rev() {
            if local.name == name {
                found = Some((slot, local.depth, local.ty));
                break;
            }
        }
        let (slot, depth, ty) = found?;
        if depth == -1 {
            self.error("Can't read local variable in its own initializer.");
        }
        Some((slot as u8, ty))
    }

    /// Resolve a name as an upvalue of the frame at `frame_idx`, promoting
    /// enclosing locals and chaining through intermediate frames
    fn resolve_upvalue(&mut self, frame_idx: usize, name: &str) -> Option<(u8, StaticType)> {
        if frame_idx == 0 {
            return None;
        }
        if let Some((slot, ty)) = self.resolve_local(frame_idx - 1, name) {
            self.frames[frame_idx - 1].locals[slot as usize].is_captured = true;
            let index = self.add_upvalue(frame_idx, slot, true);
            return Some((index, ty));
        }
        if let Some((upvalue, ty)) = self.resolve_upvalue(frame_idx - 1, name) {
            let index = self.add_upvalue(frame_idx, upvalue, false);
            return Some((index, ty));
        }
        None
    }

    /// Record an upvalue, deduplicating by `(index, is_local)`
    fn add_upvalue(&mut self, frame_idx: usize, index: u8, is_local: bool) -> u8 {
        let existing = self.frames[frame_idx]
            .upvalues
            .iter()
            .position(|upvalue| upvalue.index == index && upvalue.is_local == is_local);
        if let Some(existing) = existing {
            return existing as u8;
        }
        if self.frames[frame_idx].upvalues.len() >= MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }
        self.frames[frame_idx].upvalues.push(UpvalueDesc { index, is_local });
        (self.frames[frame_idx].upvalues.len() - 1) as u8
    }
}
