//! Stack-based virtual machine
//!
//! Executes compiled closures with a value stack and a call-frame stack.
//! Dispatch is a single loop over the top frame's instruction stream; it
//! exits when the outermost `Return` executes or a runtime error unwinds.
//! Runtime errors print a one-line message and a frame backtrace to the
//! error sink, then reset the machine.

mod frame;
mod natives;

pub use frame::CallFrame;

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self};
use std::rc::Rc;

use thiserror::Error;

use crate::bytecode::Opcode;
use crate::diagnostic::CompileError;
use crate::object::{BoundMethod, Class, Closure, Function, Instance, Interner, Upvalue};
use crate::value::{RuntimeError, Value};

/// Maximum call-frame depth
pub const FRAMES_MAX: usize = 64;

/// Shared writable sink for program output and diagnostics
///
/// Injectable so tests capture `print` output and backtraces without
/// touching process stdio.
pub type OutputSink = Rc<RefCell<dyn io::Write>>;

/// A sink writing to process stdout
pub fn stdout_sink() -> OutputSink {
    Rc::new(RefCell::new(io::stdout()))
}

/// A sink writing to process stderr
pub fn stderr_sink() -> OutputSink {
    Rc::new(RefCell::new(io::stderr()))
}

/// Result of handing a source unit to [`Vm::interpret`]
#[derive(Debug, Error)]
pub enum InterpretError {
    /// One or more compile errors; the program never ran
    #[error("compile error")]
    Compile(Vec<CompileError>),
    /// The program aborted at runtime
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Execution state of the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// Constructed, nothing interpreted yet
    Idle,
    /// Inside the dispatch loop
    Executing,
    /// A runtime error is being reported
    Erroring,
    /// The last interpretation finished (successfully or not)
    Done,
}

/// Virtual machine state
pub struct Vm {
    /// Evaluation stack
    stack: Vec<Value>,
    /// Call frames, innermost last
    frames: Vec<CallFrame>,
    /// Global variables by interned name
    globals: HashMap<Rc<str>, Value>,
    /// Open upvalue cells, sorted by ascending stack slot
    open_upvalues: Vec<Rc<RefCell<Upvalue>>>,
    /// Runtime string intern table
    interner: Interner,
    /// The interned `"init"` used for constructor lookup
    init_string: Rc<str>,
    state: VmState,
    /// Program output (`print`)
    output: OutputSink,
    /// Diagnostic output (runtime errors and backtraces)
    errors: OutputSink,
}

impl Vm {
    /// Create a VM with natives seeded and stdio sinks attached
    pub fn new() -> Self {
        let mut interner = Interner::new();
        let init_string = interner.intern("init");
        let mut vm = Self {
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: HashMap::new(),
            open_upvalues: Vec::new(),
            interner,
            init_string,
            state: VmState::Idle,
            output: stdout_sink(),
            errors: stderr_sink(),
        };
        natives::install(&mut vm);
        vm
    }

    /// Redirect program output
    pub fn set_output(&mut self, sink: OutputSink) {
        self.output = sink;
    }

    /// Redirect diagnostic output
    pub fn set_error_output(&mut self, sink: OutputSink) {
        self.errors = sink;
    }

    /// Current execution state
    pub fn state(&self) -> VmState {
        self.state
    }

    /// Depth of the evaluation stack
    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    /// Number of active call frames
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Number of upvalues still pointing into the stack
    pub fn open_upvalue_count(&self) -> usize {
        self.open_upvalues.len()
    }

    /// Look up a global by name
    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    /// Compile and execute one source unit
    ///
    /// Globals persist across calls, which is what makes the REPL work.
    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let function = match crate::compiler::compile(source) {
            Ok(function) => function,
            Err(diagnostics) => return Err(InterpretError::Compile(diagnostics)),
        };
        self.execute(function)
    }

    /// Execute a compiled top-level function
    ///
    /// Wraps the function in a closure, pushes the entry frame, and runs the
    /// dispatch loop to the outermost `Return`.
    pub fn execute(&mut self, function: Rc<Function>) -> Result<(), InterpretError> {
        self.state = VmState::Executing;
        let closure = Rc::new(Closure::bare(function));
        self.push(Value::Closure(Rc::clone(&closure)));
        let result = self.call_closure(closure, 0).and_then(|()| self.run());

        match result {
            Ok(()) => {
                self.state = VmState::Done;
                Ok(())
            }
            Err(error) => {
                self.state = VmState::Erroring;
                self.report_runtime_error(&error);
                self.reset_stack();
                self.state = VmState::Done;
                Err(InterpretError::Runtime(error))
            }
        }
    }

    // ── Dispatch ──────────────────────────────────────────────────────────

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            let byte = self.read_byte()?;
            let op = Opcode::try_from(byte).map_err(RuntimeError::UnknownOpcode)?;
            match op {
                Opcode::Const => {
                    let constant = self.read_constant()?;
                    self.push(constant);
                }
                Opcode::ConstInt => {
                    let constant = self.read_constant()?;
                    if !matches!(constant, Value::Int(_)) {
                        return Err(RuntimeError::ConstantTypeMismatch { expected: "int" });
                    }
                    self.push(constant);
                }
                Opcode::ConstFloat => {
                    let constant = self.read_constant()?;
                    if !matches!(constant, Value::Float(_)) {
                        return Err(RuntimeError::ConstantTypeMismatch { expected: "float" });
                    }
                    self.push(constant);
                }
                Opcode::ConstString => {
                    let constant = self.read_constant()?;
                    if !matches!(constant, Value::Str(_)) {
                        return Err(RuntimeError::ConstantTypeMismatch { expected: "string" });
                    }
                    self.push(constant);
                }
                Opcode::Nil => self.push(Value::Nil),
                Opcode::True => self.push(Value::Bool(true)),
                Opcode::False => self.push(Value::Bool(false)),
                Opcode::Pop => {
                    self.pop();
                }

                Opcode::GetLocal => {
                    let slot = self.read_byte()? as usize;
                    let base = self.frame().base;
                    let value = self
                        .stack
                        .get(base + slot)
                        .cloned()
                        .ok_or(RuntimeError::CorruptChunk)?;
                    self.push(value);
                }
                Opcode::SetLocal => {
                    let slot = self.read_byte()? as usize;
                    let base = self.frame().base;
                    let value = self.peek(0).clone();
                    let target = self
                        .stack
                        .get_mut(base + slot)
                        .ok_or(RuntimeError::CorruptChunk)?;
                    *target = value;
                }

                Opcode::DefineGlobal => {
                    let name = self.read_string()?;
                    let value = self.peek(0).clone();
                    self.globals.insert(name, value);
                    self.pop();
                }
                Opcode::GetGlobal => {
                    let name = self.read_string()?;
                    let value = self
                        .globals
                        .get(&name)
                        .cloned()
                        .ok_or_else(|| RuntimeError::UndefinedVariable(name.to_string()))?;
                    self.push(value);
                }
                Opcode::SetGlobal => {
                    let name = self.read_string()?;
                    if !self.globals.contains_key(&name) {
                        return Err(RuntimeError::UndefinedVariable(name.to_string()));
                    }
                    let value = self.peek(0).clone();
                    self.globals.insert(name, value);
                }

                Opcode::DefineGlobalInt => {
                    self.typed_global_define("int", |v| matches!(v, Value::Int(_)))?;
                }
                Opcode::DefineGlobalFloat => {
                    self.typed_global_define("float", |v| matches!(v, Value::Float(_)))?;
                }
                Opcode::DefineGlobalString => {
                    self.typed_global_define("string", |v| matches!(v, Value::Str(_)))?;
                }
                Opcode::GetGlobalInt => {
                    self.typed_global_get("int", |v| matches!(v, Value::Int(_)))?;
                }
                Opcode::GetGlobalFloat => {
                    self.typed_global_get("float", |v| matches!(v, Value::Float(_)))?;
                }
                Opcode::GetGlobalString => {
                    self.typed_global_get("string", |v| matches!(v, Value::Str(_)))?;
                }
                Opcode::SetGlobalInt => {
                    self.typed_global_set("int", |v| matches!(v, Value::Int(_)))?;
                }
                Opcode::SetGlobalFloat => {
                    self.typed_global_set("float", |v| matches!(v, Value::Float(_)))?;
                }
                Opcode::SetGlobalString => {
                    self.typed_global_set("string", |v| matches!(v, Value::Str(_)))?;
                }

                Opcode::GetUpvalue => {
                    let index = self.read_byte()? as usize;
                    let cell = self
                        .frame()
                        .closure
                        .upvalues
                        .get(index)
                        .cloned()
                        .ok_or(RuntimeError::CorruptChunk)?;
                    let value = match &*cell.borrow() {
                        Upvalue::Open(slot) => self.stack[*slot].clone(),
                        Upvalue::Closed(value) => value.clone(),
                    };
                    self.push(value);
                }
                Opcode::SetUpvalue => {
                    let index = self.read_byte()? as usize;
                    let value = self.peek(0).clone();
                    let cell = self
                        .frame()
                        .closure
                        .upvalues
                        .get(index)
                        .cloned()
                        .ok_or(RuntimeError::CorruptChunk)?;
                    let mut cell = cell.borrow_mut();
                    match &mut *cell {
                        Upvalue::Open(slot) => self.stack[*slot] = value,
                        Upvalue::Closed(closed) => *closed = value,
                    }
                }
                Opcode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }

                Opcode::GetProperty => {
                    let name = self.read_string()?;
                    let Value::Instance(instance) = self.peek(0).clone() else {
                        return Err(RuntimeError::InstancesHaveProperties);
                    };
                    let field = instance.fields.borrow().get(&name).cloned();
                    match field {
                        Some(value) => {
                            self.pop();
                            self.push(value);
                        }
                        None => self.bind_method(&instance.class, &name)?,
                    }
                }
                Opcode::SetProperty => {
                    let name = self.read_string()?;
                    let Value::Instance(instance) = self.peek(1).clone() else {
                        return Err(RuntimeError::InstancesHaveFields);
                    };
                    instance.fields.borrow_mut().insert(name, self.peek(0).clone());
                    let value = self.pop();
                    self.pop();
                    self.push(value);
                }
                Opcode::GetSuper => {
                    let name = self.read_string()?;
                    let Value::Class(superclass) = self.pop() else {
                        return Err(RuntimeError::SuperclassNotClass);
                    };
                    self.bind_method(&superclass, &name)?;
                }

                Opcode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                Opcode::Greater => {
                    let b = self.pop();
                    let a = self.pop();
                    let result = match (a, b) {
                        (Value::Int(a), Value::Int(b)) => a > b,
                        (Value::Float(a), Value::Float(b)) => a > b,
                        _ => return Err(RuntimeError::NumberOperands),
                    };
                    self.push(Value::Bool(result));
                }
                Opcode::Less => {
                    let b = self.pop();
                    let a = self.pop();
                    let result = match (a, b) {
                        (Value::Int(a), Value::Int(b)) => a < b,
                        (Value::Float(a), Value::Float(b)) => a < b,
                        _ => return Err(RuntimeError::NumberOperands),
                    };
                    self.push(Value::Bool(result));
                }

                Opcode::Add => {
                    let b = self.pop();
                    let a = self.pop();
                    let (Value::Str(a), Value::Str(b)) = (a, b) else {
                        return Err(RuntimeError::StringOperands);
                    };
                    let mut text = String::with_capacity(a.len() + b.len());
                    text.push_str(&a);
                    text.push_str(&b);
                    let interned = self.interner.intern(&text);
                    self.push(Value::Str(interned));
                }
                Opcode::AddInt => {
                    let (a, b) = self.int_operands()?;
                    self.push(Value::Int(a.wrapping_add(b)));
                }
                Opcode::SubInt => {
                    let (a, b) = self.int_operands()?;
                    self.push(Value::Int(a.wrapping_sub(b)));
                }
                Opcode::MulInt => {
                    let (a, b) = self.int_operands()?;
                    self.push(Value::Int(a.wrapping_mul(b)));
                }
                Opcode::DivInt => {
                    let (a, b) = self.int_operands()?;
                    if b == 0 {
                        return Err(RuntimeError::DivisionByZero);
                    }
                    self.push(Value::Int(a.wrapping_div(b)));
                }
                Opcode::AddFloat => {
                    let (a, b) = self.float_operands()?;
                    self.push(Value::Float(a + b));
                }
                Opcode::SubFloat => {
                    let (a, b) = self.float_operands()?;
                    self.push(Value::Float(a - b));
                }
                Opcode::MulFloat => {
                    let (a, b) = self.float_operands()?;
                    self.push(Value::Float(a * b));
                }
                Opcode::DivFloat => {
                    // IEEE 754: division by zero yields an infinity or NaN
                    let (a, b) = self.float_operands()?;
                    self.push(Value::Float(a / b));
                }
                Opcode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                Opcode::NegateInt => {
                    let Value::Int(value) = self.pop() else {
                        return Err(RuntimeError::NumberOperand);
                    };
                    self.push(Value::Int(value.wrapping_neg()));
                }
                Opcode::NegateFloat => {
                    let Value::Float(value) = self.pop() else {
                        return Err(RuntimeError::NumberOperand);
                    };
                    self.push(Value::Float(-value));
                }

                Opcode::Print => {
                    let value = self.pop();
                    let _ = writeln!(self.output.borrow_mut(), "{}", value);
                }

                Opcode::Jump => {
                    let offset = self.read_u16()? as usize;
                    self.frame_mut().ip += offset;
                }
                Opcode::JumpIfFalse => {
                    let offset = self.read_u16()? as usize;
                    if self.peek(0).is_falsey() {
                        self.frame_mut().ip += offset;
                    }
                }
                Opcode::Loop => {
                    let offset = self.read_u16()? as usize;
                    self.frame_mut().ip -= offset;
                }

                Opcode::Call => {
                    let argc = self.read_byte()?;
                    let callee = self.peek(argc as usize).clone();
                    self.call_value(callee, argc)?;
                }
                Opcode::Invoke => {
                    let name = self.read_string()?;
                    let argc = self.read_byte()?;
                    self.invoke(&name, argc)?;
                }
                Opcode::SuperInvoke => {
                    let name = self.read_string()?;
                    let argc = self.read_byte()?;
                    let Value::Class(superclass) = self.pop() else {
                        return Err(RuntimeError::SuperclassNotClass);
                    };
                    self.invoke_from_class(&superclass, &name, argc)?;
                }
                Opcode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("no call frame");
                    self.close_upvalues(frame.base);
                    if self.frames.is_empty() {
                        // Pop the script closure; execution is complete
                        self.pop();
                        return Ok(());
                    }
                    self.stack.truncate(frame.base);
                    self.push(result);
                }

                Opcode::Closure => {
                    let constant = self.read_constant()?;
                    let Value::Function(function) = constant else {
                        return Err(RuntimeError::CorruptChunk);
                    };
                    let (base, enclosing) = {
                        let frame = self.frame();
                        (frame.base, Rc::clone(&frame.closure))
                    };
                    let mut upvalues = Vec::with_capacity(function.upvalue_count);
                    for _ in 0..function.upvalue_count {
                        let is_local = self.read_byte()? != 0;
                        let index = self.read_byte()? as usize;
                        let cell = if is_local {
                            self.capture_upvalue(base + index)
                        } else {
                            enclosing
                                .upvalues
                                .get(index)
                                .cloned()
                                .ok_or(RuntimeError::CorruptChunk)?
                        };
                        upvalues.push(cell);
                    }
                    self.push(Value::Closure(Rc::new(Closure { function, upvalues })));
                }

                Opcode::Class => {
                    let name = self.read_string()?;
                    self.push(Value::Class(Rc::new(Class::new(name))));
                }
                Opcode::Inherit => {
                    let Value::Class(superclass) = self.peek(1).clone() else {
                        return Err(RuntimeError::SuperclassNotClass);
                    };
                    let Value::Class(subclass) = self.peek(0).clone() else {
                        return Err(RuntimeError::CorruptChunk);
                    };
                    // Copy-down inheritance: methods resolve through the
                    // subclass table with no runtime superclass walk
                    let mut methods = subclass.methods.borrow_mut();
                    for (name, method) in superclass.methods.borrow().iter() {
                        methods.insert(Rc::clone(name), Rc::clone(method));
                    }
                    drop(methods);
                    self.pop();
                }
                Opcode::Method => {
                    let name = self.read_string()?;
                    let Value::Closure(method) = self.peek(0).clone() else {
                        return Err(RuntimeError::CorruptChunk);
                    };
                    let Value::Class(class) = self.peek(1).clone() else {
                        return Err(RuntimeError::CorruptChunk);
                    };
                    class.methods.borrow_mut().insert(name, method);
                    self.pop();
                }

                Opcode::TypeError => return Err(RuntimeError::TypeMismatch),
                Opcode::RuntimeError => return Err(RuntimeError::ExplicitError),
            }
        }
    }

    // ── Instruction stream ────────────────────────────────────────────────

    fn frame(&self) -> &CallFrame {
        self.frames.last().expect("no call frame")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("no call frame")
    }

    fn read_byte(&mut self) -> Result<u8, RuntimeError> {
        let frame = self.frames.last_mut().expect("no call frame");
        let byte = frame
            .closure
            .function
            .chunk
            .code
            .get(frame.ip)
            .copied()
            .ok_or(RuntimeError::CorruptChunk)?;
        frame.ip += 1;
        Ok(byte)
    }

    fn read_u16(&mut self) -> Result<u16, RuntimeError> {
        let high = self.read_byte()? as u16;
        let low = self.read_byte()? as u16;
        Ok((high << 8) | low)
    }

    fn read_constant(&mut self) -> Result<Value, RuntimeError> {
        let index = self.read_byte()? as usize;
        self.frame()
            .closure
            .function
            .chunk
            .constants
            .get(index)
            .cloned()
            .ok_or(RuntimeError::CorruptChunk)
    }

    fn read_string(&mut self) -> Result<Rc<str>, RuntimeError> {
        match self.read_constant()? {
            Value::Str(name) => Ok(name),
            _ => Err(RuntimeError::CorruptChunk),
        }
    }

    // ── Stack ─────────────────────────────────────────────────────────────

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    fn peek(&self, distance: usize) -> &Value {
        &self.stack[self.stack.len() - 1 - distance]
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }

    fn int_operands(&mut self) -> Result<(i32, i32), RuntimeError> {
        let b = self.pop();
        let a = self.pop();
        match (a, b) {
            (Value::Int(a), Value::Int(b)) => Ok((a, b)),
            _ => Err(RuntimeError::IntOperands),
        }
    }

    fn float_operands(&mut self) -> Result<(f64, f64), RuntimeError> {
        let b = self.pop();
        let a = self.pop();
        match (a, b) {
            (Value::Float(a), Value::Float(b)) => Ok((a, b)),
            _ => Err(RuntimeError::FloatOperands),
        }
    }

    // ── Globals ───────────────────────────────────────────────────────────

    fn typed_global_define(
        &mut self,
        expected: &'static str,
        matches_tag: fn(&Value) -> bool,
    ) -> Result<(), RuntimeError> {
        let name = self.read_string()?;
        let value = self.peek(0).clone();
        if !matches_tag(&value) {
            return Err(RuntimeError::GlobalDefineMismatch { expected });
        }
        self.globals.insert(name, value);
        self.pop();
        Ok(())
    }

    fn typed_global_get(
        &mut self,
        expected: &'static str,
        matches_tag: fn(&Value) -> bool,
    ) -> Result<(), RuntimeError> {
        let name = self.read_string()?;
        let value = self
            .globals
            .get(&name)
            .cloned()
            .ok_or_else(|| RuntimeError::UndefinedVariable(name.to_string()))?;
        if !matches_tag(&value) {
            return Err(RuntimeError::GlobalTypeMismatch {
                name: name.to_string(),
                expected,
            });
        }
        self.push(value);
        Ok(())
    }

    fn typed_global_set(
        &mut self,
        expected: &'static str,
        matches_tag: fn(&Value) -> bool,
    ) -> Result<(), RuntimeError> {
        let name = self.read_string()?;
        if !self.globals.contains_key(&name) {
            return Err(RuntimeError::UndefinedVariable(name.to_string()));
        }
        let value = self.peek(0).clone();
        if !matches_tag(&value) {
            return Err(RuntimeError::GlobalTypeMismatch {
                name: name.to_string(),
                expected,
            });
        }
        self.globals.insert(name, value);
        Ok(())
    }

    // ── Calls ─────────────────────────────────────────────────────────────

    fn call_value(&mut self, callee: Value, argc: u8) -> Result<(), RuntimeError> {
        match callee {
            Value::Closure(closure) => self.call_closure(closure, argc),
            Value::Class(class) => {
                let slot = self.stack.len() - argc as usize - 1;
                self.stack[slot] = Value::Instance(Rc::new(Instance::new(Rc::clone(&class))));
                let initializer = class.methods.borrow().get(&self.init_string).cloned();
                match initializer {
                    Some(init) => self.call_closure(init, argc),
                    None if argc != 0 => Err(RuntimeError::ArityMismatch {
                        expected: 0,
                        got: argc,
                    }),
                    None => Ok(()),
                }
            }
            Value::BoundMethod(bound) => {
                let slot = self.stack.len() - argc as usize - 1;
                self.stack[slot] = bound.receiver.clone();
                self.call_closure(Rc::clone(&bound.method), argc)
            }
            Value::Native(native) => {
                let first_arg = self.stack.len() - argc as usize;
                let result = (native.function)(&self.stack[first_arg..])?;
                self.stack.truncate(first_arg - 1);
                self.push(result);
                Ok(())
            }
            _ => Err(RuntimeError::NotCallable),
        }
    }

    fn call_closure(&mut self, closure: Rc<Closure>, argc: u8) -> Result<(), RuntimeError> {
        if argc != closure.function.arity {
            return Err(RuntimeError::ArityMismatch {
                expected: closure.function.arity,
                got: argc,
            });
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(RuntimeError::StackOverflow);
        }
        let base = self.stack.len() - argc as usize - 1;
        self.frames.push(CallFrame::new(closure, base));
        Ok(())
    }

    fn invoke(&mut self, name: &Rc<str>, argc: u8) -> Result<(), RuntimeError> {
        let Value::Instance(instance) = self.peek(argc as usize).clone() else {
            return Err(RuntimeError::InstancesHaveMethods);
        };
        // A field shadows a method of the same name
        let field = instance.fields.borrow().get(name).cloned();
        if let Some(value) = field {
            let slot = self.stack.len() - argc as usize - 1;
            self.stack[slot] = value.clone();
            self.call_value(value, argc)
        } else {
            self.invoke_from_class(&instance.class, name, argc)
        }
    }

    fn invoke_from_class(
        &mut self,
        class: &Rc<Class>,
        name: &Rc<str>,
        argc: u8,
    ) -> Result<(), RuntimeError> {
        let method = class
            .methods
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UndefinedProperty(name.to_string()))?;
        self.call_closure(method, argc)
    }

    fn bind_method(&mut self, class: &Rc<Class>, name: &Rc<str>) -> Result<(), RuntimeError> {
        let method = class
            .methods
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UndefinedProperty(name.to_string()))?;
        let receiver = self.peek(0).clone();
        let bound = Value::BoundMethod(Rc::new(BoundMethod { receiver, method }));
        self.pop();
        self.push(bound);
        Ok(())
    }

    // ── Upvalues ──────────────────────────────────────────────────────────

    /// Reuse the open upvalue for `slot` or create one, keeping the open
    /// list sorted by stack slot
    fn capture_upvalue(&mut self, slot: usize) -> Rc<RefCell<Upvalue>> {
        // Scan from the top of the stack downwards
        for i in (0..self.open_upvalues.len()).rev() {
            let existing = match &*self.open_upvalues[i].borrow() {
                Upvalue::Open(existing) => *existing,
                Upvalue::Closed(_) => continue,
            };
            if existing == slot {
                return Rc::clone(&self.open_upvalues[i]);
            }
            if existing < slot {
                let cell = Rc::new(RefCell::new(Upvalue::Open(slot)));
                self.open_upvalues.insert(i + 1, Rc::clone(&cell));
                return cell;
            }
        }
        let cell = Rc::new(RefCell::new(Upvalue::Open(slot)));
        self.open_upvalues.insert(0, Rc::clone(&cell));
        cell
    }

    /// Close every open upvalue at or above `from_slot`, migrating the
    /// captured values off the stack
    fn close_upvalues(&mut self, from_slot: usize) {
        while let Some(cell) = self.open_upvalues.last() {
            let slot = match &*cell.borrow() {
                Upvalue::Open(slot) => *slot,
                Upvalue::Closed(_) => break,
            };
            if slot < from_slot {
                break;
            }
            let value = self.stack[slot].clone();
            let cell = self.open_upvalues.pop().expect("open upvalue list empty");
            *cell.borrow_mut() = Upvalue::Closed(value);
        }
    }

    // ── Error reporting ───────────────────────────────────────────────────

    /// Print the error message and a backtrace, innermost frame first
    fn report_runtime_error(&self, error: &RuntimeError) {
        let mut sink = self.errors.borrow_mut();
        let _ = writeln!(sink, "{}", error);
        for frame in self.frames.iter().rev() {
            let function = &frame.closure.function;
            let line = frame.current_line();
            match &function.name {
                Some(name) => {
                    let _ = writeln!(sink, "[line {}] in {}()", line, name);
                }
                None => {
                    let _ = writeln!(sink, "[line {}] in script", line);
                }
            }
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
