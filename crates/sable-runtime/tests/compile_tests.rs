//! compile_tests.rs — emission shapes, scope rules, and capacity limits
//!
//! These tests inspect compiled chunks directly (opcode sequences, constant
//! pools) and assert on compile-time diagnostics, including the panic-mode
//! recovery that surfaces several errors in one pass.

use pretty_assertions::assert_eq;
use rstest::rstest;

use sable_runtime::bytecode::Opcode;
use sable_runtime::diagnostic::CompileError;
use sable_runtime::object::Function;
use sable_runtime::{compile, Value};

// ============================================================================
// Helpers
// ============================================================================

fn compile_ok(source: &str) -> std::rc::Rc<Function> {
    compile(source).expect("expected source to compile")
}

fn compile_err(source: &str) -> Vec<CompileError> {
    match compile(source) {
        Ok(_) => panic!("expected compile error for: {}", source),
        Err(diagnostics) => diagnostics,
    }
}

fn first_message(source: &str) -> String {
    compile_err(source)
        .first()
        .expect("at least one diagnostic")
        .message
        .clone()
}

/// Opcode bytes of the script chunk
fn script_code(source: &str) -> Vec<u8> {
    compile_ok(source).chunk.code.clone()
}

// ============================================================================
// Emission shapes
// ============================================================================

#[test]
fn test_int_addition_emits_typed_opcodes() {
    assert_eq!(
        script_code("print 1 + 2;"),
        vec![
            Opcode::ConstInt as u8,
            0,
            Opcode::ConstInt as u8,
            1,
            Opcode::AddInt as u8,
            Opcode::Print as u8,
            Opcode::Nil as u8,
            Opcode::Return as u8,
        ]
    );
}

#[test]
fn test_float_arithmetic_emits_float_opcodes() {
    let code = script_code("print 1.5 * 2.0;");
    assert!(code.contains(&(Opcode::MulFloat as u8)));
    assert!(!code.contains(&(Opcode::MulInt as u8)));
}

#[test]
fn test_string_concatenation_emits_untyped_add() {
    let code = script_code("print \"a\" + \"b\";");
    assert!(code.contains(&(Opcode::Add as u8)));
    assert!(!code.contains(&(Opcode::AddInt as u8)));
}

#[rstest]
#[case("print 1 + 2.0;")]
#[case("print 1.0 + 2;")]
#[case("print \"a\" + 1;")]
#[case("print \"a\" - \"b\";")]
#[case("print true + false;")]
fn test_mismatched_operands_compile_to_deferred_type_error(#[case] source: &str) {
    let code = script_code(source);
    assert!(
        code.contains(&(Opcode::TypeError as u8)),
        "expected TypeError opcode for: {}",
        source
    );
}

#[test]
fn test_unary_negation_selects_typed_opcode() {
    assert!(script_code("print -5;").contains(&(Opcode::NegateInt as u8)));
    assert!(script_code("print -5.0;").contains(&(Opcode::NegateFloat as u8)));
    assert!(script_code("print -\"s\";").contains(&(Opcode::TypeError as u8)));
}

#[test]
fn test_declared_global_types_flow_into_references() {
    let code = script_code("float a = 1.0; float b = 2.0; print a * b;");
    assert!(code.contains(&(Opcode::MulFloat as u8)));
}

#[test]
fn test_variable_declaration_without_initializer_emits_nil() {
    let code = script_code("int x;");
    assert_eq!(code[0], Opcode::Nil as u8);
    assert_eq!(code[1], Opcode::DefineGlobal as u8);
}

#[test]
fn test_compiler_emits_untyped_global_ops_for_references() {
    // Declared types drive arithmetic inference, but global reads stay
    // untyped so a global may hold any value (e.g. a closure)
    let code = script_code("int x = 1; print x;");
    assert!(code.contains(&(Opcode::GetGlobal as u8)));
    assert!(!code.contains(&(Opcode::GetGlobalInt as u8)));
}

#[test]
fn test_comparison_desugaring() {
    let code = script_code("print 1 >= 2;");
    let less = Opcode::Less as u8;
    let not = Opcode::Not as u8;
    let pair = code.windows(2).any(|w| w == [less, not]);
    assert!(pair, ">= compiles to Less + Not");
}

#[test]
fn test_closure_emission_carries_upvalue_descriptors() {
    let function = compile_ok(
        "fun mk() { int x = 0; fun inc() { x = x + 1; return x; } return inc; }",
    );
    // mk lives in the script constant pool
    let mk = function
        .chunk
        .constants
        .iter()
        .find_map(|constant| match constant {
            Value::Function(mk) => Some(mk.clone()),
            _ => None,
        })
        .expect("mk compiled as a function constant");
    // inc lives in mk's pool and captures exactly one upvalue: x
    let inc = mk
        .chunk
        .constants
        .iter()
        .find_map(|constant| match constant {
            Value::Function(inc) => Some(inc.clone()),
            _ => None,
        })
        .expect("inc compiled as a function constant");
    assert_eq!(inc.upvalue_count, 1);

    // The Closure instruction is followed by one (is_local, index) pair
    let closure_at = mk
        .chunk
        .code
        .iter()
        .position(|&byte| byte == Opcode::Closure as u8)
        .expect("mk emits a Closure instruction");
    let is_local = mk.chunk.code[closure_at + 2];
    let index = mk.chunk.code[closure_at + 3];
    assert_eq!((is_local, index), (1, 1));
}

#[test]
fn test_initializer_implicit_return_loads_this_slot() {
    let function = compile_ok("class C { init() { this.x = 1; } }");
    let init = function
        .chunk
        .constants
        .iter()
        .find_map(|constant| match constant {
            Value::Function(init) => Some(init.clone()),
            _ => None,
        })
        .expect("init compiled as a function constant");
    let code = &init.chunk.code;
    // ... GetLocal 0, Return
    assert_eq!(code[code.len() - 3], Opcode::GetLocal as u8);
    assert_eq!(code[code.len() - 2], 0);
    assert_eq!(code[code.len() - 1], Opcode::Return as u8);
}

#[test]
fn test_compilation_is_deterministic() {
    let source = "fun f(n) { int k = n; return k; } print f(1); if (true) print 2;";
    let first = compile_ok(source);
    let second = compile_ok(source);
    assert_eq!(first.chunk.code, second.chunk.code);
    assert_eq!(first.chunk.lines, second.chunk.lines);
}

#[test]
fn test_constants_deduplicate_within_a_chunk() {
    let function = compile_ok("print 7; print 7; print 7;");
    let sevens = function
        .chunk
        .constants
        .iter()
        .filter(|constant| **constant == Value::Int(7))
        .count();
    assert_eq!(sevens, 1);
}

// ============================================================================
// Scope & syntax errors
// ============================================================================

#[test]
fn test_invalid_assignment_target() {
    assert_eq!(first_message("1 + 2 = 3;"), "Invalid assignment target.");
}

#[test]
fn test_redeclaration_in_same_scope() {
    assert_eq!(
        first_message("{ int a = 1; int a = 2; }"),
        "Already a variable with this name in this scope."
    );
}

#[test]
fn test_shadowing_in_inner_scope_is_legal() {
    compile_ok("{ int a = 1; { int a = 2; } }");
}

#[test]
fn test_reading_local_in_its_own_initializer() {
    assert_eq!(
        first_message("{ int a = a; }"),
        "Can't read local variable in its own initializer."
    );
}

#[test]
fn test_this_outside_class() {
    assert_eq!(first_message("print this;"), "Can't use 'this' outside of a class.");
}

#[test]
fn test_super_outside_class() {
    assert_eq!(
        first_message("print super.m;"),
        "Can't use 'super' outside of a class."
    );
}

#[test]
fn test_super_in_class_without_superclass() {
    assert_eq!(
        first_message("class A { m() { return super.m(); } }"),
        "Can't use 'super' in a class with no superclass."
    );
}

#[test]
fn test_class_cannot_inherit_from_itself() {
    assert_eq!(
        first_message("class A < A {}"),
        "A class can't inherit from itself."
    );
}

#[test]
fn test_return_at_top_level() {
    assert_eq!(
        first_message("return 1;"),
        "Can't return from top-level code."
    );
}

#[test]
fn test_top_level_return_inside_loop_is_still_rejected() {
    assert_eq!(
        first_message("while (true) { return; }"),
        "Can't return from top-level code."
    );
}

#[test]
fn test_return_value_from_initializer() {
    assert_eq!(
        first_message("class A { init() { return 1; } }"),
        "Can't return a value from an initializer."
    );
}

#[test]
fn test_bare_return_from_initializer_is_legal() {
    compile_ok("class A { init() { return; } }");
}

#[test]
fn test_expect_expression() {
    assert_eq!(first_message("print ;"), "Expect expression.");
}

#[test]
fn test_missing_semicolon() {
    assert_eq!(first_message("print 1"), "Expect ';' after value.");
}

#[test]
fn test_error_location_rendering() {
    let errors = compile_err("1 + 2 = 3;");
    assert_eq!(
        errors[0].to_string(),
        "[line 1] Error at '=': Invalid assignment target."
    );
}

#[test]
fn test_panic_mode_recovers_at_statement_boundaries() {
    let errors = compile_err("int = 1; print 2 +;");
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].message, "Expect variable name.");
    assert_eq!(errors[1].message, "Expect expression.");
}

#[test]
fn test_lex_error_is_reported_with_its_message() {
    let errors = compile_err("print \"unterminated;");
    assert!(errors
        .iter()
        .any(|error| error.message == "Unterminated string."));
}

#[test]
fn test_oversized_int_literal_is_a_compile_error() {
    let errors = compile_err("print 2147483648;");
    assert!(errors
        .iter()
        .any(|error| error.message == "Integer literal is too large."));
}

#[test]
fn test_max_int_literal_compiles() {
    compile_ok("print 2147483647;");
}

// ============================================================================
// Capacity limits
// ============================================================================

#[test]
fn test_256_distinct_constants_compile() {
    let source: String = (0..=255).map(|i| format!("print {};", i)).collect();
    compile_ok(&source);
}

#[test]
fn test_257th_distinct_constant_is_a_compile_error() {
    let source: String = (0..=256).map(|i| format!("print {};", i)).collect();
    assert_eq!(first_message(&source), "Too many constants in one chunk.");
}

fn function_with_params(count: usize) -> String {
    let params: Vec<String> = (0..count).map(|i| format!("p{}", i)).collect();
    format!("fun f({}) {{}}", params.join(", "))
}

#[test]
fn test_255_parameters_compile() {
    compile_ok(&function_with_params(255));
}

#[test]
fn test_256_parameters_are_a_compile_error() {
    let errors = compile_err(&function_with_params(256));
    assert!(errors
        .iter()
        .any(|error| error.message == "Can't have more than 255 parameters."));
}

fn function_with_locals(count: usize) -> String {
    let locals: String = (0..count).map(|i| format!("int l{} = 0;", i)).collect();
    format!("fun f() {{ {} }}", locals)
}

#[test]
fn test_255_locals_plus_reserved_slot_compile() {
    compile_ok(&function_with_locals(255));
}

#[test]
fn test_overflowing_the_local_slots_is_a_compile_error() {
    let errors = compile_err(&function_with_locals(256));
    assert!(errors
        .iter()
        .any(|error| error.message == "Too many local variables in function."));
}

#[test]
fn test_256_arguments_are_a_compile_error() {
    // All arguments share one constant so the pool stays under its cap
    let args = vec!["0"; 256].join(", ");
    let source = format!("fun f() {{}} f({});", args);
    let errors = compile_err(&source);
    assert!(errors
        .iter()
        .any(|error| error.message == "Can't have more than 255 arguments."));
}

#[test]
fn test_loop_body_larger_than_jump_range_is_a_compile_error() {
    // Each `print 0;` is three bytes of body; 25k statements clear 64 KiB
    let body: String = std::iter::repeat("print 0;").take(25_000).collect();
    let source = format!("while (true) {{ {} }}", body);
    assert_eq!(first_message(&source), "Loop body too large.");
}
