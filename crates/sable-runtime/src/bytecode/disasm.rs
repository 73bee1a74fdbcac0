//! Bytecode disassembler
//!
//! Converts a chunk back to a human-readable listing. Used for debugging,
//! golden tests, and the CLI `--disasm` flag. Output is deterministic:
//! disassembling the same chunk twice yields identical text.

use std::fmt::Write;

use super::{Chunk, Opcode};
use crate::value::Value;

/// Disassemble a whole chunk under a heading
///
/// # Format
/// ```text
/// == script ==
/// === Constants ===
/// 0: 1
/// 1: 2
///
/// === Instructions ===
/// 0000    1 ConstInt 0 (1)
/// 0002    1 ConstInt 1 (2)
/// 0004    1 AddInt
/// 0005    1 Print
/// ```
pub fn disassemble(chunk: &Chunk, name: &str) -> String {
    let mut output = String::new();
    writeln!(output, "== {} ==", name).unwrap();

    if !chunk.constants.is_empty() {
        writeln!(output, "=== Constants ===").unwrap();
        for (idx, constant) in chunk.constants.iter().enumerate() {
            writeln!(output, "{}: {}", idx, format_constant(constant)).unwrap();
        }
        writeln!(output).unwrap();
    }

    writeln!(output, "=== Instructions ===").unwrap();
    let mut offset = 0;
    while offset < chunk.code.len() {
        let line = disassemble_instruction(chunk, &mut offset);
        writeln!(output, "{}", line).unwrap();
    }

    output
}

/// Disassemble one instruction, advancing `offset` past it and its operands
///
/// Never panics on truncated or malformed chunks; unknown bytes render as
/// `<invalid opcode>` and missing operands read as zero so a walk always
/// terminates.
pub fn disassemble_instruction(chunk: &Chunk, offset: &mut usize) -> String {
    let start = *offset;
    let line = chunk.lines.get(start).copied().unwrap_or(0);

    let byte = match chunk.code.get(*offset) {
        Some(b) => *b,
        None => return format!("{:04} {:>4} <invalid offset>", start, line),
    };
    *offset += 1;

    let opcode = match Opcode::try_from(byte) {
        Ok(op) => op,
        Err(_) => return format!("{:04} {:>4} <invalid opcode: {:#04x}>", start, line, byte),
    };

    match opcode {
        // Simple opcodes, no operands
        Opcode::Nil
        | Opcode::True
        | Opcode::False
        | Opcode::Pop
        | Opcode::Equal
        | Opcode::Greater
        | Opcode::Less
        | Opcode::Add
        | Opcode::AddInt
        | Opcode::AddFloat
        | Opcode::SubInt
        | Opcode::SubFloat
        | Opcode::MulInt
        | Opcode::MulFloat
        | Opcode::DivInt
        | Opcode::DivFloat
        | Opcode::Not
        | Opcode::NegateInt
        | Opcode::NegateFloat
        | Opcode::Print
        | Opcode::CloseUpvalue
        | Opcode::Return
        | Opcode::Inherit
        | Opcode::TypeError
        | Opcode::RuntimeError => format!("{:04} {:>4} {:?}", start, line, opcode),

        // Constant-pool operand
        Opcode::Const
        | Opcode::ConstInt
        | Opcode::ConstFloat
        | Opcode::ConstString
        | Opcode::DefineGlobal
        | Opcode::GetGlobal
        | Opcode::SetGlobal
        | Opcode::DefineGlobalInt
        | Opcode::DefineGlobalFloat
        | Opcode::DefineGlobalString
        | Opcode::GetGlobalInt
        | Opcode::GetGlobalFloat
        | Opcode::GetGlobalString
        | Opcode::SetGlobalInt
        | Opcode::SetGlobalFloat
        | Opcode::SetGlobalString
        | Opcode::GetProperty
        | Opcode::SetProperty
        | Opcode::GetSuper
        | Opcode::Class
        | Opcode::Method => {
            let idx = read_u8(chunk, offset);
            format!(
                "{:04} {:>4} {:?} {} ({})",
                start,
                line,
                opcode,
                idx,
                constant_at(chunk, idx)
            )
        }

        // Stack-slot or upvalue-index operand
        Opcode::GetLocal | Opcode::SetLocal | Opcode::GetUpvalue | Opcode::SetUpvalue => {
            let slot = read_u8(chunk, offset);
            format!("{:04} {:>4} {:?} {}", start, line, opcode, slot)
        }

        // Argument-count operand
        Opcode::Call => {
            let argc = read_u8(chunk, offset);
            format!("{:04} {:>4} Call {}", start, line, argc)
        }

        // Method-name constant plus argument count
        Opcode::Invoke | Opcode::SuperInvoke => {
            let idx = read_u8(chunk, offset);
            let argc = read_u8(chunk, offset);
            format!(
                "{:04} {:>4} {:?} {} ({}) {} args",
                start,
                line,
                opcode,
                idx,
                constant_at(chunk, idx),
                argc
            )
        }

        // Forward jumps
        Opcode::Jump | Opcode::JumpIfFalse => {
            let distance = read_u16(chunk, offset);
            let target = *offset + distance as usize;
            format!(
                "{:04} {:>4} {:?} {} (-> {:04})",
                start, line, opcode, distance, target
            )
        }

        // Backward jump
        Opcode::Loop => {
            let distance = read_u16(chunk, offset);
            let target = offset.saturating_sub(distance as usize);
            format!(
                "{:04} {:>4} Loop {} (-> {:04})",
                start, line, distance, target
            )
        }

        // Function constant followed by upvalue descriptor pairs
        Opcode::Closure => {
            let idx = read_u8(chunk, offset);
            let mut text = format!(
                "{:04} {:>4} Closure {} ({})",
                start,
                line,
                idx,
                constant_at(chunk, idx)
            );
            let upvalue_count = match chunk.constants.get(idx as usize) {
                Some(Value::Function(function)) => function.upvalue_count,
                _ => 0,
            };
            for _ in 0..upvalue_count {
                let pair_offset = *offset;
                let is_local = read_u8(chunk, offset);
                let index = read_u8(chunk, offset);
                let source = if is_local != 0 { "local" } else { "upvalue" };
                text.push_str(&format!("\n{:04}      |   {} {}", pair_offset, source, index));
            }
            text
        }
    }
}

fn read_u8(chunk: &Chunk, offset: &mut usize) -> u8 {
    let value = chunk.code.get(*offset).copied().unwrap_or(0);
    *offset += 1;
    value
}

fn read_u16(chunk: &Chunk, offset: &mut usize) -> u16 {
    let value = chunk.read_u16(*offset);
    *offset += 2;
    value
}

fn constant_at(chunk: &Chunk, idx: u8) -> String {
    match chunk.constants.get(idx as usize) {
        Some(constant) => format_constant(constant),
        None => "<missing constant>".to_string(),
    }
}

/// Format a constant-pool entry; strings keep their quotes
fn format_constant(value: &Value) -> String {
    match value {
        Value::Str(s) => format!("\"{}\"", s),
        other => other.to_string(),
    }
}
