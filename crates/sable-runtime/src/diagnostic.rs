//! Compile-time diagnostics
//!
//! All compiler errors flow through [`CompileError`], which renders in the
//! `[line N] Error at 'x': message` form the CLI prints to stderr.

use std::fmt;

/// Where in the token stream an error was reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorLocation {
    /// At a concrete token; the payload is its lexeme
    Token(String),
    /// At end of input
    Eof,
    /// No location suffix (lex errors carry their position in the message)
    Bare,
}

/// A compile-time error with its source line
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    /// Source line (1-indexed)
    pub line: u32,
    /// Token context for the ` at '…'` suffix
    pub location: ErrorLocation,
    /// Main error message
    pub message: String,
}

impl CompileError {
    /// Create an error anchored at a token lexeme
    pub fn at_token(line: u32, lexeme: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            line,
            location: ErrorLocation::Token(lexeme.into()),
            message: message.into(),
        }
    }

    /// Create an error anchored at end of input
    pub fn at_eof(line: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            location: ErrorLocation::Eof,
            message: message.into(),
        }
    }

    /// Create an error with no token context
    pub fn bare(line: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            location: ErrorLocation::Bare,
            message: message.into(),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            ErrorLocation::Token(lexeme) => {
                write!(f, "[line {}] Error at '{}': {}", self.line, lexeme, self.message)
            }
            ErrorLocation::Eof => write!(f, "[line {}] Error at end: {}", self.line, self.message),
            ErrorLocation::Bare => write!(f, "[line {}] Error: {}", self.line, self.message),
        }
    }
}

impl std::error::Error for CompileError {}
