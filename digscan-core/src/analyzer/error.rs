//! Error Handling
//!
//! Error types for loading programs and configurations, built on `thiserror`.
//! The analysis stages themselves never fail: missing information degrades to
//! conservative results and is reported through diagnostics instead.
//!
//! # Error Categories
//! - **Load errors**: unreadable files, malformed JSON
//! - **Structural errors**: dangling value or block references in a loaded program
//! - **Configuration errors**: inconsistent analysis settings

use thiserror::Error;

/// Where in a loaded program a structural error was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramLocation {
    pub function: Option<u32>,
    pub value: Option<u32>,
}

impl ProgramLocation {
    pub fn new(function: Option<u32>, value: Option<u32>) -> Self {
        Self { function, value }
    }

    pub fn format(&self) -> String {
        match (self.function, self.value) {
            (Some(f), Some(v)) => format!("function #{} value %{}", f, v),
            (Some(f), None) => format!("function #{}", f),
            (None, Some(v)) => format!("value %{}", v),
            (None, None) => "program".to_string(),
        }
    }
}

impl std::fmt::Display for ProgramLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}

/// Errors produced by the analysis crate.
#[derive(Error, Debug, Clone)]
pub enum DigError {
    /// Program file could not be read or decoded.
    #[error("Program load error: {message}\nSuggestion: {suggestion}")]
    ProgramLoad { message: String, suggestion: String },

    /// An operand refers to a value outside the arena.
    #[error("Invalid operand at {location}: operand %{operand} does not exist ({count} values)\nSuggestion: {suggestion}")]
    InvalidOperand {
        location: ProgramLocation,
        operand: u32,
        count: usize,
        suggestion: String,
    },

    /// A branch target, phi predecessor or function block list refers to a missing block.
    #[error("Invalid block reference at {location}: block #{block} does not exist\nSuggestion: {suggestion}")]
    InvalidBlock {
        location: ProgramLocation,
        block: u32,
        suggestion: String,
    },

    /// Block membership and instruction ownership disagree.
    #[error("Inconsistent program structure at {location}: {message}\nSuggestion: {suggestion}")]
    Inconsistent {
        location: ProgramLocation,
        message: String,
        suggestion: String,
    },

    /// Analysis configuration is unusable.
    #[error("Configuration error: {message}\nSuggestion: {suggestion}")]
    Config { message: String, suggestion: String },
}

impl DigError {
    /// Create a program load error with context.
    pub fn program_load(message: impl Into<String>) -> Self {
        Self::ProgramLoad {
            message: message.into(),
            suggestion: "Check that the file is a program serialized by digscan.".to_string(),
        }
    }

    pub fn invalid_operand(location: ProgramLocation, operand: u32, count: usize) -> Self {
        Self::InvalidOperand {
            location,
            operand,
            count,
            suggestion: "Values must be defined in the arena before they are referenced.".to_string(),
        }
    }

    pub fn invalid_block(location: ProgramLocation, block: u32) -> Self {
        Self::InvalidBlock {
            location,
            block,
            suggestion: "Check the block table of the serialized program.".to_string(),
        }
    }

    pub fn inconsistent(location: ProgramLocation, message: impl Into<String>) -> Self {
        Self::Inconsistent {
            location,
            message: message.into(),
            suggestion: "Every instruction must belong to exactly one block of its function.".to_string(),
        }
    }

    /// Create a configuration error with context.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            suggestion: "Compare the configuration against `digscan analyze --help`.".to_string(),
        }
    }
}

impl From<std::io::Error> for DigError {
    #[cold]
    fn from(err: std::io::Error) -> Self {
        DigError::ProgramLoad {
            message: format!("IO error: {}", err),
            suggestion: "Check file permissions and that the file exists.".to_string(),
        }
    }
}

impl From<serde_json::Error> for DigError {
    #[cold]
    fn from(err: serde_json::Error) -> Self {
        DigError::ProgramLoad {
            message: format!("JSON error: {}", err),
            suggestion: "Check that the file is valid JSON in the expected layout.".to_string(),
        }
    }
}
