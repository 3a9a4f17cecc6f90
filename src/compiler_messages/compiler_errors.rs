use crate::il::opcodes::OpCode;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Eq, Hash, PartialEq)]
pub enum ErrorMetaDataKey {
    CompilationStage,
    OpCode,

    // Optional suggestions
    PrimarySuggestion,

    // Stack shape information
    ExpectedSize,
    FoundSize,
    StackDepth,

    // Metadata lookups
    TokenKind,
}

/// Where a compile-time failure happened.
/// The method symbol is attached by the per-method driver on the way out,
/// handlers only know the instruction they are lowering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorLocation {
    pub method: String,
    pub offset: Option<u32>,
    pub opcode: Option<OpCode>,
}

impl ErrorLocation {
    pub fn instruction(offset: u32, opcode: OpCode) -> Self {
        ErrorLocation {
            method: String::new(),
            offset: Some(offset),
            opcode: Some(opcode),
        }
    }

    pub fn method(symbol: impl Into<String>) -> Self {
        ErrorLocation {
            method: symbol.into(),
            offset: None,
            opcode: None,
        }
    }
}

impl fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.method.is_empty() {
            write!(f, "{}", self.method)?;
        }
        if let Some(offset) = self.offset {
            write!(f, " @ IL_{offset:04x}")?;
        }
        if let Some(opcode) = self.opcode {
            write!(f, " ({})", opcode.mnemonic())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CompilerError {
    pub msg: String,
    pub location: ErrorLocation,
    pub error_type: ErrorType,

    // Structured detail for tooling, the message stays human readable on its own
    pub metadata: HashMap<ErrorMetaDataKey, &'static str>,
}

impl CompilerError {
    pub fn new(msg: impl Into<String>, location: ErrorLocation, error_type: ErrorType) -> Self {
        CompilerError {
            msg: msg.into(),
            location,
            error_type,
            metadata: HashMap::new(),
        }
    }

    pub fn metadata_error(msg: impl Into<String>, location: ErrorLocation) -> Self {
        CompilerError::new(msg, location, ErrorType::Metadata)
    }

    pub fn file_error(path: &std::path::Path, msg: impl Into<String>) -> Self {
        CompilerError::new(
            msg,
            ErrorLocation::method(path.to_string_lossy()),
            ErrorType::File,
        )
    }

    /// Fills in the method symbol if the error was raised below the method driver.
    pub fn in_method(mut self, symbol: &str) -> Self {
        if self.location.method.is_empty() {
            self.location.method = symbol.to_owned();
        }
        self
    }

    pub fn is_unsupported_feature(&self) -> bool {
        self.error_type == ErrorType::UnsupportedFeature
    }

    pub fn is_invalid_stack_shape(&self) -> bool {
        self.error_type == ErrorType::InvalidStackShape
    }
}

impl fmt::Display for CompilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} [{}]",
            error_type_to_str(&self.error_type),
            self.msg,
            self.location
        )
    }
}

impl std::error::Error for CompilerError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    UnsupportedFeature,
    InvalidStackShape,
    Metadata,
    Decode,
    Config,
    File,
    Compiler,
}

pub fn error_type_to_str(e_type: &ErrorType) -> &'static str {
    match e_type {
        ErrorType::UnsupportedFeature => "Unsupported Feature",
        ErrorType::InvalidStackShape => "Invalid Stack Shape",
        ErrorType::Metadata => "Metadata Error",
        ErrorType::Decode => "Bytecode Decode Error",
        ErrorType::Config => "Malformed Config",
        ErrorType::File => "File Error",
        ErrorType::Compiler => "Compiler Bug",
    }
}

/// Returns a new CompilerError for features this backend deliberately does not lower.
///
/// Floating point, 64-bit division and overflow-checked arithmetic all land here.
/// The enclosing method is never partially lowered.
///
/// Usage:
/// `return_unsupported_error!("Floating point add", location, { CompilationStage => "Code Generation" })`;
#[macro_export]
macro_rules! return_unsupported_error {
    ($msg:expr, $location:expr, { $( $key:ident => $value:expr ),* $(,)? }) => {
        return Err($crate::compiler_messages::compiler_errors::CompilerError {
            msg: $msg.into(),
            location: $location,
            error_type: $crate::compiler_messages::compiler_errors::ErrorType::UnsupportedFeature,
            metadata: {
                let mut map = std::collections::HashMap::new();
                $( map.insert($crate::compiler_messages::compiler_errors::ErrorMetaDataKey::$key, $value); )*
                map
            },
        })
    };
    ($msg:expr, $location:expr) => {
        return Err($crate::compiler_messages::compiler_errors::CompilerError {
            msg: $msg.into(),
            location: $location,
            error_type: $crate::compiler_messages::compiler_errors::ErrorType::UnsupportedFeature,
            metadata: std::collections::HashMap::new(),
        })
    };
}

/// Returns a new CompilerError for evaluation stack shapes the lowering rules cannot accept.
///
/// These point at either a verifier gap upstream or a bug in the handler that produced
/// the descriptors, so they are never coerced into something that would compile.
///
/// Usage:
/// `return_stack_shape_error!("Operand sizes differ", location, { ExpectedSize => "8", FoundSize => "4" })`;
#[macro_export]
macro_rules! return_stack_shape_error {
    ($msg:expr, $location:expr, { $( $key:ident => $value:expr ),* $(,)? }) => {
        return Err($crate::compiler_messages::compiler_errors::CompilerError {
            msg: $msg.into(),
            location: $location,
            error_type: $crate::compiler_messages::compiler_errors::ErrorType::InvalidStackShape,
            metadata: {
                let mut map = std::collections::HashMap::new();
                $( map.insert($crate::compiler_messages::compiler_errors::ErrorMetaDataKey::$key, $value); )*
                map
            },
        })
    };
    ($msg:expr, $location:expr) => {
        return Err($crate::compiler_messages::compiler_errors::CompilerError {
            msg: $msg.into(),
            location: $location,
            error_type: $crate::compiler_messages::compiler_errors::ErrorType::InvalidStackShape,
            metadata: std::collections::HashMap::new(),
        })
    };
}

/// Returns a new CompilerError for tokens or catalogue entries that don't resolve.
#[macro_export]
macro_rules! return_metadata_error {
    ($msg:expr, $location:expr, { $( $key:ident => $value:expr ),* $(,)? }) => {
        return Err($crate::compiler_messages::compiler_errors::CompilerError {
            msg: $msg.into(),
            location: $location,
            error_type: $crate::compiler_messages::compiler_errors::ErrorType::Metadata,
            metadata: {
                let mut map = std::collections::HashMap::new();
                $( map.insert($crate::compiler_messages::compiler_errors::ErrorMetaDataKey::$key, $value); )*
                map
            },
        })
    };
    ($msg:expr, $location:expr) => {
        return Err($crate::compiler_messages::compiler_errors::CompilerError {
            msg: $msg.into(),
            location: $location,
            error_type: $crate::compiler_messages::compiler_errors::ErrorType::Metadata,
            metadata: std::collections::HashMap::new(),
        })
    };
}

/// Returns a new CompilerError for malformed bytecode.
#[macro_export]
macro_rules! return_decode_error {
    ($msg:expr, $location:expr) => {
        return Err($crate::compiler_messages::compiler_errors::CompilerError {
            msg: $msg.into(),
            location: $location,
            error_type: $crate::compiler_messages::compiler_errors::ErrorType::Decode,
            metadata: std::collections::HashMap::new(),
        })
    };
}

/// Returns a new CompilerError for a malformed config file.
#[macro_export]
macro_rules! return_config_error {
    ($msg:expr, $location:expr, { $( $key:ident => $value:expr ),* $(,)? }) => {
        return Err($crate::compiler_messages::compiler_errors::CompilerError {
            msg: $msg.into(),
            location: $location,
            error_type: $crate::compiler_messages::compiler_errors::ErrorType::Config,
            metadata: {
                let mut map = std::collections::HashMap::new();
                $( map.insert($crate::compiler_messages::compiler_errors::ErrorMetaDataKey::$key, $value); )*
                map
            },
        })
    };
    ($msg:expr, $location:expr) => {
        return Err($crate::compiler_messages::compiler_errors::CompilerError {
            msg: $msg.into(),
            location: $location,
            error_type: $crate::compiler_messages::compiler_errors::ErrorType::Config,
            metadata: std::collections::HashMap::new(),
        })
    };
}

/// Returns a new CompilerError for internal compiler bugs.
///
/// Compiler errors indicate bugs in kiln itself, not problems with the input program.
#[macro_export]
macro_rules! return_compiler_error {
    ($msg:expr, $location:expr ; { $( $key:ident => $value:expr ),* $(,)? }) => {{
        return Err($crate::compiler_messages::compiler_errors::CompilerError {
            msg: $msg.into(),
            location: $location,
            error_type: $crate::compiler_messages::compiler_errors::ErrorType::Compiler,
            metadata: {
                let mut map = std::collections::HashMap::new();
                $( map.insert($crate::compiler_messages::compiler_errors::ErrorMetaDataKey::$key, $value); )*
                map
            },
        });
    }};
    ($msg:expr, $location:expr) => {{
        return Err($crate::compiler_messages::compiler_errors::CompilerError {
            msg: $msg.into(),
            location: $location,
            error_type: $crate::compiler_messages::compiler_errors::ErrorType::Compiler,
            metadata: std::collections::HashMap::new(),
        });
    }};
    ($msg:expr) => {{
        return Err($crate::compiler_messages::compiler_errors::CompilerError {
            msg: $msg.into(),
            location: $crate::compiler_messages::compiler_errors::ErrorLocation::default(),
            error_type: $crate::compiler_messages::compiler_errors::ErrorType::Compiler,
            metadata: std::collections::HashMap::new(),
        });
    }};
}
