//! kiln lowers stack bytecode to 32-bit x86, one method at a time.
//!
//! The pipeline is `il` (decode and metadata), then `backends::x86` (preprocess the
//! stack shapes, then emit), driven per unit by `build`.

pub mod backends;
pub mod build;
pub(crate) mod cli;
pub mod il;
pub mod settings;

pub mod compiler_messages {
    pub mod compiler_dev_logging;
    pub mod compiler_errors;
    pub mod display_messages;
}

pub use cli::start_cli;
