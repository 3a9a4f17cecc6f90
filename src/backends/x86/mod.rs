//! 32-bit x86 backend
//!
//! Lowers one method at a time: decode the body into the node stream, infer the
//! stack on entry to every node, then emit. Every method gets its own
//! `LoweringContext`, so methods compile independently of each other.

pub mod asm;
pub mod codegen;
pub mod context;
pub mod frame;
pub mod handlers;
pub mod multiword;
pub mod preprocess;
pub mod safety;
pub mod stack;

#[cfg(test)]
mod tests;

use crate::backends::x86::asm::AsmFunction;
use crate::backends::x86::context::LoweringContext;
use crate::compiler_messages::compiler_errors::{CompilerError, ErrorLocation};
use crate::il::decoder::decode_method_body;
use crate::il::metadata::{MetadataCatalogue, MethodInfo};
use crate::il::nodes::MethodBody;
use crate::settings::TargetConfig;
use crate::{return_compiler_error, timer_log};
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Instant;

#[derive(Debug, Clone, Serialize)]
pub struct CompiledMethod {
    pub symbol: String,
    pub ops: AsmFunction,

    /// Everything the method calls or addresses that it doesn't define, sorted
    pub external_symbols: BTreeSet<String>,
}

/// Compiles a method with an IL body. Errors carry the method's symbol in their location.
pub fn compile_method(
    method: &MethodInfo,
    catalogue: &MetadataCatalogue,
    config: &TargetConfig,
) -> Result<CompiledMethod, CompilerError> {
    let Some(il) = &method.il else {
        return_compiler_error!(
            format!("'{}' has no body to compile", method.symbol),
            ErrorLocation::method(&method.symbol)
        );
    };

    let body = decode_method_body(il).map_err(|e| e.in_method(&method.symbol))?;
    lower_body(method, body, catalogue, config)
}

/// Runs both passes over an already decoded body
pub fn lower_body(
    method: &MethodInfo,
    body: MethodBody,
    catalogue: &MetadataCatalogue,
    config: &TargetConfig,
) -> Result<CompiledMethod, CompilerError> {
    let time = Instant::now();
    let mut ctx =
        LoweringContext::new(method, body, catalogue, config).map_err(|e| e.in_method(&method.symbol))?;

    preprocess::run(&mut ctx).map_err(|e| e.in_method(&method.symbol))?;
    timer_log!(time, "Preprocessed in: ");

    let time = Instant::now();
    codegen::run(&mut ctx).map_err(|e| e.in_method(&method.symbol))?;
    timer_log!(time, "Code generated in: ");

    Ok(CompiledMethod {
        symbol: method.symbol.to_owned(),
        ops: ctx.asm,
        external_symbols: ctx.external_symbols,
    })
}
