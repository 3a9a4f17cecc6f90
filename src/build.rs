//! Unit driver
//!
//! Compiles every method with a body in a compilation unit. Methods are lowered in
//! parallel against one shared catalogue and config. A method that fails is
//! reported and skipped, the rest of the unit still compiles.

use crate::backends::x86::{CompiledMethod, compile_method};
use crate::compiler_messages::compiler_errors::CompilerError;
use crate::il::metadata::{CompilationUnit, MetadataCatalogue};
use crate::settings::TargetConfig;
use crate::{return_compiler_error, timer_log};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, Serialize)]
pub struct CompiledUnit {
    pub methods: Vec<CompiledMethod>,

    /// Union of every method's external symbols
    pub external_symbols: BTreeSet<String>,

    /// Methods that couldn't be lowered, in unit order
    #[serde(skip)]
    pub failures: Vec<CompilerError>,

    pub strings: BTreeMap<String, String>,
}

impl CompiledUnit {
    /// Unsupported features are skip-and-report. Anything else means the input or
    /// kiln is broken and the build should stop.
    pub fn has_fatal_failures(&self) -> bool {
        self.failures.iter().any(|e| !e.is_unsupported_feature())
    }

    pub fn to_json(&self) -> Result<String, CompilerError> {
        match serde_json::to_string_pretty(self) {
            Ok(json) => Ok(json),
            Err(e) => return_compiler_error!(format!("Couldn't serialise compiled unit: {e}")),
        }
    }
}

pub fn compile_unit(unit: &CompilationUnit, config: &TargetConfig) -> Result<CompiledUnit, CompilerError> {
    let time = Instant::now();
    let catalogue = MetadataCatalogue::from_unit(unit)?;
    timer_log!(time, "Metadata catalogue built in: ");

    let time = Instant::now();
    let results: Vec<Result<CompiledMethod, CompilerError>> = unit
        .methods
        .par_iter()
        .filter(|method| method.il.is_some())
        .map(|method| compile_method(method, &catalogue, config))
        .collect();
    timer_log!(time, "Methods lowered in: ");

    let mut methods = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    let mut external_symbols = BTreeSet::new();

    for result in results {
        match result {
            Ok(method) => {
                external_symbols.extend(method.external_symbols.iter().cloned());
                methods.push(method);
            }
            Err(e) => failures.push(e),
        }
    }

    // Defined here, so not external to the unit
    for method in &methods {
        external_symbols.remove(&method.symbol);
    }
    for symbol in unit.strings.keys() {
        external_symbols.remove(symbol);
    }

    Ok(CompiledUnit {
        methods,
        external_symbols,
        failures,
        strings: unit.strings.to_owned(),
    })
}

/// Intel syntax listing of the whole unit
impl fmt::Display for CompiledUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for symbol in &self.external_symbols {
            writeln!(f, "extern {symbol}")?;
        }

        for method in &self.methods {
            writeln!(f)?;
            write!(f, "{}", method.ops)?;
        }

        if !self.strings.is_empty() {
            writeln!(f)?;
            for (symbol, contents) in &self.strings {
                writeln!(f, "{symbol}: db {contents:?}, 0")?;
            }
        }
        Ok(())
    }
}
