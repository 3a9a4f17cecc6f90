use crate::compiler_messages::compiler_errors::{CompilerError, ErrorLocation};
use crate::return_config_error;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "kiln.toml";
pub const UNIT_FILE_EXTENSION: &str = "json";
pub const LISTING_FILE_EXTENSION: &str = "asm";

// Rough number of IR ops one bytecode instruction lowers to, used to size the output Vec.
// Most handlers emit 3-6 ops, safety checked array and call paths emit 20+
pub const IL_TO_ASM_RATIO: usize = 6;

/// Everything about the target runtime that the lowering rules can't know on their own.
/// Every field has a default so an empty or missing config file is valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub runtime: RuntimeSymbols,
    pub layout: ObjectLayout,
    pub codegen: CodegenOptions,
}

/// Entry points the generated code calls into.
/// All use the ordinary calling convention. The failure handlers never return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSymbols {
    pub null_reference: String,
    pub index_out_of_range: String,
    pub invalid_cast: String,
    pub out_of_memory: String,

    /// `(type_descriptor) -> object`
    pub alloc_object: String,

    /// `(element_type_descriptor, length) -> array`
    pub alloc_array: String,

    /// Returns its own return address, i.e. the address of the failing site
    pub get_instruction_pointer: String,

    /// `(exception) -> !`
    pub throw: String,

    /// `(target_address) -> !`
    pub leave: String,
    pub end_finally: String,
}

impl Default for RuntimeSymbols {
    fn default() -> Self {
        RuntimeSymbols {
            null_reference: String::from("kiln_throw_null_reference"),
            index_out_of_range: String::from("kiln_throw_index_out_of_range"),
            invalid_cast: String::from("kiln_throw_invalid_cast"),
            out_of_memory: String::from("kiln_throw_out_of_memory"),
            alloc_object: String::from("kiln_alloc_object"),
            alloc_array: String::from("kiln_alloc_array"),
            get_instruction_pointer: String::from("kiln_get_eip"),
            throw: String::from("kiln_throw"),
            leave: String::from("kiln_leave"),
            end_finally: String::from("kiln_end_finally"),
        }
    }
}

/// Byte offsets into runtime objects, type descriptors and method tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectLayout {
    /// Where an object stores its type descriptor pointer
    pub object_type_offset: i32,

    /// Bytes before the first instance field
    pub object_header_size: i32,

    pub array_length_offset: i32,

    /// Bytes before element 0
    pub array_header_size: i32,

    /// Where a type descriptor stores its parent type descriptor pointer (0 at the root)
    pub type_base_offset: i32,

    /// Where a type descriptor stores its method table pointer
    pub type_method_table_offset: i32,

    /// Method table entries are `(id, address)` pairs. An id of 0 ends a table and
    /// its address slot holds the parent's table (0 at the root).
    pub method_table_entry_size: i32,
    pub method_table_id_offset: i32,
    pub method_table_address_offset: i32,

    /// Offsets of the bound receiver and the target function inside a delegate object
    pub delegate_target_offset: i32,
    pub delegate_method_offset: i32,
}

impl Default for ObjectLayout {
    fn default() -> Self {
        ObjectLayout {
            object_type_offset: 0,
            object_header_size: 8,
            array_length_offset: 8,
            array_header_size: 12,
            type_base_offset: 0,
            type_method_table_offset: 4,
            method_table_entry_size: 8,
            method_table_id_offset: 0,
            method_table_address_offset: 4,
            delegate_target_offset: 8,
            delegate_method_offset: 12,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignedMultiply {
    /// Lower with the truncating long multiplication. The low 64 bits of a
    /// two's complement product don't depend on signedness.
    #[default]
    Wrapping,

    /// Fail with an unsupported feature error instead
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodegenOptions {
    /// Comment naming the opcode and offset before each instruction's lowering
    pub emit_comments: bool,

    pub signed_64bit_multiply: SignedMultiply,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        CodegenOptions {
            emit_comments: true,
            signed_64bit_multiply: SignedMultiply::Wrapping,
        }
    }
}

impl TargetConfig {
    pub fn from_toml_str(source: &str, origin: &str) -> Result<TargetConfig, CompilerError> {
        match toml::from_str::<TargetConfig>(source) {
            Ok(config) => {
                config.validate(origin)?;
                Ok(config)
            }
            Err(e) => return_config_error!(
                format!("Couldn't parse config: {e}"),
                ErrorLocation::method(origin),
                { PrimarySuggestion => "Every section ([runtime], [layout], [codegen]) and key is optional" }
            ),
        }
    }

    /// Loads a config file, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<TargetConfig, CompilerError> {
        let Some(path) = path else {
            return Ok(TargetConfig::default());
        };

        let source = std::fs::read_to_string(path)
            .map_err(|e| CompilerError::file_error(path, format!("Couldn't read config: {e}")))?;

        TargetConfig::from_toml_str(&source, &path.to_string_lossy())
    }

    fn validate(&self, origin: &str) -> Result<(), CompilerError> {
        let layout = &self.layout;
        if layout.method_table_entry_size <= 0 {
            return_config_error!(
                "layout.method_table_entry_size must be positive",
                ErrorLocation::method(origin)
            );
        }

        let symbols = [
            &self.runtime.null_reference,
            &self.runtime.index_out_of_range,
            &self.runtime.invalid_cast,
            &self.runtime.out_of_memory,
            &self.runtime.alloc_object,
            &self.runtime.alloc_array,
            &self.runtime.get_instruction_pointer,
            &self.runtime.throw,
            &self.runtime.leave,
            &self.runtime.end_finally,
        ];

        if symbols.iter().any(|symbol| symbol.trim().is_empty()) {
            return_config_error!(
                "Runtime symbol names can't be empty",
                ErrorLocation::method(origin),
                { PrimarySuggestion => "Leave a [runtime] key out to use its default" }
            );
        }

        Ok(())
    }
}
