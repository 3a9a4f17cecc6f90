#![cfg(test)]

use crate::backends::x86::asm::AsmOp;
use crate::backends::x86::{CompiledMethod, lower_body};
use crate::compiler_messages::compiler_errors::CompilerError;
use crate::il::metadata::{FieldInfo, MetadataCatalogue, MethodInfo, TokenTarget, TypeInfo};
use crate::il::nodes::MethodBody;
use crate::il::opcodes::OpCode;
use crate::settings::TargetConfig;

pub(crate) const NODE_CTOR: u32 = 0x0600_0001;
pub(crate) const NODE_DESCRIBE: u32 = 0x0600_0002;
pub(crate) const NODE_INVOKE: u32 = 0x0600_0003;
pub(crate) const NODE_HELPER: u32 = 0x0600_0004;
pub(crate) const INT32_TYPE: u32 = 0x0200_0001;
pub(crate) const NODE_TYPE: u32 = 0x0200_0002;
pub(crate) const RGB_TYPE: u32 = 0x0200_0003;
pub(crate) const INT64_TYPE: u32 = 0x0200_0004;
pub(crate) const NODE_VALUE_FIELD: u32 = 0x0400_0001;
pub(crate) const NODE_COUNT_FIELD: u32 = 0x0400_0002;
pub(crate) const HELLO_STRING: u32 = 0x7000_0001;

pub(crate) fn method(symbol: &str, params: &[&str], return_type: Option<&str>) -> MethodInfo {
    MethodInfo {
        symbol: symbol.to_owned(),
        declaring_type: None,
        params: params.iter().map(|param| param.to_string()).collect(),
        return_type: return_type.map(str::to_owned),
        locals: Vec::new(),
        is_static: true,
        is_virtual: false,
        is_delegate_invoke: false,
        is_constructor: false,
        method_table_id: 0,
        il: None,
        handlers: Vec::new(),
    }
}

pub(crate) fn instance_method(symbol: &str, params: &[&str], return_type: Option<&str>) -> MethodInfo {
    MethodInfo {
        declaring_type: Some(String::from("Demo.Node")),
        is_static: false,
        ..method(symbol, params, return_type)
    }
}

/// Builtins plus a small `Demo.Node` class:
/// one instance field, one static, a constructor, a virtual method, a delegate invoke.
/// `Demo.Rgb` is a 7 byte struct so moves of it end on a partial word.
pub(crate) fn catalogue() -> MetadataCatalogue {
    let mut catalogue = MetadataCatalogue::new();
    catalogue.add_type(TypeInfo::class("Demo.Node", 8, Some("object")));
    catalogue.add_type(TypeInfo::value_type("Demo.Rgb", 7));

    catalogue.add_field(FieldInfo {
        name: String::from("Demo.Node::value"),
        declaring_type: String::from("Demo.Node"),
        field_type: String::from("int32"),
        offset: 4,
        is_static: false,
        symbol: String::new(),
    });
    catalogue.add_field(FieldInfo {
        name: String::from("Demo.Node::count"),
        declaring_type: String::from("Demo.Node"),
        field_type: String::from("int32"),
        offset: 0,
        is_static: true,
        symbol: String::new(),
    });

    catalogue.add_method(MethodInfo {
        is_constructor: true,
        ..instance_method("Demo_Node_ctor", &["int32"], None)
    });
    catalogue.add_method(MethodInfo {
        is_virtual: true,
        method_table_id: 3,
        ..instance_method("Demo_Node_Describe", &[], Some("int32"))
    });
    catalogue.add_method(MethodInfo {
        is_delegate_invoke: true,
        ..instance_method("Demo_Callback_Invoke", &["int32"], Some("int32"))
    });
    catalogue.add_method(method("Demo_Helper", &["int64"], Some("int64")));

    catalogue.add_token(NODE_CTOR, TokenTarget::Method(String::from("Demo_Node_ctor")));
    catalogue.add_token(NODE_DESCRIBE, TokenTarget::Method(String::from("Demo_Node_Describe")));
    catalogue.add_token(NODE_INVOKE, TokenTarget::Method(String::from("Demo_Callback_Invoke")));
    catalogue.add_token(NODE_HELPER, TokenTarget::Method(String::from("Demo_Helper")));
    catalogue.add_token(INT32_TYPE, TokenTarget::Type(String::from("int32")));
    catalogue.add_token(NODE_TYPE, TokenTarget::Type(String::from("Demo.Node")));
    catalogue.add_token(RGB_TYPE, TokenTarget::Type(String::from("Demo.Rgb")));
    catalogue.add_token(INT64_TYPE, TokenTarget::Type(String::from("int64")));
    catalogue.add_token(NODE_VALUE_FIELD, TokenTarget::Field(String::from("Demo.Node::value")));
    catalogue.add_token(NODE_COUNT_FIELD, TokenTarget::Field(String::from("Demo.Node::count")));
    catalogue.add_token(HELLO_STRING, TokenTarget::String(String::from("str_hello")));

    catalogue
}

/// Default config with the per-instruction comments turned off, so op sequences compare exactly
pub(crate) fn quiet_config() -> TargetConfig {
    let mut config = TargetConfig::default();
    config.codegen.emit_comments = false;
    config
}

pub(crate) fn op(op: OpCode) -> (OpCode, Vec<u8>) {
    (op, Vec::new())
}

pub(crate) fn with_token(op: OpCode, token: u32) -> (OpCode, Vec<u8>) {
    (op, token.to_le_bytes().to_vec())
}

pub(crate) fn short_branch(op: OpCode, displacement: i8) -> (OpCode, Vec<u8>) {
    (op, displacement.to_le_bytes().to_vec())
}

pub(crate) fn lower_with(
    method: &MethodInfo,
    instructions: Vec<(OpCode, Vec<u8>)>,
    config: &TargetConfig,
) -> Result<CompiledMethod, CompilerError> {
    let catalogue = catalogue();
    let body = MethodBody::from_instructions(instructions)?;
    lower_body(method, body, &catalogue, config)
}

pub(crate) fn lower(method: &MethodInfo, instructions: Vec<(OpCode, Vec<u8>)>) -> Result<CompiledMethod, CompilerError> {
    lower_with(method, instructions, &quiet_config())
}

/// Index of the first op equal to `wanted`
pub(crate) fn index_of(ops: &[AsmOp], wanted: &AsmOp) -> Option<usize> {
    ops.iter().position(|op| op == wanted)
}

/// Index where `sequence` appears back to back in `ops`
pub(crate) fn find_sequence(ops: &[AsmOp], sequence: &[AsmOp]) -> Option<usize> {
    if sequence.is_empty() || sequence.len() > ops.len() {
        return None;
    }
    ops.windows(sequence.len()).position(|window| window == sequence)
}

pub(crate) fn count_ops(ops: &[AsmOp], predicate: impl Fn(&AsmOp) -> bool) -> usize {
    ops.iter().filter(|op| predicate(op)).count()
}
