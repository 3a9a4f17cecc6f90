//! Safety checks and runtime calls
//!
//! A failed check never returns to the site. The failure path fetches its own
//! address through the runtime's instruction-pointer helper, pushes it as the
//! failure site, and calls the failure handler.

use crate::backends::x86::asm::{AsmOp, JumpKind, LabelTag, Operand, Register};
use crate::backends::x86::context::LoweringContext;
use crate::il::nodes::IlNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeFailure {
    NullReference,
    IndexOutOfRange,
    InvalidCast,
    OutOfMemory,
}

impl RuntimeFailure {
    pub fn symbol(self, ctx: &LoweringContext) -> String {
        let runtime = &ctx.config.runtime;
        match self {
            RuntimeFailure::NullReference => runtime.null_reference.to_owned(),
            RuntimeFailure::IndexOutOfRange => runtime.index_out_of_range.to_owned(),
            RuntimeFailure::InvalidCast => runtime.invalid_cast.to_owned(),
            RuntimeFailure::OutOfMemory => runtime.out_of_memory.to_owned(),
        }
    }
}

/// `call get_ip; push eax; call <handler>`
pub fn emit_failure(ctx: &mut LoweringContext, failure: RuntimeFailure) {
    let get_ip = ctx.config.runtime.get_instruction_pointer.to_owned();
    ctx.call_symbol(&get_ip);
    ctx.emit(AsmOp::Push(Register::Eax.into()));

    let handler = failure.symbol(ctx);
    ctx.call_symbol(&handler);
}

/// Continues past the check only when `register` isn't null
pub fn emit_null_check(ctx: &mut LoweringContext, node: &IlNode, register: Register) {
    let not_null = ctx.new_label(node, LabelTag::NotNull);
    ctx.emit(AsmOp::Cmp {
        lhs: register.into(),
        rhs: Operand::Imm(0),
    });
    ctx.jump(JumpKind::NotEqual, not_null);
    emit_failure(ctx, RuntimeFailure::NullReference);
    ctx.place_label(not_null);
}

/// Continues only when an allocation in eax succeeded
pub fn emit_allocation_check(ctx: &mut LoweringContext, node: &IlNode) {
    let allocated = ctx.new_label(node, LabelTag::Allocated);
    ctx.emit(AsmOp::Cmp {
        lhs: Register::Eax.into(),
        rhs: Operand::Imm(0),
    });
    ctx.jump(JumpKind::NotEqual, allocated);
    emit_failure(ctx, RuntimeFailure::OutOfMemory);
    ctx.place_label(allocated);
}

/// Null check of `array` then `0 <= index < length`.
/// Both registers are preserved, so they're still valid for the address computation after.
pub fn emit_array_checks(ctx: &mut LoweringContext, node: &IlNode, array: Register, index: Register) {
    emit_null_check(ctx, node, array);

    let not_negative = ctx.new_label(node, LabelTag::IndexNotNegative);
    ctx.emit(AsmOp::Cmp {
        lhs: index.into(),
        rhs: Operand::Imm(0),
    });
    ctx.jump(JumpKind::GreaterOrEqual, not_negative);
    emit_failure(ctx, RuntimeFailure::IndexOutOfRange);
    ctx.place_label(not_negative);

    let in_range = ctx.new_label(node, LabelTag::IndexInRange);
    let length_offset = ctx.config.layout.array_length_offset;
    ctx.emit(AsmOp::Cmp {
        lhs: index.into(),
        rhs: Operand::mem(array, length_offset),
    });
    ctx.jump(JumpKind::Less, in_range);
    emit_failure(ctx, RuntimeFailure::IndexOutOfRange);
    ctx.place_label(in_range);
}

/// Replaces `index` with the address of element `index` in `array`
pub fn emit_element_address(ctx: &mut LoweringContext, array: Register, index: Register, element_size: u32) {
    if element_size != 1 {
        ctx.emit(AsmOp::Imul {
            dst: index,
            src: Operand::Imm(element_size as i32),
        });
    }
    ctx.emit(AsmOp::Add {
        dst: index.into(),
        src: array.into(),
    });
    let header = ctx.config.layout.array_header_size;
    if header != 0 {
        ctx.emit(AsmOp::Add {
            dst: index.into(),
            src: Operand::Imm(header),
        });
    }
}

/// Calls a runtime helper with already pushed arguments and reclaims them
pub fn emit_runtime_call(ctx: &mut LoweringContext, symbol: &str, argument_bytes: u32) {
    ctx.call_symbol(symbol);
    if argument_bytes > 0 {
        ctx.emit(AsmOp::Add {
            dst: Register::Esp.into(),
            src: Operand::Imm(argument_bytes as i32),
        });
    }
}
