use crate::backends::x86::context::LoweringContext;
use crate::backends::x86::frame::{self, FrameSlot};
use crate::backends::x86::stack::StackItem;
use crate::compiler_messages::compiler_errors::CompilerError;
use crate::il::nodes::IlNode;
use crate::return_stack_shape_error;

pub use crate::backends::x86::frame::SlotKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarOp {
    /// Index in the opcode (`ldarg.0`) or `None` to read it from the operand
    Load(Option<u16>),
    Store(Option<u16>),
    Address,
}

fn slot(ctx: &LoweringContext, node: &IlNode, kind: SlotKind, index: Option<u16>) -> Result<FrameSlot, CompilerError> {
    let index = match index {
        Some(index) => index,
        None => node.variable_index()?,
    };
    Ok(ctx.frame.slot(kind, index, &node.location())?.to_owned())
}

fn pop_into(ctx: &mut LoweringContext, node: &IlNode, slot: &FrameSlot) -> Result<(), CompilerError> {
    let value = ctx.pop(node)?;
    if value.size_bytes != slot.item.size_bytes {
        return_stack_shape_error!(
            format!(
                "Storing a {} byte value into a {} byte slot",
                value.size_bytes, slot.item.size_bytes
            ),
            node.location(),
            { CompilationStage => "Locals" }
        );
    }
    Ok(())
}

pub fn infer(ctx: &mut LoweringContext, node: &IlNode, kind: SlotKind, op: VarOp) -> Result<(), CompilerError> {
    match op {
        VarOp::Load(index) => {
            let slot = slot(ctx, node, kind, index)?;
            ctx.push(slot.item);
        }
        VarOp::Store(index) => {
            let slot = slot(ctx, node, kind, index)?;
            pop_into(ctx, node, &slot)?;
        }
        VarOp::Address => {
            slot(ctx, node, kind, None)?;
            ctx.push(StackItem::native_ptr());
        }
    }
    Ok(())
}

pub fn emit(ctx: &mut LoweringContext, node: &IlNode, kind: SlotKind, op: VarOp) -> Result<(), CompilerError> {
    match op {
        VarOp::Load(index) => {
            let slot = slot(ctx, node, kind, index)?;
            frame::load_slot(ctx, &slot);
            ctx.push(slot.item);
        }
        VarOp::Store(index) => {
            let slot = slot(ctx, node, kind, index)?;
            pop_into(ctx, node, &slot)?;
            frame::store_slot(ctx, &slot);
        }
        VarOp::Address => {
            let slot = slot(ctx, node, kind, None)?;
            frame::push_slot_address(ctx, &slot);
            ctx.push(StackItem::native_ptr());
        }
    }
    Ok(())
}
