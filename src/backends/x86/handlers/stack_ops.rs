use crate::backends::x86::asm::{AsmOp, Operand, Register};
use crate::backends::x86::context::LoweringContext;
use crate::backends::x86::handlers::{expect_primitive_width, reject_float};
use crate::backends::x86::multiword;
use crate::backends::x86::stack::StackItem;
use crate::compiler_messages::compiler_errors::CompilerError;
use crate::il::nodes::IlNode;
use crate::return_unsupported_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvKind {
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,

    /// `conv.r4`/`conv.r8`/`conv.r.un`, result width in bytes
    Float(u32),

    /// `conv.ovf.*`, result width in bytes
    Checked(u32),
}

impl ConvKind {
    fn result(self) -> StackItem {
        match self {
            ConvKind::I8 | ConvKind::U8 | ConvKind::Checked(8) => StackItem::int64(),
            ConvKind::Float(size) => StackItem::float(size),
            _ => StackItem::int32(),
        }
    }
}

pub fn infer_conv(ctx: &mut LoweringContext, node: &IlNode, kind: ConvKind) -> Result<(), CompilerError> {
    let value = ctx.pop(node)?;
    expect_primitive_width(&value, node)?;
    ctx.push(kind.result());
    Ok(())
}

pub fn emit_conv(ctx: &mut LoweringContext, node: &IlNode, kind: ConvKind) -> Result<(), CompilerError> {
    let value = ctx.pop(node)?;

    match kind {
        ConvKind::Float(_) => return_unsupported_error!(
            format!("Conversion to floating point '{}'", node.op),
            node.location(),
            { OpCode => node.op.mnemonic() }
        ),
        ConvKind::Checked(_) => return_unsupported_error!(
            format!("Overflow checked conversion '{}'", node.op),
            node.location(),
            { OpCode => node.op.mnemonic(), PrimarySuggestion => "Use the unchecked conv form" }
        ),
        _ => {}
    }

    reject_float(&value, node)?;
    let width = expect_primitive_width(&value, node)?;

    match (width, kind) {
        // Already the right slot, the bits don't change
        (4, ConvKind::I4 | ConvKind::U4) | (8, ConvKind::I8 | ConvKind::U8) => {}

        (4, ConvKind::I8) => {
            ctx.emit(AsmOp::Pop(Register::Eax.into()));
            ctx.emit(AsmOp::Cdq);
            multiword::push_result(ctx);
        }
        (4, ConvKind::U8) => {
            ctx.emit(AsmOp::Pop(Register::Eax.into()));
            multiword::clear(ctx, Register::Edx);
            multiword::push_result(ctx);
        }

        (_, narrow) => {
            // An 8-byte source keeps only its low word
            ctx.emit(AsmOp::Pop(Register::Eax.into()));
            if width == 8 {
                multiword::discard(ctx, 4);
            }
            truncate_eax(ctx, narrow);
            ctx.emit(AsmOp::Push(Register::Eax.into()));
        }
    }

    ctx.push(kind.result());
    Ok(())
}

/// Re-extends the low byte or word of eax to the full register
fn truncate_eax(ctx: &mut LoweringContext, kind: ConvKind) {
    let (src, signed) = match kind {
        ConvKind::I1 => (Register::Al, true),
        ConvKind::U1 => (Register::Al, false),
        ConvKind::I2 => (Register::Ax, true),
        ConvKind::U2 => (Register::Ax, false),
        _ => return,
    };

    let src: Operand = src.into();
    if signed {
        ctx.emit(AsmOp::MovSx { dst: Register::Eax, src });
    } else {
        ctx.emit(AsmOp::MovZx { dst: Register::Eax, src });
    }
}

pub fn infer_dup(ctx: &mut LoweringContext, node: &IlNode) -> Result<(), CompilerError> {
    let top = ctx.pop(node)?;
    ctx.push(top.to_owned());
    ctx.push(StackItem {
        is_freshly_allocated: false,
        ..top
    });
    Ok(())
}

/// Pushes a copy of every word of the top slot. Each push moves `esp`, so the
/// next word to copy is always at the same displacement.
pub fn emit_dup(ctx: &mut LoweringContext, node: &IlNode) -> Result<(), CompilerError> {
    let top = ctx.pop(node)?;
    reject_float(&top, node)?;

    let highest_word = top.size_bytes as i32 - 4;
    for _ in 0..top.words() {
        ctx.emit(AsmOp::Push(Operand::mem(Register::Esp, highest_word)));
    }

    ctx.push(top.to_owned());
    ctx.push(StackItem {
        is_freshly_allocated: false,
        ..top
    });
    Ok(())
}

pub fn infer_pop(ctx: &mut LoweringContext, node: &IlNode) -> Result<(), CompilerError> {
    ctx.pop(node)?;
    Ok(())
}

pub fn emit_pop(ctx: &mut LoweringContext, node: &IlNode) -> Result<(), CompilerError> {
    let top = ctx.pop(node)?;
    multiword::discard(ctx, top.size_bytes);
    Ok(())
}
