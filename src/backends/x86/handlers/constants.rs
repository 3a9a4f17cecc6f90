use crate::backends::x86::asm::{AsmOp, Operand};
use crate::backends::x86::context::LoweringContext;
use crate::backends::x86::stack::StackItem;
use crate::compiler_messages::compiler_errors::CompilerError;
use crate::il::nodes::IlNode;
use crate::return_unsupported_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstKind {
    /// `ldc.i4.<n>` with the value in the opcode
    Fixed(i32),
    Int8,
    Int32,
    Int64,
    Float32,
    Float64,
    Null,
    String,
}

fn produced(kind: ConstKind) -> StackItem {
    match kind {
        ConstKind::Fixed(_) | ConstKind::Int8 | ConstKind::Int32 => StackItem::int32(),
        ConstKind::Int64 => StackItem::int64(),
        ConstKind::Float32 => StackItem::float(4),
        ConstKind::Float64 => StackItem::float(8),
        ConstKind::Null | ConstKind::String => StackItem::object_ref(),
    }
}

pub fn infer(ctx: &mut LoweringContext, _node: &IlNode, kind: ConstKind) -> Result<(), CompilerError> {
    ctx.push(produced(kind));
    Ok(())
}

pub fn emit(ctx: &mut LoweringContext, node: &IlNode, kind: ConstKind) -> Result<(), CompilerError> {
    match kind {
        ConstKind::Fixed(value) => ctx.emit(AsmOp::Push(Operand::Imm(value))),
        ConstKind::Int8 => ctx.emit(AsmOp::Push(Operand::Imm(node.operand_i8()? as i32))),
        ConstKind::Int32 => ctx.emit(AsmOp::Push(Operand::Imm(node.operand_i32()?))),
        ConstKind::Int64 => {
            let value = node.operand_i64()?;
            ctx.emit(AsmOp::Push(Operand::Imm((value >> 32) as i32)));
            ctx.emit(AsmOp::Push(Operand::Imm(value as i32)));
        }
        ConstKind::Null => ctx.emit(AsmOp::Push(Operand::Imm(0))),
        ConstKind::String => {
            let token = node.token()?;
            let symbol = ctx
                .catalogue
                .string_for_token(token, &node.location())?
                .to_owned();
            ctx.reference_symbol(&symbol);
            ctx.emit(AsmOp::Push(Operand::Symbol(symbol)));
        }
        ConstKind::Float32 | ConstKind::Float64 => return_unsupported_error!(
            format!("Floating point constant '{}'", node.op),
            node.location(),
            { OpCode => node.op.mnemonic() }
        ),
    }

    ctx.push(produced(kind));
    Ok(())
}
