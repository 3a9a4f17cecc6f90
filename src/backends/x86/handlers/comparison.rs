use crate::backends::x86::asm::{AsmOp, JumpKind, LabelTag, Operand, Register};
use crate::backends::x86::context::LoweringContext;
use crate::backends::x86::handlers::{expect_same_width, reject_float};
use crate::backends::x86::multiword;
use crate::backends::x86::stack::StackItem;
use crate::compiler_messages::compiler_errors::CompilerError;
use crate::il::nodes::IlNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Gt,
    GtUn,
    Lt,
    LtUn,
}

impl CompareOp {
    pub fn jump_kind(self) -> JumpKind {
        match self {
            CompareOp::Eq => JumpKind::Equal,
            CompareOp::Gt => JumpKind::Greater,
            CompareOp::GtUn => JumpKind::Above,
            CompareOp::Lt => JumpKind::Less,
            CompareOp::LtUn => JumpKind::Below,
        }
    }
}

pub fn infer(ctx: &mut LoweringContext, node: &IlNode, _op: CompareOp) -> Result<(), CompilerError> {
    let right = ctx.pop(node)?;
    let left = ctx.pop(node)?;
    expect_same_width(&left, &right, node)?;
    ctx.push(StackItem::int32());
    Ok(())
}

/// ```text
///     cmp   left, right
///     j<cc> .True
///     push  0
///     jmp   .End
/// .True:
///     push  1
/// .End:
/// ```
pub fn emit(ctx: &mut LoweringContext, node: &IlNode, op: CompareOp) -> Result<(), CompilerError> {
    let right = ctx.pop(node)?;
    let left = ctx.pop(node)?;
    reject_float(&left, node)?;
    reject_float(&right, node)?;
    let width = expect_same_width(&left, &right, node)?;

    let is_true = ctx.new_label(node, LabelTag::True);
    let end = ctx.new_label(node, LabelTag::End);

    if width == 4 {
        ctx.emit(AsmOp::Pop(Register::Ebx.into()));
        ctx.emit(AsmOp::Pop(Register::Eax.into()));
        ctx.emit(AsmOp::Cmp {
            lhs: Register::Eax.into(),
            rhs: Register::Ebx.into(),
        });
        ctx.jump(op.jump_kind(), is_true);
    } else {
        multiword::pop_binary_operands(ctx);
        multiword::emit_branch_if(ctx, node, op.jump_kind(), is_true);
    }

    ctx.emit(AsmOp::Push(Operand::Imm(0)));
    ctx.jump(JumpKind::Always, end);
    ctx.place_label(is_true);
    ctx.emit(AsmOp::Push(Operand::Imm(1)));
    ctx.place_label(end);

    ctx.push(StackItem::int32());
    Ok(())
}
