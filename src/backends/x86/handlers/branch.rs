use crate::backends::x86::asm::{AsmOp, JumpKind, LabelKey, Operand, Register};
use crate::backends::x86::context::LoweringContext;
use crate::backends::x86::handlers::{expect_primitive_width, expect_same_width, expect_word, reject_float};
use crate::backends::x86::multiword;
use crate::compiler_messages::compiler_errors::CompilerError;
use crate::il::nodes::IlNode;
use crate::{preprocess_log, return_compiler_error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    Always,
    IfFalse,
    IfTrue,

    /// Two operands compared with the given condition
    Compare(JumpKind),
}

impl BranchKind {
    pub fn operand_count(self) -> usize {
        match self {
            BranchKind::Always => 0,
            BranchKind::IfFalse | BranchKind::IfTrue => 1,
            BranchKind::Compare(_) => 2,
        }
    }
}

fn single_target(node: &IlNode) -> Result<usize, CompilerError> {
    match node.branch_target() {
        Some(target) => Ok(target),
        None => return_compiler_error!(
            format!("Branch '{}' was never linked to a target", node.op),
            node.location()
        ),
    }
}

/// Pops the branch operands, returning their combined width in bytes and the width of one operand
fn pop_operands(ctx: &mut LoweringContext, node: &IlNode, kind: BranchKind, lowering: bool) -> Result<(u32, u32), CompilerError> {
    match kind.operand_count() {
        0 => Ok((0, 0)),
        1 => {
            let value = ctx.pop(node)?;
            if lowering {
                reject_float(&value, node)?;
            }
            let width = expect_primitive_width(&value, node)?;
            Ok((width, width))
        }
        _ => {
            let right = ctx.pop(node)?;
            let left = ctx.pop(node)?;
            if lowering {
                reject_float(&left, node)?;
                reject_float(&right, node)?;
            }
            let width = expect_same_width(&left, &right, node)?;
            Ok((width * 2, width))
        }
    }
}

pub fn infer(ctx: &mut LoweringContext, node: &IlNode, kind: BranchKind) -> Result<(), CompilerError> {
    pop_operands(ctx, node, kind, false)?;
    let target = single_target(node)?;
    preprocess_log!(format!(
        "[Preprocess] IL_{:04x} {} forks {} onto node {}",
        node.offset, node.op, ctx.stack, target
    ));
    ctx.fork_to(target, node)
}

pub fn emit(ctx: &mut LoweringContext, node: &IlNode, kind: BranchKind) -> Result<(), CompilerError> {
    let (operand_bytes, width) = pop_operands(ctx, node, kind, true)?;
    let target_position = single_target(node)?;

    // Still a real instruction so positions downstream stay aligned, just with nothing to jump over
    if node.is_zero_distance_branch(&ctx.body) {
        multiword::discard(ctx, operand_bytes);
        ctx.emit(AsmOp::Comment(format!(
            "{} to the next instruction, operands dropped",
            node.op
        )));
        return Ok(());
    }

    let target = LabelKey::node(target_position);
    match kind {
        BranchKind::Always => ctx.jump(JumpKind::Always, target),

        BranchKind::IfFalse | BranchKind::IfTrue => {
            let jump = if kind == BranchKind::IfTrue {
                JumpKind::NotEqual
            } else {
                JumpKind::Equal
            };

            ctx.emit(AsmOp::Pop(Register::Eax.into()));
            if width == 8 {
                ctx.emit(AsmOp::Pop(Register::Edx.into()));
                ctx.emit(AsmOp::Or {
                    dst: Register::Eax.into(),
                    src: Register::Edx.into(),
                });
            } else {
                ctx.emit(AsmOp::Cmp {
                    lhs: Register::Eax.into(),
                    rhs: Operand::Imm(0),
                });
            }
            ctx.jump(jump, target);
        }

        BranchKind::Compare(condition) => {
            if width == 4 {
                ctx.emit(AsmOp::Pop(Register::Ebx.into()));
                ctx.emit(AsmOp::Pop(Register::Eax.into()));
                ctx.emit(AsmOp::Cmp {
                    lhs: Register::Eax.into(),
                    rhs: Register::Ebx.into(),
                });
                ctx.jump(condition, target);
            } else {
                multiword::pop_binary_operands(ctx);
                multiword::emit_branch_if(ctx, node, condition, target);
            }
        }
    }

    Ok(())
}

pub fn infer_switch(ctx: &mut LoweringContext, node: &IlNode) -> Result<(), CompilerError> {
    let selector = ctx.pop(node)?;
    expect_word(&selector, node)?;

    for target in node.branch_targets.iter().copied() {
        ctx.fork_to(target, node)?;
    }
    Ok(())
}

/// One `cmp`/`je` pair per case in case order. No case matching falls through.
pub fn emit_switch(ctx: &mut LoweringContext, node: &IlNode) -> Result<(), CompilerError> {
    let selector = ctx.pop(node)?;
    reject_float(&selector, node)?;
    expect_word(&selector, node)?;

    ctx.emit(AsmOp::Pop(Register::Eax.into()));
    for (case, target) in node.branch_targets.iter().copied().enumerate() {
        ctx.emit(AsmOp::Cmp {
            lhs: Register::Eax.into(),
            rhs: Operand::Imm(case as i32),
        });
        ctx.jump(JumpKind::Equal, LabelKey::node(target));
    }

    Ok(())
}
