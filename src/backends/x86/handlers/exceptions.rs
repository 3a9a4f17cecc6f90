//! Hand-off points to the runtime's exception dispatch. None of these unwind
//! anything themselves.

use crate::backends::x86::asm::{AsmOp, JumpKind, LabelKey, Operand};
use crate::backends::x86::context::LoweringContext;
use crate::backends::x86::handlers::expect_word;
use crate::backends::x86::multiword;
use crate::backends::x86::safety;
use crate::compiler_messages::compiler_errors::CompilerError;
use crate::il::nodes::IlNode;
use crate::return_compiler_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionOp {
    Throw,
    Leave,
    EndFinally,
}

fn leave_target(node: &IlNode) -> Result<usize, CompilerError> {
    match node.branch_target() {
        Some(target) => Ok(target),
        None => return_compiler_error!(
            format!("'{}' was never linked to a target", node.op),
            node.location()
        ),
    }
}

pub fn infer(ctx: &mut LoweringContext, node: &IlNode, op: ExceptionOp) -> Result<(), CompilerError> {
    match op {
        ExceptionOp::Throw => {
            let exception = ctx.pop(node)?;
            expect_word(&exception, node)?;
        }
        ExceptionOp::Leave => {
            // leave always arrives at its target with nothing on the stack
            ctx.stack.clear();
            let target = leave_target(node)?;
            ctx.fork_to(target, node)?;
        }
        ExceptionOp::EndFinally => ctx.stack.clear(),
    }
    Ok(())
}

pub fn emit(ctx: &mut LoweringContext, node: &IlNode, op: ExceptionOp) -> Result<(), CompilerError> {
    match op {
        // The reference stays on the machine stack as the handler's only argument
        ExceptionOp::Throw => {
            let exception = ctx.pop(node)?;
            expect_word(&exception, node)?;
            let throw = ctx.config.runtime.throw.to_owned();
            ctx.call_symbol(&throw);
        }

        ExceptionOp::Leave => {
            let target = LabelKey::node(leave_target(node)?);
            let abandoned = ctx.stack.total_bytes();
            multiword::discard(ctx, abandoned);
            ctx.stack.clear();

            ctx.emit(AsmOp::Push(Operand::Label(target)));
            let leave = ctx.config.runtime.leave.to_owned();
            safety::emit_runtime_call(ctx, &leave, 4);
            ctx.jump(JumpKind::Always, target);
        }

        ExceptionOp::EndFinally => {
            let abandoned = ctx.stack.total_bytes();
            multiword::discard(ctx, abandoned);
            ctx.stack.clear();
            let end_finally = ctx.config.runtime.end_finally.to_owned();
            ctx.call_symbol(&end_finally);
        }
    }
    Ok(())
}
