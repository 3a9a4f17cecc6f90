use crate::backends::x86::asm::{AsmOp, JumpKind, LabelTag, Operand, Register};
use crate::backends::x86::context::LoweringContext;
use crate::backends::x86::handlers::{expect_primitive_width, expect_same_width, reject_float};
use crate::backends::x86::multiword::{self, PairOp, ShiftKind};
use crate::backends::x86::stack::StackItem;
use crate::compiler_messages::compiler_errors::CompilerError;
use crate::il::nodes::IlNode;
use crate::settings::SignedMultiply;
use crate::{codegen_log, return_unsupported_error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    DivUn,
    Rem,
    RemUn,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    ShrUn,

    // Overflow checked, never lowered
    CheckedAdd,
    CheckedSub,
    CheckedMul,
}

impl ArithOp {
    pub fn is_shift(self) -> bool {
        matches!(self, ArithOp::Shl | ArithOp::Shr | ArithOp::ShrUn)
    }

    fn shift_kind(self) -> ShiftKind {
        match self {
            ArithOp::Shl => ShiftKind::Left,
            ArithOp::Shr => ShiftKind::RightArithmetic,
            _ => ShiftKind::RightLogical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

fn result_item(left: &StackItem, width: u32) -> StackItem {
    if left.is_float {
        StackItem::float(width)
    } else if width == 8 {
        StackItem::int64()
    } else {
        StackItem::int32()
    }
}

/// Pops the count (for shifts) or right operand, then the left operand.
/// Returns `(left, right, result width)`.
/// Floats are rejected before any width check when `lowering`.
fn pop_operands(
    ctx: &mut LoweringContext,
    node: &IlNode,
    op: ArithOp,
    lowering: bool,
) -> Result<(StackItem, StackItem, u32), CompilerError> {
    let right = ctx.pop(node)?;
    let left = ctx.pop(node)?;

    if lowering {
        reject_float(&left, node)?;
        reject_float(&right, node)?;
    }

    let width = if op.is_shift() {
        expect_primitive_width(&right, node)?;
        expect_primitive_width(&left, node)?
    } else {
        expect_same_width(&left, &right, node)?
    };

    Ok((left, right, width))
}

pub fn infer_binary(ctx: &mut LoweringContext, node: &IlNode, op: ArithOp) -> Result<(), CompilerError> {
    let (left, _, width) = pop_operands(ctx, node, op, false)?;
    ctx.push(result_item(&left, width));
    Ok(())
}

pub fn infer_unary(ctx: &mut LoweringContext, node: &IlNode, _op: UnaryOp) -> Result<(), CompilerError> {
    let operand = ctx.pop(node)?;
    let width = expect_primitive_width(&operand, node)?;
    ctx.push(result_item(&operand, width));
    Ok(())
}

pub fn emit_binary(ctx: &mut LoweringContext, node: &IlNode, op: ArithOp) -> Result<(), CompilerError> {
    let (left, right, width) = pop_operands(ctx, node, op, true)?;

    if matches!(op, ArithOp::CheckedAdd | ArithOp::CheckedSub | ArithOp::CheckedMul) {
        return_unsupported_error!(
            format!("Overflow checked arithmetic '{}'", node.op),
            node.location(),
            { OpCode => node.op.mnemonic() }
        );
    }

    codegen_log!(format!("[Codegen] {} on {} and {}", node.op, left, right));

    if op.is_shift() {
        emit_shift(ctx, node, op, width, right.size_bytes);
    } else if width == 4 {
        emit_word_op(ctx, op);
    } else {
        emit_pair_op(ctx, node, op)?;
    }

    ctx.push(result_item(&left, width));
    Ok(())
}

/// `pop ebx; pop eax; <op> eax, ebx; push eax`
fn emit_word_op(ctx: &mut LoweringContext, op: ArithOp) {
    ctx.emit(AsmOp::Pop(Register::Ebx.into()));
    ctx.emit(AsmOp::Pop(Register::Eax.into()));

    let eax: Operand = Register::Eax.into();
    let ebx: Operand = Register::Ebx.into();
    let mut result = Register::Eax;

    match op {
        ArithOp::Add => ctx.emit(AsmOp::Add { dst: eax, src: ebx }),
        ArithOp::Sub => ctx.emit(AsmOp::Sub { dst: eax, src: ebx }),
        ArithOp::And => ctx.emit(AsmOp::And { dst: eax, src: ebx }),
        ArithOp::Or => ctx.emit(AsmOp::Or { dst: eax, src: ebx }),
        ArithOp::Xor => ctx.emit(AsmOp::Xor { dst: eax, src: ebx }),
        ArithOp::Mul => ctx.emit(AsmOp::Imul {
            dst: Register::Eax,
            src: ebx,
        }),
        ArithOp::Div | ArithOp::Rem => {
            ctx.emit(AsmOp::Cdq);
            ctx.emit(AsmOp::Idiv(ebx));
            if op == ArithOp::Rem {
                result = Register::Edx;
            }
        }
        ArithOp::DivUn | ArithOp::RemUn => {
            multiword::clear(ctx, Register::Edx);
            ctx.emit(AsmOp::Div(ebx));
            if op == ArithOp::RemUn {
                result = Register::Edx;
            }
        }
        _ => {}
    }

    ctx.emit(AsmOp::Push(result.into()));
}

fn emit_pair_op(ctx: &mut LoweringContext, node: &IlNode, op: ArithOp) -> Result<(), CompilerError> {
    let pair_op = match op {
        ArithOp::Add => PairOp::Add,
        ArithOp::Sub => PairOp::Sub,
        ArithOp::And => PairOp::And,
        ArithOp::Or => PairOp::Or,
        ArithOp::Xor => PairOp::Xor,
        ArithOp::Mul => {
            if ctx.config.codegen.signed_64bit_multiply == SignedMultiply::Reject {
                return_unsupported_error!(
                    "64-bit multiply is disabled by codegen.signed_64bit_multiply = \"reject\"",
                    node.location(),
                    { OpCode => node.op.mnemonic(), PrimarySuggestion => "Set codegen.signed_64bit_multiply to \"wrapping\"" }
                );
            }

            multiword::pop_binary_operands(ctx);
            multiword::emit_multiply(ctx);
            multiword::push_result(ctx);
            return Ok(());
        }
        _ => return_unsupported_error!(
            format!("64-bit '{}'", node.op),
            node.location(),
            { OpCode => node.op.mnemonic(), PrimarySuggestion => "Only 32-bit division and remainder are lowered" }
        ),
    };

    multiword::pop_binary_operands(ctx);
    multiword::emit_pair_op(ctx, pair_op);
    multiword::push_result(ctx);
    Ok(())
}

fn emit_shift(ctx: &mut LoweringContext, node: &IlNode, op: ArithOp, width: u32, count_width: u32) {
    ctx.emit(AsmOp::Pop(Register::Ecx.into()));
    let count_high = if count_width == 8 {
        ctx.emit(AsmOp::Pop(Register::Ebx.into()));
        Some(Register::Ebx)
    } else {
        None
    };

    if width == 8 {
        multiword::pop_pair(ctx, Register::Eax, Register::Edx);
        multiword::emit_shift(ctx, node, op.shift_kind(), count_high);
        multiword::push_result(ctx);
        return;
    }

    ctx.emit(AsmOp::Pop(Register::Eax.into()));
    let shift = |count: Operand| match op {
        ArithOp::Shl => AsmOp::Shl {
            dst: Register::Eax.into(),
            count,
        },
        ArithOp::Shr => AsmOp::Sar {
            dst: Register::Eax.into(),
            count,
        },
        _ => AsmOp::Shr {
            dst: Register::Eax.into(),
            count,
        },
    };

    match count_high {
        None => ctx.emit(shift(Register::Cl.into())),
        Some(high) => {
            // A wide count can exceed the register, which the hardware would wrap
            let large = ctx.new_label(node, LabelTag::Large);
            let end = ctx.new_label(node, LabelTag::End);
            ctx.emit(AsmOp::Cmp {
                lhs: high.into(),
                rhs: Operand::Imm(0),
            });
            ctx.jump(JumpKind::NotEqual, large);
            ctx.emit(AsmOp::Cmp {
                lhs: Register::Ecx.into(),
                rhs: Operand::Imm(32),
            });
            ctx.jump(JumpKind::AboveOrEqual, large);
            ctx.emit(shift(Register::Cl.into()));
            ctx.jump(JumpKind::Always, end);

            ctx.place_label(large);
            if op == ArithOp::Shr {
                multiword::sign_fill(ctx, Register::Eax);
            } else {
                multiword::clear(ctx, Register::Eax);
            }
            ctx.place_label(end);
        }
    }

    ctx.emit(AsmOp::Push(Register::Eax.into()));
}

pub fn emit_unary(ctx: &mut LoweringContext, node: &IlNode, op: UnaryOp) -> Result<(), CompilerError> {
    let operand = ctx.pop(node)?;
    reject_float(&operand, node)?;
    let width = expect_primitive_width(&operand, node)?;

    if width == 4 {
        ctx.emit(AsmOp::Pop(Register::Eax.into()));
        match op {
            UnaryOp::Neg => ctx.emit(AsmOp::Neg(Register::Eax.into())),
            UnaryOp::Not => ctx.emit(AsmOp::Not(Register::Eax.into())),
        }
        ctx.emit(AsmOp::Push(Register::Eax.into()));
    } else {
        multiword::pop_pair(ctx, Register::Eax, Register::Edx);
        match op {
            UnaryOp::Neg => multiword::emit_negate(ctx),
            UnaryOp::Not => multiword::emit_not(ctx),
        }
        multiword::push_result(ctx);
    }

    ctx.push(result_item(&operand, width));
    Ok(())
}
