//! Multi-word helpers
//!
//! Sequences shared by every handler that moves or computes values wider than one
//! machine word. The ordering rule everywhere: a value is pushed from its highest
//! word down to its lowest, so the least significant word is always on top and the
//! machine stack image of a value matches its memory image.
//!
//! 64-bit operands are loaded into fixed pairs:
//! left operand `edx:eax`, right operand `ecx:ebx`.

use crate::backends::x86::asm::{AsmOp, JumpKind, LabelKey, LabelTag, Operand, Register, Width};
use crate::backends::x86::context::LoweringContext;
use crate::il::nodes::IlNode;

// ============================================================================
// Memory moves
// ============================================================================

/// Pushes `size_bytes` (a multiple of 4) starting at `address`, highest word first.
pub fn push_from_memory(ctx: &mut LoweringContext, address: Operand, size_bytes: u32) {
    let words = size_bytes / 4;
    for word in (0..words).rev() {
        ctx.emit(AsmOp::Push(address.to_owned().offset_by(word as i32 * 4)));
    }
}

/// Pops `size_bytes` (a multiple of 4) into memory starting at `address`, lowest word first.
/// `address` must not be esp-relative.
pub fn pop_to_memory(ctx: &mut LoweringContext, address: Operand, size_bytes: u32) {
    let words = size_bytes / 4;
    for word in 0..words {
        ctx.emit(AsmOp::Pop(address.to_owned().offset_by(word as i32 * 4)));
    }
}

/// A scratch register that isn't `base`
pub fn scratch_excluding(base: Register) -> Register {
    if base == Register::Ebx {
        Register::Ecx
    } else {
        Register::Ebx
    }
}

/// Loads a 1, 2 or 3 byte value into `dst`, zero or sign extended to 32 bits
pub fn load_small(ctx: &mut LoweringContext, dst: Register, src: Operand, size: u32, is_signed: bool) {
    match size {
        1 | 2 => {
            let width = if size == 1 { Width::Byte } else { Width::Word };
            let src = src.with_width(width);
            if is_signed {
                ctx.emit(AsmOp::MovSx { dst, src });
            } else {
                ctx.emit(AsmOp::MovZx { dst, src });
            }
        }
        _ => {
            // Three bytes only ever come from struct tails, which are raw bits
            ctx.emit(AsmOp::MovZx {
                dst,
                src: src.to_owned().offset_by(2).with_width(Width::Byte),
            });
            ctx.emit(AsmOp::Shl {
                dst: dst.into(),
                count: Operand::Imm(16),
            });
            if let Some(low) = dst.low_word() {
                ctx.emit(AsmOp::Mov {
                    dst: low.into(),
                    src: src.with_width(Width::Word),
                });
            }
        }
    }
}

/// Stores the low 1, 2 or 3 bytes of `src` to `dst`. `src` must be one of eax..edx
/// and is clobbered for a 3 byte store.
pub fn store_small(ctx: &mut LoweringContext, dst: Operand, src: Register, size: u32) {
    let (Some(low_byte), Some(low_word)) = (src.low_byte(), src.low_word()) else {
        return;
    };

    match size {
        1 => ctx.emit(AsmOp::Mov {
            dst: dst.with_width(Width::Byte),
            src: low_byte.into(),
        }),
        2 => ctx.emit(AsmOp::Mov {
            dst: dst.with_width(Width::Word),
            src: low_word.into(),
        }),
        _ => {
            ctx.emit(AsmOp::Mov {
                dst: dst.to_owned().with_width(Width::Word),
                src: low_word.into(),
            });
            ctx.emit(AsmOp::Shr {
                dst: src.into(),
                count: Operand::Imm(16),
            });
            ctx.emit(AsmOp::Mov {
                dst: dst.offset_by(2).with_width(Width::Byte),
                src: low_byte.into(),
            });
        }
    }
}

/// Pushes a value of exactly `memory_size` bytes at `[base + disp]` as a stack slot.
///
/// Whole words move first from the top down, then the 1-3 byte leftover is widened
/// into its own word. Because the leftover is the most significant part it's pushed
/// first and the least significant chunk lands last, on top.
pub fn push_value(
    ctx: &mut LoweringContext,
    base: Register,
    disp: i32,
    memory_size: u32,
    is_signed: bool,
) {
    let address = Operand::mem(base, disp);
    if memory_size < 4 {
        let scratch = scratch_excluding(base);
        load_small(ctx, scratch, address, memory_size, is_signed);
        ctx.emit(AsmOp::Push(scratch.into()));
        return;
    }

    let whole = memory_size / 4 * 4;
    let leftover = memory_size % 4;
    if leftover > 0 {
        let scratch = scratch_excluding(base);
        load_small(ctx, scratch, address.to_owned().offset_by(whole as i32), leftover, false);
        ctx.emit(AsmOp::Push(scratch.into()));
    }

    push_from_memory(ctx, address, whole);
}

/// Pops a stack slot into exactly `memory_size` bytes at `[base + disp]`.
/// The inverse of `push_value`, so the padding of a partial word is never written.
pub fn pop_value(ctx: &mut LoweringContext, base: Register, disp: i32, memory_size: u32) {
    let address = Operand::mem(base, disp);
    let scratch = scratch_excluding(base);
    if memory_size < 4 {
        ctx.emit(AsmOp::Pop(scratch.into()));
        store_small(ctx, address, scratch, memory_size);
        return;
    }

    let whole = memory_size / 4 * 4;
    let leftover = memory_size % 4;
    pop_to_memory(ctx, address.to_owned(), whole);

    if leftover > 0 {
        ctx.emit(AsmOp::Pop(scratch.into()));
        store_small(ctx, address.offset_by(whole as i32), scratch, leftover);
    }
}

/// Drops `bytes` from the top of the machine stack without reading them
pub fn discard(ctx: &mut LoweringContext, bytes: u32) {
    if bytes > 0 {
        ctx.emit(AsmOp::Add {
            dst: Register::Esp.into(),
            src: Operand::Imm(bytes as i32),
        });
    }
}

// ============================================================================
// 64-bit register pairs
// ============================================================================

/// `pop lo; pop hi`
pub fn pop_pair(ctx: &mut LoweringContext, lo: Register, hi: Register) {
    ctx.emit(AsmOp::Pop(lo.into()));
    ctx.emit(AsmOp::Pop(hi.into()));
}

/// `push hi; push lo`
pub fn push_pair(ctx: &mut LoweringContext, lo: Register, hi: Register) {
    ctx.emit(AsmOp::Push(hi.into()));
    ctx.emit(AsmOp::Push(lo.into()));
}

/// Right operand into `ecx:ebx`, then left operand into `edx:eax`
pub fn pop_binary_operands(ctx: &mut LoweringContext) {
    pop_pair(ctx, Register::Ebx, Register::Ecx);
    pop_pair(ctx, Register::Eax, Register::Edx);
}

pub fn push_result(ctx: &mut LoweringContext) {
    push_pair(ctx, Register::Eax, Register::Edx);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
}

/// Add and sub carry the low word's carry or borrow into the high word.
pub fn emit_pair_op(ctx: &mut LoweringContext, op: PairOp) {
    let (lo_dst, lo_src): (Operand, Operand) = (Register::Eax.into(), Register::Ebx.into());
    let (hi_dst, hi_src): (Operand, Operand) = (Register::Edx.into(), Register::Ecx.into());

    let (low, high) = match op {
        PairOp::Add => (
            AsmOp::Add { dst: lo_dst, src: lo_src },
            AsmOp::Adc { dst: hi_dst, src: hi_src },
        ),
        PairOp::Sub => (
            AsmOp::Sub { dst: lo_dst, src: lo_src },
            AsmOp::Sbb { dst: hi_dst, src: hi_src },
        ),
        PairOp::And => (
            AsmOp::And { dst: lo_dst, src: lo_src },
            AsmOp::And { dst: hi_dst, src: hi_src },
        ),
        PairOp::Or => (
            AsmOp::Or { dst: lo_dst, src: lo_src },
            AsmOp::Or { dst: hi_dst, src: hi_src },
        ),
        PairOp::Xor => (
            AsmOp::Xor { dst: lo_dst, src: lo_src },
            AsmOp::Xor { dst: hi_dst, src: hi_src },
        ),
    };

    ctx.emit(low);
    ctx.emit(high);
}

/// Truncating 64 x 64 -> 64 multiply of `edx:eax` by `ecx:ebx`, result in `edx:eax`.
///
/// ```text
///   lo(a) * lo(b)                 full 64-bit product (mul)
/// + (lo(a) * hi(b)) << 32         low 32 bits only (imul)
/// + (hi(a) * lo(b)) << 32         low 32 bits only (imul)
/// ```
///
/// hi(a) * hi(b) only reaches bits 64 and up, so it's never computed.
pub fn emit_multiply(ctx: &mut LoweringContext) {
    ctx.emit(AsmOp::Imul {
        dst: Register::Ecx,
        src: Register::Eax.into(),
    });
    ctx.emit(AsmOp::Imul {
        dst: Register::Edx,
        src: Register::Ebx.into(),
    });
    ctx.emit(AsmOp::Add {
        dst: Register::Ecx.into(),
        src: Register::Edx.into(),
    });
    ctx.emit(AsmOp::Mul(Register::Ebx.into()));
    ctx.emit(AsmOp::Add {
        dst: Register::Edx.into(),
        src: Register::Ecx.into(),
    });
}

/// Two's complement negate of `edx:eax`
pub fn emit_negate(ctx: &mut LoweringContext) {
    ctx.emit(AsmOp::Neg(Register::Eax.into()));
    ctx.emit(AsmOp::Adc {
        dst: Register::Edx.into(),
        src: Operand::Imm(0),
    });
    ctx.emit(AsmOp::Neg(Register::Edx.into()));
}

pub fn emit_not(ctx: &mut LoweringContext) {
    ctx.emit(AsmOp::Not(Register::Eax.into()));
    ctx.emit(AsmOp::Not(Register::Edx.into()));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftKind {
    Left,
    RightLogical,
    RightArithmetic,
}

/// Shifts `edx:eax` by `ecx`. When `count_high` is set that register holds the high
/// word of an 8-byte count.
///
/// Counts of 64 and up, or with a non-zero high word, give zero or the sign fill.
/// Counts 32..63 move one register into the other and shift just that one.
pub fn emit_shift(ctx: &mut LoweringContext, node: &IlNode, kind: ShiftKind, count_high: Option<Register>) {
    let large = ctx.new_label(node, LabelTag::Large);
    let over_word = ctx.new_label(node, LabelTag::Overflow);
    let end = ctx.new_label(node, LabelTag::End);
    let cl: Operand = Register::Cl.into();

    if let Some(high) = count_high {
        ctx.emit(AsmOp::Cmp {
            lhs: high.into(),
            rhs: Operand::Imm(0),
        });
        ctx.jump(JumpKind::NotEqual, large);
    }
    ctx.emit(AsmOp::Cmp {
        lhs: Register::Ecx.into(),
        rhs: Operand::Imm(64),
    });
    ctx.jump(JumpKind::AboveOrEqual, large);
    ctx.emit(AsmOp::Cmp {
        lhs: Register::Ecx.into(),
        rhs: Operand::Imm(32),
    });
    ctx.jump(JumpKind::AboveOrEqual, over_word);

    // 0..31
    match kind {
        ShiftKind::Left => {
            ctx.emit(AsmOp::Shld {
                dst: Register::Edx.into(),
                src: Register::Eax,
                count: cl.to_owned(),
            });
            ctx.emit(AsmOp::Shl {
                dst: Register::Eax.into(),
                count: cl.to_owned(),
            });
        }
        ShiftKind::RightLogical => {
            ctx.emit(AsmOp::Shrd {
                dst: Register::Eax.into(),
                src: Register::Edx,
                count: cl.to_owned(),
            });
            ctx.emit(AsmOp::Shr {
                dst: Register::Edx.into(),
                count: cl.to_owned(),
            });
        }
        ShiftKind::RightArithmetic => {
            ctx.emit(AsmOp::Shrd {
                dst: Register::Eax.into(),
                src: Register::Edx,
                count: cl.to_owned(),
            });
            ctx.emit(AsmOp::Sar {
                dst: Register::Edx.into(),
                count: cl.to_owned(),
            });
        }
    }
    ctx.jump(JumpKind::Always, end);

    // 32..63
    ctx.place_label(over_word);
    ctx.emit(AsmOp::Sub {
        dst: Register::Ecx.into(),
        src: Operand::Imm(32),
    });
    match kind {
        ShiftKind::Left => {
            move_reg(ctx, Register::Edx, Register::Eax);
            clear(ctx, Register::Eax);
            ctx.emit(AsmOp::Shl {
                dst: Register::Edx.into(),
                count: cl.to_owned(),
            });
        }
        ShiftKind::RightLogical => {
            move_reg(ctx, Register::Eax, Register::Edx);
            clear(ctx, Register::Edx);
            ctx.emit(AsmOp::Shr {
                dst: Register::Eax.into(),
                count: cl.to_owned(),
            });
        }
        ShiftKind::RightArithmetic => {
            move_reg(ctx, Register::Eax, Register::Edx);
            sign_fill(ctx, Register::Edx);
            ctx.emit(AsmOp::Sar {
                dst: Register::Eax.into(),
                count: cl,
            });
        }
    }
    ctx.jump(JumpKind::Always, end);

    // 64 and up
    ctx.place_label(large);
    match kind {
        ShiftKind::Left | ShiftKind::RightLogical => {
            clear(ctx, Register::Eax);
            clear(ctx, Register::Edx);
        }
        ShiftKind::RightArithmetic => {
            sign_fill(ctx, Register::Edx);
            move_reg(ctx, Register::Eax, Register::Edx);
        }
    }

    ctx.place_label(end);
}

/// Conditional jump to `target` when `edx:eax <kind> ecx:ebx`, falling through otherwise.
///
/// High words are compared first. Equality needs both halves to agree. An ordering
/// test is decided by the high words unless they're equal, in which case the low
/// words decide as unsigned values.
pub fn emit_branch_if(ctx: &mut LoweringContext, node: &IlNode, kind: JumpKind, target: LabelKey) {
    let compare_high = AsmOp::Cmp {
        lhs: Register::Edx.into(),
        rhs: Register::Ecx.into(),
    };
    let compare_low = AsmOp::Cmp {
        lhs: Register::Eax.into(),
        rhs: Register::Ebx.into(),
    };

    match kind {
        JumpKind::Always => ctx.jump(JumpKind::Always, target),
        JumpKind::Equal => {
            let skip = ctx.new_label(node, LabelTag::Skip);
            ctx.emit(compare_high);
            ctx.jump(JumpKind::NotEqual, skip);
            ctx.emit(compare_low);
            ctx.jump(JumpKind::Equal, target);
            ctx.place_label(skip);
        }
        JumpKind::NotEqual => {
            ctx.emit(compare_high);
            ctx.jump(JumpKind::NotEqual, target);
            ctx.emit(compare_low);
            ctx.jump(JumpKind::NotEqual, target);
        }
        ordering => {
            let skip = ctx.new_label(node, LabelTag::Skip);
            ctx.emit(compare_high);
            ctx.jump(ordering.strict(), target);
            ctx.jump(JumpKind::NotEqual, skip);
            ctx.emit(compare_low);
            ctx.jump(ordering.unsigned(), target);
            ctx.place_label(skip);
        }
    }
}

pub fn move_reg(ctx: &mut LoweringContext, dst: Register, src: Register) {
    ctx.emit(AsmOp::Mov {
        dst: dst.into(),
        src: src.into(),
    });
}

pub fn clear(ctx: &mut LoweringContext, register: Register) {
    ctx.emit(AsmOp::Xor {
        dst: register.into(),
        src: register.into(),
    });
}

/// Replaces `register` with 0 or -1 by its own sign bit
pub fn sign_fill(ctx: &mut LoweringContext, register: Register) {
    ctx.emit(AsmOp::Sar {
        dst: register.into(),
        count: Operand::Imm(31),
    });
}
