//! Frame layout
//!
//! ```text
//!   [ebp + 8 + ...]   arg 0 (pushed first by the caller)
//!   ...
//!   [ebp + 8]         last arg
//!   [ebp + 4]         return address
//!   [ebp]             caller's ebp
//!   [ebp - 4 ...]     local 0, local 1, ...
//! ```
//!
//! Arguments are pushed in declaration order, so the last one sits closest to the
//! return address. Every slot is a whole number of words, and a multi-word slot
//! keeps its low word at the lowest address, same as a value pushed high-then-low.

use crate::backends::x86::asm::{AsmOp, Operand, Register, Width};
use crate::backends::x86::context::LoweringContext;
use crate::backends::x86::multiword;
use crate::backends::x86::stack::StackItem;
use crate::compiler_messages::compiler_errors::{CompilerError, ErrorLocation};
use crate::il::metadata::{MetadataCatalogue, MethodInfo, TypeInfo, round_to_word};
use crate::return_metadata_error;

#[derive(Debug, Clone)]
pub struct FrameSlot {
    /// Displacement from ebp of the slot's lowest address
    pub disp: i32,

    pub item: StackItem,

    /// Bytes the declared type really occupies. Less than 4 for small integers.
    pub storage_size: u32,

    pub is_signed: bool,
}

impl FrameSlot {
    fn for_type(ty: &TypeInfo, disp: i32) -> FrameSlot {
        FrameSlot {
            disp,
            item: StackItem::from_type(ty),
            storage_size: ty.storage_size(),
            is_signed: ty.is_signed,
        }
    }

    pub fn address(&self) -> Operand {
        Operand::mem(Register::Ebp, self.disp)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub args: Vec<FrameSlot>,
    pub locals: Vec<FrameSlot>,

    /// Bytes of locals below ebp
    pub locals_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Arg,
    Local,
}

impl Frame {
    pub fn build(method: &MethodInfo, catalogue: &MetadataCatalogue) -> Result<Frame, CompilerError> {
        let location = ErrorLocation::method(method.symbol.to_owned());

        let arg_types = catalogue.argument_types(method, &location)?;
        let mut args = Vec::with_capacity(arg_types.len());
        let mut above = 0;
        for ty in arg_types.iter().rev() {
            args.push(FrameSlot::for_type(ty, 8 + above as i32));
            above += ty.stack_size();
        }
        args.reverse();

        let mut locals = Vec::with_capacity(method.locals.len());
        let mut below = 0;
        for ty in catalogue.local_types(method, &location)? {
            below += round_to_word(ty.storage_size().max(ty.stack_size()));
            locals.push(FrameSlot::for_type(ty, -(below as i32)));
        }

        Ok(Frame {
            args,
            locals,
            locals_size: below,
        })
    }

    pub fn slot(&self, kind: SlotKind, index: u16, location: &ErrorLocation) -> Result<&FrameSlot, CompilerError> {
        let slots = match kind {
            SlotKind::Arg => &self.args,
            SlotKind::Local => &self.locals,
        };

        match slots.get(index as usize) {
            Some(slot) => Ok(slot),
            None => return_metadata_error!(
                format!(
                    "{} {index} doesn't exist, the method declares {}",
                    match kind {
                        SlotKind::Arg => "Argument",
                        SlotKind::Local => "Local",
                    },
                    slots.len()
                ),
                location.to_owned()
            ),
        }
    }
}

/// `push ebp; mov ebp, esp` and zero-initialised locals
pub fn emit_prologue(ctx: &mut LoweringContext) {
    ctx.emit(AsmOp::Push(Register::Ebp.into()));
    ctx.emit(AsmOp::Mov {
        dst: Register::Ebp.into(),
        src: Register::Esp.into(),
    });

    for _ in 0..ctx.frame.locals_size / 4 {
        ctx.emit(AsmOp::Push(Operand::Imm(0)));
    }
}

pub fn emit_epilogue(ctx: &mut LoweringContext) {
    ctx.emit(AsmOp::Mov {
        dst: Register::Esp.into(),
        src: Register::Ebp.into(),
    });
    ctx.emit(AsmOp::Pop(Register::Ebp.into()));
    ctx.emit(AsmOp::Ret);
}

/// Pushes a copy of an argument or local
pub fn load_slot(ctx: &mut LoweringContext, slot: &FrameSlot) {
    if slot.storage_size < 4 {
        multiword::load_small(ctx, Register::Eax, slot.address(), slot.storage_size, slot.is_signed);
        ctx.emit(AsmOp::Push(Register::Eax.into()));
    } else {
        multiword::push_from_memory(ctx, slot.address(), slot.item.size_bytes);
    }
}

/// Pops the top of the stack into an argument or local
pub fn store_slot(ctx: &mut LoweringContext, slot: &FrameSlot) {
    if slot.storage_size < 4 {
        ctx.emit(AsmOp::Pop(Register::Eax.into()));
        multiword::store_small(ctx, slot.address(), Register::Eax, slot.storage_size);
    } else {
        multiword::pop_to_memory(ctx, slot.address(), slot.item.size_bytes);
    }
}

pub fn push_slot_address(ctx: &mut LoweringContext, slot: &FrameSlot) {
    ctx.emit(AsmOp::Lea {
        dst: Register::Eax,
        src: slot.address(),
    });
    ctx.emit(AsmOp::Push(Register::Eax.into()));
}

/// Zero fills `size` bytes starting at the address in `base`
pub fn zero_memory(ctx: &mut LoweringContext, base: Register, size: u32) {
    let mut offset = 0;
    while offset < size {
        let width = match size - offset {
            1 => Width::Byte,
            2 | 3 => Width::Word,
            _ => Width::Dword,
        };
        ctx.emit(AsmOp::Mov {
            dst: Operand::mem_width(base, offset as i32, width),
            src: Operand::Imm(0),
        });
        offset += width.bytes();
    }
}
