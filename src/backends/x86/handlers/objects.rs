//! Indirect loads and stores, value-type copies, boxing and type tests.
//!
//! Everything here goes through an address or reference on the stack, which is
//! null checked before it's dereferenced.

use crate::backends::x86::asm::{AsmOp, JumpKind, LabelTag, Operand, Register};
use crate::backends::x86::context::LoweringContext;
use crate::backends::x86::frame;
use crate::backends::x86::handlers::{expect_word, reject_float};
use crate::backends::x86::multiword;
use crate::backends::x86::safety::{self, RuntimeFailure};
use crate::backends::x86::stack::StackItem;
use crate::compiler_messages::compiler_errors::CompilerError;
use crate::il::metadata::TypeInfo;
use crate::il::nodes::IlNode;
use crate::{return_stack_shape_error, return_unsupported_error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndirectOp {
    Load(MemKind),
    Store(MemKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemKind {
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    NativeInt,
    R4,
    R8,
    Ref,
}

impl MemKind {
    fn memory_size(self) -> u32 {
        match self {
            MemKind::I1 | MemKind::U1 => 1,
            MemKind::I2 | MemKind::U2 => 2,
            MemKind::I4 | MemKind::U4 | MemKind::NativeInt | MemKind::R4 | MemKind::Ref => 4,
            MemKind::I8 | MemKind::R8 => 8,
        }
    }

    fn is_signed(self) -> bool {
        matches!(self, MemKind::I1 | MemKind::I2 | MemKind::I4 | MemKind::NativeInt | MemKind::I8)
    }

    fn item(self) -> StackItem {
        match self {
            MemKind::I8 => StackItem::int64(),
            MemKind::R4 => StackItem::float(4),
            MemKind::R8 => StackItem::float(8),
            MemKind::Ref => StackItem::object_ref(),
            _ => StackItem::int32(),
        }
    }

    fn is_float(self) -> bool {
        matches!(self, MemKind::R4 | MemKind::R8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectOp {
    Load,
    Store,
    Init,
    SizeOf,
    Box,
    Unbox,
    UnboxAny,
    IsInstance,
    CastClass,
}

fn token_type(ctx: &LoweringContext, node: &IlNode) -> Result<TypeInfo, CompilerError> {
    Ok(ctx
        .catalogue
        .type_for_token(node.token()?, &node.location())?
        .to_owned())
}

fn expect_value_size(node: &IlNode, value: &StackItem, expected: u32) -> Result<(), CompilerError> {
    if value.size_bytes != expected {
        return_stack_shape_error!(
            format!(
                "'{}' stores {} bytes but found a {} byte value",
                node.op, expected, value.size_bytes
            ),
            node.location()
        );
    }
    Ok(())
}

// ============================================================================
// ldind / stind
// ============================================================================

pub fn infer_indirect(ctx: &mut LoweringContext, node: &IlNode, op: IndirectOp) -> Result<(), CompilerError> {
    match op {
        IndirectOp::Load(kind) => {
            let address = ctx.pop(node)?;
            expect_word(&address, node)?;
            ctx.push(kind.item());
        }
        IndirectOp::Store(kind) => {
            let value = ctx.pop(node)?;
            expect_value_size(node, &value, kind.item().size_bytes)?;
            let address = ctx.pop(node)?;
            expect_word(&address, node)?;
        }
    }
    Ok(())
}

pub fn emit_indirect(ctx: &mut LoweringContext, node: &IlNode, op: IndirectOp) -> Result<(), CompilerError> {
    let kind = match op {
        IndirectOp::Load(kind) | IndirectOp::Store(kind) => kind,
    };
    if kind.is_float() {
        return_unsupported_error!(
            format!("'{}' moves a floating point value", node.op),
            node.location(),
            { OpCode => node.op.mnemonic() }
        );
    }

    match op {
        IndirectOp::Load(kind) => {
            let address = ctx.pop(node)?;
            expect_word(&address, node)?;
            ctx.emit(AsmOp::Pop(Register::Eax.into()));
            safety::emit_null_check(ctx, node, Register::Eax);
            multiword::push_value(ctx, Register::Eax, 0, kind.memory_size(), kind.is_signed());
            ctx.push(kind.item());
        }
        IndirectOp::Store(kind) => {
            let value = ctx.pop(node)?;
            reject_float(&value, node)?;
            expect_value_size(node, &value, kind.item().size_bytes)?;
            let address = ctx.pop(node)?;
            expect_word(&address, node)?;
            store_through_address(ctx, node, &value, kind.memory_size());
        }
    }
    Ok(())
}

/// Value on top, destination address beneath it. Both are gone afterwards.
fn store_through_address(ctx: &mut LoweringContext, node: &IlNode, value: &StackItem, memory_size: u32) {
    ctx.emit(AsmOp::Mov {
        dst: Register::Eax.into(),
        src: Operand::mem(Register::Esp, value.size_bytes as i32),
    });
    safety::emit_null_check(ctx, node, Register::Eax);
    multiword::pop_value(ctx, Register::Eax, 0, memory_size);
    multiword::discard(ctx, 4);
}

// ============================================================================
// Value types, boxing and type tests
// ============================================================================

pub fn infer(ctx: &mut LoweringContext, node: &IlNode, op: ObjectOp) -> Result<(), CompilerError> {
    let ty = token_type(ctx, node)?;
    match op {
        ObjectOp::Load => {
            let address = ctx.pop(node)?;
            expect_word(&address, node)?;
            ctx.push(StackItem::from_type(&ty));
        }
        ObjectOp::Store => {
            let value = ctx.pop(node)?;
            expect_value_size(node, &value, ty.stack_size())?;
            let address = ctx.pop(node)?;
            expect_word(&address, node)?;
        }
        ObjectOp::Init => {
            let address = ctx.pop(node)?;
            expect_word(&address, node)?;
        }
        ObjectOp::SizeOf => ctx.push(StackItem::int32()),
        ObjectOp::Box => {
            let value = ctx.pop(node)?;
            expect_value_size(node, &value, ty.stack_size())?;
            if ty.is_gc_managed() {
                ctx.push(value);
            } else {
                ctx.push(StackItem::new_object_ref());
            }
        }
        ObjectOp::Unbox => {
            let reference = ctx.pop(node)?;
            expect_word(&reference, node)?;
            ctx.push(StackItem::native_ptr());
        }
        ObjectOp::UnboxAny => {
            let reference = ctx.pop(node)?;
            expect_word(&reference, node)?;
            ctx.push(StackItem::from_type(&ty));
        }
        ObjectOp::IsInstance | ObjectOp::CastClass => {
            let reference = ctx.pop(node)?;
            expect_word(&reference, node)?;
            ctx.push(StackItem::object_ref());
        }
    }
    Ok(())
}

pub fn emit(ctx: &mut LoweringContext, node: &IlNode, op: ObjectOp) -> Result<(), CompilerError> {
    let ty = token_type(ctx, node)?;
    match op {
        ObjectOp::Load => {
            let address = ctx.pop(node)?;
            expect_word(&address, node)?;
            ctx.emit(AsmOp::Pop(Register::Eax.into()));
            safety::emit_null_check(ctx, node, Register::Eax);
            multiword::push_value(ctx, Register::Eax, 0, ty.storage_size(), ty.is_signed);
            ctx.push(StackItem::from_type(&ty));
        }

        ObjectOp::Store => {
            let value = ctx.pop(node)?;
            expect_value_size(node, &value, ty.stack_size())?;
            let address = ctx.pop(node)?;
            expect_word(&address, node)?;
            store_through_address(ctx, node, &value, ty.storage_size());
        }

        ObjectOp::Init => {
            let address = ctx.pop(node)?;
            expect_word(&address, node)?;
            ctx.emit(AsmOp::Pop(Register::Eax.into()));
            safety::emit_null_check(ctx, node, Register::Eax);
            frame::zero_memory(ctx, Register::Eax, ty.storage_size());
        }

        ObjectOp::SizeOf => {
            ctx.emit(AsmOp::Push(Operand::Imm(ty.storage_size() as i32)));
            ctx.push(StackItem::int32());
        }

        ObjectOp::Box => emit_box(ctx, node, &ty)?,

        ObjectOp::Unbox => {
            let reference = ctx.pop(node)?;
            expect_word(&reference, node)?;
            ctx.emit(AsmOp::Pop(Register::Eax.into()));
            safety::emit_null_check(ctx, node, Register::Eax);
            let header = ctx.config.layout.object_header_size;
            ctx.emit(AsmOp::Add {
                dst: Register::Eax.into(),
                src: Operand::Imm(header),
            });
            ctx.emit(AsmOp::Push(Register::Eax.into()));
            ctx.push(StackItem::native_ptr());
        }

        ObjectOp::UnboxAny if ty.is_gc_managed() => emit_type_test(ctx, node, &ty, true)?,
        ObjectOp::UnboxAny => {
            let reference = ctx.pop(node)?;
            expect_word(&reference, node)?;
            ctx.emit(AsmOp::Pop(Register::Eax.into()));
            safety::emit_null_check(ctx, node, Register::Eax);
            let header = ctx.config.layout.object_header_size;
            multiword::push_value(ctx, Register::Eax, header, ty.storage_size(), ty.is_signed);
            ctx.push(StackItem::from_type(&ty));
        }

        ObjectOp::IsInstance => emit_type_test(ctx, node, &ty, false)?,
        ObjectOp::CastClass => emit_type_test(ctx, node, &ty, true)?,
    }
    Ok(())
}

/// Boxing a reference type leaves the reference alone.
/// A value type is copied from the stack into a fresh object after its header.
fn emit_box(ctx: &mut LoweringContext, node: &IlNode, ty: &TypeInfo) -> Result<(), CompilerError> {
    let value = ctx.pop(node)?;
    expect_value_size(node, &value, ty.stack_size())?;

    if ty.is_gc_managed() {
        ctx.push(value);
        return Ok(());
    }

    if value.is_float {
        return_unsupported_error!(
            format!("Boxing floating point type '{}'", ty.name),
            node.location(),
            { OpCode => node.op.mnemonic() }
        );
    }

    ctx.reference_symbol(&ty.symbol);
    ctx.emit(AsmOp::Push(Operand::symbol(&ty.symbol)));
    let alloc_object = ctx.config.runtime.alloc_object.to_owned();
    safety::emit_runtime_call(ctx, &alloc_object, 4);
    safety::emit_allocation_check(ctx, node);

    let header = ctx.config.layout.object_header_size;
    multiword::pop_value(ctx, Register::Eax, header, ty.storage_size());
    ctx.emit(AsmOp::Push(Register::Eax.into()));
    ctx.push(StackItem::new_object_ref());
    Ok(())
}

/// `isinst`/`castclass`: walks the parent chain of the object's type looking for
/// the exact type metadata symbol of `ty`.
///
/// ```text
///     pop eax
///     cmp eax, 0          ; null passes every test unchanged
///     je Match
///     mov ebx, [eax + type]
/// Loop:
///     cmp ebx, T
///     je Match
///     mov ebx, [ebx + base]
///     cmp ebx, 0
///     jne Loop
///     <failure>           ; isinst: eax = null, castclass: invalid cast
/// Match:
///     push eax
/// ```
fn emit_type_test(ctx: &mut LoweringContext, node: &IlNode, ty: &TypeInfo, throws: bool) -> Result<(), CompilerError> {
    let reference = ctx.pop(node)?;
    expect_word(&reference, node)?;

    let matched = ctx.new_label(node, LabelTag::Match);
    let walk = ctx.new_label(node, LabelTag::Loop);
    let layout = &ctx.config.layout;
    let (type_offset, base_offset) = (layout.object_type_offset, layout.type_base_offset);

    ctx.emit(AsmOp::Pop(Register::Eax.into()));
    ctx.emit(AsmOp::Cmp {
        lhs: Register::Eax.into(),
        rhs: Operand::Imm(0),
    });
    ctx.jump(JumpKind::Equal, matched);
    ctx.emit(AsmOp::Mov {
        dst: Register::Ebx.into(),
        src: Operand::mem(Register::Eax, type_offset),
    });

    ctx.place_label(walk);
    ctx.reference_symbol(&ty.symbol);
    ctx.emit(AsmOp::Cmp {
        lhs: Register::Ebx.into(),
        rhs: Operand::symbol(&ty.symbol),
    });
    ctx.jump(JumpKind::Equal, matched);
    ctx.emit(AsmOp::Mov {
        dst: Register::Ebx.into(),
        src: Operand::mem(Register::Ebx, base_offset),
    });
    ctx.emit(AsmOp::Cmp {
        lhs: Register::Ebx.into(),
        rhs: Operand::Imm(0),
    });
    ctx.jump(JumpKind::NotEqual, walk);

    if throws {
        safety::emit_failure(ctx, RuntimeFailure::InvalidCast);
    } else {
        multiword::clear(ctx, Register::Eax);
    }

    ctx.place_label(matched);
    ctx.emit(AsmOp::Push(Register::Eax.into()));
    ctx.push(StackItem::object_ref());
    Ok(())
}
