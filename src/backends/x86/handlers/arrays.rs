use crate::backends::x86::asm::{AsmOp, Operand, Register};
use crate::backends::x86::context::LoweringContext;
use crate::backends::x86::handlers::{expect_word, reject_float};
use crate::backends::x86::multiword;
use crate::backends::x86::safety;
use crate::backends::x86::stack::StackItem;
use crate::compiler_messages::compiler_errors::CompilerError;
use crate::il::nodes::IlNode;
use crate::{return_stack_shape_error, return_unsupported_error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayOp {
    New,
    Length,
    Address,
    Load(ElementKind),
    Store(ElementKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
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

    /// `ldelem`/`stelem` with the element type in the token operand
    Token,
}

/// Memory layout of one element as the instruction sees it
#[derive(Debug, Clone)]
struct Element {
    memory_size: u32,
    is_signed: bool,
    item: StackItem,
}

fn element(ctx: &LoweringContext, node: &IlNode, kind: ElementKind) -> Result<Element, CompilerError> {
    let (memory_size, is_signed, item) = match kind {
        ElementKind::I1 => (1, true, StackItem::int32()),
        ElementKind::U1 => (1, false, StackItem::int32()),
        ElementKind::I2 => (2, true, StackItem::int32()),
        ElementKind::U2 => (2, false, StackItem::int32()),
        ElementKind::I4 | ElementKind::NativeInt => (4, true, StackItem::int32()),
        ElementKind::U4 => (4, false, StackItem::int32()),
        ElementKind::I8 => (8, true, StackItem::int64()),
        ElementKind::R4 => (4, true, StackItem::float(4)),
        ElementKind::R8 => (8, true, StackItem::float(8)),
        ElementKind::Ref => (4, false, StackItem::object_ref()),
        ElementKind::Token => {
            let ty = ctx.catalogue.type_for_token(node.token()?, &node.location())?;
            (ty.storage_size(), ty.is_signed, StackItem::from_type(ty))
        }
    };

    Ok(Element {
        memory_size,
        is_signed,
        item,
    })
}

/// The element type of `ldelema` and `newarr` always comes from the token
fn token_element(ctx: &LoweringContext, node: &IlNode) -> Result<Element, CompilerError> {
    element(ctx, node, ElementKind::Token)
}

fn expect_index(index: &StackItem, node: &IlNode) -> Result<(), CompilerError> {
    if index.size_bytes != 4 {
        return_stack_shape_error!(
            format!("Array index for '{}' must be a 4 byte integer, found {index}", node.op),
            node.location(),
            { ExpectedSize => "4" }
        );
    }
    Ok(())
}

fn reject_float_element(node: &IlNode, kind: ElementKind, element: &Element) -> Result<(), CompilerError> {
    if matches!(kind, ElementKind::R4 | ElementKind::R8) || element.item.is_float {
        return_unsupported_error!(
            format!("'{}' on a floating point array", node.op),
            node.location(),
            { OpCode => node.op.mnemonic() }
        );
    }
    Ok(())
}

fn check_store_value(node: &IlNode, value: &StackItem, element: &Element) -> Result<(), CompilerError> {
    if value.size_bytes != element.item.size_bytes {
        return_stack_shape_error!(
            format!(
                "Storing a {} byte value into an array of {} byte elements",
                value.size_bytes, element.item.size_bytes
            ),
            node.location()
        );
    }
    Ok(())
}

pub fn infer(ctx: &mut LoweringContext, node: &IlNode, op: ArrayOp) -> Result<(), CompilerError> {
    match op {
        ArrayOp::New => {
            let count = ctx.pop(node)?;
            expect_word(&count, node)?;
            ctx.push(StackItem::new_object_ref());
        }
        ArrayOp::Length => {
            ctx.pop(node)?;
            ctx.push(StackItem::int32());
        }
        ArrayOp::Address => {
            let index = ctx.pop(node)?;
            expect_index(&index, node)?;
            ctx.pop(node)?;
            ctx.push(StackItem::native_ptr());
        }
        ArrayOp::Load(kind) => {
            let element = element(ctx, node, kind)?;
            let index = ctx.pop(node)?;
            expect_index(&index, node)?;
            ctx.pop(node)?;
            ctx.push(element.item);
        }
        ArrayOp::Store(kind) => {
            let element = element(ctx, node, kind)?;
            let value = ctx.pop(node)?;
            check_store_value(node, &value, &element)?;
            let index = ctx.pop(node)?;
            expect_index(&index, node)?;
            ctx.pop(node)?;
        }
    }
    Ok(())
}

pub fn emit(ctx: &mut LoweringContext, node: &IlNode, op: ArrayOp) -> Result<(), CompilerError> {
    match op {
        ArrayOp::New => emit_new(ctx, node),

        ArrayOp::Length => {
            ctx.pop(node)?;
            ctx.emit(AsmOp::Pop(Register::Eax.into()));
            safety::emit_null_check(ctx, node, Register::Eax);
            let length_offset = ctx.config.layout.array_length_offset;
            ctx.emit(AsmOp::Mov {
                dst: Register::Eax.into(),
                src: Operand::mem(Register::Eax, length_offset),
            });
            ctx.emit(AsmOp::Push(Register::Eax.into()));
            ctx.push(StackItem::int32());
            Ok(())
        }

        ArrayOp::Address => {
            let element = token_element(ctx, node)?;
            let index = ctx.pop(node)?;
            expect_index(&index, node)?;
            ctx.pop(node)?;

            ctx.emit(AsmOp::Pop(Register::Ecx.into()));
            ctx.emit(AsmOp::Pop(Register::Eax.into()));
            safety::emit_array_checks(ctx, node, Register::Eax, Register::Ecx);
            safety::emit_element_address(ctx, Register::Eax, Register::Ecx, element.memory_size);
            ctx.emit(AsmOp::Push(Register::Ecx.into()));
            ctx.push(StackItem::native_ptr());
            Ok(())
        }

        ArrayOp::Load(kind) => {
            let element = element(ctx, node, kind)?;
            reject_float_element(node, kind, &element)?;
            let index = ctx.pop(node)?;
            reject_float(&index, node)?;
            expect_index(&index, node)?;
            ctx.pop(node)?;

            ctx.emit(AsmOp::Pop(Register::Ecx.into()));
            ctx.emit(AsmOp::Pop(Register::Eax.into()));
            safety::emit_array_checks(ctx, node, Register::Eax, Register::Ecx);
            safety::emit_element_address(ctx, Register::Eax, Register::Ecx, element.memory_size);
            multiword::push_value(ctx, Register::Ecx, 0, element.memory_size, element.is_signed);
            ctx.push(element.item);
            Ok(())
        }

        ArrayOp::Store(kind) => {
            let element = element(ctx, node, kind)?;
            reject_float_element(node, kind, &element)?;
            let value = ctx.pop(node)?;
            check_store_value(node, &value, &element)?;
            let index = ctx.pop(node)?;
            reject_float(&index, node)?;
            expect_index(&index, node)?;
            ctx.pop(node)?;

            // Array and index sit under the value, which stays put until the address is known
            let value_bytes = value.size_bytes as i32;
            ctx.emit(AsmOp::Mov {
                dst: Register::Ecx.into(),
                src: Operand::mem(Register::Esp, value_bytes),
            });
            ctx.emit(AsmOp::Mov {
                dst: Register::Eax.into(),
                src: Operand::mem(Register::Esp, value_bytes + 4),
            });
            safety::emit_array_checks(ctx, node, Register::Eax, Register::Ecx);
            safety::emit_element_address(ctx, Register::Eax, Register::Ecx, element.memory_size);
            multiword::pop_value(ctx, Register::Ecx, 0, element.memory_size);
            multiword::discard(ctx, 8);
            Ok(())
        }
    }
}

/// `newarr T`: `alloc_array(element type, count)`. The count is already in eax when the type goes on.
fn emit_new(ctx: &mut LoweringContext, node: &IlNode) -> Result<(), CompilerError> {
    let element_type = ctx
        .catalogue
        .type_for_token(node.token()?, &node.location())?
        .symbol
        .to_owned();

    let count = ctx.pop(node)?;
    reject_float(&count, node)?;
    expect_word(&count, node)?;

    ctx.emit(AsmOp::Pop(Register::Eax.into()));
    ctx.reference_symbol(&element_type);
    ctx.emit(AsmOp::Push(Operand::Symbol(element_type)));
    ctx.emit(AsmOp::Push(Register::Eax.into()));

    let alloc_array = ctx.config.runtime.alloc_array.to_owned();
    safety::emit_runtime_call(ctx, &alloc_array, 8);
    safety::emit_allocation_check(ctx, node);

    ctx.emit(AsmOp::Push(Register::Eax.into()));
    ctx.push(StackItem::new_object_ref());
    Ok(())
}
