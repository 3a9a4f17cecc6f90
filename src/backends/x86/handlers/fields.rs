use crate::backends::x86::asm::{AsmOp, Operand, Register};
use crate::backends::x86::context::LoweringContext;
use crate::backends::x86::handlers::expect_word;
use crate::backends::x86::multiword;
use crate::backends::x86::safety;
use crate::backends::x86::stack::StackItem;
use crate::compiler_messages::compiler_errors::CompilerError;
use crate::il::metadata::{FieldInfo, TypeInfo};
use crate::il::nodes::IlNode;
use crate::return_stack_shape_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    Load,
    Store,
    Address,
}

struct ResolvedField {
    field: FieldInfo,
    ty: TypeInfo,
}

fn resolve(ctx: &LoweringContext, node: &IlNode) -> Result<ResolvedField, CompilerError> {
    let location = node.location();
    let field = ctx
        .catalogue
        .field_for_token(node.token()?, &location)?
        .to_owned();
    let ty = ctx.catalogue.type_named(&field.field_type, &location)?.to_owned();
    Ok(ResolvedField { field, ty })
}

/// Where the field area starts relative to what's on the stack.
/// References point at the object header, addresses point at the fields themselves.
fn field_base(ctx: &LoweringContext, holder: &StackItem) -> i32 {
    if holder.is_gc_managed {
        ctx.config.layout.object_header_size
    } else {
        0
    }
}

fn check_store_value(node: &IlNode, value: &StackItem, ty: &TypeInfo) -> Result<(), CompilerError> {
    if value.size_bytes != ty.stack_size() {
        return_stack_shape_error!(
            format!(
                "Storing a {} byte value into a field of type '{}' ({} bytes)",
                value.size_bytes,
                ty.name,
                ty.stack_size()
            ),
            node.location()
        );
    }
    Ok(())
}

pub fn infer_instance(ctx: &mut LoweringContext, node: &IlNode, op: FieldOp) -> Result<(), CompilerError> {
    let resolved = resolve(ctx, node)?;
    match op {
        FieldOp::Load => {
            ctx.pop(node)?;
            ctx.push(StackItem::from_type(&resolved.ty));
        }
        FieldOp::Address => {
            let holder = ctx.pop(node)?;
            expect_word(&holder, node)?;
            ctx.push(StackItem::native_ptr());
        }
        FieldOp::Store => {
            let value = ctx.pop(node)?;
            check_store_value(node, &value, &resolved.ty)?;
            let holder = ctx.pop(node)?;
            expect_word(&holder, node)?;
        }
    }
    Ok(())
}

pub fn emit_instance(ctx: &mut LoweringContext, node: &IlNode, op: FieldOp) -> Result<(), CompilerError> {
    let resolved = resolve(ctx, node)?;
    let memory_size = resolved.ty.storage_size();
    let field_offset = resolved.field.offset as i32;

    match op {
        FieldOp::Load => {
            let holder = ctx.pop(node)?;
            let loaded = StackItem::from_type(&resolved.ty);

            if holder.size_bytes == 4 {
                ctx.emit(AsmOp::Pop(Register::Eax.into()));
                safety::emit_null_check(ctx, node, Register::Eax);
                let disp = field_base(ctx, &holder) + field_offset;
                multiword::push_value(ctx, Register::Eax, disp, memory_size, resolved.ty.is_signed);
            } else {
                load_from_struct_on_stack(ctx, &holder, field_offset, &resolved.ty, &loaded);
            }

            ctx.push(loaded);
        }

        FieldOp::Address => {
            let holder = ctx.pop(node)?;
            expect_word(&holder, node)?;
            ctx.emit(AsmOp::Pop(Register::Eax.into()));
            safety::emit_null_check(ctx, node, Register::Eax);
            ctx.emit(AsmOp::Lea {
                dst: Register::Eax,
                src: Operand::mem(Register::Eax, field_base(ctx, &holder) + field_offset),
            });
            ctx.emit(AsmOp::Push(Register::Eax.into()));
            ctx.push(StackItem::native_ptr());
        }

        FieldOp::Store => {
            let value = ctx.pop(node)?;
            check_store_value(node, &value, &resolved.ty)?;
            let holder = ctx.pop(node)?;
            expect_word(&holder, node)?;

            ctx.emit(AsmOp::Mov {
                dst: Register::Eax.into(),
                src: Operand::mem(Register::Esp, value.size_bytes as i32),
            });
            safety::emit_null_check(ctx, node, Register::Eax);
            let disp = field_base(ctx, &holder) + field_offset;
            multiword::pop_value(ctx, Register::Eax, disp, memory_size);
            multiword::discard(ctx, 4);
        }
    }
    Ok(())
}

/// `ldfld` straight off a struct value on the stack.
///
/// The field is pushed on top of the struct, copied down over it word by word
/// starting with the highest, then the rest of the struct is dropped.
fn load_from_struct_on_stack(
    ctx: &mut LoweringContext,
    holder: &StackItem,
    field_offset: i32,
    ty: &TypeInfo,
    loaded: &StackItem,
) {
    ctx.emit(AsmOp::Mov {
        dst: Register::Eax.into(),
        src: Register::Esp.into(),
    });
    multiword::push_value(ctx, Register::Eax, field_offset, ty.storage_size(), ty.is_signed);

    let holder_size = holder.size_bytes as i32;
    for word in (0..loaded.words() as i32).rev() {
        ctx.emit(AsmOp::Mov {
            dst: Register::Ebx.into(),
            src: Operand::mem(Register::Esp, word * 4),
        });
        ctx.emit(AsmOp::Mov {
            dst: Operand::mem(Register::Esp, holder_size + word * 4),
            src: Register::Ebx.into(),
        });
    }
    multiword::discard(ctx, holder.size_bytes);
}

pub fn infer_static(ctx: &mut LoweringContext, node: &IlNode, op: FieldOp) -> Result<(), CompilerError> {
    let resolved = resolve(ctx, node)?;
    match op {
        FieldOp::Load => ctx.push(StackItem::from_type(&resolved.ty)),
        FieldOp::Address => ctx.push(StackItem::native_ptr()),
        FieldOp::Store => {
            let value = ctx.pop(node)?;
            check_store_value(node, &value, &resolved.ty)?;
        }
    }
    Ok(())
}

/// Static fields live at `[symbol + offset]`, with the symbol's address loaded into eax first
pub fn emit_static(ctx: &mut LoweringContext, node: &IlNode, op: FieldOp) -> Result<(), CompilerError> {
    let resolved = resolve(ctx, node)?;
    let symbol = resolved.field.symbol.to_owned();
    let offset = resolved.field.offset as i32;
    let memory_size = resolved.ty.storage_size();

    ctx.reference_symbol(&symbol);
    ctx.emit(AsmOp::Mov {
        dst: Register::Eax.into(),
        src: Operand::Symbol(symbol),
    });

    match op {
        FieldOp::Load => {
            multiword::push_value(ctx, Register::Eax, offset, memory_size, resolved.ty.is_signed);
            ctx.push(StackItem::from_type(&resolved.ty));
        }
        FieldOp::Address => {
            if offset != 0 {
                ctx.emit(AsmOp::Add {
                    dst: Register::Eax.into(),
                    src: Operand::Imm(offset),
                });
            }
            ctx.emit(AsmOp::Push(Register::Eax.into()));
            ctx.push(StackItem::native_ptr());
        }
        FieldOp::Store => {
            let value = ctx.pop(node)?;
            check_store_value(node, &value, &resolved.ty)?;
            multiword::pop_value(ctx, Register::Eax, offset, memory_size);
        }
    }
    Ok(())
}
