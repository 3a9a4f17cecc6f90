//! Calls, constructors and returns
//!
//! Arguments are already on the machine stack in declaration order when a call
//! instruction is reached, receiver first. The caller reclaims them with one
//! `add esp, n` after the call returns, then pushes the result from `eax` or `edx:eax`.

use crate::backends::x86::asm::{AsmOp, JumpKind, LabelTag, Operand, Register};
use crate::backends::x86::context::LoweringContext;
use crate::backends::x86::frame;
use crate::backends::x86::handlers::reject_float;
use crate::backends::x86::multiword;
use crate::backends::x86::safety::{self, RuntimeFailure};
use crate::backends::x86::stack::StackItem;
use crate::compiler_messages::compiler_errors::CompilerError;
use crate::il::metadata::MethodInfo;
use crate::il::nodes::IlNode;
use crate::{codegen_log, return_stack_shape_error, return_unsupported_error};

fn resolve_method(ctx: &LoweringContext, node: &IlNode) -> Result<MethodInfo, CompilerError> {
    let token = node.token()?;
    Ok(ctx
        .catalogue
        .method_for_token(token, &node.location())?
        .to_owned())
}

/// Pops one descriptor per argument slot, last argument first, checking each against
/// the declared type. Returns the bytes of machine stack they occupy.
fn pop_arguments(
    ctx: &mut LoweringContext,
    node: &IlNode,
    method: &MethodInfo,
    include_receiver: bool,
) -> Result<u32, CompilerError> {
    let location = node.location();
    let mut arg_types = ctx.catalogue.argument_types(method, &location)?;
    if !include_receiver && method.has_receiver() && !arg_types.is_empty() {
        arg_types.remove(0);
    }

    let expected: Vec<StackItem> = arg_types.iter().map(|ty| StackItem::from_type(ty)).collect();
    let mut bytes = 0;
    for expected in expected.iter().rev() {
        let found = ctx.pop(node)?;
        if found.size_bytes != expected.size_bytes {
            return_stack_shape_error!(
                format!(
                    "Argument to '{}' is {} bytes on the stack but declared as {} bytes",
                    method.symbol, found.size_bytes, expected.size_bytes
                ),
                location,
                { CompilationStage => "Call Lowering" }
            );
        }
        bytes += found.size_bytes;
    }

    Ok(bytes)
}

fn return_item(ctx: &LoweringContext, node: &IlNode, method: &MethodInfo) -> Result<Option<StackItem>, CompilerError> {
    Ok(ctx
        .catalogue
        .return_type(method, &node.location())?
        .map(StackItem::from_type))
}

/// Pushes `eax` or `edx:eax` as the result of a call
fn push_return_value(ctx: &mut LoweringContext, node: &IlNode, item: Option<StackItem>) -> Result<(), CompilerError> {
    let Some(item) = item else {
        return Ok(());
    };

    match item.size_bytes {
        4 => ctx.emit(AsmOp::Push(Register::Eax.into())),
        8 => multiword::push_result(ctx),
        size => return_unsupported_error!(
            format!("Returning a {size} byte value type by value"),
            node.location(),
            { PrimarySuggestion => "Only 4 and 8 byte return values fit the return registers" }
        ),
    }

    ctx.push(item);
    Ok(())
}

pub fn infer_call(ctx: &mut LoweringContext, node: &IlNode) -> Result<(), CompilerError> {
    let method = resolve_method(ctx, node)?;
    pop_arguments(ctx, node, &method, true)?;
    if let Some(item) = return_item(ctx, node, &method)? {
        ctx.push(item);
    }
    Ok(())
}

pub fn emit_call(ctx: &mut LoweringContext, node: &IlNode) -> Result<(), CompilerError> {
    let method = resolve_method(ctx, node)?;
    let argument_bytes = pop_arguments(ctx, node, &method, true)?;
    let result = return_item(ctx, node, &method)?;
    check_return_width(node, result.as_ref())?;

    codegen_log!(format!("[Codegen] call {} ({} argument bytes)", method.symbol, argument_bytes));
    safety::emit_runtime_call(ctx, &method.symbol, argument_bytes);
    push_return_value(ctx, node, result)
}

fn check_return_width(node: &IlNode, item: Option<&StackItem>) -> Result<(), CompilerError> {
    if let Some(item) = item {
        reject_float(item, node)?;
        if item.size_bytes > 8 {
            return_unsupported_error!(
                format!("Returning a {} byte value type by value", item.size_bytes),
                node.location()
            );
        }
    }
    Ok(())
}

/// Receiver null check, then one of three dispatch paths:
///
/// * delegate `Invoke`: call through the function pointer stored in the delegate,
///   with the delegate's bound target replacing the delegate as the receiver
/// * non-virtual method: direct call, `callvirt` is only there for the null check
/// * virtual method: scan the receiver type's method table chain for the method id
pub fn emit_callvirt(ctx: &mut LoweringContext, node: &IlNode) -> Result<(), CompilerError> {
    let method = resolve_method(ctx, node)?;
    if !method.has_receiver() {
        return emit_call(ctx, node);
    }

    let argument_bytes = pop_arguments(ctx, node, &method, true)?;
    let result = return_item(ctx, node, &method)?;
    check_return_width(node, result.as_ref())?;

    // The receiver was pushed first, so it's the deepest argument
    let receiver_offset = argument_bytes as i32 - 4;
    ctx.emit(AsmOp::Mov {
        dst: Register::Eax.into(),
        src: Operand::mem(Register::Esp, receiver_offset),
    });
    safety::emit_null_check(ctx, node, Register::Eax);

    let layout = ctx.config.layout.to_owned();
    if method.is_delegate_invoke {
        ctx.emit(AsmOp::Mov {
            dst: Register::Ecx.into(),
            src: Operand::mem(Register::Eax, layout.delegate_target_offset),
        });
        ctx.emit(AsmOp::Mov {
            dst: Operand::mem(Register::Esp, receiver_offset),
            src: Register::Ecx.into(),
        });
        ctx.emit(AsmOp::Call(Operand::mem(Register::Eax, layout.delegate_method_offset)));
    } else if method.is_virtual {
        emit_method_table_scan(ctx, node, &method);
        ctx.emit(AsmOp::Call(Operand::mem(
            Register::Eax,
            layout.method_table_address_offset,
        )));
    } else {
        ctx.call_symbol(&method.symbol);
    }

    multiword::discard(ctx, argument_bytes);
    push_return_value(ctx, node, result)
}

/// Leaves the matching method table entry in eax.
///
/// ```text
///     mov eax, [eax + type]         ; type descriptor
///     mov eax, [eax + method_table]
/// .Loop:
///     mov ebx, [eax + id]
///     cmp ebx, <method id>
///     je  .Found
///     cmp ebx, 0
///     jne .Next
///     mov eax, [eax + address]      ; end of table, parent's table
///     cmp eax, 0
///     jne .Loop
///     <null reference failure>
/// .Next:
///     add eax, <entry size>
///     jmp .Loop
/// .Found:
/// ```
fn emit_method_table_scan(ctx: &mut LoweringContext, node: &IlNode, method: &MethodInfo) {
    let layout = ctx.config.layout.to_owned();
    let scan = ctx.new_label(node, LabelTag::Loop);
    let next = ctx.new_label(node, LabelTag::Next);
    let found = ctx.new_label(node, LabelTag::Found);

    ctx.emit(AsmOp::Mov {
        dst: Register::Eax.into(),
        src: Operand::mem(Register::Eax, layout.object_type_offset),
    });
    ctx.emit(AsmOp::Mov {
        dst: Register::Eax.into(),
        src: Operand::mem(Register::Eax, layout.type_method_table_offset),
    });

    ctx.place_label(scan);
    ctx.emit(AsmOp::Mov {
        dst: Register::Ebx.into(),
        src: Operand::mem(Register::Eax, layout.method_table_id_offset),
    });
    ctx.emit(AsmOp::Cmp {
        lhs: Register::Ebx.into(),
        rhs: Operand::Imm(method.method_table_id as i32),
    });
    ctx.jump(JumpKind::Equal, found);
    ctx.emit(AsmOp::Cmp {
        lhs: Register::Ebx.into(),
        rhs: Operand::Imm(0),
    });
    ctx.jump(JumpKind::NotEqual, next);
    ctx.emit(AsmOp::Mov {
        dst: Register::Eax.into(),
        src: Operand::mem(Register::Eax, layout.method_table_address_offset),
    });
    ctx.emit(AsmOp::Cmp {
        lhs: Register::Eax.into(),
        rhs: Operand::Imm(0),
    });
    ctx.jump(JumpKind::NotEqual, scan);

    // Every reachable type implements what it's called with, so running off the
    // end of the chain means the receiver wasn't a real object
    safety::emit_failure(ctx, RuntimeFailure::NullReference);

    ctx.place_label(next);
    ctx.emit(AsmOp::Add {
        dst: Register::Eax.into(),
        src: Operand::Imm(layout.method_table_entry_size),
    });
    ctx.jump(JumpKind::Always, scan);
    ctx.place_label(found);
}

pub fn infer_newobj(ctx: &mut LoweringContext, node: &IlNode) -> Result<(), CompilerError> {
    let method = resolve_method(ctx, node)?;
    pop_arguments(ctx, node, &method, false)?;
    ctx.push(StackItem::new_object_ref());
    Ok(())
}

/// ```text
///     push <type descriptor>
///     call alloc_object
///     add  esp, 4
///     <allocation check>
///     sub  esp, 4                   ; shift constructor arguments down one slot
///     mov  ebx, [esp + 4 + i]
///     mov  [esp + i], ebx           ; ...for each argument word
///     mov  [esp + n], eax           ; new object is the implicit first argument
///     call <ctor>
///     add  esp, n                   ; the receiver slot stays as the result
/// ```
pub fn emit_newobj(ctx: &mut LoweringContext, node: &IlNode) -> Result<(), CompilerError> {
    let method = resolve_method(ctx, node)?;
    let location = node.location();

    let type_name = method.declaring_type.to_owned().unwrap_or_default();
    let ty = ctx.catalogue.type_named(&type_name, &location)?.to_owned();
    if !ty.is_gc_managed() {
        return_unsupported_error!(
            format!("newobj of value type '{}'", ty.name),
            location,
            { PrimarySuggestion => "Value types are constructed with initobj and a call on their address" }
        );
    }

    let argument_bytes = pop_arguments(ctx, node, &method, false)?;

    ctx.reference_symbol(&ty.symbol);
    ctx.emit(AsmOp::Push(Operand::symbol(&ty.symbol)));
    let alloc = ctx.config.runtime.alloc_object.to_owned();
    safety::emit_runtime_call(ctx, &alloc, 4);
    safety::emit_allocation_check(ctx, node);

    ctx.emit(AsmOp::Sub {
        dst: Register::Esp.into(),
        src: Operand::Imm(4),
    });
    for word in 0..(argument_bytes / 4) as i32 {
        ctx.emit(AsmOp::Mov {
            dst: Register::Ebx.into(),
            src: Operand::mem(Register::Esp, 4 + word * 4),
        });
        ctx.emit(AsmOp::Mov {
            dst: Operand::mem(Register::Esp, word * 4),
            src: Register::Ebx.into(),
        });
    }
    ctx.emit(AsmOp::Mov {
        dst: Operand::mem(Register::Esp, argument_bytes as i32),
        src: Register::Eax.into(),
    });

    safety::emit_runtime_call(ctx, &method.symbol, argument_bytes);

    ctx.push(StackItem::new_object_ref());
    Ok(())
}

pub fn infer_ret(ctx: &mut LoweringContext, node: &IlNode) -> Result<(), CompilerError> {
    pop_return_value(ctx, node)?;
    Ok(())
}

fn pop_return_value(ctx: &mut LoweringContext, node: &IlNode) -> Result<Option<StackItem>, CompilerError> {
    let method = ctx.method;
    let returned = match return_item(ctx, node, method)? {
        Some(expected) => {
            let found = ctx.pop(node)?;
            if found.size_bytes != expected.size_bytes {
                return_stack_shape_error!(
                    format!(
                        "ret with a {} byte value from a method returning {} bytes",
                        found.size_bytes, expected.size_bytes
                    ),
                    node.location()
                );
            }
            Some(found)
        }
        None => None,
    };

    if !ctx.stack.is_empty() {
        return_stack_shape_error!(
            format!("ret with {} values left on the evaluation stack", ctx.stack.depth()),
            node.location()
        );
    }

    Ok(returned)
}

pub fn emit_ret(ctx: &mut LoweringContext, node: &IlNode) -> Result<(), CompilerError> {
    let returned = pop_return_value(ctx, node)?;
    check_return_width(node, returned.as_ref())?;

    match returned.map(|item| item.size_bytes) {
        Some(4) => ctx.emit(AsmOp::Pop(Register::Eax.into())),
        Some(_) => multiword::pop_pair(ctx, Register::Eax, Register::Edx),
        None => {}
    }

    frame::emit_epilogue(ctx);
    Ok(())
}

pub fn infer_ldftn(ctx: &mut LoweringContext, node: &IlNode) -> Result<(), CompilerError> {
    resolve_method(ctx, node)?;
    ctx.push(StackItem::native_ptr());
    Ok(())
}

pub fn emit_ldftn(ctx: &mut LoweringContext, node: &IlNode) -> Result<(), CompilerError> {
    let method = resolve_method(ctx, node)?;
    ctx.reference_symbol(&method.symbol);
    ctx.emit(AsmOp::Push(Operand::symbol(&method.symbol)));
    ctx.push(StackItem::native_ptr());
    Ok(())
}
