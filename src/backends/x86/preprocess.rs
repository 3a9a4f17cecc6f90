//! Preprocessing pass
//!
//! Walks the node stream once in program order running every handler's
//! `infer_stack_effect`. Afterwards every reachable node has the evaluation stack it
//! starts with recorded in `entry_stacks`, and every branch target is marked as
//! needing a label. Nothing is emitted.
//!
//! Exception handler blocks are never reached by a branch or by falling through.
//! The runtime jumps to them, so their entry stacks are seeded from the method's
//! clauses before the walk: a catch or filter block starts with the exception
//! reference pushed, a finally or fault block starts empty.

use crate::backends::x86::context::LoweringContext;
use crate::backends::x86::handlers::Handler;
use crate::backends::x86::stack::{EvalStack, StackItem};
use crate::compiler_messages::compiler_errors::{CompilerError, ErrorLocation};
use crate::{preprocess_log, return_metadata_error, return_stack_shape_error};

pub fn run(ctx: &mut LoweringContext) -> Result<(), CompilerError> {
    if ctx.body.is_empty() {
        return Ok(());
    }

    ctx.entry_stacks[0] = Some(EvalStack::new());
    seed_handler_entries(ctx)?;
    ctx.stack = EvalStack::new();
    let mut falls_in = true;

    for position in 0..ctx.body.len() {
        let node = ctx.body.nodes[position].to_owned();

        // A fallthrough edge meets whatever a branch already recorded here
        match ctx.entry_stacks[position].to_owned() {
            Some(recorded) => {
                if falls_in && !recorded.same_shape(&ctx.stack) {
                    return_stack_shape_error!(
                        format!(
                            "Inconsistent stack at merge into IL_{:04x}: {} recorded, {} falling through",
                            node.offset, recorded, ctx.stack
                        ),
                        ctx.location(&node),
                        { CompilationStage => "Preprocessing" }
                    );
                }
                ctx.stack = recorded;
            }
            None => {
                // Unreachable code after an unconditional jump starts empty
                if !falls_in {
                    ctx.stack.clear();
                }
                ctx.entry_stacks[position] = Some(ctx.stack.to_owned());
            }
        }

        preprocess_log!(format!("[Preprocess] IL_{:04x} {} entry {}", node.offset, node.op, ctx.stack));

        let handler = Handler::for_node(&node)?;
        handler.infer_stack_effect(ctx, &node)?;

        falls_in = node.falls_through;
        if !falls_in {
            ctx.stack.clear();
        }
    }

    Ok(())
}

fn seed_handler_entries(ctx: &mut LoweringContext) -> Result<(), CompilerError> {
    let clauses = ctx.method.handlers.to_owned();

    for clause in &clauses {
        let mut exception = EvalStack::new();
        exception.push(StackItem::object_ref());

        let entries = clause
            .exception_entries()
            .into_iter()
            .map(|offset| (offset, exception.to_owned()))
            .chain(
                clause
                    .empty_entries()
                    .into_iter()
                    .map(|offset| (offset, EvalStack::new())),
            );

        for (offset, stack) in entries {
            let Some(position) = ctx.body.index_of_offset(offset) else {
                return_metadata_error!(
                    format!(
                        "{:?} handler at IL_{offset:04x} is not the start of an instruction",
                        clause.kind
                    ),
                    ErrorLocation::method(ctx.method.symbol.to_owned())
                );
            };

            match &ctx.entry_stacks[position] {
                Some(existing) if !existing.same_shape(&stack) => {
                    return_stack_shape_error!(
                        format!(
                            "Handler entry IL_{offset:04x} is entered with {existing} and {stack}"
                        ),
                        ErrorLocation::method(ctx.method.symbol.to_owned()),
                        { CompilationStage => "Preprocessing" }
                    );
                }
                _ => {}
            }

            preprocess_log!(format!("[Preprocess] IL_{offset:04x} handler entry {stack}"));
            ctx.entry_stacks[position] = Some(stack);
            ctx.body.nodes[position].label_required = true;
        }
    }

    Ok(())
}
