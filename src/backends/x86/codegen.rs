//! Code generation pass
//!
//! Second walk over the node stream. Each node starts from the entry stack
//! preprocessing recorded for it, gets its label if anything jumps to it, then its
//! handler emits. The finished IR has its labels checked before it's handed out.

use crate::backends::x86::asm::{AsmOp, LabelKey};
use crate::backends::x86::context::LoweringContext;
use crate::backends::x86::frame;
use crate::backends::x86::handlers::Handler;
use crate::compiler_messages::compiler_errors::CompilerError;
use crate::{codegen_log, return_compiler_error};

pub fn run(ctx: &mut LoweringContext) -> Result<(), CompilerError> {
    frame::emit_prologue(ctx);

    for position in 0..ctx.body.len() {
        let node = ctx.body.nodes[position].to_owned();

        let Some(entry) = ctx.entry_stacks[position].to_owned() else {
            return_compiler_error!(
                format!("IL_{:04x} was never reached by preprocessing", node.offset),
                ctx.location(&node);
                { CompilationStage => "Code Generation" }
            );
        };
        ctx.stack = entry;

        if node.label_required {
            ctx.place_label(LabelKey::node(position));
        }
        if ctx.comments_enabled() {
            ctx.emit(AsmOp::Comment(format!("IL_{:04x}: {}", node.offset, node.op)));
        }

        codegen_log!(format!("[Codegen] IL_{:04x} {} with {}", node.offset, node.op, ctx.stack));

        let handler = Handler::for_node(&node)?;
        handler.emit(ctx, &node)?;
    }

    ctx.asm.validate_labels()
}
