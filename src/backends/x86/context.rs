//! Lowering Context
//!
//! Everything one method compilation mutates lives here and nowhere else. The
//! catalogue and target config are borrowed read-only, so any number of contexts
//! can run side by side on different threads.

use crate::backends::x86::asm::{AsmFunction, AsmOp, JumpKind, LabelKey, LabelTag, Operand};
use crate::backends::x86::frame::Frame;
use crate::backends::x86::stack::{EvalStack, StackItem};
use crate::compiler_messages::compiler_errors::{CompilerError, ErrorLocation};
use crate::il::metadata::{MetadataCatalogue, MethodInfo};
use crate::il::nodes::{IlNode, MethodBody};
use crate::settings::{IL_TO_ASM_RATIO, TargetConfig};
use crate::{return_compiler_error, return_stack_shape_error, stack_log};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

pub struct LoweringContext<'a> {
    pub method: &'a MethodInfo,
    pub catalogue: &'a MetadataCatalogue,
    pub config: &'a TargetConfig,

    /// The Instruction Node Stream, addressable by position or byte offset
    pub body: MethodBody,

    pub frame: Frame,

    /// The stack of the instruction currently being processed
    pub stack: EvalStack,

    /// Stack on entry to each node, filled in by preprocessing.
    /// `None` means no edge into the node has been seen yet.
    pub entry_stacks: Vec<Option<EvalStack>>,

    pub asm: AsmFunction,

    /// Symbols outside this method the emitted code refers to
    pub external_symbols: BTreeSet<String>,

    /// Next free discriminator for each internal label, so repeated checks in one
    /// instruction get distinct keys
    label_counters: FxHashMap<(usize, LabelTag), u32>,
}

impl<'a> LoweringContext<'a> {
    pub fn new(
        method: &'a MethodInfo,
        body: MethodBody,
        catalogue: &'a MetadataCatalogue,
        config: &'a TargetConfig,
    ) -> Result<LoweringContext<'a>, CompilerError> {
        let frame = Frame::build(method, catalogue)?;
        let node_count = body.len();

        let mut asm = AsmFunction::new(&method.symbol);
        asm.ops.reserve(node_count * IL_TO_ASM_RATIO);

        Ok(LoweringContext {
            method,
            catalogue,
            config,
            body,
            frame,
            stack: EvalStack::new(),
            entry_stacks: vec![None; node_count],
            asm,
            external_symbols: BTreeSet::new(),
            label_counters: FxHashMap::default(),
        })
    }

    // =========================================================================
    // Evaluation stack
    // =========================================================================

    pub fn pop(&mut self, node: &IlNode) -> Result<StackItem, CompilerError> {
        let item = self.stack.pop(&node.location())?;
        stack_log!(format!("[Stack] {} pop {} -> {}", node.op, item, self.stack));
        Ok(item)
    }

    pub fn push(&mut self, item: StackItem) {
        self.stack.push(item);
        stack_log!(format!("[Stack] push -> {}", self.stack));
    }

    /// Records the current stack as the entry stack of `target`, or checks it
    /// against the one already recorded there.
    pub fn fork_to(&mut self, target: usize, node: &IlNode) -> Result<(), CompilerError> {
        let Some(slot) = self.entry_stacks.get_mut(target) else {
            return_compiler_error!(
                format!("Fork to node {target} outside the method body"),
                node.location()
            );
        };

        self.body.nodes[target].label_required = true;

        match slot {
            None => {
                *slot = Some(self.stack.to_owned());
                Ok(())
            }
            Some(existing) if existing.same_shape(&self.stack) => Ok(()),
            Some(existing) => {
                return_stack_shape_error!(
                    format!(
                        "Inconsistent stack at merge into IL_{:04x}: {} recorded, {} incoming",
                        self.body.nodes[target].offset, existing, self.stack
                    ),
                    node.location(),
                    { CompilationStage => "Preprocessing" }
                )
            }
        }
    }

    // =========================================================================
    // Emission
    // =========================================================================

    pub fn emit(&mut self, op: AsmOp) {
        self.asm.emit(op);
    }

    pub fn jump(&mut self, kind: JumpKind, target: LabelKey) {
        self.asm.emit(AsmOp::Jmp { kind, target });
    }

    pub fn place_label(&mut self, key: LabelKey) {
        self.asm.emit(AsmOp::Label(key));
    }

    /// A fresh internal label key for `node`. Each call with the same tag gets a new discriminator.
    pub fn new_label(&mut self, node: &IlNode, tag: LabelTag) -> LabelKey {
        let counter = self.label_counters.entry((node.position, tag)).or_insert(0);
        let key = LabelKey::internal(node.position, tag).nth(*counter);
        *counter += 1;
        key
    }

    /// Calls a symbol outside this method and records the reference for the linker
    pub fn call_symbol(&mut self, symbol: &str) {
        self.reference_symbol(symbol);
        self.asm.emit(AsmOp::Call(Operand::symbol(symbol)));
    }

    pub fn reference_symbol(&mut self, symbol: &str) {
        if !self.external_symbols.contains(symbol) {
            self.external_symbols.insert(symbol.to_owned());
        }
    }

    pub fn comments_enabled(&self) -> bool {
        self.config.codegen.emit_comments
    }

    pub fn location(&self, node: &IlNode) -> ErrorLocation {
        ErrorLocation {
            method: self.method.symbol.to_owned(),
            ..node.location()
        }
    }
}
