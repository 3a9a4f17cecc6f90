//! Operand Descriptors and the Virtual Evaluation Stack
//!
//! The stack never holds values, only the shape of what the generated code will
//! have pushed onto the machine stack at that point. Every slot is a whole number
//! of 4-byte words. An 8-byte value is pushed high word first so `[esp]` is the
//! low word and `[esp + 4]` the high word.

use crate::compiler_messages::compiler_errors::{CompilerError, ErrorLocation};
use crate::il::metadata::TypeInfo;
use crate::return_stack_shape_error;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackItem {
    pub size_bytes: u32,
    pub is_float: bool,
    pub is_gc_managed: bool,
    pub is_value_type: bool,

    /// Set only on the reference produced by an allocation, until it's consumed
    pub is_freshly_allocated: bool,
}

impl StackItem {
    pub fn int32() -> StackItem {
        StackItem {
            size_bytes: 4,
            is_float: false,
            is_gc_managed: false,
            is_value_type: true,
            is_freshly_allocated: false,
        }
    }

    pub fn int64() -> StackItem {
        StackItem {
            size_bytes: 8,
            ..StackItem::int32()
        }
    }

    /// Unmanaged pointer or managed address (ldloca, ldflda, ldelema)
    pub fn native_ptr() -> StackItem {
        StackItem::int32()
    }

    pub fn object_ref() -> StackItem {
        StackItem {
            size_bytes: 4,
            is_float: false,
            is_gc_managed: true,
            is_value_type: false,
            is_freshly_allocated: false,
        }
    }

    pub fn new_object_ref() -> StackItem {
        StackItem {
            is_freshly_allocated: true,
            ..StackItem::object_ref()
        }
    }

    pub fn float(size_bytes: u32) -> StackItem {
        StackItem {
            size_bytes,
            is_float: true,
            ..StackItem::int32()
        }
    }

    /// A struct of `size_bytes`, rounded up to whole words
    pub fn value_struct(size_bytes: u32) -> StackItem {
        StackItem {
            size_bytes: size_bytes.div_ceil(4).max(1) * 4,
            ..StackItem::int32()
        }
    }

    pub fn from_type(ty: &TypeInfo) -> StackItem {
        StackItem {
            size_bytes: ty.stack_size(),
            is_float: ty.is_float,
            is_gc_managed: ty.is_gc_managed(),
            is_value_type: ty.is_value_type(),
            is_freshly_allocated: false,
        }
    }

    /// Depth, size and flags agree. Fresh allocation is bookkeeping, not shape.
    pub fn same_shape(&self, other: &StackItem) -> bool {
        self.size_bytes == other.size_bytes
            && self.is_float == other.is_float
            && self.is_gc_managed == other.is_gc_managed
            && self.is_value_type == other.is_value_type
    }

    pub fn words(&self) -> u32 {
        self.size_bytes / 4
    }
}

impl fmt::Display for StackItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_float {
            "float"
        } else if self.is_gc_managed {
            "ref"
        } else if self.size_bytes > 8 {
            "struct"
        } else {
            "int"
        };

        write!(f, "{kind}{}", self.size_bytes * 8)?;
        if self.is_freshly_allocated {
            write!(f, "*")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvalStack {
    items: Vec<StackItem>,
}

impl EvalStack {
    pub fn new() -> EvalStack {
        EvalStack { items: Vec::new() }
    }

    pub fn push(&mut self, item: StackItem) {
        self.items.push(item);
    }

    pub fn pop(&mut self, location: &ErrorLocation) -> Result<StackItem, CompilerError> {
        match self.items.pop() {
            Some(item) => Ok(item),
            None => return_stack_shape_error!(
                "Evaluation stack underflow",
                location.to_owned(),
                { StackDepth => "0" }
            ),
        }
    }

    /// Slot `depth` below the top. `peek(0)` is the top.
    pub fn peek(&self, depth: usize) -> Option<&StackItem> {
        self.items.iter().rev().nth(depth)
    }

    pub fn depth(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Bytes of machine stack the live slots occupy
    pub fn total_bytes(&self) -> u32 {
        self.items.iter().map(|item| item.size_bytes).sum()
    }

    pub fn same_shape(&self, other: &EvalStack) -> bool {
        self.items.len() == other.items.len()
            && self
                .items
                .iter()
                .zip(&other.items)
                .all(|(a, b)| a.same_shape(b))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Bottom to top
    pub fn items(&self) -> &[StackItem] {
        &self.items
    }
}

impl fmt::Display for EvalStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{item}")?;
        }
        write!(f, "]")
    }
}
