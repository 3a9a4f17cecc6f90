//! Instruction Node Stream
//!
//! One `IlNode` per decoded instruction, held in a flat arena (`MethodBody`).
//! Nodes never own each other. Control flow edges are stored as arena indices
//! in `branch_targets`, computed once by `MethodBody::link` so that the passes
//! never have to re-decode displacements to find a successor.

use crate::compiler_messages::compiler_errors::{CompilerError, ErrorLocation};
use crate::il::opcodes::{OpCode, OperandKind};
use crate::return_decode_error;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IlNode {
    pub op: OpCode,

    /// Raw little-endian operand bytes exactly as they appeared in the bytecode
    pub operand: Vec<u8>,

    /// Index of this node in the method's arena
    pub position: usize,

    /// Byte offset of the opcode in the method body
    pub offset: u32,

    /// Byte offset of the following instruction. Branch displacements are relative to this.
    pub next_offset: u32,

    pub label_required: bool,

    /// Arena indices of every non-fallthrough successor, in operand order
    pub branch_targets: Vec<usize>,

    pub falls_through: bool,
}

impl IlNode {
    pub fn new(op: OpCode, operand: Vec<u8>, offset: u32) -> IlNode {
        let next_offset = offset + op.encoded_len() + operand.len() as u32;
        IlNode {
            op,
            operand,
            position: 0,
            offset,
            next_offset,
            label_required: false,
            branch_targets: Vec::new(),
            falls_through: !op.ends_flow(),
        }
    }

    pub fn location(&self) -> ErrorLocation {
        ErrorLocation::instruction(self.offset, self.op)
    }

    fn operand_bytes<const N: usize>(&self) -> Result<[u8; N], CompilerError> {
        match self.operand.get(..N).and_then(|bytes| bytes.try_into().ok()) {
            Some(bytes) => Ok(bytes),
            None => return_decode_error!(
                format!(
                    "'{}' needs {} operand bytes but only {} were decoded",
                    self.op,
                    N,
                    self.operand.len()
                ),
                self.location()
            ),
        }
    }

    pub fn operand_i8(&self) -> Result<i8, CompilerError> {
        Ok(i8::from_le_bytes(self.operand_bytes::<1>()?))
    }

    pub fn operand_u8(&self) -> Result<u8, CompilerError> {
        Ok(self.operand_bytes::<1>()?[0])
    }

    pub fn operand_u16(&self) -> Result<u16, CompilerError> {
        Ok(u16::from_le_bytes(self.operand_bytes::<2>()?))
    }

    pub fn operand_i32(&self) -> Result<i32, CompilerError> {
        Ok(i32::from_le_bytes(self.operand_bytes::<4>()?))
    }

    pub fn operand_i64(&self) -> Result<i64, CompilerError> {
        Ok(i64::from_le_bytes(self.operand_bytes::<8>()?))
    }

    /// Metadata token operand
    pub fn token(&self) -> Result<u32, CompilerError> {
        Ok(u32::from_le_bytes(self.operand_bytes::<4>()?))
    }

    /// Argument or local index operand, whichever width the opcode encodes it in.
    pub fn variable_index(&self) -> Result<u16, CompilerError> {
        match self.op.operand_kind() {
            OperandKind::ShortVar => Ok(self.operand_u8()? as u16),
            OperandKind::Var => self.operand_u16(),
            _ => return_decode_error!(
                format!("'{}' does not carry a variable index", self.op),
                self.location()
            ),
        }
    }

    /// Branch displacements relative to `next_offset`, one per target.
    pub fn branch_displacements(&self) -> Result<Vec<i64>, CompilerError> {
        match self.op.operand_kind() {
            OperandKind::ShortI8 => Ok(vec![self.operand_i8()? as i64]),
            OperandKind::I32 => Ok(vec![self.operand_i32()? as i64]),
            OperandKind::Switch => {
                let count = u32::from_le_bytes(self.operand_bytes::<4>()?) as usize;
                let table = &self.operand[4..];
                if table.len() != count * 4 {
                    return_decode_error!(
                        format!(
                            "switch declares {} cases but carries {} displacement bytes",
                            count,
                            table.len()
                        ),
                        self.location()
                    );
                }

                Ok(table
                    .chunks_exact(4)
                    .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as i64)
                    .collect())
            }
            _ => Ok(Vec::new()),
        }
    }

    /// The first (for switch: the only non-case) branch target, for single-target branches.
    pub fn branch_target(&self) -> Option<usize> {
        self.branch_targets.first().copied()
    }

    pub fn is_zero_distance_branch(&self, body: &MethodBody) -> bool {
        match self.branch_target() {
            Some(target) => body.nodes[target].offset == self.next_offset,
            None => false,
        }
    }
}

/// The arena of instruction nodes for one method body.
#[derive(Debug, Clone, Default)]
pub struct MethodBody {
    pub nodes: Vec<IlNode>,
    index_by_offset: FxHashMap<u32, usize>,
}

impl MethodBody {
    /// Takes decoded nodes in program order, assigns positions and links the control flow edges.
    pub fn new(mut nodes: Vec<IlNode>) -> Result<MethodBody, CompilerError> {
        let mut index_by_offset = FxHashMap::default();
        for (position, node) in nodes.iter_mut().enumerate() {
            node.position = position;
            index_by_offset.insert(node.offset, position);
        }

        let mut body = MethodBody {
            nodes,
            index_by_offset,
        };
        body.link()?;
        Ok(body)
    }

    /// Convenience for building a body from opcodes and operands, offsets computed in order.
    pub fn from_instructions(
        instructions: Vec<(OpCode, Vec<u8>)>,
    ) -> Result<MethodBody, CompilerError> {
        let mut offset = 0;
        let mut nodes = Vec::with_capacity(instructions.len());
        for (op, operand) in instructions {
            let node = IlNode::new(op, operand, offset);
            offset = node.next_offset;
            nodes.push(node);
        }

        MethodBody::new(nodes)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn index_of_offset(&self, offset: u32) -> Option<usize> {
        self.index_by_offset.get(&offset).copied()
    }

    fn link(&mut self) -> Result<(), CompilerError> {
        for position in 0..self.nodes.len() {
            let node = &self.nodes[position];
            if !node.op.is_branch() {
                continue;
            }

            let mut targets = Vec::new();
            for displacement in node.branch_displacements()? {
                let target_offset = node.next_offset as i64 + displacement;
                let target = u32::try_from(target_offset)
                    .ok()
                    .and_then(|offset| self.index_of_offset(offset));

                match target {
                    Some(index) => targets.push(index),
                    None => return_decode_error!(
                        format!(
                            "Branch target IL_{:04x} is not the start of an instruction",
                            target_offset
                        ),
                        node.location()
                    ),
                }
            }

            self.nodes[position].branch_targets = targets;
        }

        Ok(())
    }
}
