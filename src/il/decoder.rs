use crate::compiler_messages::compiler_errors::{CompilerError, ErrorLocation};
use crate::il::nodes::{IlNode, MethodBody};
use crate::il::opcodes::{OpCode, OperandKind, TWO_BYTE_PREFIX};
use crate::{preprocess_log, return_decode_error};

/// Turns a raw method body into the linked Instruction Node Stream.
pub fn decode_method_body(bytes: &[u8]) -> Result<MethodBody, CompilerError> {
    let mut reader = BytecodeReader::new(bytes);
    let mut nodes = Vec::new();

    while !reader.at_end() {
        let node = reader.next_node()?;
        preprocess_log!(format!("[Decode] IL_{:04x} {}", node.offset, node.op));
        nodes.push(node);
    }

    MethodBody::new(nodes)
}

struct BytecodeReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> BytecodeReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        BytecodeReader { bytes, position: 0 }
    }

    fn at_end(&self) -> bool {
        self.position >= self.bytes.len()
    }

    fn offset(&self) -> u32 {
        self.position as u32
    }

    fn take(&mut self, count: usize, start: u32) -> Result<&'a [u8], CompilerError> {
        let end = self.position + count;
        if end > self.bytes.len() {
            return_decode_error!(
                format!(
                    "Method body ends {} bytes into an instruction that needs {} more",
                    self.bytes.len() - self.position,
                    count
                ),
                ErrorLocation {
                    offset: Some(start),
                    ..ErrorLocation::default()
                }
            );
        }

        let slice = &self.bytes[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn read_opcode(&mut self, start: u32) -> Result<OpCode, CompilerError> {
        let first = self.take(1, start)?[0];
        let code = if first == TWO_BYTE_PREFIX {
            0xFE00 | self.take(1, start)?[0] as u16
        } else {
            first as u16
        };

        match OpCode::from_code(code) {
            Some(op) => Ok(op),
            None => return_decode_error!(
                format!("Unknown opcode 0x{code:02x}"),
                ErrorLocation {
                    offset: Some(start),
                    ..ErrorLocation::default()
                }
            ),
        }
    }

    fn next_node(&mut self) -> Result<IlNode, CompilerError> {
        let start = self.offset();
        let op = self.read_opcode(start)?;

        let operand = match op.operand_kind() {
            OperandKind::Switch => {
                let count_bytes = self.take(4, start)?;
                let count = u32::from_le_bytes([
                    count_bytes[0],
                    count_bytes[1],
                    count_bytes[2],
                    count_bytes[3],
                ]) as usize;

                let mut operand = count_bytes.to_vec();
                operand.extend_from_slice(self.take(count * 4, start)?);
                operand
            }
            kind => {
                let size = kind.fixed_size().unwrap_or(0) as usize;
                self.take(size, start)?.to_vec()
            }
        };

        Ok(IlNode::new(op, operand, start))
    }
}
