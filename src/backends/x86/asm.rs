//! Target Instruction IR
//!
//! A deliberately small slice of 32-bit x86 in Intel operand order (`dst, src`).
//! Code generation appends to an `AsmFunction` and never rewrites what it has
//! already emitted. Rendering produces a NASM-flavoured listing where every label
//! is local to the method symbol.

use crate::compiler_messages::compiler_errors::{CompilerError, ErrorLocation};
use crate::return_compiler_error;
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Register {
    Eax,
    Ebx,
    Ecx,
    Edx,
    Esi,
    Edi,
    Ebp,
    Esp,

    Ax,
    Bx,
    Cx,
    Dx,

    Al,
    Bl,
    Cl,
    Dl,
}

impl Register {
    pub fn name(self) -> &'static str {
        match self {
            Register::Eax => "eax",
            Register::Ebx => "ebx",
            Register::Ecx => "ecx",
            Register::Edx => "edx",
            Register::Esi => "esi",
            Register::Edi => "edi",
            Register::Ebp => "ebp",
            Register::Esp => "esp",
            Register::Ax => "ax",
            Register::Bx => "bx",
            Register::Cx => "cx",
            Register::Dx => "dx",
            Register::Al => "al",
            Register::Bl => "bl",
            Register::Cl => "cl",
            Register::Dl => "dl",
        }
    }

    /// The low byte of a scratch register. Only eax..edx have one.
    pub fn low_byte(self) -> Option<Register> {
        match self {
            Register::Eax => Some(Register::Al),
            Register::Ebx => Some(Register::Bl),
            Register::Ecx => Some(Register::Cl),
            Register::Edx => Some(Register::Dl),
            _ => None,
        }
    }

    pub fn low_word(self) -> Option<Register> {
        match self {
            Register::Eax => Some(Register::Ax),
            Register::Ebx => Some(Register::Bx),
            Register::Ecx => Some(Register::Cx),
            Register::Edx => Some(Register::Dx),
            _ => None,
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Width {
    Byte,
    Word,
    Dword,
}

impl Width {
    pub fn bytes(self) -> u32 {
        match self {
            Width::Byte => 1,
            Width::Word => 2,
            Width::Dword => 4,
        }
    }
}

impl fmt::Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Width::Byte => "byte",
            Width::Word => "word",
            Width::Dword => "dword",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Reg(Register),
    Imm(i32),

    /// `[base + disp]`
    Mem {
        base: Register,
        disp: i32,
        width: Width,
    },

    /// The address of a symbol as an immediate
    Symbol(String),

    /// The address of a label in the current method as an immediate
    Label(LabelKey),
}

impl Operand {
    pub fn mem(base: Register, disp: i32) -> Operand {
        Operand::Mem {
            base,
            disp,
            width: Width::Dword,
        }
    }

    pub fn mem_width(base: Register, disp: i32, width: Width) -> Operand {
        Operand::Mem { base, disp, width }
    }

    pub fn symbol(symbol: &str) -> Operand {
        Operand::Symbol(symbol.to_owned())
    }

    /// The same addressing with a different access width. Non-memory operands are unchanged.
    pub fn with_width(self, width: Width) -> Operand {
        match self {
            Operand::Mem { base, disp, .. } => Operand::Mem { base, disp, width },
            other => other,
        }
    }

    /// The same addressing moved `bytes` further along
    pub fn offset_by(self, bytes: i32) -> Operand {
        match self {
            Operand::Mem { base, disp, width } => Operand::Mem {
                base,
                disp: disp + bytes,
                width,
            },
            other => other,
        }
    }
}

impl From<Register> for Operand {
    fn from(register: Register) -> Self {
        Operand::Reg(register)
    }
}

impl From<i32> for Operand {
    fn from(value: i32) -> Self {
        Operand::Imm(value)
    }
}

fn write_disp(f: &mut fmt::Formatter<'_>, disp: i32) -> fmt::Result {
    match disp {
        0 => Ok(()),
        d if d < 0 => write!(f, " - {}", -(d as i64)),
        d => write!(f, " + {d}"),
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(register) => write!(f, "{register}"),
            Operand::Imm(value) => write!(f, "{value}"),
            Operand::Mem { base, disp, width } => {
                write!(f, "{width} [{base}")?;
                write_disp(f, *disp)?;
                write!(f, "]")
            }
            Operand::Symbol(symbol) => write!(f, "{symbol}"),
            Operand::Label(key) => write!(f, "{key}"),
        }
    }
}

// ============================================================================
// Labels
// ============================================================================

/// Why an instruction needed an internal label. Closed so two handlers can never
/// invent colliding names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum LabelTag {
    End,
    NotNull,
    Skip,
    True,
    Large,
    Overflow,
    Loop,
    Next,
    Found,
    IndexNotNegative,
    IndexInRange,
    Match,
    Allocated,
}

impl LabelTag {
    pub fn name(self) -> &'static str {
        match self {
            LabelTag::End => "end",
            LabelTag::NotNull => "not_null",
            LabelTag::Skip => "skip",
            LabelTag::True => "true",
            LabelTag::Large => "large",
            LabelTag::Overflow => "overflow",
            LabelTag::Loop => "loop",
            LabelTag::Next => "next",
            LabelTag::Found => "found",
            LabelTag::IndexNotNegative => "index_not_negative",
            LabelTag::IndexInRange => "index_in_range",
            LabelTag::Match => "match",
            LabelTag::Allocated => "allocated",
        }
    }
}

/// `(position, tag)`. Node labels have no tag.
/// `index` tells apart repeated internal labels with the same tag on one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LabelKey {
    pub position: usize,
    pub tag: Option<LabelTag>,
    pub index: u32,
}

impl LabelKey {
    pub fn node(position: usize) -> LabelKey {
        LabelKey {
            position,
            tag: None,
            index: 0,
        }
    }

    pub fn internal(position: usize, tag: LabelTag) -> LabelKey {
        LabelKey {
            position,
            tag: Some(tag),
            index: 0,
        }
    }

    pub fn nth(self, index: u32) -> LabelKey {
        LabelKey { index, ..self }
    }
}

impl fmt::Display for LabelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ".N{}", self.position)?;
        if let Some(tag) = self.tag {
            write!(f, "_{}", tag.name())?;
        }
        if self.index > 0 {
            write!(f, "_{}", self.index)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JumpKind {
    Always,
    Equal,
    NotEqual,

    // Signed
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,

    // Unsigned
    Below,
    BelowOrEqual,
    Above,
    AboveOrEqual,
}

impl JumpKind {
    pub fn mnemonic(self) -> &'static str {
        match self {
            JumpKind::Always => "jmp",
            JumpKind::Equal => "je",
            JumpKind::NotEqual => "jne",
            JumpKind::Less => "jl",
            JumpKind::LessOrEqual => "jle",
            JumpKind::Greater => "jg",
            JumpKind::GreaterOrEqual => "jge",
            JumpKind::Below => "jb",
            JumpKind::BelowOrEqual => "jbe",
            JumpKind::Above => "ja",
            JumpKind::AboveOrEqual => "jae",
        }
    }

    /// The strict form of an ordering test (`jle` -> `jl`), used when comparing high words
    pub fn strict(self) -> JumpKind {
        match self {
            JumpKind::LessOrEqual => JumpKind::Less,
            JumpKind::GreaterOrEqual => JumpKind::Greater,
            JumpKind::BelowOrEqual => JumpKind::Below,
            JumpKind::AboveOrEqual => JumpKind::Above,
            other => other,
        }
    }

    /// The same test on unsigned operands, used for the low word of a 64-bit compare
    pub fn unsigned(self) -> JumpKind {
        match self {
            JumpKind::Less => JumpKind::Below,
            JumpKind::LessOrEqual => JumpKind::BelowOrEqual,
            JumpKind::Greater => JumpKind::Above,
            JumpKind::GreaterOrEqual => JumpKind::AboveOrEqual,
            other => other,
        }
    }
}

// ============================================================================
// Instructions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AsmOp {
    Mov { dst: Operand, src: Operand },
    MovZx { dst: Register, src: Operand },
    MovSx { dst: Register, src: Operand },
    Lea { dst: Register, src: Operand },
    Push(Operand),
    Pop(Operand),

    Add { dst: Operand, src: Operand },
    Adc { dst: Operand, src: Operand },
    Sub { dst: Operand, src: Operand },
    Sbb { dst: Operand, src: Operand },

    /// Unsigned `edx:eax = eax * src`
    Mul(Operand),

    /// Two-operand signed multiply, truncated to 32 bits
    Imul { dst: Register, src: Operand },

    /// Unsigned `eax, edx = edx:eax / src, edx:eax % src`
    Div(Operand),
    Idiv(Operand),

    /// Sign-extend eax into edx
    Cdq,

    Neg(Operand),
    Not(Operand),
    And { dst: Operand, src: Operand },
    Or { dst: Operand, src: Operand },
    Xor { dst: Operand, src: Operand },

    Shl { dst: Operand, count: Operand },
    Shr { dst: Operand, count: Operand },
    Sar { dst: Operand, count: Operand },
    Shld { dst: Operand, src: Register, count: Operand },
    Shrd { dst: Operand, src: Register, count: Operand },

    Cmp { lhs: Operand, rhs: Operand },
    Jmp { kind: JumpKind, target: LabelKey },
    Label(LabelKey),
    Call(Operand),
    Ret,
    Comment(String),
}

impl fmt::Display for AsmOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsmOp::Mov { dst, src } => write!(f, "    mov {dst}, {src}"),
            AsmOp::MovZx { dst, src } => write!(f, "    movzx {dst}, {src}"),
            AsmOp::MovSx { dst, src } => write!(f, "    movsx {dst}, {src}"),
            AsmOp::Lea { dst, src } => match src {
                Operand::Mem { base, disp, .. } => {
                    write!(f, "    lea {dst}, [{base}")?;
                    write_disp(f, *disp)?;
                    write!(f, "]")
                }
                _ => write!(f, "    lea {dst}, {src}"),
            },
            AsmOp::Push(operand) => match operand {
                Operand::Imm(_) | Operand::Symbol(_) | Operand::Label(_) => {
                    write!(f, "    push dword {operand}")
                }
                _ => write!(f, "    push {operand}"),
            },
            AsmOp::Pop(operand) => write!(f, "    pop {operand}"),
            AsmOp::Add { dst, src } => write!(f, "    add {dst}, {src}"),
            AsmOp::Adc { dst, src } => write!(f, "    adc {dst}, {src}"),
            AsmOp::Sub { dst, src } => write!(f, "    sub {dst}, {src}"),
            AsmOp::Sbb { dst, src } => write!(f, "    sbb {dst}, {src}"),
            AsmOp::Mul(src) => write!(f, "    mul {src}"),
            AsmOp::Imul { dst, src } => write!(f, "    imul {dst}, {src}"),
            AsmOp::Div(src) => write!(f, "    div {src}"),
            AsmOp::Idiv(src) => write!(f, "    idiv {src}"),
            AsmOp::Cdq => write!(f, "    cdq"),
            AsmOp::Neg(dst) => write!(f, "    neg {dst}"),
            AsmOp::Not(dst) => write!(f, "    not {dst}"),
            AsmOp::And { dst, src } => write!(f, "    and {dst}, {src}"),
            AsmOp::Or { dst, src } => write!(f, "    or {dst}, {src}"),
            AsmOp::Xor { dst, src } => write!(f, "    xor {dst}, {src}"),
            AsmOp::Shl { dst, count } => write!(f, "    shl {dst}, {count}"),
            AsmOp::Shr { dst, count } => write!(f, "    shr {dst}, {count}"),
            AsmOp::Sar { dst, count } => write!(f, "    sar {dst}, {count}"),
            AsmOp::Shld { dst, src, count } => write!(f, "    shld {dst}, {src}, {count}"),
            AsmOp::Shrd { dst, src, count } => write!(f, "    shrd {dst}, {src}, {count}"),
            AsmOp::Cmp { lhs, rhs } => write!(f, "    cmp {lhs}, {rhs}"),
            AsmOp::Jmp { kind, target } => write!(f, "    {} {target}", kind.mnemonic()),
            AsmOp::Label(key) => write!(f, "{key}:"),
            AsmOp::Call(target) => write!(f, "    call {target}"),
            AsmOp::Ret => write!(f, "    ret"),
            AsmOp::Comment(text) => write!(f, "    ; {text}"),
        }
    }
}

/// The IR emitted for one method
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AsmFunction {
    pub symbol: String,
    pub ops: Vec<AsmOp>,
}

impl AsmFunction {
    pub fn new(symbol: &str) -> AsmFunction {
        AsmFunction {
            symbol: symbol.to_owned(),
            ops: Vec::new(),
        }
    }

    pub fn emit(&mut self, op: AsmOp) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Every label key is emitted once and every jump or label address names an emitted key.
    pub fn validate_labels(&self) -> Result<(), CompilerError> {
        let mut defined = FxHashSet::default();
        for op in &self.ops {
            if let AsmOp::Label(key) = op {
                if !defined.insert(*key) {
                    return_compiler_error!(
                        format!("Label {key} emitted more than once"),
                        ErrorLocation::method(self.symbol.to_owned());
                        { CompilationStage => "Label Validation" }
                    );
                }
            }
        }

        for op in &self.ops {
            for key in referenced_labels(op) {
                if !defined.contains(&key) {
                    return_compiler_error!(
                        format!("Jump to label {key} which was never emitted"),
                        ErrorLocation::method(self.symbol.to_owned());
                        { CompilationStage => "Label Validation" }
                    );
                }
            }
        }

        Ok(())
    }
}

fn referenced_labels(op: &AsmOp) -> Vec<LabelKey> {
    let mut keys = Vec::new();
    let mut collect = |operand: &Operand| {
        if let Operand::Label(key) = operand {
            keys.push(*key);
        }
    };

    match op {
        AsmOp::Jmp { target, .. } => return vec![*target],
        AsmOp::Push(operand) | AsmOp::Call(operand) => collect(operand),
        AsmOp::Mov { dst, src } => {
            collect(dst);
            collect(src);
        }
        _ => {}
    }

    keys
}

impl fmt::Display for AsmFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "global {}", self.symbol)?;
        writeln!(f, "{}:", self.symbol)?;
        for op in &self.ops {
            writeln!(f, "{op}")?;
        }
        Ok(())
    }
}
