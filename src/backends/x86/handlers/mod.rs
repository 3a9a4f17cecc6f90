//! Opcode Handler Table
//!
//! Every opcode kiln can lower maps to one tagged `Handler`. Both passes go through
//! the same value: `infer_stack_effect` during preprocessing only moves descriptors
//! and forks stacks, `emit` during code generation does the same stack bookkeeping
//! while appending IR. Keeping both in one family file means the two can't drift.

pub mod arithmetic;
pub mod arrays;
pub mod branch;
pub mod calls;
pub mod comparison;
pub mod constants;
pub mod exceptions;
pub mod fields;
pub mod locals;
pub mod objects;
pub mod stack_ops;

use crate::backends::x86::context::LoweringContext;
use crate::backends::x86::stack::StackItem;
use crate::compiler_messages::compiler_errors::CompilerError;
use crate::il::nodes::IlNode;
use crate::il::opcodes::OpCode;
use crate::{return_stack_shape_error, return_unsupported_error};

use arithmetic::{ArithOp, UnaryOp};
use arrays::{ArrayOp, ElementKind};
use branch::BranchKind;
use comparison::CompareOp;
use constants::ConstKind;
use exceptions::ExceptionOp;
use fields::FieldOp;
use locals::VarOp;
use objects::{IndirectOp, MemKind, ObjectOp};
use stack_ops::ConvKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    Nop,
    Const(ConstKind),
    Arg(VarOp),
    Local(VarOp),
    Arithmetic(ArithOp),
    Unary(UnaryOp),
    Compare(CompareOp),
    Branch(BranchKind),
    Switch,
    Call,
    CallVirt,
    NewObj,
    Ret,
    Ldftn,
    Field(FieldOp),
    StaticField(FieldOp),
    Array(ArrayOp),
    Indirect(IndirectOp),
    Object(ObjectOp),
    Conv(ConvKind),
    Dup,
    Pop,
    Exception(ExceptionOp),
}

impl Handler {
    /// `None` for opcodes kiln doesn't lower at all
    pub fn for_opcode(op: OpCode) -> Option<Handler> {
        use ArithOp as A;
        use BranchKind as B;
        use ElementKind as E;
        use MemKind as M;
        use crate::backends::x86::asm::JumpKind as J;

        let handler = match op {
            OpCode::Nop => Handler::Nop,

            // Constants
            OpCode::Ldnull => Handler::Const(ConstKind::Null),
            OpCode::LdcI4M1 => Handler::Const(ConstKind::Fixed(-1)),
            OpCode::LdcI4Zero => Handler::Const(ConstKind::Fixed(0)),
            OpCode::LdcI4One => Handler::Const(ConstKind::Fixed(1)),
            OpCode::LdcI4Two => Handler::Const(ConstKind::Fixed(2)),
            OpCode::LdcI4Three => Handler::Const(ConstKind::Fixed(3)),
            OpCode::LdcI4Four => Handler::Const(ConstKind::Fixed(4)),
            OpCode::LdcI4Five => Handler::Const(ConstKind::Fixed(5)),
            OpCode::LdcI4Six => Handler::Const(ConstKind::Fixed(6)),
            OpCode::LdcI4Seven => Handler::Const(ConstKind::Fixed(7)),
            OpCode::LdcI4Eight => Handler::Const(ConstKind::Fixed(8)),
            OpCode::LdcI4S => Handler::Const(ConstKind::Int8),
            OpCode::LdcI4 => Handler::Const(ConstKind::Int32),
            OpCode::LdcI8 => Handler::Const(ConstKind::Int64),
            OpCode::LdcR4 => Handler::Const(ConstKind::Float32),
            OpCode::LdcR8 => Handler::Const(ConstKind::Float64),
            OpCode::Ldstr => Handler::Const(ConstKind::String),

            // Arguments and locals
            OpCode::Ldarg0 => Handler::Arg(VarOp::Load(Some(0))),
            OpCode::Ldarg1 => Handler::Arg(VarOp::Load(Some(1))),
            OpCode::Ldarg2 => Handler::Arg(VarOp::Load(Some(2))),
            OpCode::Ldarg3 => Handler::Arg(VarOp::Load(Some(3))),
            OpCode::LdargS | OpCode::Ldarg => Handler::Arg(VarOp::Load(None)),
            OpCode::StargS | OpCode::Starg => Handler::Arg(VarOp::Store(None)),
            OpCode::LdargaS | OpCode::Ldarga => Handler::Arg(VarOp::Address),
            OpCode::Ldloc0 => Handler::Local(VarOp::Load(Some(0))),
            OpCode::Ldloc1 => Handler::Local(VarOp::Load(Some(1))),
            OpCode::Ldloc2 => Handler::Local(VarOp::Load(Some(2))),
            OpCode::Ldloc3 => Handler::Local(VarOp::Load(Some(3))),
            OpCode::LdlocS | OpCode::Ldloc => Handler::Local(VarOp::Load(None)),
            OpCode::Stloc0 => Handler::Local(VarOp::Store(Some(0))),
            OpCode::Stloc1 => Handler::Local(VarOp::Store(Some(1))),
            OpCode::Stloc2 => Handler::Local(VarOp::Store(Some(2))),
            OpCode::Stloc3 => Handler::Local(VarOp::Store(Some(3))),
            OpCode::StlocS | OpCode::Stloc => Handler::Local(VarOp::Store(None)),
            OpCode::LdlocaS | OpCode::Ldloca => Handler::Local(VarOp::Address),

            // Arithmetic
            OpCode::Add => Handler::Arithmetic(A::Add),
            OpCode::Sub => Handler::Arithmetic(A::Sub),
            OpCode::Mul => Handler::Arithmetic(A::Mul),
            OpCode::Div => Handler::Arithmetic(A::Div),
            OpCode::DivUn => Handler::Arithmetic(A::DivUn),
            OpCode::Rem => Handler::Arithmetic(A::Rem),
            OpCode::RemUn => Handler::Arithmetic(A::RemUn),
            OpCode::And => Handler::Arithmetic(A::And),
            OpCode::Or => Handler::Arithmetic(A::Or),
            OpCode::Xor => Handler::Arithmetic(A::Xor),
            OpCode::Shl => Handler::Arithmetic(A::Shl),
            OpCode::Shr => Handler::Arithmetic(A::Shr),
            OpCode::ShrUn => Handler::Arithmetic(A::ShrUn),
            OpCode::AddOvf | OpCode::AddOvfUn => Handler::Arithmetic(A::CheckedAdd),
            OpCode::SubOvf | OpCode::SubOvfUn => Handler::Arithmetic(A::CheckedSub),
            OpCode::MulOvf | OpCode::MulOvfUn => Handler::Arithmetic(A::CheckedMul),
            OpCode::Neg => Handler::Unary(UnaryOp::Neg),
            OpCode::Not => Handler::Unary(UnaryOp::Not),

            // Comparison
            OpCode::Ceq => Handler::Compare(CompareOp::Eq),
            OpCode::Cgt => Handler::Compare(CompareOp::Gt),
            OpCode::CgtUn => Handler::Compare(CompareOp::GtUn),
            OpCode::Clt => Handler::Compare(CompareOp::Lt),
            OpCode::CltUn => Handler::Compare(CompareOp::LtUn),

            // Branches
            OpCode::Br | OpCode::BrS => Handler::Branch(B::Always),
            OpCode::Brfalse | OpCode::BrfalseS => Handler::Branch(B::IfFalse),
            OpCode::Brtrue | OpCode::BrtrueS => Handler::Branch(B::IfTrue),
            OpCode::Beq | OpCode::BeqS => Handler::Branch(B::Compare(J::Equal)),
            OpCode::BneUn | OpCode::BneUnS => Handler::Branch(B::Compare(J::NotEqual)),
            OpCode::Bge | OpCode::BgeS => Handler::Branch(B::Compare(J::GreaterOrEqual)),
            OpCode::BgeUn | OpCode::BgeUnS => Handler::Branch(B::Compare(J::AboveOrEqual)),
            OpCode::Bgt | OpCode::BgtS => Handler::Branch(B::Compare(J::Greater)),
            OpCode::BgtUn | OpCode::BgtUnS => Handler::Branch(B::Compare(J::Above)),
            OpCode::Ble | OpCode::BleS => Handler::Branch(B::Compare(J::LessOrEqual)),
            OpCode::BleUn | OpCode::BleUnS => Handler::Branch(B::Compare(J::BelowOrEqual)),
            OpCode::Blt | OpCode::BltS => Handler::Branch(B::Compare(J::Less)),
            OpCode::BltUn | OpCode::BltUnS => Handler::Branch(B::Compare(J::Below)),
            OpCode::Switch => Handler::Switch,

            // Calls
            OpCode::Call => Handler::Call,
            OpCode::Callvirt => Handler::CallVirt,
            OpCode::Newobj => Handler::NewObj,
            OpCode::Ret => Handler::Ret,
            OpCode::Ldftn => Handler::Ldftn,

            // Fields
            OpCode::Ldfld => Handler::Field(FieldOp::Load),
            OpCode::Ldflda => Handler::Field(FieldOp::Address),
            OpCode::Stfld => Handler::Field(FieldOp::Store),
            OpCode::Ldsfld => Handler::StaticField(FieldOp::Load),
            OpCode::Ldsflda => Handler::StaticField(FieldOp::Address),
            OpCode::Stsfld => Handler::StaticField(FieldOp::Store),

            // Arrays
            OpCode::Newarr => Handler::Array(ArrayOp::New),
            OpCode::Ldlen => Handler::Array(ArrayOp::Length),
            OpCode::Ldelema => Handler::Array(ArrayOp::Address),
            OpCode::LdelemI1 => Handler::Array(ArrayOp::Load(E::I1)),
            OpCode::LdelemU1 => Handler::Array(ArrayOp::Load(E::U1)),
            OpCode::LdelemI2 => Handler::Array(ArrayOp::Load(E::I2)),
            OpCode::LdelemU2 => Handler::Array(ArrayOp::Load(E::U2)),
            OpCode::LdelemI4 => Handler::Array(ArrayOp::Load(E::I4)),
            OpCode::LdelemU4 => Handler::Array(ArrayOp::Load(E::U4)),
            OpCode::LdelemI8 => Handler::Array(ArrayOp::Load(E::I8)),
            OpCode::LdelemI => Handler::Array(ArrayOp::Load(E::NativeInt)),
            OpCode::LdelemR4 => Handler::Array(ArrayOp::Load(E::R4)),
            OpCode::LdelemR8 => Handler::Array(ArrayOp::Load(E::R8)),
            OpCode::LdelemRef => Handler::Array(ArrayOp::Load(E::Ref)),
            OpCode::Ldelem => Handler::Array(ArrayOp::Load(E::Token)),
            OpCode::StelemI => Handler::Array(ArrayOp::Store(E::NativeInt)),
            OpCode::StelemI1 => Handler::Array(ArrayOp::Store(E::I1)),
            OpCode::StelemI2 => Handler::Array(ArrayOp::Store(E::I2)),
            OpCode::StelemI4 => Handler::Array(ArrayOp::Store(E::I4)),
            OpCode::StelemI8 => Handler::Array(ArrayOp::Store(E::I8)),
            OpCode::StelemR4 => Handler::Array(ArrayOp::Store(E::R4)),
            OpCode::StelemR8 => Handler::Array(ArrayOp::Store(E::R8)),
            OpCode::StelemRef => Handler::Array(ArrayOp::Store(E::Ref)),
            OpCode::Stelem => Handler::Array(ArrayOp::Store(E::Token)),

            // Indirect loads and stores
            OpCode::LdindI1 => Handler::Indirect(IndirectOp::Load(M::I1)),
            OpCode::LdindU1 => Handler::Indirect(IndirectOp::Load(M::U1)),
            OpCode::LdindI2 => Handler::Indirect(IndirectOp::Load(M::I2)),
            OpCode::LdindU2 => Handler::Indirect(IndirectOp::Load(M::U2)),
            OpCode::LdindI4 => Handler::Indirect(IndirectOp::Load(M::I4)),
            OpCode::LdindU4 => Handler::Indirect(IndirectOp::Load(M::U4)),
            OpCode::LdindI8 => Handler::Indirect(IndirectOp::Load(M::I8)),
            OpCode::LdindI => Handler::Indirect(IndirectOp::Load(M::NativeInt)),
            OpCode::LdindR4 => Handler::Indirect(IndirectOp::Load(M::R4)),
            OpCode::LdindR8 => Handler::Indirect(IndirectOp::Load(M::R8)),
            OpCode::LdindRef => Handler::Indirect(IndirectOp::Load(M::Ref)),
            OpCode::StindI1 => Handler::Indirect(IndirectOp::Store(M::I1)),
            OpCode::StindI2 => Handler::Indirect(IndirectOp::Store(M::I2)),
            OpCode::StindI4 => Handler::Indirect(IndirectOp::Store(M::I4)),
            OpCode::StindI8 => Handler::Indirect(IndirectOp::Store(M::I8)),
            OpCode::StindI => Handler::Indirect(IndirectOp::Store(M::NativeInt)),
            OpCode::StindR4 => Handler::Indirect(IndirectOp::Store(M::R4)),
            OpCode::StindR8 => Handler::Indirect(IndirectOp::Store(M::R8)),
            OpCode::StindRef => Handler::Indirect(IndirectOp::Store(M::Ref)),

            // Objects and value types
            OpCode::Ldobj => Handler::Object(ObjectOp::Load),
            OpCode::Stobj => Handler::Object(ObjectOp::Store),
            OpCode::Initobj => Handler::Object(ObjectOp::Init),
            OpCode::Sizeof => Handler::Object(ObjectOp::SizeOf),
            OpCode::Box => Handler::Object(ObjectOp::Box),
            OpCode::Unbox => Handler::Object(ObjectOp::Unbox),
            OpCode::UnboxAny => Handler::Object(ObjectOp::UnboxAny),
            OpCode::Isinst => Handler::Object(ObjectOp::IsInstance),
            OpCode::Castclass => Handler::Object(ObjectOp::CastClass),

            // Conversions
            OpCode::ConvI1 => Handler::Conv(ConvKind::I1),
            OpCode::ConvU1 => Handler::Conv(ConvKind::U1),
            OpCode::ConvI2 => Handler::Conv(ConvKind::I2),
            OpCode::ConvU2 => Handler::Conv(ConvKind::U2),
            OpCode::ConvI4 | OpCode::ConvI => Handler::Conv(ConvKind::I4),
            OpCode::ConvU4 | OpCode::ConvU => Handler::Conv(ConvKind::U4),
            OpCode::ConvI8 => Handler::Conv(ConvKind::I8),
            OpCode::ConvU8 => Handler::Conv(ConvKind::U8),
            OpCode::ConvR4 => Handler::Conv(ConvKind::Float(4)),
            OpCode::ConvR8 | OpCode::ConvRUn => Handler::Conv(ConvKind::Float(8)),
            OpCode::ConvOvfI1
            | OpCode::ConvOvfU1
            | OpCode::ConvOvfI2
            | OpCode::ConvOvfU2
            | OpCode::ConvOvfI4
            | OpCode::ConvOvfU4
            | OpCode::ConvOvfI
            | OpCode::ConvOvfU
            | OpCode::ConvOvfI1Un
            | OpCode::ConvOvfU1Un
            | OpCode::ConvOvfI2Un
            | OpCode::ConvOvfU2Un
            | OpCode::ConvOvfI4Un
            | OpCode::ConvOvfU4Un
            | OpCode::ConvOvfIUn
            | OpCode::ConvOvfUUn => Handler::Conv(ConvKind::Checked(4)),
            OpCode::ConvOvfI8 | OpCode::ConvOvfU8 | OpCode::ConvOvfI8Un | OpCode::ConvOvfU8Un => {
                Handler::Conv(ConvKind::Checked(8))
            }

            // Stack shape
            OpCode::Dup => Handler::Dup,
            OpCode::Pop => Handler::Pop,

            // Exception plumbing
            OpCode::Throw => Handler::Exception(ExceptionOp::Throw),
            OpCode::Leave | OpCode::LeaveS => Handler::Exception(ExceptionOp::Leave),
            OpCode::Endfinally => Handler::Exception(ExceptionOp::EndFinally),

            _ => return None,
        };

        Some(handler)
    }

    /// Handler for a node, or an unsupported-instruction error naming the opcode and offset
    pub fn for_node(node: &IlNode) -> Result<Handler, CompilerError> {
        match Handler::for_opcode(node.op) {
            Some(handler) => Ok(handler),
            None => return_unsupported_error!(
                format!(
                    "Unsupported instruction '{}' at IL_{:04x}",
                    node.op, node.offset
                ),
                node.location(),
                { OpCode => node.op.mnemonic(), CompilationStage => "Handler Lookup" }
            ),
        }
    }

    /// Shape-only pass: pop consumed descriptors, push produced ones, fork onto branch targets
    pub fn infer_stack_effect(self, ctx: &mut LoweringContext, node: &IlNode) -> Result<(), CompilerError> {
        match self {
            Handler::Nop => Ok(()),
            Handler::Const(kind) => constants::infer(ctx, node, kind),
            Handler::Arg(op) => locals::infer(ctx, node, locals::SlotKind::Arg, op),
            Handler::Local(op) => locals::infer(ctx, node, locals::SlotKind::Local, op),
            Handler::Arithmetic(op) => arithmetic::infer_binary(ctx, node, op),
            Handler::Unary(op) => arithmetic::infer_unary(ctx, node, op),
            Handler::Compare(op) => comparison::infer(ctx, node, op),
            Handler::Branch(kind) => branch::infer(ctx, node, kind),
            Handler::Switch => branch::infer_switch(ctx, node),
            Handler::Call => calls::infer_call(ctx, node),
            Handler::CallVirt => calls::infer_call(ctx, node),
            Handler::NewObj => calls::infer_newobj(ctx, node),
            Handler::Ret => calls::infer_ret(ctx, node),
            Handler::Ldftn => calls::infer_ldftn(ctx, node),
            Handler::Field(op) => fields::infer_instance(ctx, node, op),
            Handler::StaticField(op) => fields::infer_static(ctx, node, op),
            Handler::Array(op) => arrays::infer(ctx, node, op),
            Handler::Indirect(op) => objects::infer_indirect(ctx, node, op),
            Handler::Object(op) => objects::infer(ctx, node, op),
            Handler::Conv(kind) => stack_ops::infer_conv(ctx, node, kind),
            Handler::Dup => stack_ops::infer_dup(ctx, node),
            Handler::Pop => stack_ops::infer_pop(ctx, node),
            Handler::Exception(op) => exceptions::infer(ctx, node, op),
        }
    }

    /// Code generation: the same stack effect as `infer_stack_effect`, plus the IR that realises it
    pub fn emit(self, ctx: &mut LoweringContext, node: &IlNode) -> Result<(), CompilerError> {
        match self {
            Handler::Nop => Ok(()),
            Handler::Const(kind) => constants::emit(ctx, node, kind),
            Handler::Arg(op) => locals::emit(ctx, node, locals::SlotKind::Arg, op),
            Handler::Local(op) => locals::emit(ctx, node, locals::SlotKind::Local, op),
            Handler::Arithmetic(op) => arithmetic::emit_binary(ctx, node, op),
            Handler::Unary(op) => arithmetic::emit_unary(ctx, node, op),
            Handler::Compare(op) => comparison::emit(ctx, node, op),
            Handler::Branch(kind) => branch::emit(ctx, node, kind),
            Handler::Switch => branch::emit_switch(ctx, node),
            Handler::Call => calls::emit_call(ctx, node),
            Handler::CallVirt => calls::emit_callvirt(ctx, node),
            Handler::NewObj => calls::emit_newobj(ctx, node),
            Handler::Ret => calls::emit_ret(ctx, node),
            Handler::Ldftn => calls::emit_ldftn(ctx, node),
            Handler::Field(op) => fields::emit_instance(ctx, node, op),
            Handler::StaticField(op) => fields::emit_static(ctx, node, op),
            Handler::Array(op) => arrays::emit(ctx, node, op),
            Handler::Indirect(op) => objects::emit_indirect(ctx, node, op),
            Handler::Object(op) => objects::emit(ctx, node, op),
            Handler::Conv(kind) => stack_ops::emit_conv(ctx, node, kind),
            Handler::Dup => stack_ops::emit_dup(ctx, node),
            Handler::Pop => stack_ops::emit_pop(ctx, node),
            Handler::Exception(op) => exceptions::emit(ctx, node, op),
        }
    }
}

// ============================================================================
// Shared operand checks
// ============================================================================

/// Floating point operands are out of scope for this backend
pub fn reject_float(item: &StackItem, node: &IlNode) -> Result<(), CompilerError> {
    if item.is_float {
        return_unsupported_error!(
            format!("'{}' on a floating point operand", node.op),
            node.location(),
            { OpCode => node.op.mnemonic(), PrimarySuggestion => "Floating point arithmetic isn't lowered by this backend" }
        );
    }
    Ok(())
}

/// A 4- or 8-byte integer slot, the only widths arithmetic works on
pub fn expect_primitive_width(item: &StackItem, node: &IlNode) -> Result<u32, CompilerError> {
    match item.size_bytes {
        4 | 8 => Ok(item.size_bytes),
        0..4 => return_stack_shape_error!(
            format!("'{}' operand is only {} bytes", node.op, item.size_bytes),
            node.location(),
            { ExpectedSize => "4 or 8" }
        ),
        _ => return_stack_shape_error!(
            format!("'{}' can't operate on a {} byte operand", node.op, item.size_bytes),
            node.location(),
            { ExpectedSize => "4 or 8" }
        ),
    }
}

/// Both operands of a symmetric operation have the same width
pub fn expect_same_width(left: &StackItem, right: &StackItem, node: &IlNode) -> Result<u32, CompilerError> {
    let width = expect_primitive_width(left, node)?;
    expect_primitive_width(right, node)?;
    if left.size_bytes != right.size_bytes {
        return_stack_shape_error!(
            format!(
                "'{}' operands have different sizes ({} and {} bytes)",
                node.op, left.size_bytes, right.size_bytes
            ),
            node.location(),
            { ExpectedSize => "matching", FoundSize => "mismatched" }
        );
    }
    Ok(width)
}

/// A single 4-byte slot, e.g. an object reference, address or index
pub fn expect_word(item: &StackItem, node: &IlNode) -> Result<(), CompilerError> {
    if item.size_bytes != 4 {
        return_stack_shape_error!(
            format!(
                "'{}' expects a 4 byte operand, found {} bytes",
                node.op, item.size_bytes
            ),
            node.location(),
            { ExpectedSize => "4" }
        );
    }
    Ok(())
}
