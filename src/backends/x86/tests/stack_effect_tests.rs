#![cfg(test)]

use super::x86_test_support::{
    HELLO_STRING, INT32_TYPE, INT64_TYPE, NODE_COUNT_FIELD, NODE_CTOR, NODE_DESCRIBE, NODE_HELPER, NODE_TYPE,
    NODE_VALUE_FIELD, RGB_TYPE, catalogue, lower, method, op, quiet_config, short_branch,
};
use crate::backends::x86::asm::{AsmOp, LabelKey, Operand, Register};
use crate::backends::x86::context::LoweringContext;
use crate::backends::x86::handlers::Handler;
use crate::backends::x86::preprocess;
use crate::backends::x86::stack::{EvalStack, StackItem};
use crate::compiler_messages::compiler_errors::{ErrorLocation, ErrorType};
use crate::il::metadata::{ClauseKind, ExceptionClause, MethodInfo};
use crate::il::nodes::MethodBody;
use crate::il::opcodes::{OpCode, OperandKind};
use proptest::prelude::*;

/// Runs preprocessing only and hands back the entry stack of every node
fn entry_stacks(method: &MethodInfo, instructions: Vec<(OpCode, Vec<u8>)>) -> Vec<Option<EvalStack>> {
    let catalogue = catalogue();
    let config = quiet_config();
    let body = MethodBody::from_instructions(instructions).expect("body should link");
    let mut ctx = LoweringContext::new(method, body, &catalogue, &config).expect("frame should build");
    preprocess::run(&mut ctx).expect("preprocessing should succeed");
    ctx.entry_stacks
}

fn sizes(stack: &Option<EvalStack>) -> Vec<u32> {
    match stack {
        Some(stack) => stack.items().iter().map(|item| item.size_bytes).collect(),
        None => Vec::new(),
    }
}

#[test]
fn eight_byte_values_take_one_slot() {
    let f = method("Demo_Shapes", &["int64"], None);
    let stacks = entry_stacks(
        &f,
        vec![
            op(OpCode::Ldarg0),
            op(OpCode::LdcI4One),
            op(OpCode::ConvI8),
            op(OpCode::Add),
            op(OpCode::ConvI4),
            op(OpCode::Pop),
            op(OpCode::Ret),
        ],
    );

    assert_eq!(sizes(&stacks[0]), Vec::<u32>::new());
    assert_eq!(sizes(&stacks[1]), vec![8]);
    assert_eq!(sizes(&stacks[2]), vec![8, 4]);
    assert_eq!(sizes(&stacks[3]), vec![8, 8]);
    assert_eq!(sizes(&stacks[4]), vec![8]);
    assert_eq!(sizes(&stacks[5]), vec![4]);
    assert_eq!(sizes(&stacks[6]), Vec::<u32>::new());
}

#[test]
fn unreachable_code_after_a_jump_starts_empty() {
    // 0 ldc.i4.1, 1 br.s -> 3 keeps one value, 2 ret is never jumped to, 3 pop, 4 ret
    let f = method("Demo_Dead", &[], None);
    let stacks = entry_stacks(
        &f,
        vec![
            op(OpCode::LdcI4One),
            (OpCode::BrS, vec![1]),
            op(OpCode::Ret),
            op(OpCode::Pop),
            op(OpCode::Ret),
        ],
    );

    assert_eq!(sizes(&stacks[1]), vec![4]);
    assert_eq!(sizes(&stacks[2]), Vec::<u32>::new());
    assert_eq!(sizes(&stacks[3]), vec![4]);
}

#[test]
fn branch_targets_are_marked_for_labels() {
    let catalogue = catalogue();
    let config = quiet_config();
    let f = method("Demo_Marked", &["int32"], None);
    let body = MethodBody::from_instructions(vec![
        op(OpCode::Ldarg0),
        (OpCode::BrfalseS, vec![1]),
        op(OpCode::Nop),
        op(OpCode::Ret),
    ])
    .expect("body should link");
    let mut ctx = LoweringContext::new(&f, body, &catalogue, &config).expect("frame should build");
    preprocess::run(&mut ctx).expect("preprocessing should succeed");

    let marked: Vec<bool> = ctx.body.nodes.iter().map(|node| node.label_required).collect();
    assert_eq!(marked, vec![false, false, false, true]);
}

fn clause(kind: ClauseKind, try_offset: u32, try_length: u32, handler_offset: u32, handler_length: u32) -> ExceptionClause {
    ExceptionClause {
        kind,
        try_offset,
        try_length,
        handler_offset,
        handler_length,
        filter_offset: None,
        catch_type: None,
    }
}

/// IL_0000 nop, IL_0001 leave.s IL_0006, IL_0003 pop, IL_0004 leave.s IL_0006, IL_0006 ret
fn try_catch_body() -> Vec<(OpCode, Vec<u8>)> {
    vec![
        op(OpCode::Nop),
        short_branch(OpCode::LeaveS, 3),
        op(OpCode::Pop),
        short_branch(OpCode::LeaveS, 0),
        op(OpCode::Ret),
    ]
}

fn try_catch_method() -> MethodInfo {
    MethodInfo {
        handlers: vec![clause(ClauseKind::Catch, 0, 3, 3, 3)],
        ..method("Demo_Guarded", &[], None)
    }
}

#[test]
fn catch_block_starts_with_the_exception_reference() {
    let stacks = entry_stacks(&try_catch_method(), try_catch_body());

    let catch_entry = stacks[2].as_ref().expect("catch block should have an entry stack");
    assert_eq!(catch_entry.depth(), 1);
    assert!(catch_entry.items()[0].same_shape(&StackItem::object_ref()));
    assert_eq!(sizes(&stacks[4]), Vec::<u32>::new());
}

#[test]
fn catch_block_lowers_and_drops_the_exception() {
    let compiled = lower(&try_catch_method(), try_catch_body()).expect("try/catch should lower");
    let ops = &compiled.ops.ops;

    let catch_label = ops
        .iter()
        .position(|op| *op == AsmOp::Label(LabelKey::node(2)))
        .expect("catch block should be labelled");
    assert_eq!(
        ops[catch_label + 1],
        AsmOp::Add { dst: Operand::Reg(Register::Esp), src: Operand::Imm(4) }
    );
}

#[test]
fn finally_block_starts_empty() {
    // IL_0000 nop, IL_0001 leave.s IL_0004, IL_0003 endfinally, IL_0004 ret
    let f = MethodInfo {
        handlers: vec![clause(ClauseKind::Finally, 0, 3, 3, 1)],
        ..method("Demo_Cleanup", &[], None)
    };
    let catalogue = catalogue();
    let config = quiet_config();
    let body = MethodBody::from_instructions(vec![
        op(OpCode::Nop),
        short_branch(OpCode::LeaveS, 1),
        op(OpCode::Endfinally),
        op(OpCode::Ret),
    ])
    .expect("body should link");
    let mut ctx = LoweringContext::new(&f, body, &catalogue, &config).expect("frame should build");
    preprocess::run(&mut ctx).expect("preprocessing should succeed");

    assert_eq!(sizes(&ctx.entry_stacks[2]), Vec::<u32>::new());
    assert!(ctx.entry_stacks[2].is_some());
    assert!(ctx.body.nodes[2].label_required);
}

#[test]
fn handler_offset_inside_an_instruction_is_a_metadata_error() {
    let f = MethodInfo {
        handlers: vec![clause(ClauseKind::Catch, 0, 3, 2, 4)],
        ..method("Demo_Misaligned", &[], None)
    };
    let error = lower(&f, try_catch_body()).expect_err("IL_0002 is inside the first leave.s");
    assert_eq!(error.error_type, ErrorType::Metadata);
}

#[test]
fn underflow_is_an_invalid_stack_shape() {
    let mut stack = EvalStack::new();
    let error = stack.pop(&ErrorLocation::default()).expect_err("nothing to pop");
    assert_eq!(error.error_type, ErrorType::InvalidStackShape);
}

#[test]
fn fresh_allocation_is_not_part_of_the_shape() {
    let mut fresh = EvalStack::new();
    fresh.push(StackItem::new_object_ref());
    let mut plain = EvalStack::new();
    plain.push(StackItem::object_ref());
    assert!(fresh.same_shape(&plain));

    let mut wide = EvalStack::new();
    wide.push(StackItem::int64());
    let mut two_words = EvalStack::new();
    two_words.push(StackItem::int32());
    two_words.push(StackItem::int32());
    assert_eq!(wide.total_bytes(), two_words.total_bytes());
    assert!(!wide.same_shape(&two_words));

    assert!(!StackItem::int32().same_shape(&StackItem::float(4)));
    assert_eq!(StackItem::value_struct(6).size_bytes, 8);
}

/// The fixture entity each token-taking opcode is pointed at
fn fixture_token(opcode: OpCode) -> u32 {
    match opcode {
        OpCode::Ldstr => HELLO_STRING,
        OpCode::Call | OpCode::Ldftn => NODE_HELPER,
        OpCode::Callvirt => NODE_DESCRIBE,
        OpCode::Newobj => NODE_CTOR,
        OpCode::Ldfld | OpCode::Ldflda | OpCode::Stfld => NODE_VALUE_FIELD,
        OpCode::Ldsfld | OpCode::Ldsflda | OpCode::Stsfld => NODE_COUNT_FIELD,
        OpCode::Isinst | OpCode::Castclass => NODE_TYPE,
        OpCode::Ldobj | OpCode::Stobj | OpCode::Initobj | OpCode::Sizeof | OpCode::Stelem => RGB_TYPE,
        OpCode::Ldelem | OpCode::UnboxAny => INT64_TYPE,
        _ => INT32_TYPE,
    }
}

/// Operand bytes that decode for any opcode: index 0, zero displacement, one switch case
fn operand_for(opcode: OpCode) -> Vec<u8> {
    match opcode.operand_kind() {
        OperandKind::None => Vec::new(),
        OperandKind::ShortI8 | OperandKind::ShortVar => vec![0],
        OperandKind::Var => 0u16.to_le_bytes().to_vec(),
        OperandKind::I32 => 0i32.to_le_bytes().to_vec(),
        OperandKind::I64 => 0i64.to_le_bytes().to_vec(),
        OperandKind::F32 => 0f32.to_le_bytes().to_vec(),
        OperandKind::F64 => 0f64.to_le_bytes().to_vec(),
        OperandKind::Token => fixture_token(opcode).to_le_bytes().to_vec(),
        OperandKind::Switch => [1u32.to_le_bytes(), 0i32.to_le_bytes()].concat(),
    }
}

fn int32() -> StackItem {
    StackItem::int32()
}

fn int64() -> StackItem {
    StackItem::int64()
}

fn obj() -> StackItem {
    StackItem::object_ref()
}

fn ptr() -> StackItem {
    StackItem::native_ptr()
}

fn rgb() -> StackItem {
    StackItem::value_struct(7)
}

/// `(consumed, produced)` bottom to top for every opcode with a handler, against
/// `Demo_Effects(int32, int32, int32, int32) -> int32` with four int32 locals and
/// the operands from `operand_for`. Written out by hand so the handler table is
/// checked against something it didn't produce.
fn effect(opcode: OpCode) -> Option<(Vec<StackItem>, Vec<StackItem>)> {
    use OpCode as O;

    let rows = match opcode {
        O::Nop => (vec![], vec![]),

        O::Ldnull | O::Ldstr => (vec![], vec![obj()]),
        O::LdcI4M1
        | O::LdcI4Zero
        | O::LdcI4One
        | O::LdcI4Two
        | O::LdcI4Three
        | O::LdcI4Four
        | O::LdcI4Five
        | O::LdcI4Six
        | O::LdcI4Seven
        | O::LdcI4Eight
        | O::LdcI4S
        | O::LdcI4 => (vec![], vec![int32()]),
        O::LdcI8 => (vec![], vec![int64()]),
        O::LdcR4 => (vec![], vec![StackItem::float(4)]),
        O::LdcR8 => (vec![], vec![StackItem::float(8)]),

        O::Ldarg0
        | O::Ldarg1
        | O::Ldarg2
        | O::Ldarg3
        | O::LdargS
        | O::Ldarg
        | O::Ldloc0
        | O::Ldloc1
        | O::Ldloc2
        | O::Ldloc3
        | O::LdlocS
        | O::Ldloc => (vec![], vec![int32()]),
        O::StargS
        | O::Starg
        | O::Stloc0
        | O::Stloc1
        | O::Stloc2
        | O::Stloc3
        | O::StlocS
        | O::Stloc => (vec![int32()], vec![]),
        O::LdargaS | O::Ldarga | O::LdlocaS | O::Ldloca => (vec![], vec![ptr()]),

        O::Add
        | O::Sub
        | O::Mul
        | O::Div
        | O::DivUn
        | O::Rem
        | O::RemUn
        | O::And
        | O::Or
        | O::Xor
        | O::AddOvf
        | O::AddOvfUn
        | O::SubOvf
        | O::SubOvfUn
        | O::MulOvf
        | O::MulOvfUn => (vec![int32(), int32()], vec![int32()]),
        // The value decides the result width, the count never does
        O::Shl => (vec![int64(), int32()], vec![int64()]),
        O::Shr | O::ShrUn => (vec![int32(), int64()], vec![int32()]),
        O::Neg | O::Not => (vec![int64()], vec![int64()]),

        O::Ceq | O::Clt | O::CltUn | O::CgtUn => (vec![int32(), int32()], vec![int32()]),
        O::Cgt => (vec![int64(), int64()], vec![int32()]),

        O::Br | O::BrS => (vec![], vec![]),
        O::Brfalse | O::BrfalseS | O::Brtrue | O::BrtrueS => (vec![obj()], vec![]),
        O::Beq
        | O::BeqS
        | O::BneUn
        | O::BneUnS
        | O::Bge
        | O::BgeS
        | O::BgeUn
        | O::BgeUnS
        | O::Bgt
        | O::BgtS
        | O::BgtUn
        | O::BgtUnS => (vec![int32(), int32()], vec![]),
        O::Ble | O::BleS | O::BleUn | O::BleUnS | O::Blt | O::BltS | O::BltUn | O::BltUnS => {
            (vec![int64(), int64()], vec![])
        }
        O::Switch => (vec![int32()], vec![]),

        O::Call => (vec![int64()], vec![int64()]),
        O::Callvirt => (vec![obj()], vec![int32()]),
        O::Newobj => (vec![int32()], vec![StackItem::new_object_ref()]),
        O::Ret => (vec![int32()], vec![]),
        O::Ldftn => (vec![], vec![ptr()]),

        O::Ldfld => (vec![obj()], vec![int32()]),
        O::Ldflda => (vec![obj()], vec![ptr()]),
        O::Stfld => (vec![obj(), int32()], vec![]),
        O::Ldsfld => (vec![], vec![int32()]),
        O::Ldsflda => (vec![], vec![ptr()]),
        O::Stsfld => (vec![int32()], vec![]),

        O::Newarr => (vec![int32()], vec![StackItem::new_object_ref()]),
        O::Ldlen => (vec![obj()], vec![int32()]),
        O::Ldelema => (vec![obj(), int32()], vec![ptr()]),
        O::LdelemI1
        | O::LdelemU1
        | O::LdelemI2
        | O::LdelemU2
        | O::LdelemI4
        | O::LdelemU4
        | O::LdelemI => (vec![obj(), int32()], vec![int32()]),
        O::LdelemI8 | O::Ldelem => (vec![obj(), int32()], vec![int64()]),
        O::LdelemR4 => (vec![obj(), int32()], vec![StackItem::float(4)]),
        O::LdelemR8 => (vec![obj(), int32()], vec![StackItem::float(8)]),
        O::LdelemRef => (vec![obj(), int32()], vec![obj()]),
        O::StelemI | O::StelemI1 | O::StelemI2 | O::StelemI4 => (vec![obj(), int32(), int32()], vec![]),
        O::StelemI8 => (vec![obj(), int32(), int64()], vec![]),
        O::StelemR4 => (vec![obj(), int32(), StackItem::float(4)], vec![]),
        O::StelemR8 => (vec![obj(), int32(), StackItem::float(8)], vec![]),
        O::StelemRef => (vec![obj(), int32(), obj()], vec![]),
        O::Stelem => (vec![obj(), int32(), rgb()], vec![]),

        O::LdindI1 | O::LdindU1 | O::LdindI2 | O::LdindU2 | O::LdindI4 | O::LdindU4 | O::LdindI => {
            (vec![ptr()], vec![int32()])
        }
        O::LdindI8 => (vec![ptr()], vec![int64()]),
        O::LdindR4 => (vec![ptr()], vec![StackItem::float(4)]),
        O::LdindR8 => (vec![ptr()], vec![StackItem::float(8)]),
        O::LdindRef => (vec![ptr()], vec![obj()]),
        O::StindI1 | O::StindI2 | O::StindI4 | O::StindI => (vec![ptr(), int32()], vec![]),
        O::StindI8 => (vec![ptr(), int64()], vec![]),
        O::StindR4 => (vec![ptr(), StackItem::float(4)], vec![]),
        O::StindR8 => (vec![ptr(), StackItem::float(8)], vec![]),
        O::StindRef => (vec![ptr(), obj()], vec![]),

        O::Ldobj => (vec![ptr()], vec![rgb()]),
        O::Stobj => (vec![ptr(), rgb()], vec![]),
        O::Initobj => (vec![ptr()], vec![]),
        O::Sizeof => (vec![], vec![int32()]),
        O::Box => (vec![int32()], vec![StackItem::new_object_ref()]),
        O::Unbox => (vec![obj()], vec![ptr()]),
        O::UnboxAny => (vec![obj()], vec![int64()]),
        O::Isinst | O::Castclass => (vec![obj()], vec![obj()]),

        O::ConvI8 | O::ConvU8 | O::ConvOvfI8 | O::ConvOvfU8 | O::ConvOvfI8Un | O::ConvOvfU8Un => {
            (vec![int32()], vec![int64()])
        }
        O::ConvR4 => (vec![int32()], vec![StackItem::float(4)]),
        O::ConvR8 | O::ConvRUn => (vec![int64()], vec![StackItem::float(8)]),
        O::ConvI1
        | O::ConvU1
        | O::ConvI2
        | O::ConvU2
        | O::ConvI4
        | O::ConvU4
        | O::ConvI
        | O::ConvU
        | O::ConvOvfI1
        | O::ConvOvfU1
        | O::ConvOvfI2
        | O::ConvOvfU2
        | O::ConvOvfI4
        | O::ConvOvfU4
        | O::ConvOvfI
        | O::ConvOvfU
        | O::ConvOvfI1Un
        | O::ConvOvfU1Un
        | O::ConvOvfI2Un
        | O::ConvOvfU2Un
        | O::ConvOvfI4Un
        | O::ConvOvfU4Un
        | O::ConvOvfIUn
        | O::ConvOvfUUn => (vec![int64()], vec![int32()]),

        O::Dup => (vec![int32()], vec![int32(), int32()]),
        O::Pop => (vec![int64()], vec![]),

        O::Throw => (vec![obj()], vec![]),
        // Both discard whatever is left, so the row shows one abandoned value
        O::Leave | O::LeaveS | O::Endfinally => (vec![int32()], vec![]),

        _ => return None,
    };
    Some(rows)
}

/// Opcodes that require the rest of the stack to be empty
fn clears_the_stack(opcode: OpCode) -> bool {
    matches!(opcode, OpCode::Ret | OpCode::Leave | OpCode::LeaveS | OpCode::Endfinally)
}

#[test]
fn every_handled_opcode_has_the_tabled_stack_effect() {
    let catalogue = catalogue();
    let config = quiet_config();
    let f = MethodInfo {
        locals: vec![String::from("int32"); 4],
        ..method("Demo_Effects", &["int32", "int32", "int32", "int32"], Some("int32"))
    };

    for &opcode in OpCode::ALL {
        let handler = Handler::for_opcode(opcode);
        let row = effect(opcode);
        assert_eq!(
            handler.is_some(),
            row.is_some(),
            "'{opcode}' handled and tabled should agree"
        );
        let (Some(handler), Some((consumed, produced))) = (handler, row) else {
            continue;
        };

        let body = MethodBody::from_instructions(vec![(opcode, operand_for(opcode)), op(OpCode::Nop)])
            .unwrap_or_else(|error| panic!("'{opcode}' should decode: {}", error.msg));
        let mut ctx = LoweringContext::new(&f, body, &catalogue, &config).expect("frame should build");

        // An 8-byte value underneath shows the handler leaves deeper slots alone
        let bystander = !clears_the_stack(opcode);
        ctx.stack = EvalStack::new();
        if bystander {
            ctx.stack.push(StackItem::int64());
        }
        for item in &consumed {
            ctx.stack.push(item.to_owned());
        }

        let node = ctx.body.nodes[0].to_owned();
        if let Err(error) = handler.infer_stack_effect(&mut ctx, &node) {
            panic!("'{opcode}' on {consumed:?} should infer: {}", error.msg);
        }

        let mut expected = Vec::new();
        if bystander {
            expected.push(StackItem::int64());
        }
        expected.extend(produced);

        let after = ctx.stack.items();
        assert_eq!(after.len(), expected.len(), "'{opcode}' left {}", ctx.stack);
        for (found, wanted) in after.iter().zip(&expected) {
            assert!(found.same_shape(wanted), "'{opcode}' left {}, wanted {wanted}", ctx.stack);
        }
    }
}

/// Instructions with a fixed effect on 4-byte values: `(opcode, popped, pushed)`.
/// Slot and field opcodes address argument 0, local 0 and `Demo.Node::count`.
const ARITY: &[(OpCode, usize, usize)] = &[
    (OpCode::Nop, 0, 0),
    (OpCode::LdcI4Zero, 0, 1),
    (OpCode::LdcI4Seven, 0, 1),
    (OpCode::Ldnull, 0, 1),
    (OpCode::Ldstr, 0, 1),
    (OpCode::Ldarg0, 0, 1),
    (OpCode::LdargaS, 0, 1),
    (OpCode::Ldloc0, 0, 1),
    (OpCode::LdlocaS, 0, 1),
    (OpCode::Ldsfld, 0, 1),
    (OpCode::Sizeof, 0, 1),
    (OpCode::Add, 2, 1),
    (OpCode::Sub, 2, 1),
    (OpCode::Mul, 2, 1),
    (OpCode::Div, 2, 1),
    (OpCode::DivUn, 2, 1),
    (OpCode::Rem, 2, 1),
    (OpCode::RemUn, 2, 1),
    (OpCode::And, 2, 1),
    (OpCode::Or, 2, 1),
    (OpCode::Xor, 2, 1),
    (OpCode::Shl, 2, 1),
    (OpCode::Shr, 2, 1),
    (OpCode::ShrUn, 2, 1),
    (OpCode::Neg, 1, 1),
    (OpCode::Not, 1, 1),
    (OpCode::ConvI4, 1, 1),
    (OpCode::ConvU2, 1, 1),
    (OpCode::LdindI4, 1, 1),
    (OpCode::Ldlen, 1, 1),
    (OpCode::Isinst, 1, 1),
    (OpCode::Ceq, 2, 1),
    (OpCode::Clt, 2, 1),
    (OpCode::CgtUn, 2, 1),
    (OpCode::Dup, 1, 2),
    (OpCode::Pop, 1, 0),
    (OpCode::Starg, 1, 0),
    (OpCode::Stloc0, 1, 0),
    (OpCode::Stsfld, 1, 0),
];

proptest! {
    #[test]
    fn preprocessing_depth_matches_opcode_arity(choices in proptest::collection::vec(0..ARITY.len(), 0..48)) {
        // Anything that would underflow is skipped, then the stack is drained so ret sees it empty
        let mut instructions = Vec::new();
        let mut expected_depths = Vec::new();
        let mut depth = 0usize;

        for choice in choices {
            let (opcode, popped, pushed) = ARITY[choice];
            if popped > depth {
                continue;
            }
            expected_depths.push(depth);
            instructions.push((opcode, operand_for(opcode)));
            depth = depth - popped + pushed;
        }
        for _ in 0..depth {
            expected_depths.push(depth);
            instructions.push(op(OpCode::Pop));
            depth -= 1;
        }
        expected_depths.push(0);
        instructions.push(op(OpCode::Ret));

        let f = MethodInfo {
            locals: vec![String::from("int32")],
            ..method("Demo_Arity", &["int32"], None)
        };
        let stacks = entry_stacks(&f, instructions);

        let depths: Vec<usize> = stacks
            .iter()
            .map(|stack| stack.as_ref().map(EvalStack::depth).unwrap_or(usize::MAX))
            .collect();
        prop_assert_eq!(depths, expected_depths);
    }
}
