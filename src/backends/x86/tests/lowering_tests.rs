#![cfg(test)]

use super::x86_test_support::{count_ops, find_sequence, lower, lower_with, method, op, quiet_config, short_branch};
use crate::backends::x86::asm::{AsmFunction, AsmOp, JumpKind, LabelKey, LabelTag, Operand, Register};
use crate::compiler_messages::compiler_errors::ErrorType;
use crate::il::opcodes::OpCode;
use crate::settings::{SignedMultiply, TargetConfig};

fn reg(register: Register) -> Operand {
    Operand::Reg(register)
}

#[test]
fn lowers_32bit_add() {
    let add = method("Demo_Add", &["int32", "int32"], Some("int32"));
    let compiled = lower(
        &add,
        vec![op(OpCode::Ldarg0), op(OpCode::Ldarg1), op(OpCode::Add), op(OpCode::Ret)],
    )
    .expect("add should lower");

    assert_eq!(
        compiled.ops.ops,
        vec![
            AsmOp::Push(reg(Register::Ebp)),
            AsmOp::Mov { dst: reg(Register::Ebp), src: reg(Register::Esp) },
            AsmOp::Push(Operand::mem(Register::Ebp, 12)),
            AsmOp::Push(Operand::mem(Register::Ebp, 8)),
            AsmOp::Pop(reg(Register::Ebx)),
            AsmOp::Pop(reg(Register::Eax)),
            AsmOp::Add { dst: reg(Register::Eax), src: reg(Register::Ebx) },
            AsmOp::Push(reg(Register::Eax)),
            AsmOp::Pop(reg(Register::Eax)),
            AsmOp::Mov { dst: reg(Register::Esp), src: reg(Register::Ebp) },
            AsmOp::Pop(reg(Register::Ebp)),
            AsmOp::Ret,
        ]
    );
    assert!(compiled.external_symbols.is_empty());
}

#[test]
fn lowers_64bit_add_with_carry() {
    let add = method("Demo_Add64", &["int64", "int64"], Some("int64"));
    let compiled = lower(
        &add,
        vec![op(OpCode::Ldarg0), op(OpCode::Ldarg1), op(OpCode::Add), op(OpCode::Ret)],
    )
    .expect("64-bit add should lower");

    let expected = [
        AsmOp::Pop(reg(Register::Ebx)),
        AsmOp::Pop(reg(Register::Ecx)),
        AsmOp::Pop(reg(Register::Eax)),
        AsmOp::Pop(reg(Register::Edx)),
        AsmOp::Add { dst: reg(Register::Eax), src: reg(Register::Ebx) },
        AsmOp::Adc { dst: reg(Register::Edx), src: reg(Register::Ecx) },
        AsmOp::Push(reg(Register::Edx)),
        AsmOp::Push(reg(Register::Eax)),
    ];
    assert!(find_sequence(&compiled.ops.ops, &expected).is_some(), "{}", compiled.ops);

    // Arguments are pushed high word first
    let loads = [
        AsmOp::Push(Operand::mem(Register::Ebp, 20)),
        AsmOp::Push(Operand::mem(Register::Ebp, 16)),
        AsmOp::Push(Operand::mem(Register::Ebp, 12)),
        AsmOp::Push(Operand::mem(Register::Ebp, 8)),
    ];
    assert!(find_sequence(&compiled.ops.ops, &loads).is_some(), "{}", compiled.ops);
}

#[test]
fn mixed_width_operands_are_an_invalid_stack_shape() {
    let add = method("Demo_Mixed", &["int32", "int64"], Some("int64"));
    let error = lower(
        &add,
        vec![op(OpCode::Ldarg0), op(OpCode::Ldarg1), op(OpCode::Add), op(OpCode::Ret)],
    )
    .expect_err("4 + 8 bytes can't be added");

    assert_eq!(error.error_type, ErrorType::InvalidStackShape);
    assert_eq!(error.location.method, "Demo_Mixed");
    assert_eq!(error.location.opcode, Some(OpCode::Add));
}

#[test]
fn float_operands_are_unsupported() {
    let cases = [
        (OpCode::Add, "float64"),
        (OpCode::Sub, "float32"),
        (OpCode::Mul, "float64"),
        (OpCode::Xor, "float32"),
    ];

    for (opcode, ty) in cases {
        let f = method("Demo_Float", &[ty, ty], Some(ty));
        let error = lower(&f, vec![op(OpCode::Ldarg0), op(OpCode::Ldarg1), op(opcode), op(OpCode::Ret)])
            .expect_err("floats aren't lowered");
        assert_eq!(error.error_type, ErrorType::UnsupportedFeature, "{opcode}");
    }

    let shift = method("Demo_Shift", &["float32"], Some("float32"));
    let error = lower(
        &shift,
        vec![op(OpCode::Ldarg0), op(OpCode::LdcI4One), op(OpCode::Shr), op(OpCode::Ret)],
    )
    .expect_err("float shift");
    assert_eq!(error.error_type, ErrorType::UnsupportedFeature);

    for unary in [OpCode::Not, OpCode::Neg] {
        let f = method("Demo_Unary", &["float32"], Some("float32"));
        let error = lower(&f, vec![op(OpCode::Ldarg0), op(unary), op(OpCode::Ret)])
            .expect_err("float unary");
        assert_eq!(error.error_type, ErrorType::UnsupportedFeature, "{unary}");
    }

    let dup = method("Demo_Dup", &["float64"], None);
    let error = lower(
        &dup,
        vec![op(OpCode::Ldarg0), op(OpCode::Dup), op(OpCode::Pop), op(OpCode::Pop), op(OpCode::Ret)],
    )
    .expect_err("float dup");
    assert_eq!(error.error_type, ErrorType::UnsupportedFeature);
}

#[test]
fn float_constant_is_unsupported() {
    let f = method("Demo_Constant", &[], None);
    let error = lower(
        &f,
        vec![(OpCode::LdcR4, 1.5f32.to_le_bytes().to_vec()), op(OpCode::Pop), op(OpCode::Ret)],
    )
    .expect_err("float constant");
    assert_eq!(error.error_type, ErrorType::UnsupportedFeature);
}

#[test]
fn beq_is_one_compare_and_one_jump() {
    // 0 ldarg.0, 1 ldarg.1, 2 beq.s -> 4, 3 nop, 4 ret
    let f = method("Demo_Beq", &["int32", "int32"], None);
    let compiled = lower(
        &f,
        vec![
            op(OpCode::Ldarg0),
            op(OpCode::Ldarg1),
            short_branch(OpCode::BeqS, 1),
            op(OpCode::Nop),
            op(OpCode::Ret),
        ],
    )
    .expect("beq should lower");

    let ops = &compiled.ops.ops;
    assert_eq!(count_ops(ops, |op| matches!(op, AsmOp::Cmp { .. })), 1);
    assert_eq!(count_ops(ops, |op| matches!(op, AsmOp::Jmp { .. })), 1);

    let expected = [
        AsmOp::Cmp { lhs: reg(Register::Eax), rhs: reg(Register::Ebx) },
        AsmOp::Jmp { kind: JumpKind::Equal, target: LabelKey::node(4) },
    ];
    assert!(find_sequence(ops, &expected).is_some(), "{}", compiled.ops);
    assert_eq!(count_ops(ops, |op| *op == AsmOp::Label(LabelKey::node(4))), 1);
}

#[test]
fn switch_compares_cases_in_order() {
    // 0 ldarg.0, 1 switch (case 0 -> 4, case 1 -> 3, case 2 -> 2), 2 nop, 3 nop, 4 ret
    let mut operand = 3u32.to_le_bytes().to_vec();
    for displacement in [2i32, 1, 0] {
        operand.extend_from_slice(&displacement.to_le_bytes());
    }

    let f = method("Demo_Switch", &["int32"], None);
    let compiled = lower(
        &f,
        vec![
            op(OpCode::Ldarg0),
            (OpCode::Switch, operand),
            op(OpCode::Nop),
            op(OpCode::Nop),
            op(OpCode::Ret),
        ],
    )
    .expect("switch should lower");

    let expected = [
        AsmOp::Pop(reg(Register::Eax)),
        AsmOp::Cmp { lhs: reg(Register::Eax), rhs: Operand::Imm(0) },
        AsmOp::Jmp { kind: JumpKind::Equal, target: LabelKey::node(4) },
        AsmOp::Cmp { lhs: reg(Register::Eax), rhs: Operand::Imm(1) },
        AsmOp::Jmp { kind: JumpKind::Equal, target: LabelKey::node(3) },
        AsmOp::Cmp { lhs: reg(Register::Eax), rhs: Operand::Imm(2) },
        AsmOp::Jmp { kind: JumpKind::Equal, target: LabelKey::node(2) },
    ];
    assert!(find_sequence(&compiled.ops.ops, &expected).is_some(), "{}", compiled.ops);
}

#[test]
fn clt_materialises_a_boolean() {
    let f = method("Demo_Less", &["int32", "int32"], Some("int32"));
    let compiled = lower(
        &f,
        vec![op(OpCode::Ldarg0), op(OpCode::Ldarg1), op(OpCode::Clt), op(OpCode::Ret)],
    )
    .expect("clt should lower");

    let is_true = LabelKey::internal(2, LabelTag::True);
    let end = LabelKey::internal(2, LabelTag::End);
    let expected = [
        AsmOp::Pop(reg(Register::Ebx)),
        AsmOp::Pop(reg(Register::Eax)),
        AsmOp::Cmp { lhs: reg(Register::Eax), rhs: reg(Register::Ebx) },
        AsmOp::Jmp { kind: JumpKind::Less, target: is_true },
        AsmOp::Push(Operand::Imm(0)),
        AsmOp::Jmp { kind: JumpKind::Always, target: end },
        AsmOp::Label(is_true),
        AsmOp::Push(Operand::Imm(1)),
        AsmOp::Label(end),
    ];
    assert!(find_sequence(&compiled.ops.ops, &expected).is_some(), "{}", compiled.ops);
    assert_eq!(compiled.ops.to_string().matches(".N2_true:").count(), 1);
}

#[test]
fn branches_merge_with_matching_stacks() {
    // cond ? 1 : 2
    // 0 ldarg.0, 1 brtrue.s -> 4, 2 ldc.i4.1, 3 br.s -> 5, 4 ldc.i4.2, 5 ret
    let f = method("Demo_Select", &["int32"], Some("int32"));
    let compiled = lower(
        &f,
        vec![
            op(OpCode::Ldarg0),
            short_branch(OpCode::BrtrueS, 3),
            op(OpCode::LdcI4One),
            short_branch(OpCode::BrS, 1),
            op(OpCode::LdcI4Two),
            op(OpCode::Ret),
        ],
    )
    .expect("merge should lower");

    let ops = &compiled.ops.ops;
    assert!(ops.contains(&AsmOp::Jmp { kind: JumpKind::NotEqual, target: LabelKey::node(4) }));
    assert!(ops.contains(&AsmOp::Jmp { kind: JumpKind::Always, target: LabelKey::node(5) }));
    assert!(ops.contains(&AsmOp::Label(LabelKey::node(4))));
    assert!(ops.contains(&AsmOp::Label(LabelKey::node(5))));
}

#[test]
fn inconsistent_merge_is_an_invalid_stack_shape() {
    // 0 ldarg.0, 1 brtrue.s -> 3 with an empty stack, 2 ldc.i4.1 falls into 3 with one value
    let f = method("Demo_BadMerge", &["int32"], None);
    let error = lower(
        &f,
        vec![
            op(OpCode::Ldarg0),
            short_branch(OpCode::BrtrueS, 1),
            op(OpCode::LdcI4One),
            op(OpCode::Ret),
        ],
    )
    .expect_err("stacks disagree at the merge");

    assert_eq!(error.error_type, ErrorType::InvalidStackShape);
    assert!(error.msg.contains("Inconsistent stack"), "unexpected message: {}", error.msg);
}

#[test]
fn zero_distance_branch_only_drops_its_operand() {
    let f = method("Demo_Nowhere", &["int32"], None);
    let compiled = lower(
        &f,
        vec![op(OpCode::Ldarg0), short_branch(OpCode::BrtrueS, 0), op(OpCode::Ret)],
    )
    .expect("zero distance branch should lower");

    let ops = &compiled.ops.ops;
    assert_eq!(count_ops(ops, |op| matches!(op, AsmOp::Jmp { .. })), 0);
    assert!(ops.contains(&AsmOp::Add { dst: reg(Register::Esp), src: Operand::Imm(4) }));
}

#[test]
fn ldc_i8_pushes_high_word_first() {
    let f = method("Demo_Wide", &[], Some("int64"));
    let value: i64 = (1 << 32) | 2;
    let compiled = lower(&f, vec![(OpCode::LdcI8, value.to_le_bytes().to_vec()), op(OpCode::Ret)])
        .expect("ldc.i8 should lower");

    let expected = [
        AsmOp::Push(Operand::Imm(1)),
        AsmOp::Push(Operand::Imm(2)),
        AsmOp::Pop(reg(Register::Eax)),
        AsmOp::Pop(reg(Register::Edx)),
    ];
    assert!(find_sequence(&compiled.ops.ops, &expected).is_some(), "{}", compiled.ops);
}

#[test]
fn rejecting_64bit_multiply_is_configurable() {
    let f = method("Demo_Mul64", &["int64", "int64"], Some("int64"));
    let body = || vec![op(OpCode::Ldarg0), op(OpCode::Ldarg1), op(OpCode::Mul), op(OpCode::Ret)];

    let compiled = lower(&f, body()).expect("wrapping multiply lowers by default");
    assert!(compiled.ops.ops.contains(&AsmOp::Mul(reg(Register::Ebx))));

    let mut config = quiet_config();
    config.codegen.signed_64bit_multiply = SignedMultiply::Reject;
    let error = lower_with(&f, body(), &config).expect_err("multiply is rejected");
    assert_eq!(error.error_type, ErrorType::UnsupportedFeature);

    // 32-bit multiply is unaffected
    let narrow = method("Demo_Mul32", &["int32", "int32"], Some("int32"));
    let body = vec![op(OpCode::Ldarg0), op(OpCode::Ldarg1), op(OpCode::Mul), op(OpCode::Ret)];
    assert!(lower_with(&narrow, body, &config).is_ok());
}

#[test]
fn checked_arithmetic_and_64bit_division_are_unsupported() {
    let f = method("Demo_Checked", &["int32", "int32"], Some("int32"));
    let error = lower(&f, vec![op(OpCode::Ldarg0), op(OpCode::Ldarg1), op(OpCode::AddOvf), op(OpCode::Ret)])
        .expect_err("add.ovf");
    assert_eq!(error.error_type, ErrorType::UnsupportedFeature);

    let wide = method("Demo_Div64", &["int64", "int64"], Some("int64"));
    let error = lower(&wide, vec![op(OpCode::Ldarg0), op(OpCode::Ldarg1), op(OpCode::Div), op(OpCode::Ret)])
        .expect_err("64-bit div");
    assert_eq!(error.error_type, ErrorType::UnsupportedFeature);
}

#[test]
fn opcode_without_a_handler_is_unsupported() {
    let f = method("Demo_Localloc", &["int32"], None);
    let error = lower(&f, vec![op(OpCode::Ldarg0), op(OpCode::Localloc), op(OpCode::Pop), op(OpCode::Ret)])
        .expect_err("localloc has no handler");

    assert_eq!(error.error_type, ErrorType::UnsupportedFeature);
    assert!(error.msg.contains("localloc"), "unexpected message: {}", error.msg);
    assert!(error.msg.contains("IL_0001"), "unexpected message: {}", error.msg);
}

#[test]
fn ret_with_leftover_values_is_an_invalid_stack_shape() {
    let f = method("Demo_Leftover", &[], None);
    let error = lower(&f, vec![op(OpCode::LdcI4One), op(OpCode::Ret)]).expect_err("one value left");
    assert_eq!(error.error_type, ErrorType::InvalidStackShape);

    let g = method("Demo_Empty", &[], Some("int32"));
    let error = lower(&g, vec![op(OpCode::Ret)]).expect_err("nothing to return");
    assert_eq!(error.error_type, ErrorType::InvalidStackShape);
}

#[test]
fn comments_name_each_instruction() {
    let f = method("Demo_Commented", &[], None);
    let compiled = lower_with(&f, vec![op(OpCode::Nop), op(OpCode::Ret)], &TargetConfig::default())
        .expect("should lower");

    let listing = compiled.ops.to_string();
    assert!(listing.contains("; IL_0000: nop"), "{listing}");
    assert!(listing.contains("; IL_0001: ret"), "{listing}");
    assert!(listing.starts_with("global Demo_Commented\nDemo_Commented:\n"), "{listing}");
}

#[test]
fn label_validation_catches_missing_and_duplicate_labels() {
    let mut missing = AsmFunction::new("Demo_Labels");
    missing.emit(AsmOp::Jmp { kind: JumpKind::Always, target: LabelKey::node(7) });
    let error = missing.validate_labels().expect_err("label 7 was never placed");
    assert_eq!(error.error_type, ErrorType::Compiler);

    let mut duplicate = AsmFunction::new("Demo_Labels");
    duplicate.emit(AsmOp::Label(LabelKey::node(1)));
    duplicate.emit(AsmOp::Label(LabelKey::node(1)));
    assert!(duplicate.validate_labels().is_err());

    let mut pushed = AsmFunction::new("Demo_Labels");
    pushed.emit(AsmOp::Push(Operand::Label(LabelKey::internal(0, LabelTag::Skip))));
    assert!(pushed.validate_labels().is_err());
    pushed.emit(AsmOp::Label(LabelKey::internal(0, LabelTag::Skip)));
    assert!(pushed.validate_labels().is_ok());
}

#[test]
fn internal_labels_get_distinct_keys() {
    assert_eq!(LabelKey::internal(3, LabelTag::NotNull).to_string(), ".N3_not_null");
    assert_eq!(LabelKey::internal(3, LabelTag::NotNull).nth(2).to_string(), ".N3_not_null_2");
    assert_eq!(LabelKey::node(12).to_string(), ".N12");
}

/// `ldarg.0; ldarg.1; <opcode>; ret`, so the instruction under test is node 2
fn lower_binary(symbol: &str, params: [&str; 2], opcode: OpCode, return_type: Option<&str>) -> AsmFunction {
    let f = method(symbol, &params, return_type);
    lower(&f, vec![op(OpCode::Ldarg0), op(OpCode::Ldarg1), op(opcode), op(OpCode::Ret)])
        .unwrap_or_else(|error| panic!("{opcode} should lower: {}", error.msg))
        .ops
}

fn shift_labels() -> (LabelKey, LabelKey, LabelKey) {
    (
        LabelKey::internal(2, LabelTag::Large),
        LabelKey::internal(2, LabelTag::Overflow),
        LabelKey::internal(2, LabelTag::End),
    )
}

#[test]
fn wide_arithmetic_shift_covers_every_count_range() {
    let asm = lower_binary("Demo_Sar64", ["int64", "int32"], OpCode::Shr, Some("int64"));
    let (large, over_word, end) = shift_labels();
    let cl = reg(Register::Cl);

    let expected = [
        AsmOp::Pop(reg(Register::Ecx)),
        AsmOp::Pop(reg(Register::Eax)),
        AsmOp::Pop(reg(Register::Edx)),
        AsmOp::Cmp { lhs: reg(Register::Ecx), rhs: Operand::Imm(64) },
        AsmOp::Jmp { kind: JumpKind::AboveOrEqual, target: large },
        AsmOp::Cmp { lhs: reg(Register::Ecx), rhs: Operand::Imm(32) },
        AsmOp::Jmp { kind: JumpKind::AboveOrEqual, target: over_word },
        // 0..31
        AsmOp::Shrd { dst: reg(Register::Eax), src: Register::Edx, count: cl.to_owned() },
        AsmOp::Sar { dst: reg(Register::Edx), count: cl.to_owned() },
        AsmOp::Jmp { kind: JumpKind::Always, target: end },
        // 32..63
        AsmOp::Label(over_word),
        AsmOp::Sub { dst: reg(Register::Ecx), src: Operand::Imm(32) },
        AsmOp::Mov { dst: reg(Register::Eax), src: reg(Register::Edx) },
        AsmOp::Sar { dst: reg(Register::Edx), count: Operand::Imm(31) },
        AsmOp::Sar { dst: reg(Register::Eax), count: cl },
        AsmOp::Jmp { kind: JumpKind::Always, target: end },
        // 64 and up
        AsmOp::Label(large),
        AsmOp::Sar { dst: reg(Register::Edx), count: Operand::Imm(31) },
        AsmOp::Mov { dst: reg(Register::Eax), src: reg(Register::Edx) },
        AsmOp::Label(end),
        AsmOp::Push(reg(Register::Edx)),
        AsmOp::Push(reg(Register::Eax)),
    ];
    assert!(find_sequence(&asm.ops, &expected).is_some(), "{asm}");
}

#[test]
fn wide_logical_shift_by_a_wide_count_checks_the_high_word() {
    let asm = lower_binary("Demo_Shr64", ["int64", "int64"], OpCode::ShrUn, Some("int64"));
    let (large, over_word, end) = shift_labels();
    let cl = reg(Register::Cl);

    let expected = [
        AsmOp::Pop(reg(Register::Ecx)),
        AsmOp::Pop(reg(Register::Ebx)),
        AsmOp::Pop(reg(Register::Eax)),
        AsmOp::Pop(reg(Register::Edx)),
        AsmOp::Cmp { lhs: reg(Register::Ebx), rhs: Operand::Imm(0) },
        AsmOp::Jmp { kind: JumpKind::NotEqual, target: large },
        AsmOp::Cmp { lhs: reg(Register::Ecx), rhs: Operand::Imm(64) },
        AsmOp::Jmp { kind: JumpKind::AboveOrEqual, target: large },
        AsmOp::Cmp { lhs: reg(Register::Ecx), rhs: Operand::Imm(32) },
        AsmOp::Jmp { kind: JumpKind::AboveOrEqual, target: over_word },
        AsmOp::Shrd { dst: reg(Register::Eax), src: Register::Edx, count: cl.to_owned() },
        AsmOp::Shr { dst: reg(Register::Edx), count: cl.to_owned() },
        AsmOp::Jmp { kind: JumpKind::Always, target: end },
        AsmOp::Label(over_word),
        AsmOp::Sub { dst: reg(Register::Ecx), src: Operand::Imm(32) },
        AsmOp::Mov { dst: reg(Register::Eax), src: reg(Register::Edx) },
        AsmOp::Xor { dst: reg(Register::Edx), src: reg(Register::Edx) },
        AsmOp::Shr { dst: reg(Register::Eax), count: cl },
        AsmOp::Jmp { kind: JumpKind::Always, target: end },
        AsmOp::Label(large),
        AsmOp::Xor { dst: reg(Register::Eax), src: reg(Register::Eax) },
        AsmOp::Xor { dst: reg(Register::Edx), src: reg(Register::Edx) },
        AsmOp::Label(end),
        AsmOp::Push(reg(Register::Edx)),
        AsmOp::Push(reg(Register::Eax)),
    ];
    assert!(find_sequence(&asm.ops, &expected).is_some(), "{asm}");
}

#[test]
fn wide_left_shift_moves_the_low_word_up() {
    let asm = lower_binary("Demo_Shl64", ["int64", "int32"], OpCode::Shl, Some("int64"));
    let (_, over_word, end) = shift_labels();
    let cl = reg(Register::Cl);

    let short_count = [
        AsmOp::Shld { dst: reg(Register::Edx), src: Register::Eax, count: cl.to_owned() },
        AsmOp::Shl { dst: reg(Register::Eax), count: cl.to_owned() },
        AsmOp::Jmp { kind: JumpKind::Always, target: end },
    ];
    let over_word_count = [
        AsmOp::Label(over_word),
        AsmOp::Sub { dst: reg(Register::Ecx), src: Operand::Imm(32) },
        AsmOp::Mov { dst: reg(Register::Edx), src: reg(Register::Eax) },
        AsmOp::Xor { dst: reg(Register::Eax), src: reg(Register::Eax) },
        AsmOp::Shl { dst: reg(Register::Edx), count: cl },
    ];
    assert!(find_sequence(&asm.ops, &short_count).is_some(), "{asm}");
    assert!(find_sequence(&asm.ops, &over_word_count).is_some(), "{asm}");
}

#[test]
fn narrow_shift_by_a_wide_count_saturates() {
    let large = LabelKey::internal(2, LabelTag::Large);
    let end = LabelKey::internal(2, LabelTag::End);

    for (opcode, shift, saturated) in [
        (
            OpCode::Shl,
            AsmOp::Shl { dst: reg(Register::Eax), count: reg(Register::Cl) },
            AsmOp::Xor { dst: reg(Register::Eax), src: reg(Register::Eax) },
        ),
        (
            OpCode::Shr,
            AsmOp::Sar { dst: reg(Register::Eax), count: reg(Register::Cl) },
            AsmOp::Sar { dst: reg(Register::Eax), count: Operand::Imm(31) },
        ),
    ] {
        let asm = lower_binary("Demo_ShiftByLong", ["int32", "int64"], opcode, Some("int32"));
        let expected = [
            AsmOp::Pop(reg(Register::Ecx)),
            AsmOp::Pop(reg(Register::Ebx)),
            AsmOp::Pop(reg(Register::Eax)),
            AsmOp::Cmp { lhs: reg(Register::Ebx), rhs: Operand::Imm(0) },
            AsmOp::Jmp { kind: JumpKind::NotEqual, target: large },
            AsmOp::Cmp { lhs: reg(Register::Ecx), rhs: Operand::Imm(32) },
            AsmOp::Jmp { kind: JumpKind::AboveOrEqual, target: large },
            shift,
            AsmOp::Jmp { kind: JumpKind::Always, target: end },
            AsmOp::Label(large),
            saturated,
            AsmOp::Label(end),
            AsmOp::Push(reg(Register::Eax)),
        ];
        assert!(find_sequence(&asm.ops, &expected).is_some(), "{opcode}: {asm}");
    }
}

#[test]
fn wide_ordered_branches_decide_on_the_high_word_first() {
    // 0 ldarg.0, 1 ldarg.1, 2 b<cc>.s -> 4, 3 nop, 4 ret
    let skip = LabelKey::internal(2, LabelTag::Skip);
    let target = LabelKey::node(4);

    for (opcode, high, low) in [
        (OpCode::BltS, JumpKind::Less, JumpKind::Below),
        (OpCode::BgeS, JumpKind::Greater, JumpKind::AboveOrEqual),
        (OpCode::BgtS, JumpKind::Greater, JumpKind::Above),
        (OpCode::BleS, JumpKind::Less, JumpKind::BelowOrEqual),
    ] {
        let f = method("Demo_Branch64", &["int64", "int64"], None);
        let compiled = lower(
            &f,
            vec![
                op(OpCode::Ldarg0),
                op(OpCode::Ldarg1),
                short_branch(opcode, 1),
                op(OpCode::Nop),
                op(OpCode::Ret),
            ],
        )
        .unwrap_or_else(|error| panic!("{opcode} should lower: {}", error.msg));

        let expected = [
            AsmOp::Pop(reg(Register::Ebx)),
            AsmOp::Pop(reg(Register::Ecx)),
            AsmOp::Pop(reg(Register::Eax)),
            AsmOp::Pop(reg(Register::Edx)),
            AsmOp::Cmp { lhs: reg(Register::Edx), rhs: reg(Register::Ecx) },
            AsmOp::Jmp { kind: high, target },
            AsmOp::Jmp { kind: JumpKind::NotEqual, target: skip },
            AsmOp::Cmp { lhs: reg(Register::Eax), rhs: reg(Register::Ebx) },
            AsmOp::Jmp { kind: low, target },
            AsmOp::Label(skip),
        ];
        assert!(find_sequence(&compiled.ops.ops, &expected).is_some(), "{opcode}: {}", compiled.ops);
    }
}

#[test]
fn wide_compares_materialise_through_the_branch_sequence() {
    let is_true = LabelKey::internal(2, LabelTag::True);
    let end = LabelKey::internal(2, LabelTag::End);
    let skip = LabelKey::internal(2, LabelTag::Skip);

    for (opcode, high, low) in [
        (OpCode::Clt, JumpKind::Less, JumpKind::Below),
        (OpCode::Cgt, JumpKind::Greater, JumpKind::Above),
    ] {
        let asm = lower_binary("Demo_Compare64", ["int64", "int64"], opcode, Some("int32"));
        let expected = [
            AsmOp::Pop(reg(Register::Ebx)),
            AsmOp::Pop(reg(Register::Ecx)),
            AsmOp::Pop(reg(Register::Eax)),
            AsmOp::Pop(reg(Register::Edx)),
            AsmOp::Cmp { lhs: reg(Register::Edx), rhs: reg(Register::Ecx) },
            AsmOp::Jmp { kind: high, target: is_true },
            AsmOp::Jmp { kind: JumpKind::NotEqual, target: skip },
            AsmOp::Cmp { lhs: reg(Register::Eax), rhs: reg(Register::Ebx) },
            AsmOp::Jmp { kind: low, target: is_true },
            AsmOp::Label(skip),
            AsmOp::Push(Operand::Imm(0)),
            AsmOp::Jmp { kind: JumpKind::Always, target: end },
            AsmOp::Label(is_true),
            AsmOp::Push(Operand::Imm(1)),
            AsmOp::Label(end),
        ];
        assert!(find_sequence(&asm.ops, &expected).is_some(), "{opcode}: {asm}");
    }
}

#[test]
fn wide_multiply_keeps_only_the_cross_products_low_words() {
    let asm = lower_binary("Demo_Mul64", ["int64", "int64"], OpCode::Mul, Some("int64"));

    let expected = [
        AsmOp::Pop(reg(Register::Ebx)),
        AsmOp::Pop(reg(Register::Ecx)),
        AsmOp::Pop(reg(Register::Eax)),
        AsmOp::Pop(reg(Register::Edx)),
        AsmOp::Imul { dst: Register::Ecx, src: reg(Register::Eax) },
        AsmOp::Imul { dst: Register::Edx, src: reg(Register::Ebx) },
        AsmOp::Add { dst: reg(Register::Ecx), src: reg(Register::Edx) },
        AsmOp::Mul(reg(Register::Ebx)),
        AsmOp::Add { dst: reg(Register::Edx), src: reg(Register::Ecx) },
        AsmOp::Push(reg(Register::Edx)),
        AsmOp::Push(reg(Register::Eax)),
    ];
    assert!(find_sequence(&asm.ops, &expected).is_some(), "{asm}");
}
