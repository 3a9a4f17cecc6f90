#![cfg(test)]

use crate::compiler_messages::compiler_errors::ErrorType;
use crate::il::decoder::decode_method_body;
use crate::il::nodes::MethodBody;
use crate::il::opcodes::OpCode;

#[test]
fn decodes_single_byte_opcodes_in_order() {
    let body = decode_method_body(&[0x17, 0x18, 0x58, 0x2A]).expect("body should decode");

    let ops: Vec<OpCode> = body.nodes.iter().map(|node| node.op).collect();
    assert_eq!(
        ops,
        vec![OpCode::LdcI4One, OpCode::LdcI4Two, OpCode::Add, OpCode::Ret]
    );

    let offsets: Vec<u32> = body.nodes.iter().map(|node| node.offset).collect();
    assert_eq!(offsets, vec![0, 1, 2, 3]);

    for (position, node) in body.nodes.iter().enumerate() {
        assert_eq!(node.position, position);
    }
    assert!(!body.nodes[3].falls_through);
}

#[test]
fn reads_little_endian_operands() {
    let body = decode_method_body(&[0x20, 0x2A, 0x00, 0x00, 0x00, 0x2A]).expect("body should decode");

    let ldc = &body.nodes[0];
    assert_eq!(ldc.op, OpCode::LdcI4);
    assert_eq!(ldc.operand_i32().expect("i32 operand"), 42);
    assert_eq!(ldc.next_offset, 5);
    assert_eq!(body.nodes[1].offset, 5);
}

#[test]
fn decodes_two_byte_opcodes() {
    let body = decode_method_body(&[0xFE, 0x01, 0xFE, 0x0C, 0x03, 0x00]).expect("body should decode");

    assert_eq!(body.nodes[0].op, OpCode::Ceq);
    assert_eq!(body.nodes[0].next_offset, 2);
    assert_eq!(body.nodes[1].op, OpCode::Ldloc);
    assert_eq!(body.nodes[1].variable_index().expect("variable index"), 3);
}

#[test]
fn unknown_opcode_is_a_decode_error_at_its_offset() {
    let error = decode_method_body(&[0x00, 0x24]).expect_err("0x24 isn't an opcode");

    assert_eq!(error.error_type, ErrorType::Decode);
    assert_eq!(error.location.offset, Some(1));
    assert!(error.msg.contains("0x24"), "unexpected message: {}", error.msg);
}

#[test]
fn truncated_operand_is_a_decode_error() {
    let error = decode_method_body(&[0x20, 0x01, 0x02]).expect_err("ldc.i4 needs 4 operand bytes");

    assert_eq!(error.error_type, ErrorType::Decode);
    assert_eq!(error.location.offset, Some(0));
}

#[test]
fn short_branch_links_to_the_target_node() {
    // br.s +1 over a nop onto ret
    let body = decode_method_body(&[0x2B, 0x01, 0x00, 0x2A]).expect("body should decode");

    let branch = &body.nodes[0];
    assert_eq!(branch.branch_targets, vec![2]);
    assert!(!branch.falls_through);
    assert_eq!(body.index_of_offset(3), Some(2));
}

#[test]
fn backward_branch_links() {
    // nop; br.s -3 back onto the nop
    let body = decode_method_body(&[0x00, 0x2B, 0xFD]).expect("body should decode");
    assert_eq!(body.nodes[1].branch_targets, vec![0]);
}

#[test]
fn branch_into_the_middle_of_an_instruction_is_rejected() {
    // br.s +1 lands on the second byte of ldc.i4
    let error = decode_method_body(&[0x2B, 0x01, 0x20, 0x00, 0x00, 0x00, 0x00, 0x2A])
        .expect_err("target isn't an instruction start");

    assert_eq!(error.error_type, ErrorType::Decode);
    assert!(error.msg.contains("IL_0003"), "unexpected message: {}", error.msg);
}

#[test]
fn switch_links_every_case_in_operand_order() {
    let bytes = [
        0x45, // switch
        0x02, 0x00, 0x00, 0x00, // two cases
        0x01, 0x00, 0x00, 0x00, // case 0 -> ret
        0x00, 0x00, 0x00, 0x00, // case 1 -> nop
        0x00, // nop
        0x2A, // ret
    ];
    let body = decode_method_body(&bytes).expect("body should decode");

    let switch = &body.nodes[0];
    assert_eq!(switch.next_offset, 13);
    assert_eq!(switch.branch_targets, vec![2, 1]);
    assert!(switch.falls_through);
    assert_eq!(switch.branch_displacements().expect("displacements"), vec![1, 0]);
}

#[test]
fn immediate_operands_are_not_branches() {
    let body = decode_method_body(&[0x1F, 0x05, 0x2A]).expect("body should decode");

    assert!(body.nodes[0].branch_targets.is_empty());
    assert_eq!(body.nodes[0].operand_i8().expect("i8 operand"), 5);
}

#[test]
fn zero_distance_branch_is_detected() {
    let body = MethodBody::from_instructions(vec![
        (OpCode::BrS, vec![0]),
        (OpCode::Ret, Vec::new()),
    ])
    .expect("body should link");

    assert!(body.nodes[0].is_zero_distance_branch(&body));
}

#[test]
fn from_instructions_computes_offsets() {
    let body = MethodBody::from_instructions(vec![
        (OpCode::LdcI8, 7i64.to_le_bytes().to_vec()),
        (OpCode::Ceq, Vec::new()),
        (OpCode::Ret, Vec::new()),
    ])
    .expect("body should link");

    let offsets: Vec<u32> = body.nodes.iter().map(|node| node.offset).collect();
    assert_eq!(offsets, vec![0, 9, 11]);
    assert_eq!(body.nodes[0].operand_i64().expect("i64 operand"), 7);
}

#[test]
fn empty_body_decodes_to_no_nodes() {
    let body = decode_method_body(&[]).expect("empty body is valid");
    assert!(body.is_empty());
}
