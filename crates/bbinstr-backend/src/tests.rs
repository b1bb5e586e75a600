use bbinstr_common::{
    BlockGraph, BlockId, BlockType, Condition, DataRange, Decoded, Displacement, Flow, Immediate,
    ImageKind, Instruction, Operand, RawInstruction, Reference, ReferenceKind, RelativeAddress,
    SourceRange, SourceRanges, ValueSize,
};
use bbinstr_frontend::decompose;

use crate::{build, encode_instructions, pretty_subgraph, BasicBlockAssembler, Error};

fn conditional(graph: &mut BlockGraph) -> BlockId {
    let data = [
        0x55, 0x8b, 0xec, 0x83, 0x7d, 0x08, 0x00, 0x74, 0x03, 0x33, 0xc0, 0x40, 0x5d, 0xc3,
    ];

    let id = graph.add_block(BlockType::Code, data.len() as u32, "main");
    let block = graph.block_mut(id).unwrap();
    block.data = data.to_vec();
    block.source_ranges = SourceRanges::contiguous(RelativeAddress(0x1000), data.len() as u32);
    block.code = vec![
        Decoded::new(0, 1, Flow::Next),
        Decoded::new(1, 2, Flow::Next),
        Decoded::new(3, 4, Flow::Next),
        Decoded::new(7, 2, Flow::Branch(Condition::Equal, 12)),
        Decoded::new(9, 2, Flow::Next),
        Decoded::new(11, 1, Flow::Next),
        Decoded::new(12, 1, Flow::Next),
        Decoded::new(13, 1, Flow::Exit),
    ];

    id
}

#[test]
fn pushes_and_calls_encode_exactly() {
    let mut graph = BlockGraph::new(ImageKind::Exe);
    let data = graph.add_block(BlockType::Data, 4, "data");
    let iat = graph.add_block(BlockType::Data, 8, "iat");

    let encoded = encode_instructions(&[
        Instruction::Push(Operand::Immediate(Immediate::Value(7, ValueSize::Dword))),
        Instruction::Push(Operand::Immediate(Immediate::Block(data, 0))),
        Instruction::Call(Operand::Memory(Displacement::new(iat, 4))),
        Instruction::Push(Operand::Immediate(Immediate::Value(0x7f, ValueSize::Byte))),
        Instruction::Jump(Operand::Memory(Displacement::new(iat, 0))),
    ])
    .unwrap();

    assert_eq!(
        vec![
            0x68, 0x07, 0x00, 0x00, 0x00, //
            0x68, 0x00, 0x00, 0x00, 0x00, //
            0xff, 0x15, 0x00, 0x00, 0x00, 0x00, //
            0x6a, 0x7f, //
            0xff, 0x25, 0x00, 0x00, 0x00, 0x00,
        ],
        encoded.data
    );

    assert_eq!(Some(&Reference::absolute(data, 0)), encoded.references.get(&6));
    assert_eq!(Some(&Reference::absolute(iat, 4)), encoded.references.get(&12));
    assert_eq!(Some(&Reference::absolute(iat, 0)), encoded.references.get(&20));
    assert_eq!(3, encoded.references.len());

    let flows: Vec<_> = encoded.code.iter().map(|d| (d.offset, d.size, d.flow)).collect();
    assert_eq!(
        vec![
            (0, 5, Flow::Next),
            (5, 5, Flow::Next),
            (10, 6, Flow::Next),
            (16, 2, Flow::Next),
            (18, 6, Flow::Exit),
        ],
        flows
    );
    assert!(encoded.source_ranges.is_empty());
}

#[test]
fn direct_calls_are_pc_relative() {
    let mut graph = BlockGraph::new(ImageKind::Exe);
    let callee = graph.add_block(BlockType::Code, 1, "callee");

    let encoded = encode_instructions(&[Instruction::Call(Operand::Immediate(
        Immediate::Block(callee, 0),
    ))])
    .unwrap();

    assert_eq!(vec![0xe8, 0, 0, 0, 0], encoded.data);
    assert_eq!(ReferenceKind::PcRelative, encoded.references[&1].kind);
}

#[test]
fn bad_operands_are_rejected() {
    let too_big = Instruction::Push(Operand::Immediate(Immediate::Value(0x100, ValueSize::Byte)));
    assert!(matches!(
        encode_instructions(&[too_big]),
        Err(Error::ValueTooLarge(0x100))
    ));

    let call = Instruction::Call(Operand::Immediate(Immediate::Value(0, ValueSize::Dword)));
    assert!(matches!(
        encode_instructions(&[call]),
        Err(Error::InvalidOperand("call"))
    ));
}

#[test]
fn raw_instructions_keep_bytes_and_source() {
    let raw = RawInstruction {
        data: vec![0x33, 0xc0],
        references: Default::default(),
        source: Some(SourceRange::new(RelativeAddress(0x2000), 2)),
        exits: false,
    };

    let encoded = encode_instructions(&[
        Instruction::Push(Operand::Immediate(Immediate::Value(1, ValueSize::Byte))),
        Instruction::Raw(raw),
    ])
    .unwrap();

    let pair = encoded
        .source_ranges
        .find_range_pair(DataRange::new(2, 2))
        .unwrap();
    assert_eq!(RelativeAddress(0x2000), pair.source.start());
    assert!(encoded
        .source_ranges
        .find_range_pair(DataRange::new(0, 1))
        .is_none());
}

#[test]
fn assembler_inserts_in_call_order() {
    let mut graph = BlockGraph::new(ImageKind::Exe);
    let data = graph.add_block(BlockType::Data, 4, "data");

    let original = Instruction::Push(Operand::Immediate(Immediate::Value(9, ValueSize::Dword)));
    let mut instructions = vec![original.clone()];

    let mut assembler = BasicBlockAssembler::new(0, &mut instructions);
    assembler.push(Immediate::Value(1, ValueSize::Dword));
    assembler.push_memory(Displacement::new(data, 0));
    assembler.call(Operand::Memory(Displacement::new(data, 0)));
    assert_eq!(3, assembler.position());

    assert_eq!(4, instructions.len());
    assert_eq!(
        Instruction::Push(Operand::Immediate(Immediate::Value(1, ValueSize::Dword))),
        instructions[0]
    );
    assert_eq!(
        Instruction::Push(Operand::Memory(Displacement::new(data, 0))),
        instructions[1]
    );
    assert!(matches!(instructions[2], Instruction::Call(_)));
    assert_eq!(original, instructions[3]);
}

#[test]
fn build_lays_out_and_elides_fall_throughs() {
    let mut graph = BlockGraph::new(ImageKind::Exe);
    let main = conditional(&mut graph);
    let subgraph = decompose(graph.block(main).unwrap()).unwrap();

    build(&mut graph, &subgraph).unwrap();

    let block = graph.block(main).unwrap();
    assert_eq!(
        vec![
            0x55, 0x8b, 0xec, 0x83, 0x7d, 0x08, 0x00, //
            0x0f, 0x84, 0x03, 0x00, 0x00, 0x00, //
            0x33, 0xc0, 0x40, //
            0x5d, 0xc3,
        ],
        block.data
    );
    assert_eq!(18, block.size);
    assert_eq!(Flow::Branch(Condition::Equal, 16), block.code[3].flow);
    assert_eq!(Flow::Exit, block.code[7].flow);

    let branch = block
        .source_ranges
        .find_range_pair(DataRange::new(7, 6))
        .unwrap();
    assert_eq!(SourceRange::new(RelativeAddress(0x1007), 2), branch.source);

    let starts: Vec<_> = block.labels.keys().copied().collect();
    assert_eq!(vec![0, 13, 16], starts);

    let again = decompose(block).unwrap();
    let shape: Vec<_> = again.blocks.iter().map(|b| (b.offset, b.size)).collect();
    assert_eq!(vec![(0, 13), (13, 3), (16, 2)], shape);
}

#[test]
fn build_moves_referrers_with_their_basic_block() {
    let mut graph = BlockGraph::new(ImageKind::Exe);
    let main = conditional(&mut graph);
    let table = graph.add_block(BlockType::Data, 8, "table");
    {
        let table = graph.block_mut(table).unwrap();
        table.set_reference(0, Reference::absolute(main, 0)).unwrap();
        table.set_reference(4, Reference::absolute(main, 12)).unwrap();
    }

    let subgraph = decompose(graph.block(main).unwrap()).unwrap();
    build(&mut graph, &subgraph).unwrap();

    let table = graph.block(table).unwrap();
    assert_eq!(0, table.references[&0].offset);
    assert_eq!(16, table.references[&4].offset);
}

#[test]
fn referrers_into_the_middle_fail_the_build() {
    let mut graph = BlockGraph::new(ImageKind::Exe);
    let main = conditional(&mut graph);
    let table = graph.add_block(BlockType::Data, 4, "table");
    graph
        .block_mut(table)
        .unwrap()
        .set_reference(0, Reference::absolute(main, 3))
        .unwrap();

    let subgraph = decompose(graph.block(main).unwrap()).unwrap();
    assert!(matches!(
        build(&mut graph, &subgraph),
        Err(Error::ReferenceInsideBasicBlock { offset: 3, .. })
    ));
    assert_eq!(14, graph.block(main).unwrap().size);
}

#[test]
fn listing_names_blocks_and_targets() {
    let mut graph = BlockGraph::new(ImageKind::Exe);
    let main = conditional(&mut graph);
    let subgraph = decompose(graph.block(main).unwrap()).unwrap();

    let listing = pretty_subgraph(&graph, &subgraph);

    assert!(listing.starts_with("main:\n"));
    assert!(listing.contains("  main+0x9:"));
    assert!(listing.contains("jequal main+0xc"));
    assert!(listing.contains("        push ebp"));
    assert!(listing.contains("        inc eax"));
    assert!(listing.contains("        pop ebp"));
    assert!(listing.contains("        ret"));
    assert!(!listing.contains("raw"));
}

#[test]
fn listing_keeps_undecodable_bytes() {
    let mut graph = BlockGraph::new(ImageKind::Exe);
    let id = graph.add_block(BlockType::Code, 2, "odd");
    let block = graph.block_mut(id).unwrap();
    block.data = vec![0x0f, 0xc3];
    block.source_ranges = SourceRanges::contiguous(RelativeAddress(0x2000), 2);
    block.code = vec![Decoded::new(0, 1, Flow::Next), Decoded::new(1, 1, Flow::Exit)];

    let subgraph = decompose(graph.block(id).unwrap()).unwrap();
    let listing = pretty_subgraph(&graph, &subgraph);

    assert!(listing.contains("        db 0x0f"));
    assert!(listing.contains("        ret"));
}
