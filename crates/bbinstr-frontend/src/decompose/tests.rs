use bbinstr_common::{
    BasicBlockId, BasicBlockKind, BlockAttributes, BlockGraph, BlockId, BlockType, Branch,
    Condition, Decoded, Flow, ImageKind, Instruction, Label, LabelAttributes, Reference,
    RelativeAddress, SourceRange, SourceRanges,
};

use super::{decompose, is_decomposable};
use crate::Error;

fn code_block(graph: &mut BlockGraph, name: &str, data: &[u8], code: &[Decoded]) -> BlockId {
    let id = graph.add_block(BlockType::Code, data.len() as u32, name);
    let block = graph.block_mut(id).unwrap();
    block.data = data.to_vec();
    block.code = code.to_vec();
    block.source_ranges = SourceRanges::contiguous(RelativeAddress(0x1000), data.len() as u32);
    id
}

fn conditional(graph: &mut BlockGraph) -> BlockId {
    let data = [
        0x55, 0x8b, 0xec, 0x83, 0x7d, 0x08, 0x00, 0x74, 0x03, 0x33, 0xc0, 0x40, 0x5d, 0xc3,
    ];

    let code = [
        Decoded::new(0, 1, Flow::Next),
        Decoded::new(1, 2, Flow::Next),
        Decoded::new(3, 4, Flow::Next),
        Decoded::new(7, 2, Flow::Branch(Condition::Equal, 12)),
        Decoded::new(9, 2, Flow::Next),
        Decoded::new(11, 1, Flow::Next),
        Decoded::new(12, 1, Flow::Next),
        Decoded::new(13, 1, Flow::Exit),
    ];

    code_block(graph, "main", &data, &code)
}

#[test]
fn conditional_splits_into_three() {
    let mut graph = BlockGraph::new(ImageKind::Exe);
    let id = conditional(&mut graph);
    let subgraph = decompose(graph.block(id).unwrap()).unwrap();

    let shape: Vec<_> = subgraph
        .blocks
        .iter()
        .map(|block| (block.offset, block.size, block.instructions.len()))
        .collect();
    assert_eq!(vec![(0, 9, 3), (9, 3, 2), (12, 2, 2)], shape);

    let first = &subgraph.blocks[0];
    assert_eq!(2, first.successors.len());
    assert_eq!(Branch::If(Condition::Equal), first.successors[0].branch);
    assert_eq!(BasicBlockId(2), first.successors[0].target);
    let taken = &first.successors[0];
    assert_eq!((7, 2), (taken.instruction_offset, taken.instruction_size));
    assert_eq!(Branch::If(Condition::NotEqual), first.successors[1].branch);
    assert_eq!(BasicBlockId(1), first.successors[1].target);
    assert!(!first.successors[1].has_instruction());

    let second = &subgraph.blocks[1];
    assert_eq!(1, second.successors.len());
    assert_eq!(Branch::Always, second.successors[0].branch);
    assert_eq!(BasicBlockId(2), second.successors[0].target);

    assert!(subgraph.blocks[2].successors.is_empty());
}

#[test]
fn raw_instructions_keep_their_source() {
    let mut graph = BlockGraph::new(ImageKind::Exe);
    let id = conditional(&mut graph);
    let subgraph = decompose(graph.block(id).unwrap()).unwrap();

    let Instruction::Raw(cmp) = &subgraph.blocks[0].instructions[2] else {
        panic!("expected a raw instruction");
    };
    assert_eq!(vec![0x83, 0x7d, 0x08, 0x00], cmp.data);
    assert_eq!(Some(SourceRange::new(RelativeAddress(0x1003), 4)), cmp.source);
    assert!(!cmp.exits);

    let Instruction::Raw(ret) = &subgraph.blocks[2].instructions[1] else {
        panic!("expected a raw instruction");
    };
    assert!(ret.exits);
}

#[test]
fn unconditional_jump_becomes_a_successor() {
    let mut graph = BlockGraph::new(ImageKind::Exe);
    let data = [0xb8, 0x01, 0x00, 0x00, 0x00, 0xeb, 0x00, 0xc3];
    let code = [
        Decoded::new(0, 5, Flow::Next),
        Decoded::new(5, 2, Flow::Jump(7)),
        Decoded::new(7, 1, Flow::Exit),
    ];
    let id = code_block(&mut graph, "jumps", &data, &code);

    let subgraph = decompose(graph.block(id).unwrap()).unwrap();
    assert_eq!(2, subgraph.blocks.len());

    let first = &subgraph.blocks[0];
    assert_eq!(1, first.instructions.len());
    assert_eq!(7, first.size);
    assert_eq!(Branch::Always, first.successors[0].branch);
    assert!(first.successors[0].has_instruction());
}

#[test]
fn data_labels_start_data_blocks() {
    let mut graph = BlockGraph::new(ImageKind::Exe);
    let data = [0xc3, 0x01, 0x02, 0x03];
    let id = code_block(&mut graph, "table", &data, &[Decoded::new(0, 1, Flow::Exit)]);
    graph
        .block_mut(id)
        .unwrap()
        .set_label(1, Label::new("jump_table", LabelAttributes::DATA))
        .unwrap();

    let subgraph = decompose(graph.block(id).unwrap()).unwrap();
    assert_eq!(2, subgraph.blocks.len());

    let table = &subgraph.blocks[1];
    assert_eq!(BasicBlockKind::Data, table.kind);
    assert_eq!("jump_table", table.name);
    assert_eq!(vec![0x01, 0x02, 0x03], table.data);
    assert_eq!(1, subgraph.code_blocks().count());
}

#[test]
fn falling_off_the_end_is_an_error() {
    let mut graph = BlockGraph::new(ImageKind::Exe);
    let id = code_block(&mut graph, "nop", &[0x90], &[Decoded::new(0, 1, Flow::Next)]);

    assert!(matches!(
        decompose(graph.block(id).unwrap()),
        Err(Error::FallsOffEnd { offset: 0, .. })
    ));
}

#[test]
fn branch_into_an_instruction_is_an_error() {
    let mut graph = BlockGraph::new(ImageKind::Exe);
    let data = [0x74, 0x01, 0xb8, 0x01, 0x00, 0x00, 0x00, 0xc3];
    let code = [
        Decoded::new(0, 2, Flow::Branch(Condition::Equal, 3)),
        Decoded::new(2, 5, Flow::Next),
        Decoded::new(7, 1, Flow::Exit),
    ];
    let id = code_block(&mut graph, "odd", &data, &code);

    assert!(matches!(
        decompose(graph.block(id).unwrap()),
        Err(Error::BadBranchTarget { offset: 3, .. })
    ));
}

#[test]
fn branches_with_references_are_refused() {
    let mut graph = BlockGraph::new(ImageKind::Exe);
    let other = graph.add_block(BlockType::Code, 4, "other");
    let data = [0xe9, 0x00, 0x00, 0x00, 0x00, 0xc3];
    let code = [
        Decoded::new(0, 5, Flow::Jump(5)),
        Decoded::new(5, 1, Flow::Exit),
    ];
    let id = code_block(&mut graph, "far", &data, &code);
    graph
        .block_mut(id)
        .unwrap()
        .set_reference(1, Reference::absolute(other, 0))
        .unwrap();

    assert!(matches!(
        decompose(graph.block(id).unwrap()),
        Err(Error::ReferenceInBranch { offset: 0, .. })
    ));
}

#[test]
fn unsafe_blocks_are_not_decomposable() {
    let mut graph = BlockGraph::new(ImageKind::Exe);
    let good = code_block(&mut graph, "good", &[0xc3], &[Decoded::new(0, 1, Flow::Exit)]);
    let inline = code_block(&mut graph, "inline", &[0xc3], &[Decoded::new(0, 1, Flow::Exit)]);
    let data = graph.add_block(BlockType::Data, 4, "data");
    let empty = graph.add_block(BlockType::Code, 4, "empty");

    graph.block_mut(inline).unwrap().attributes = BlockAttributes::HAS_INLINE_ASSEMBLY;

    assert!(is_decomposable(graph.block(good).unwrap()));
    assert!(!is_decomposable(graph.block(inline).unwrap()));
    assert!(!is_decomposable(graph.block(data).unwrap()));
    assert!(!is_decomposable(graph.block(empty).unwrap()));

    assert!(matches!(
        decompose(graph.block(data).unwrap()),
        Err(Error::NotCode(_))
    ));
}
