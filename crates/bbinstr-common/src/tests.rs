use proptest::prelude::*;

use super::range::{first_overlap, is_disjoint, overlaps};
use super::{
    BlockGraph, BlockType, Condition, DataRange, Error, ImageKind, Label, LabelAttributes, Offset,
    RangePair, Reference, ReferenceKind, RelativeAddress, RelativeAddressRange, Size,
    SourceRanges,
};

fn range(start: u32, size: Size) -> RelativeAddressRange {
    RelativeAddressRange::new(RelativeAddress(start), size)
}

#[test]
fn ranges_order_by_start_then_size() {
    let mut ranges = vec![range(0x20, 4), range(0x10, 8), range(0x10, 2)];
    ranges.sort();

    assert_eq!(vec![range(0x10, 2), range(0x10, 8), range(0x20, 4)], ranges);
}

#[test]
fn adjacent_ranges_do_not_overlap() {
    assert!(!overlaps(&range(0x10, 0x10), &range(0x20, 4)));
    assert!(overlaps(&range(0x10, 0x11), &range(0x20, 4)));
}

#[test]
fn first_overlap_finds_the_earlier_range() {
    let sorted = [range(0, 4), range(4, 4), range(6, 4), range(12, 1)];

    assert_eq!(Some(1), first_overlap(&sorted));
    assert!(!is_disjoint(&sorted));
    assert!(is_disjoint(&sorted[..2]));
    assert!(is_disjoint::<RelativeAddress>(&[]));
}

#[test]
fn range_containment() {
    let outer = range(0x100, 0x10);

    assert!(outer.contains(RelativeAddress(0x100)));
    assert!(!outer.contains(RelativeAddress(0x110)));
    assert!(outer.contains_range(&range(0x108, 8)));
    assert!(!outer.contains_range(&range(0x108, 9)));
    assert!(outer.intersects(&range(0x10f, 4)));
    assert!(!outer.intersects(&range(0x110, 4)));
}

#[test]
fn source_ranges_reject_intersecting_pairs() {
    let mut ranges = SourceRanges::new();

    assert!(ranges.push(DataRange::new(0, 4), range(0x1000, 4)));
    assert!(ranges.push(DataRange::new(8, 4), range(0x1008, 4)));
    assert!(!ranges.push(DataRange::new(2, 4), range(0x2000, 4)));
    assert!(ranges.push(DataRange::new(4, 4), range(0x3000, 4)));

    let starts: Vec<_> = ranges.iter().map(|pair| pair.data.start()).collect();
    assert_eq!(vec![0, 4, 8], starts);
}

#[test]
fn find_range_pair_requires_containment() {
    let mut ranges = SourceRanges::new();
    ranges.push(DataRange::new(0, 4), range(0x1000, 4));
    ranges.push(DataRange::new(6, 4), range(0x1006, 4));

    let pair = ranges.find_range_pair(DataRange::new(7, 1)).unwrap();
    assert_eq!(RelativeAddress(0x1006), pair.source.start());

    assert!(ranges.find_range_pair(DataRange::new(4, 1)).is_none());
    assert!(ranges.find_range_pair(DataRange::new(3, 2)).is_none());
    assert!(ranges.find_range_pair(DataRange::new(-1, 1)).is_none());
}

#[test]
fn translate_extrapolates_past_the_pair() {
    let pair = RangePair::new(DataRange::new(4, 2), range(0x1000, 2));

    assert_eq!(Some(RelativeAddress(0x1004)), pair.translate(8));
    assert_eq!(Some(RelativeAddress(0x0ffc)), pair.translate(0));
    assert_eq!(None, RangePair::new(DataRange::new(4, 2), range(2, 2)).translate(0));
}

#[test]
fn condition_inverse_pairs_up() {
    assert_eq!(Condition::NotEqual, Condition::Equal.inverse());
    assert_eq!(Condition::LessEqual, Condition::Greater.inverse());
    assert_eq!(Some(Condition::Below), Condition::from_code(2));
    assert_eq!(None, Condition::from_code(16));
}

#[test]
fn references_must_fit_the_block() {
    let mut graph = BlockGraph::new(ImageKind::Exe);
    let target = graph.add_block(BlockType::Code, 16, "target");
    let holder = graph.add_block(BlockType::Data, 8, "holder");

    let block = graph.block_mut(holder).unwrap();
    assert!(block.set_reference(4, Reference::absolute(target, 0)).unwrap());
    assert!(!block.set_reference(4, Reference::absolute(target, 4)).unwrap());
    assert!(block.set_reference(5, Reference::absolute(target, 0)).is_err());
    assert!(block.set_reference(-1, Reference::absolute(target, 0)).is_err());

    assert_eq!(vec![(holder, 4)], graph.referrers(target));
    assert!(matches!(graph.remove_block(target), Err(Error::BlockInUse(_))));
}

#[test]
fn entry_point_lives_in_the_header() {
    let mut graph = BlockGraph::new(ImageKind::Dll);
    let header = graph.add_block(BlockType::Data, 0x40, "header");
    let main = graph.add_block(BlockType::Code, 4, "main");

    assert_eq!(None, graph.entry_point(header).unwrap());

    let entry = Reference::new(ReferenceKind::Relative, 4, main, 0, 0);
    graph.set_entry_point(header, entry).unwrap();

    assert_eq!(Some(entry), graph.entry_point(header).unwrap());
}

#[test]
fn append_and_write_grow_initialized_data() {
    let mut graph = BlockGraph::new(ImageKind::Exe);
    let id = graph.add_block(BlockType::Data, 2, "table");
    let block = graph.block_mut(id).unwrap();

    assert_eq!(2, block.append_zeroes(4));
    assert_eq!(6, block.size);

    block.write(2, &[1, 2, 3, 4]).unwrap();
    assert_eq!(vec![0, 0, 1, 2, 3, 4], block.data);
    assert!(matches!(
        block.write(4, &[0; 4]),
        Err(Error::DataOutOfBounds { offset: 4, .. })
    ));
    assert!(matches!(
        block.write(-1, &[0]),
        Err(Error::DataOutOfBounds { offset: -1, .. })
    ));
    assert_eq!(vec![0, 0, 1, 2, 3, 4], block.data);
}

#[test]
fn graph_edits_out_of_bounds_fail_without_changes() {
    let mut graph = BlockGraph::new(ImageKind::Exe);
    let target = graph.add_block(BlockType::Code, 4, "target");
    let holder = graph.add_block(BlockType::Data, 8, "holder");

    let block = graph.block_mut(holder).unwrap();
    assert!(matches!(
        block.set_label(9, Label::new("past", LabelAttributes::DATA)),
        Err(Error::LabelOutOfBounds { offset: 9, .. })
    ));
    assert!(block.set_label(8, Label::new("end", LabelAttributes::DATA)).is_ok());
    assert!(matches!(
        block.set_reference(6, Reference::absolute(target, 0)),
        Err(Error::ReferenceOutOfBounds { offset: 6, .. })
    ));
    assert_eq!(1, block.labels.len());
    assert!(block.references.is_empty());

    assert!(graph.remove_block(target).is_ok());
    assert!(matches!(
        graph.remove_block(target),
        Err(Error::UnknownBlock(id)) if id == target
    ));
}

proptest! {
    #[test]
    fn translation_round_trips(
        data_start in 0i32..0x10000,
        size in 1u32..0x1000,
        source_start in 0u32..0x7fff_0000,
        within in 0u32..0x1000,
    ) {
        let within = within % size;
        let pair = RangePair::new(
            DataRange::new(data_start, size),
            range(source_start, size),
        );

        let offset = data_start + within as Offset;
        let address = pair.translate(offset).unwrap();

        prop_assert!(pair.source.contains(address));
        prop_assert_eq!(Some(offset), pair.offset_of(address));
    }
}
