use std::collections::{BTreeMap, HashMap};

use log::trace;

use bbinstr_common::{
    BasicBlockKind, BasicBlockSubGraph, BlockGraph, BlockId, Label, LabelAttributes, Offset,
    Reference,
};

use crate::encode::encode_subgraph;
use crate::{Error, Result};

/// Write a subgraph back over the block it was decomposed from.
///
/// Every reference to the block, from other blocks or from itself, must point at the start of a
/// basic block (or at the very end of the block) and is moved to wherever that basic block ends up.
pub fn build(graph: &mut BlockGraph, subgraph: &BasicBlockSubGraph) -> Result<()> {
    let id = subgraph.original;
    let old_size = graph.block(id)?.size;

    let encoded = encode_subgraph(subgraph)?;

    let mut moves: HashMap<Offset, Offset> = subgraph
        .blocks
        .iter()
        .filter_map(|block| Some((block.offset, *encoded.addresses.get(&block.id)?)))
        .collect();
    moves.insert(old_size as Offset, encoded.size() as Offset);

    let mut fixups = Vec::new();
    for block in graph.blocks().filter(|block| block.id != id) {
        for (at, reference) in block.references.iter() {
            if reference.referenced == id {
                fixups.push((block.id, *at, moved(block.id, reference, &moves)?));
            }
        }
    }

    let mut references = encoded.references.clone();
    for reference in references.values_mut() {
        if reference.referenced == id {
            *reference = moved(id, reference, &moves)?;
        }
    }

    let old_labels = &graph.block(id)?.labels;
    let mut labels = BTreeMap::new();
    for block in subgraph.blocks.iter() {
        let Some(at) = encoded.addresses.get(&block.id).copied() else {
            return Err(Error::UnknownBasicBlock(block.id));
        };

        let label = match old_labels.get(&block.offset) {
            Some(label) => label.clone(),
            None => {
                let attributes = match block.kind {
                    BasicBlockKind::Code => LabelAttributes::CODE,
                    BasicBlockKind::Data => LabelAttributes::DATA,
                };

                Label::new(block.name.clone(), attributes)
            }
        };

        labels.insert(at, label);
    }

    let target = graph.block_mut(id)?;
    target.size = encoded.size();
    target.alignment = subgraph.alignment;
    target.attributes = subgraph.attributes;
    target.data = encoded.data;
    target.references = references;
    target.labels = labels;
    target.source_ranges = encoded.source_ranges;
    target.code = encoded.code;

    for (referrer, at, reference) in fixups {
        graph.block_mut(referrer)?.set_reference(at, reference)?;
    }

    trace!(
        "rebuilt `{}` from {} basic blocks ({old_size} -> {} bytes)",
        subgraph.name,
        subgraph.blocks.len(),
        graph.block(id)?.size
    );

    Ok(())
}

fn moved(
    referrer: BlockId,
    reference: &Reference,
    moves: &HashMap<Offset, Offset>,
) -> Result<Reference> {
    let offset = moves
        .get(&reference.offset)
        .copied()
        .ok_or(Error::ReferenceInsideBasicBlock {
            referrer,
            offset: reference.offset,
        })?;

    let base = moves.get(&reference.base).copied().unwrap_or(offset);

    Ok(Reference {
        offset,
        base,
        ..*reference
    })
}
