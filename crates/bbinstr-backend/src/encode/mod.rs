mod block;
mod instruction;
mod relocation;

use std::collections::{BTreeMap, HashMap};

use bbinstr_common::{
    BasicBlockId, BasicBlockSubGraph, Decoded, Flow, Instruction, Offset, Reference, Size,
    SourceRanges,
};

use crate::Result;
use relocation::Relocation;

/// Machine code for a sequence of instructions or a whole subgraph, ready to become the contents
/// of a block.
#[derive(Clone, Debug, Default)]
pub struct Encoded {
    pub data: Vec<u8>,
    pub references: BTreeMap<Offset, Reference>,
    pub source_ranges: SourceRanges,
    pub code: Vec<Decoded>,

    /// Where each basic block starts in `data`.
    pub addresses: HashMap<BasicBlockId, Offset>,
}

impl Encoded {
    pub fn size(&self) -> Size {
        self.data.len() as Size
    }
}

/// Encode a straight run of instructions, such as a thunk.
pub fn encode_instructions(instructions: &[Instruction]) -> Result<Encoded> {
    let mut encoder = Encoder::default();
    for instruction in instructions {
        encoder.encode_instruction(instruction)?;
    }

    Ok(encoder.finish())
}

/// Lay out and encode every basic block of a subgraph in order.
pub fn encode_subgraph(subgraph: &BasicBlockSubGraph) -> Result<Encoded> {
    let mut encoder = Encoder::new(subgraph.source_ranges.clone());

    for (index, block) in subgraph.blocks.iter().enumerate() {
        let next = subgraph.blocks.get(index + 1).map(|next| next.id);
        encoder.encode_block(block, next)?;
    }

    encoder.perform_relocations()?;
    Ok(encoder.finish())
}

#[derive(Debug, Default)]
struct Encoder {
    addresses: HashMap<BasicBlockId, Offset>,
    relocations: HashMap<BasicBlockId, Vec<Relocation>>,
    code: Vec<u8>,
    references: BTreeMap<Offset, Reference>,
    source_ranges: SourceRanges,
    decoded: Vec<Decoded>,

    /// Source ranges of the block being rebuilt, for mapping branches back to where they came
    /// from.
    original: SourceRanges,
}

impl Encoder {
    fn new(original: SourceRanges) -> Self {
        Self {
            original,
            ..Default::default()
        }
    }

    fn offset(&self) -> Offset {
        self.code.len() as Offset
    }

    /// Note an instruction spanning from `start` to the current offset. Returns its index in the
    /// decoded table.
    fn record(&mut self, start: Offset, flow: Flow) -> usize {
        let size = (self.offset() - start) as Size;
        self.decoded.push(Decoded::new(start, size, flow));
        self.decoded.len() - 1
    }

    fn finish(self) -> Encoded {
        Encoded {
            data: self.code,
            references: self.references,
            source_ranges: self.source_ranges,
            code: self.decoded,
            addresses: self.addresses,
        }
    }
}
