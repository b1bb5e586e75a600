pub mod address;
pub mod graph;
pub mod instruction;
pub mod range;
pub mod source;
pub mod subgraph;

pub use address::{Address, Offset, RelativeAddress, Size, NO_OFFSET};
pub use graph::{
    Block, BlockAttributes, BlockGraph, BlockId, BlockType, ImageKind, Label, LabelAttributes,
    Reference, ReferenceKind, Section, SectionId, ENTRY_POINT_OFFSET,
};
pub use instruction::{
    Condition, Decoded, Displacement, Flow, Immediate, Instruction, Operand, RawInstruction,
    ValueSize,
};
pub use range::{AddressRange, DataRange, RelativeAddressRange, SourceRange};
pub use source::{RangePair, SourceRanges};
pub use subgraph::{BasicBlock, BasicBlockId, BasicBlockKind, BasicBlockSubGraph, Branch, Successor};

use thiserror::Error;

#[cfg(test)]
mod tests;

#[derive(Debug, Error)]
pub enum Error {
    #[error("block {0:?} does not exist")]
    UnknownBlock(BlockId),

    #[error("block {0:?} is still referenced")]
    BlockInUse(BlockId),

    #[error("reference at offset {offset} does not fit in block {block:?}")]
    ReferenceOutOfBounds { block: BlockId, offset: Offset },

    #[error("label at offset {offset} is outside block {block:?}")]
    LabelOutOfBounds { block: BlockId, offset: Offset },

    #[error("write at offset {offset} is outside block {block:?}")]
    DataOutOfBounds { block: BlockId, offset: Offset },
}

pub type Result<T> = std::result::Result<T, Error>;
