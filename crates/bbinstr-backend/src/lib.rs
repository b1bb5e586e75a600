pub mod assembler;
pub mod build;
pub mod encode;
pub mod pretty;

pub use assembler::BasicBlockAssembler;
pub use build::build;
pub use encode::{encode_instructions, encode_subgraph, Encoded};
pub use pretty::pretty_subgraph;

use bbinstr_common::{BasicBlockId, BlockId, Offset};
use thiserror::Error;

#[cfg(test)]
mod tests;

#[derive(Debug, Error)]
pub enum Error {
    #[error("`{0}` cannot take an immediate constant operand")]
    InvalidOperand(&'static str),

    #[error("{0:#x} does not fit in an 8-bit immediate")]
    ValueTooLarge(u32),

    #[error("basic block {0:?} is not part of the subgraph")]
    UnknownBasicBlock(BasicBlockId),

    #[error("basic block {0:?} has successors that cannot be encoded")]
    BadSuccessors(BasicBlockId),

    #[error("block {referrer:?} refers into the middle of a basic block at offset {offset}")]
    ReferenceInsideBasicBlock { referrer: BlockId, offset: Offset },

    #[error(transparent)]
    Graph(#[from] bbinstr_common::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
