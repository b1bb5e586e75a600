pub mod decompose;
pub mod image;

pub use decompose::{decompose, is_decomposable};
pub use image::{parse, to_json, Image};

use bbinstr_common::{BlockId, Offset};
use thiserror::Error;


#[derive(Debug, Error)]
pub enum Error {
    #[error("block {0:?} is not a code block")]
    NotCode(BlockId),

    #[error("block {0:?} has no decoded instructions")]
    NoInstructions(BlockId),

    #[error("instruction at offset {offset} in block {block:?} overlaps or leaves the block")]
    BadInstruction { block: BlockId, offset: Offset },

    #[error("offset {offset} in block {block:?} is a branch target but not an instruction boundary")]
    BadBranchTarget { block: BlockId, offset: Offset },

    #[error("data label at offset {offset} in block {block:?} lands on an instruction")]
    DataInCode { block: BlockId, offset: Offset },

    #[error("instruction at offset {offset} in block {block:?} falls off the end of its code")]
    FallsOffEnd { block: BlockId, offset: Offset },

    #[error("branch at offset {offset} in block {block:?} carries a reference")]
    ReferenceInBranch { block: BlockId, offset: Offset },

    #[error("block index {0} is not described")]
    UnknownBlock(usize),

    #[error("section index {0} is not described")]
    UnknownSection(usize),

    #[error("block `{0}` has more data than its size")]
    DataTooLarge(String),

    #[error("block `{0}` has overlapping source ranges")]
    OverlappingSourceRanges(String),

    #[error("malformed image description: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Graph(#[from] bbinstr_common::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
