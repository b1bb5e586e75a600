pub mod entry_hook;
pub mod frequency;
pub mod imports;
pub mod thunks;
pub mod transform;

pub use entry_hook::{BasicBlockEntryHookTransform, InstrumentedRanges};
pub use frequency::{AddFrequencyDataTransform, CounterStorage};
pub use imports::{AddImportsTransform, ImportedModule, ModuleHandle};
pub use thunks::EntryThunkTransform;
pub use transform::{
    apply_basic_block_subgraph_transform, apply_block_graph_transform, iterate_block_graph,
    BasicBlockSubGraphTransform, BlockGraphTransform, IterativeTransform,
};

use bbinstr_common::{BlockId, Offset, Size};
use thiserror::Error;


#[derive(Debug, Error)]
pub enum Error {
    #[error("header block {0:?} does not exist")]
    MissingHeader(BlockId),

    #[error("import module and symbol names cannot be empty")]
    EmptyImportName,

    #[error("no module with handle {0}")]
    UnknownModule(usize),

    #[error("module `{module}` has no symbol {index}")]
    UnknownSymbol { module: String, index: usize },

    #[error("`{symbol}` from `{module}` has not been imported into the image")]
    UnresolvedImport { module: String, symbol: String },

    #[error("{0} has not been applied to the block graph")]
    NotApplied(&'static str),

    #[error("the frequency data buffer has already been allocated")]
    AlreadyAllocated,

    #[error("cannot allocate {count} counters of {element_size} bytes")]
    InvalidBufferSize { count: usize, element_size: Size },

    #[error("the frequency data block is no longer part of the block graph")]
    MissingFrequencyData,

    #[error("entry thunk parameters must be 32 bits wide")]
    InvalidThunkParameter,

    #[error("basic block at offset {offset} in block {block:?} has no source range")]
    MissingSourceRange { block: BlockId, offset: Offset },

    #[error("conditional branch ending at offset {offset} in block {block:?} has no instruction")]
    MissingSuccessorInstruction { block: BlockId, offset: Offset },

    #[error("offset {offset} in block {block:?} translates outside the address space")]
    AddressOverflow { block: BlockId, offset: Offset },

    #[error("too many basic blocks to number with 32 bits")]
    TooManyBasicBlocks,

    #[error(transparent)]
    Decompose(#[from] bbinstr_frontend::Error),

    #[error(transparent)]
    Build(#[from] bbinstr_backend::Error),

    #[error(transparent)]
    Graph(#[from] bbinstr_common::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
