use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::address::{Offset, Size};
use crate::graph::{BlockId, Reference};
use crate::range::SourceRange;

/// How control leaves an instruction.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    /// Falls through to the following instruction. Calls count as this.
    Next,

    /// Leaves the block entirely (returns, tail jumps, indirect jumps).
    Exit,

    /// Unconditional jump to an offset within the same block.
    Jump(Offset),

    /// Conditional jump to an offset within the same block.
    Branch(Condition, Offset),
}

impl Flow {
    pub fn transfers(&self) -> bool {
        !matches!(self, Self::Next)
    }
}

/// x86 condition codes, in `jcc` encoding order.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Overflow,
    NoOverflow,
    Below,
    AboveEqual,
    Equal,
    NotEqual,
    BelowEqual,
    Above,
    Sign,
    NoSign,
    Parity,
    NoParity,
    Less,
    GreaterEqual,
    LessEqual,
    Greater,
}

impl Condition {
    const ALL: [Self; 16] = [
        Self::Overflow,
        Self::NoOverflow,
        Self::Below,
        Self::AboveEqual,
        Self::Equal,
        Self::NotEqual,
        Self::BelowEqual,
        Self::Above,
        Self::Sign,
        Self::NoSign,
        Self::Parity,
        Self::NoParity,
        Self::Less,
        Self::GreaterEqual,
        Self::LessEqual,
        Self::Greater,
    ];

    /// The low nibble of the `jcc` opcode.
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    /// The condition that holds exactly when this one does not.
    pub fn inverse(self) -> Self {
        Self::ALL[usize::from(self.code() ^ 1)]
    }
}

/// One entry of a code block's decoded-instruction table.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct Decoded {
    pub offset: Offset,
    pub size: Size,
    pub flow: Flow,
}

impl Decoded {
    pub fn new(offset: Offset, size: Size, flow: Flow) -> Self {
        Self { offset, size, flow }
    }

    pub fn end(&self) -> Offset {
        self.offset + self.size as Offset
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum ValueSize {
    Byte,
    Dword,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Immediate {
    /// A plain constant of the given width.
    Value(u32, ValueSize),

    /// The absolute address of `offset` within a block.
    Block(BlockId, Offset),
}

/// An absolute memory operand, `[block + offset]`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Displacement {
    pub block: BlockId,
    pub offset: Offset,
}

impl Displacement {
    pub fn new(block: BlockId, offset: Offset) -> Self {
        Self { block, offset }
    }
}

impl From<&Reference> for Displacement {
    fn from(reference: &Reference) -> Self {
        Self::new(reference.referenced, reference.offset)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Operand {
    Immediate(Immediate),
    Memory(Displacement),
}

/// An instruction as it appears in the original block, carried through untouched.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawInstruction {
    pub data: Vec<u8>,

    /// References keyed by their offset within `data`.
    pub references: BTreeMap<Offset, Reference>,

    /// Where this instruction lived in the original image, if known.
    pub source: Option<SourceRange>,

    pub exits: bool,
}

impl RawInstruction {
    pub fn size(&self) -> Size {
        self.data.len() as Size
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Instruction {
    Raw(RawInstruction),
    Push(Operand),
    Call(Operand),
    Jump(Operand),
}

impl Instruction {
    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw(_))
    }

    pub fn source(&self) -> Option<SourceRange> {
        match self {
            Self::Raw(raw) => raw.source,
            _ => None,
        }
    }
}
