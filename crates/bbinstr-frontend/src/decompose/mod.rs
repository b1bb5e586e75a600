#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, BTreeSet};

use log::trace;

use bbinstr_common::{
    BasicBlock, BasicBlockId, BasicBlockKind, BasicBlockSubGraph, Block, BlockAttributes, Branch,
    DataRange, Decoded, Flow, Instruction, Offset, RawInstruction, Reference, Size, SourceRange,
    Successor,
};

use crate::{Error, Result};

/// Attributes that make a block unsafe to take apart and rebuild.
const UNSAFE_ATTRIBUTES: BlockAttributes = BlockAttributes::GAP_BLOCK
    .union(BlockAttributes::PADDING_BLOCK)
    .union(BlockAttributes::HAS_INLINE_ASSEMBLY)
    .union(BlockAttributes::BUILT_BY_UNSUPPORTED_COMPILER)
    .union(BlockAttributes::ERRORED_DISASSEMBLY)
    .union(BlockAttributes::HAS_EXCEPTION_HANDLING)
    .union(BlockAttributes::DISASSEMBLED_PAST_END);

/// Whether `block` is a code block that can be broken into basic blocks.
pub fn is_decomposable(block: &Block) -> bool {
    block.is_code() && !block.code.is_empty() && !block.attributes.intersects(UNSAFE_ATTRIBUTES)
}

/// Break a code block into its basic blocks.
pub fn decompose(block: &Block) -> Result<BasicBlockSubGraph> {
    if !block.is_code() {
        return Err(Error::NotCode(block.id));
    }

    let decomposer = Decomposer::new(block)?;
    let blocks = decomposer.decompose()?;

    trace!("decomposed `{}` into {} basic blocks", block.name, blocks.len());

    Ok(BasicBlockSubGraph {
        original: block.id,
        name: block.name.clone(),
        section: block.section,
        alignment: block.alignment,
        attributes: block.attributes,
        source_ranges: block.source_ranges.clone(),
        blocks,
    })
}

#[derive(Debug)]
struct Decomposer<'a> {
    block: &'a Block,

    /// Instructions keyed by offset.
    code: BTreeMap<Offset, Decoded>,

    /// Start offsets of every basic block, and whether it holds data.
    starts: BTreeMap<Offset, BasicBlockKind>,
}

impl<'a> Decomposer<'a> {
    fn new(block: &'a Block) -> Result<Self> {
        let code = Self::check_code(block)?;
        let mut decomposer = Self {
            block,
            code,
            starts: BTreeMap::new(),
        };

        decomposer.find_starts()?;
        Ok(decomposer)
    }

    fn check_code(block: &Block) -> Result<BTreeMap<Offset, Decoded>> {
        let mut code = BTreeMap::new();
        let mut end = 0;

        for decoded in block.code.iter() {
            let in_bounds = decoded.offset >= end
                && decoded.size > 0
                && decoded.end() as i64 <= i64::from(block.size);

            if !in_bounds {
                return Err(Error::BadInstruction {
                    block: block.id,
                    offset: decoded.offset,
                });
            }

            end = decoded.end();
            code.insert(decoded.offset, *decoded);
        }

        if code.is_empty() {
            return Err(Error::NoInstructions(block.id));
        }

        Ok(code)
    }

    fn find_starts(&mut self) -> Result<()> {
        let mut starts = BTreeSet::new();
        let mut data = BTreeSet::new();

        if let Some(first) = self.code.keys().next() {
            starts.insert(*first);
        }

        for (offset, label) in self.block.labels.iter() {
            if label.is_data() {
                data.insert(*offset);
            } else if label.is_code() {
                starts.insert(*offset);
            }
        }

        for decoded in self.code.values() {
            match decoded.flow {
                Flow::Next => {}
                Flow::Exit => {
                    starts.insert(decoded.end());
                }
                Flow::Jump(target) | Flow::Branch(_, target) => {
                    starts.insert(target);
                    starts.insert(decoded.end());
                }
            }
        }

        // Only instruction boundaries can begin code; anything past the last instruction that is
        // not labelled as data is padding.
        for offset in starts {
            if self.code.contains_key(&offset) {
                self.starts.insert(offset, BasicBlockKind::Code);
            } else if self.is_target(offset) || self.is_code_label(offset) {
                return Err(Error::BadBranchTarget {
                    block: self.block.id,
                    offset,
                });
            }
        }

        for offset in data {
            if self.code.contains_key(&offset) {
                return Err(Error::DataInCode {
                    block: self.block.id,
                    offset,
                });
            }

            self.starts.insert(offset, BasicBlockKind::Data);
        }

        Ok(())
    }

    fn is_target(&self, offset: Offset) -> bool {
        self.code.values().any(|decoded| match decoded.flow {
            Flow::Jump(target) | Flow::Branch(_, target) => target == offset,
            Flow::Next | Flow::Exit => false,
        })
    }

    fn is_code_label(&self, offset: Offset) -> bool {
        self.block
            .labels
            .get(&offset)
            .is_some_and(|label| label.is_code())
    }

    fn decompose(&self) -> Result<Vec<BasicBlock>> {
        let ids: BTreeMap<Offset, BasicBlockId> = self
            .starts
            .keys()
            .enumerate()
            .map(|(index, offset)| (*offset, BasicBlockId(index)))
            .collect();

        let bounds: Vec<_> = self
            .starts
            .iter()
            .map(|(offset, kind)| (*offset, *kind))
            .collect();

        let mut blocks = Vec::with_capacity(bounds.len());
        for (index, (start, kind)) in bounds.iter().enumerate() {
            let end = bounds
                .get(index + 1)
                .map(|(next, _)| *next)
                .unwrap_or(self.block.size as Offset);

            let id = ids[start];
            let block = match kind {
                BasicBlockKind::Code => self.code_block(id, *start, end, &ids)?,
                BasicBlockKind::Data => self.data_block(id, *start, end),
            };

            blocks.push(block);
        }

        Ok(blocks)
    }

    fn name(&self, start: Offset) -> String {
        match self.block.labels.get(&start) {
            Some(label) => label.name.clone(),
            None => format!("{}+{start:#x}", self.block.name),
        }
    }

    fn code_block(
        &self,
        id: BasicBlockId,
        start: Offset,
        end: Offset,
        ids: &BTreeMap<Offset, BasicBlockId>,
    ) -> Result<BasicBlock> {
        let mut block = BasicBlock::new(id, self.name(start), BasicBlockKind::Code, start);
        let mut last = None;

        // A basic block runs up to the next start, or up to the end of its last instruction if
        // padding follows.
        for decoded in self.code.range(start..end).map(|(_, decoded)| *decoded) {
            last = Some(decoded);

            match decoded.flow {
                Flow::Next | Flow::Exit => {
                    block
                        .instructions
                        .push(Instruction::Raw(self.raw(&decoded, decoded.flow == Flow::Exit)));
                }

                Flow::Jump(target) => {
                    self.check_branch(&decoded)?;
                    block.successors.push(
                        Successor::new(Branch::Always, ids[&target])
                            .with_instruction(decoded.offset, decoded.size),
                    );
                }

                Flow::Branch(condition, target) => {
                    self.check_branch(&decoded)?;
                    let next = self.fall_through(&decoded, ids)?;

                    block.successors.push(
                        Successor::new(Branch::If(condition), ids[&target])
                            .with_instruction(decoded.offset, decoded.size),
                    );
                    block
                        .successors
                        .push(Successor::new(Branch::If(condition.inverse()), next));
                }
            }
        }

        let Some(last) = last else {
            return Err(Error::BadBranchTarget {
                block: self.block.id,
                offset: start,
            });
        };

        if last.flow == Flow::Next {
            let next = self.fall_through(&last, ids)?;
            block.successors.push(Successor::new(Branch::Always, next));
        }

        let end = if last.flow.transfers() { last.end() } else { end };
        block.size = (end - start) as Size;

        Ok(block)
    }

    fn data_block(&self, id: BasicBlockId, start: Offset, end: Offset) -> BasicBlock {
        let mut block = BasicBlock::new(id, self.name(start), BasicBlockKind::Data, start);
        block.size = (end - start) as Size;
        block.data = self.bytes(start, block.size);
        block.references = self.references(start, block.size);
        block
    }

    fn fall_through(
        &self,
        decoded: &Decoded,
        ids: &BTreeMap<Offset, BasicBlockId>,
    ) -> Result<BasicBlockId> {
        ids.get(&decoded.end())
            .copied()
            .filter(|_| self.code.contains_key(&decoded.end()))
            .ok_or(Error::FallsOffEnd {
                block: self.block.id,
                offset: decoded.offset,
            })
    }

    fn check_branch(&self, decoded: &Decoded) -> Result<()> {
        if self.references(decoded.offset, decoded.size).is_empty() {
            Ok(())
        } else {
            Err(Error::ReferenceInBranch {
                block: self.block.id,
                offset: decoded.offset,
            })
        }
    }

    fn raw(&self, decoded: &Decoded, exits: bool) -> RawInstruction {
        let range = DataRange::new(decoded.offset, decoded.size);
        let source = self
            .block
            .source_ranges
            .find_range_pair(range)
            .and_then(|pair| pair.translate(decoded.offset))
            .map(|address| SourceRange::new(address, decoded.size));

        RawInstruction {
            data: self.bytes(decoded.offset, decoded.size),
            references: self.references(decoded.offset, decoded.size),
            source,
            exits,
        }
    }

    /// Bytes of the original block, zero-filled past its initialized data.
    fn bytes(&self, offset: Offset, size: Size) -> Vec<u8> {
        let start = offset as usize;
        (start..start + size as usize)
            .map(|at| self.block.data.get(at).copied().unwrap_or(0))
            .collect()
    }

    /// References within `[offset, offset + size)`, rebased to `offset`.
    fn references(&self, offset: Offset, size: Size) -> BTreeMap<Offset, Reference> {
        self.block
            .references
            .range(offset..offset + size as Offset)
            .map(|(at, reference)| (at - offset, *reference))
            .collect()
    }
}
