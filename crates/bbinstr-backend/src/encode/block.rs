use bbinstr_common::{
    BasicBlock, BasicBlockId, BasicBlockKind, Branch, Condition, DataRange, Flow, Offset, Size,
    SourceRange, Successor,
};

use super::relocation::Relocation;
use super::Encoder;
use crate::{Error, Result};

impl Encoder {
    /// Encode a basic block followed by whatever branches its successors need. `next` is the
    /// basic block laid out right after this one, which can be reached by falling through.
    pub fn encode_block(&mut self, block: &BasicBlock, next: Option<BasicBlockId>) -> Result<()> {
        let at = self.offset();
        assert!(self.addresses.insert(block.id, at).is_none());

        match block.kind {
            BasicBlockKind::Code => {
                for instruction in block.instructions.iter() {
                    self.encode_instruction(instruction)?;
                }

                self.encode_successors(block, next)
            }

            BasicBlockKind::Data => {
                self.code.extend(block.data.iter().copied());
                for (offset, reference) in block.references.iter() {
                    self.references.insert(at + offset, *reference);
                }

                let original = DataRange::new(block.offset, block.size);
                let source = self
                    .original
                    .find_range_pair(original)
                    .and_then(|pair| pair.translate(block.offset))
                    .map(|address| SourceRange::new(address, block.size));

                if let Some(source) = source {
                    let pushed = self
                        .source_ranges
                        .push(DataRange::new(at, block.size), source);
                    debug_assert!(pushed);
                }

                Ok(())
            }
        }
    }

    fn encode_successors(&mut self, block: &BasicBlock, next: Option<BasicBlockId>) -> Result<()> {
        let origin = block
            .successors
            .iter()
            .find(|successor| successor.has_instruction());

        match block.successors.as_slice() {
            [] => Ok(()),

            [only] if only.branch == Branch::Always => {
                if Some(only.target) != next {
                    self.jump_to(only.target, origin);
                }

                Ok(())
            }

            [taken, fallthrough] => {
                let (Branch::If(condition), Branch::If(inverse)) =
                    (taken.branch, fallthrough.branch)
                else {
                    return Err(Error::BadSuccessors(block.id));
                };

                if Some(fallthrough.target) == next {
                    self.branch_to(condition, taken.target, origin);
                } else if Some(taken.target) == next {
                    self.branch_to(inverse, fallthrough.target, origin);
                } else {
                    self.branch_to(condition, taken.target, origin);
                    self.jump_to(fallthrough.target, None);
                }

                Ok(())
            }

            _ => Err(Error::BadSuccessors(block.id)),
        }
    }

    /// `jmp rel32`
    fn jump_to(&mut self, target: BasicBlockId, origin: Option<&Successor>) {
        let start = self.offset();
        self.code.extend([0xe9, 0, 0, 0, 0]);

        let instruction = self.record(start, Flow::Jump(0));
        self.relocate(
            target,
            Relocation {
                at: start + 1,
                instruction,
            },
        );
        self.map_branch(start, origin);
    }

    /// `jcc rel32`
    fn branch_to(
        &mut self,
        condition: Condition,
        target: BasicBlockId,
        origin: Option<&Successor>,
    ) {
        let start = self.offset();
        self.code.extend([0x0f, 0x80 | condition.code(), 0, 0, 0, 0]);

        let instruction = self.record(start, Flow::Branch(condition, 0));
        self.relocate(
            target,
            Relocation {
                at: start + 2,
                instruction,
            },
        );
        self.map_branch(start, origin);
    }

    /// Map a synthesized branch to the original branch instruction it replaces.
    fn map_branch(&mut self, start: Offset, origin: Option<&Successor>) {
        let Some(origin) = origin else {
            return;
        };

        let original = DataRange::new(origin.instruction_offset, origin.instruction_size);
        let source = self
            .original
            .find_range_pair(original)
            .and_then(|pair| pair.translate(origin.instruction_offset))
            .map(|address| SourceRange::new(address, origin.instruction_size));

        if let Some(source) = source {
            let size = (self.offset() - start) as Size;
            let pushed = self.source_ranges.push(DataRange::new(start, size), source);
            debug_assert!(pushed);
        }
    }
}
