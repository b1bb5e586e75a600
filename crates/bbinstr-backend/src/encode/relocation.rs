use bbinstr_common::{BasicBlockId, Flow, Offset};

use super::Encoder;
use crate::{Error, Result};

/// A 32-bit displacement to a basic block of the same subgraph, relative to the end of the
/// displacement. Resolved once every basic block has an address.
#[derive(Clone, Debug)]
pub struct Relocation {
    pub at: Offset,

    /// Index of the branching instruction in the decoded table, whose target gets updated along
    /// with the displacement.
    pub instruction: usize,
}

impl Encoder {
    pub fn relocate(&mut self, target: BasicBlockId, relocation: Relocation) {
        self.relocations.entry(target).or_default().push(relocation);
    }

    pub fn perform_relocations(&mut self) -> Result<()> {
        for (target, relocations) in self.relocations.drain() {
            let address = self
                .addresses
                .get(&target)
                .copied()
                .ok_or(Error::UnknownBasicBlock(target))?;

            for Relocation { at, instruction } in relocations {
                let next = at + 4;
                let diff = address - next;
                let at = at as usize;
                self.code.splice(at..at + 4, diff.to_le_bytes());

                if let Some(decoded) = self.decoded.get_mut(instruction) {
                    decoded.flow = match decoded.flow {
                        Flow::Jump(_) => Flow::Jump(address),
                        Flow::Branch(condition, _) => Flow::Branch(condition, address),
                        flow => flow,
                    };
                }
            }
        }

        Ok(())
    }
}
