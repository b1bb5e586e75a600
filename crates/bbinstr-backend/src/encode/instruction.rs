use bbinstr_common::{
    BlockId, DataRange, Flow, Immediate, Instruction, Offset, Operand, RawInstruction, Reference,
    ReferenceKind, ValueSize,
};

use super::Encoder;
use crate::{Error, Result};

impl Encoder {
    pub fn encode_instruction(&mut self, instruction: &Instruction) -> Result<()> {
        let start = self.offset();
        let flow = match instruction {
            Instruction::Raw(raw) => self.inst_raw(raw),
            Instruction::Push(operand) => self.inst_push(operand)?,
            Instruction::Call(operand) => self.inst_call(operand)?,
            Instruction::Jump(operand) => self.inst_jmp(operand)?,
        };

        self.record(start, flow);
        Ok(())
    }

    fn inst_raw(&mut self, raw: &RawInstruction) -> Flow {
        let at = self.offset();
        self.code.extend(raw.data.iter().copied());

        for (offset, reference) in raw.references.iter() {
            self.references.insert(at + offset, *reference);
        }

        if let Some(source) = raw.source {
            let pushed = self
                .source_ranges
                .push(DataRange::new(at, raw.size()), source);
            debug_assert!(pushed);
        }

        if raw.exits {
            Flow::Exit
        } else {
            Flow::Next
        }
    }

    fn inst_push(&mut self, operand: &Operand) -> Result<Flow> {
        match operand {
            Operand::Immediate(Immediate::Value(value, ValueSize::Byte)) => {
                let byte = u8::try_from(*value).map_err(|_| Error::ValueTooLarge(*value))?;
                self.code.extend([0x6a, byte]);
            }

            Operand::Immediate(Immediate::Value(value, ValueSize::Dword)) => {
                self.code.push(0x68);
                self.code.extend(value.to_le_bytes());
            }

            Operand::Immediate(Immediate::Block(block, offset)) => {
                self.code.push(0x68);
                self.absolute(*block, *offset);
            }

            Operand::Memory(displacement) => {
                self.code.extend([0xff, 0x35]);
                self.absolute(displacement.block, displacement.offset);
            }
        }

        Ok(Flow::Next)
    }

    fn inst_call(&mut self, operand: &Operand) -> Result<Flow> {
        match operand {
            Operand::Immediate(Immediate::Block(block, offset)) => {
                self.code.push(0xe8);
                self.pc_relative(*block, *offset);
            }

            Operand::Memory(displacement) => {
                self.code.extend([0xff, 0x15]);
                self.absolute(displacement.block, displacement.offset);
            }

            Operand::Immediate(Immediate::Value(..)) => return Err(Error::InvalidOperand("call")),
        }

        Ok(Flow::Next)
    }

    fn inst_jmp(&mut self, operand: &Operand) -> Result<Flow> {
        match operand {
            Operand::Immediate(Immediate::Block(block, offset)) => {
                self.code.push(0xe9);
                self.pc_relative(*block, *offset);
            }

            Operand::Memory(displacement) => {
                self.code.extend([0xff, 0x25]);
                self.absolute(displacement.block, displacement.offset);
            }

            Operand::Immediate(Immediate::Value(..)) => return Err(Error::InvalidOperand("jmp")),
        }

        Ok(Flow::Exit)
    }

    /// Leave room for a 32-bit absolute address of `offset` within `block`.
    fn absolute(&mut self, block: BlockId, offset: Offset) {
        let at = self.offset();
        self.code.extend([0; 4]);
        self.references.insert(at, Reference::absolute(block, offset));
    }

    /// Leave room for a 32-bit displacement to `offset` within `block`, relative to the end of
    /// the displacement.
    fn pc_relative(&mut self, block: BlockId, offset: Offset) {
        let at = self.offset();
        self.code.extend([0; 4]);
        self.references.insert(
            at,
            Reference::new(ReferenceKind::PcRelative, 4, block, offset, offset),
        );
    }
}
