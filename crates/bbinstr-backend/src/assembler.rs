use bbinstr_common::{Displacement, Immediate, Instruction, Operand};

/// Inserts instructions into a basic block's instruction stream at a fixed point.
///
/// Every instruction goes in right after the previous one, so a sequence of calls ends up in the
/// block in call order.
#[derive(Debug)]
pub struct BasicBlockAssembler<'a> {
    at: usize,
    instructions: &'a mut Vec<Instruction>,
}

impl<'a> BasicBlockAssembler<'a> {
    pub fn new(at: usize, instructions: &'a mut Vec<Instruction>) -> Self {
        let at = at.min(instructions.len());
        Self { at, instructions }
    }

    /// Index the next instruction will be inserted at.
    pub fn position(&self) -> usize {
        self.at
    }

    pub fn push(&mut self, immediate: Immediate) {
        self.insert(Instruction::Push(Operand::Immediate(immediate)));
    }

    pub fn push_memory(&mut self, displacement: Displacement) {
        self.insert(Instruction::Push(Operand::Memory(displacement)));
    }

    pub fn call(&mut self, operand: Operand) {
        self.insert(Instruction::Call(operand));
    }

    pub fn jmp(&mut self, operand: Operand) {
        self.insert(Instruction::Jump(operand));
    }

    fn insert(&mut self, instruction: Instruction) {
        self.instructions.insert(self.at, instruction);
        self.at += 1;
    }
}
