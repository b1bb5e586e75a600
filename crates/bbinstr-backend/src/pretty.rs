use iced_x86::{Decoder, DecoderOptions, Formatter, NasmFormatter};

use bbinstr_common::{
    BasicBlock, BasicBlockSubGraph, BlockGraph, BlockId, Branch, Displacement, Immediate,
    Instruction, Offset, Operand, ValueSize,
};

#[must_use = "the pretty printer does not output anything by itself"]
pub fn pretty_subgraph(graph: &BlockGraph, subgraph: &BasicBlockSubGraph) -> String {
    let prettier = Prettier { graph, subgraph };
    prettier.pretty()
}

#[derive(Debug)]
struct Prettier<'a> {
    graph: &'a BlockGraph,
    subgraph: &'a BasicBlockSubGraph,
}

impl Prettier<'_> {
    pub fn pretty(self) -> String {
        let mut listing = Listing::new();
        listing.push_str(&self.subgraph.name);
        listing.push_str(":\n");

        for block in self.subgraph.blocks.iter() {
            self.pretty_block(&mut listing, block);
        }

        listing.into()
    }

    fn pretty_block(&self, within: &mut Listing, block: &BasicBlock) {
        within.push_str(format!("  {}:", block.name));
        within.push_at(32, format!("; +{:#x}, {} bytes", block.offset, block.size));
        within.push('\n');

        if !block.is_code() {
            within.push_at(8, "db");
            within.push(' ');
            within.push_str(
                block
                    .data
                    .iter()
                    .map(|byte| format!("{byte:02x}"))
                    .collect::<Vec<_>>()
                    .join(" "),
            );
            within.push('\n');
            return;
        }

        for instruction in block.instructions.iter() {
            self.pretty_instruction(within, instruction);
        }

        for successor in block.successors.iter() {
            let name = match successor.branch {
                Branch::Always => "jmp".to_string(),
                Branch::If(condition) => format!("j{condition:?}").to_lowercase(),
            };

            within.push_at(8, name);
            within.push(' ');
            match self.subgraph.get(successor.target) {
                Some(target) => within.push_str(&target.name),
                None => within.push_str(format!("{:?}", successor.target)),
            }
            within.push('\n');
        }
    }

    fn pretty_instruction(&self, within: &mut Listing, instruction: &Instruction) {
        let (name, operand) = match instruction {
            Instruction::Raw(raw) => {
                within.push_at(8, disassemble(&raw.data));

                if let Some(source) = raw.source {
                    within.push_at(40, format!("; {}", source.start()));
                }

                within.push('\n');
                return;
            }

            Instruction::Push(operand) => ("push", operand),
            Instruction::Call(operand) => ("call", operand),
            Instruction::Jump(operand) => ("jmp", operand),
        };

        within.push_at(8, name);
        within.push(' ');
        self.pretty_operand(within, operand);
        within.push('\n');
    }

    fn pretty_operand(&self, within: &mut Listing, operand: &Operand) {
        match operand {
            Operand::Immediate(Immediate::Value(value, ValueSize::Byte)) => {
                within.push_str(format!("byte {value:#x}"))
            }

            Operand::Immediate(Immediate::Value(value, ValueSize::Dword)) => {
                within.push_str(format!("dword {value:#x}"))
            }

            Operand::Immediate(Immediate::Block(block, offset)) => {
                within.push_str("offset ");
                self.pretty_location(within, *block, *offset);
            }

            Operand::Memory(Displacement { block, offset }) => {
                within.push('[');
                self.pretty_location(within, *block, *offset);
                within.push(']');
            }
        }
    }

    fn pretty_location(&self, within: &mut Listing, block: BlockId, offset: Offset) {
        let block = self.graph.block(block).ok();
        let name = block
            .and_then(|block| block.labels.get(&offset))
            .map(|label| label.name.clone());

        match (name, block) {
            (Some(name), _) => within.push_str(name),
            (None, Some(block)) if offset == 0 => within.push_str(&block.name),
            (None, Some(block)) => within.push_str(format!("{} + {offset:#x}", block.name)),
            (None, None) => within.push_str(format!("?? + {offset:#x}")),
        }
    }
}

/// Format one 32-bit instruction in NASM syntax. Bytes that do not decode are listed with `db`.
fn disassemble(code: &[u8]) -> String {
    let mut decoder = Decoder::new(32, code, DecoderOptions::NONE);
    let instruction = decoder.decode();

    let mut result = String::new();
    let rest = if instruction.is_invalid() {
        code
    } else {
        NasmFormatter::new().format(&instruction, &mut result);
        &code[instruction.len().min(code.len())..]
    };

    if !rest.is_empty() {
        if !result.is_empty() {
            result.push(' ');
        }

        let bytes = rest
            .iter()
            .map(|byte| format!("{byte:#04x}"))
            .collect::<Vec<_>>()
            .join(", ");
        result.push_str("db ");
        result.push_str(&bytes);
    }

    result
}

#[derive(Debug, Default)]
struct Listing {
    data: String,
    offset: usize,
}

impl Listing {
    pub fn new() -> Self {
        Self {
            data: String::new(),
            offset: 0,
        }
    }

    pub fn push(&mut self, ch: char) {
        if ch == '\n' {
            self.offset = 0;
        } else {
            self.offset += 1;
        }

        self.data.push(ch);
    }

    pub fn push_str(&mut self, string: impl AsRef<str>) {
        let string = string.as_ref();
        match string.rsplit_once('\n') {
            Some((_, last)) => self.offset = last.len(),
            None => self.offset += string.len(),
        }

        self.data.push_str(string);
    }

    /// Add `string` padded with spaces such that it starts at `offset` on the line. If the line
    /// is already past that point, a single space separates them.
    pub fn push_at(&mut self, offset: usize, string: impl AsRef<str>) {
        let spaces = offset.saturating_sub(self.offset).max(1);
        for _ in 0..spaces {
            self.push(' ');
        }

        self.push_str(string);
    }
}

impl From<Listing> for String {
    fn from(listing: Listing) -> Self {
        listing.data
    }
}
