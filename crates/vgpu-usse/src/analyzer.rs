//! Control-flow block segmentation.
//!
//! A program is split into straight-line blocks that each execute under a single predicate. The
//! code generator wraps every block in one `if (predicate)` and calls blocks by offset, so a block
//! must close whenever
//!
//! - the predicate of the next instruction differs from the one the block latched,
//! - a branch or kill ends straight-line flow,
//! - an instruction overwrites the predicate register the block is guarded by,
//! - a zero word or an undecodable word terminates the program.
//!
//! Blocks live in an arena and are scanned from a work queue of arena indices. Every start offset
//! is registered once, so loops and repeated branch targets terminate.

use std::collections::VecDeque;

use hashbrown::HashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::instruction::{decode, DecodeError, Instruction, Offset};
use crate::types::ExtPredicate;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Block {
    pub offset: Offset,
    /// Number of instructions in the block.
    pub size: u32,
    /// Predicate guarding the whole block, latched from its first instruction.
    pub predicate: ExtPredicate,
    /// Block that continues execution when this one was closed without a control transfer.
    pub link: Option<Offset>,
}

impl Block {
    fn new(offset: Offset) -> Self {
        Self {
            offset,
            size: 0,
            predicate: ExtPredicate::None,
            link: None,
        }
    }

    /// One past the last instruction.
    pub fn end(&self) -> Offset {
        self.offset + self.size
    }

    pub fn contains(&self, offset: Offset) -> bool {
        (self.offset..self.end()).contains(&offset)
    }
}

/// Decoded instruction stream plus its block structure.
#[derive(Debug)]
pub struct AnalyzedProgram {
    instructions: Vec<Result<Instruction, DecodeError>>,
    blocks: Vec<Block>,
    by_offset: HashMap<Offset, usize>,
    errors: Vec<DecodeError>,
}

impl AnalyzedProgram {
    /// Blocks in discovery order. The last block is always the zero-sized sentinel at
    /// `end_offset + 1`.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block_at(&self, offset: Offset) -> Option<&Block> {
        self.by_offset.get(&offset).map(|&index| &self.blocks[index])
    }

    pub fn sentinel(&self) -> &Block {
        // `analyze` always pushes the sentinel last.
        &self.blocks[self.blocks.len() - 1]
    }

    /// Offset of the last instruction word, or `None` for an empty program.
    pub fn end_offset(&self) -> Option<Offset> {
        self.sentinel().offset.checked_sub(1)
    }

    pub fn instructions(&self) -> &[Result<Instruction, DecodeError>] {
        &self.instructions
    }

    pub fn instruction(&self, offset: Offset) -> Option<&Instruction> {
        self.instructions.get(offset as usize)?.as_ref().ok()
    }

    /// Decoded instructions of `block`, in order.
    pub fn block_instructions<'a>(
        &'a self,
        block: &Block,
    ) -> impl Iterator<Item = &'a Instruction> + 'a {
        let range = block.offset as usize..block.end() as usize;
        self.instructions[range].iter().filter_map(|inst| inst.as_ref().ok())
    }

    /// Undecodable words found on reachable paths.
    pub fn errors(&self) -> &[DecodeError] {
        &self.errors
    }
}

/// Decodes `words` and segments the reachable code into blocks, starting at offset 0.
pub fn analyze(words: &[u64]) -> AnalyzedProgram {
    let words = &words[..words.len().min(Offset::MAX as usize)];
    let instructions: Vec<_> = words
        .iter()
        .enumerate()
        .map(|(offset, &word)| decode(offset as Offset, word))
        .collect();

    let mut segmenter = Segmenter {
        words,
        instructions: &instructions,
        blocks: Vec::new(),
        by_offset: HashMap::new(),
        queue: VecDeque::new(),
        errors: Vec::new(),
    };
    segmenter.run();

    let Segmenter {
        mut blocks,
        mut by_offset,
        errors,
        ..
    } = segmenter;

    let sentinel = Block::new(words.len() as Offset);
    by_offset.insert(sentinel.offset, blocks.len());
    blocks.push(sentinel);

    debug!(
        words = words.len(),
        blocks = blocks.len(),
        errors = errors.len(),
        "segmented program"
    );

    AnalyzedProgram {
        instructions,
        blocks,
        by_offset,
        errors,
    }
}

struct Segmenter<'a> {
    words: &'a [u64],
    instructions: &'a [Result<Instruction, DecodeError>],
    blocks: Vec<Block>,
    by_offset: HashMap<Offset, usize>,
    queue: VecDeque<usize>,
    errors: Vec<DecodeError>,
}

/// How a scanned block ends.
struct Close {
    size: u32,
    link: Option<Offset>,
}

impl Segmenter<'_> {
    fn run(&mut self) {
        if !self.words.is_empty() {
            self.enqueue(0);
        }
        while let Some(index) = self.queue.pop_front() {
            self.scan(index);
        }
    }

    /// Registers a block start. Offsets past the program resolve to the sentinel and are not
    /// scanned.
    fn enqueue(&mut self, offset: Offset) {
        if offset as usize >= self.words.len() || self.by_offset.contains_key(&offset) {
            return;
        }
        let index = self.blocks.len();
        self.blocks.push(Block::new(offset));
        self.by_offset.insert(offset, index);
        self.queue.push_back(index);
    }

    fn scan(&mut self, index: usize) {
        let instructions = self.instructions;
        let start = self.blocks[index].offset;
        let mut latched: Option<ExtPredicate> = None;
        let mut cursor = start;

        let close = loop {
            let Some(&word) = self.words.get(cursor as usize) else {
                break Close {
                    size: cursor - start,
                    link: None,
                };
            };
            if word == 0 {
                break Close {
                    size: cursor - start,
                    link: None,
                };
            }

            let inst = match &instructions[cursor as usize] {
                Ok(inst) => inst,
                Err(err) => {
                    warn!(offset = err.offset, word = err.word, "undecodable instruction ends block");
                    if !self.errors.contains(err) {
                        self.errors.push(*err);
                    }
                    break Close {
                        size: cursor - start,
                        link: None,
                    };
                }
            };

            let predicate = *latched.get_or_insert(inst.predicate);
            if inst.predicate != predicate {
                self.enqueue(cursor);
                break Close {
                    size: cursor - start,
                    link: Some(cursor),
                };
            }

            let next = cursor + 1;
            if inst.is_branch() {
                match inst.branch_target() {
                    Some(target) => self.enqueue(target),
                    None => warn!(offset = cursor, "branch target before program start"),
                }
                if !predicate.is_none() {
                    self.enqueue(next);
                }
                break Close {
                    size: next - start,
                    link: None,
                };
            }

            if inst.is_kill() {
                // A predicated kill falls through when its predicate is false.
                let link = (!predicate.is_none()).then(|| {
                    self.enqueue(next);
                    next
                });
                break Close {
                    size: next - start,
                    link,
                };
            }

            if let (Some(written), Some(guard)) = (inst.predicate_write(), predicate.register()) {
                if written == guard {
                    self.enqueue(next);
                    break Close {
                        size: next - start,
                        link: Some(next),
                    };
                }
            }

            cursor = next;
        };

        let block = &mut self.blocks[index];
        block.size = close.size;
        block.predicate = latched.unwrap_or_default();
        block.link = close.link;
        debug!(
            offset = block.offset,
            size = block.size,
            predicate = ?block.predicate,
            link = ?block.link,
            "block"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{entry, InstructionKind};
    use pretty_assertions::assert_eq;

    fn mov(pred: u64) -> u64 {
        entry(InstructionKind::Vmov).encode(&[(b'p', pred), (b'h', 0xF)]).unwrap()
    }

    fn br(pred: u64, offset: i32) -> u64 {
        let raw = (offset as u32 & 0xF_FFFF) as u64;
        entry(InstructionKind::Br).encode(&[(b'p', pred), (b'o', raw)]).unwrap()
    }

    fn block(offset: Offset, size: u32, predicate: ExtPredicate, link: Option<Offset>) -> Block {
        Block {
            offset,
            size,
            predicate,
            link,
        }
    }

    #[test]
    fn straight_line_program_is_one_block() {
        let program = analyze(&[mov(0), mov(0), mov(0)]);
        assert_eq!(
            program.blocks(),
            &[
                block(0, 3, ExtPredicate::None, None),
                block(3, 0, ExtPredicate::None, None),
            ]
        );
        assert_eq!(program.end_offset(), Some(2));
    }

    #[test]
    fn empty_program_has_only_the_sentinel() {
        let program = analyze(&[]);
        assert_eq!(program.blocks(), &[block(0, 0, ExtPredicate::None, None)]);
        assert_eq!(program.end_offset(), None);
    }

    #[test]
    fn branch_closes_block_and_queues_target() {
        let program = analyze(&[mov(0), mov(0), br(0, 3), mov(0), mov(0), mov(0)]);
        assert_eq!(
            program.blocks(),
            &[
                block(0, 3, ExtPredicate::None, None),
                block(5, 1, ExtPredicate::None, None),
                block(6, 0, ExtPredicate::None, None),
            ]
        );
    }

    #[test]
    fn predicated_branch_also_queues_fallthrough() {
        let program = analyze(&[br(1, 2), mov(1), mov(1)]);
        let offsets: Vec<_> = program.blocks().iter().map(|b| b.offset).collect();
        assert_eq!(offsets, vec![0, 2, 1, 3]);
        assert_eq!(program.block_at(0).unwrap().predicate, ExtPredicate::P0);
        assert_eq!(program.block_at(0).unwrap().size, 1);
    }

    #[test]
    fn predicate_change_splits_with_link() {
        let program = analyze(&[mov(0), mov(0), mov(1), mov(1), mov(5)]);
        assert_eq!(
            program.blocks(),
            &[
                block(0, 2, ExtPredicate::None, Some(2)),
                block(2, 2, ExtPredicate::P0, Some(4)),
                block(4, 1, ExtPredicate::NegP0, None),
                block(5, 0, ExtPredicate::None, None),
            ]
        );
    }

    #[test]
    fn writing_the_guard_predicate_closes_after_the_writer() {
        let vtst = entry(InstructionKind::Vtst)
            .encode(&[(b'p', 1), (b'n', 0)])
            .unwrap();
        let other = entry(InstructionKind::Vtst)
            .encode(&[(b'p', 1), (b'n', 1)])
            .unwrap();
        let program = analyze(&[mov(1), other, vtst, mov(1)]);
        assert_eq!(
            program.blocks(),
            &[
                block(0, 3, ExtPredicate::P0, Some(3)),
                block(3, 1, ExtPredicate::P0, None),
                block(4, 0, ExtPredicate::None, None),
            ]
        );
    }

    #[test]
    fn loops_terminate() {
        // 0: mov, 1: br -1 (to 0), predicated so the fallthrough is live too.
        let program = analyze(&[mov(1), br(1, -1), mov(0)]);
        let offsets: Vec<_> = program.blocks().iter().map(|b| b.offset).collect();
        assert_eq!(offsets, vec![0, 2, 3]);
        assert_eq!(program.block_at(0).unwrap().size, 2);
    }

    #[test]
    fn zero_word_terminates() {
        let program = analyze(&[mov(0), 0, mov(0)]);
        assert_eq!(program.blocks()[0], block(0, 1, ExtPredicate::None, None));
        assert_eq!(program.sentinel().offset, 3);
    }

    #[test]
    fn undecodable_word_terminates_and_is_reported() {
        let bad = 0xD800_0000_0000_0000;
        let program = analyze(&[mov(0), bad, mov(0)]);
        assert_eq!(program.blocks()[0], block(0, 1, ExtPredicate::None, None));
        assert_eq!(program.errors(), &[DecodeError { offset: 1, word: bad }]);
    }

    #[test]
    fn kill_ends_flow() {
        let kill = entry(InstructionKind::Kill).encode(&[(b'p', 0)]).unwrap();
        let program = analyze(&[mov(0), kill, mov(0)]);
        assert_eq!(
            program.blocks(),
            &[
                block(0, 2, ExtPredicate::None, None),
                block(3, 0, ExtPredicate::None, None),
            ]
        );

        let predicated = entry(InstructionKind::Kill).encode(&[(b'p', 1)]).unwrap();
        let program = analyze(&[predicated, mov(1)]);
        assert_eq!(program.blocks()[0], block(0, 1, ExtPredicate::P0, Some(1)));
        assert_eq!(program.blocks()[1], block(1, 1, ExtPredicate::P0, None));
    }

    #[test]
    fn branch_past_the_end_resolves_to_sentinel() {
        let program = analyze(&[br(0, 5), mov(0)]);
        assert_eq!(
            program.blocks(),
            &[
                block(0, 1, ExtPredicate::None, None),
                block(2, 0, ExtPredicate::None, None),
            ]
        );
    }

    #[test]
    fn block_instructions_follow_block_range() {
        let program = analyze(&[mov(0), mov(0), br(0, 1), mov(0)]);
        let first = program.blocks()[0];
        let kinds: Vec<_> = program.block_instructions(&first).map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![InstructionKind::Vmov, InstructionKind::Vmov, InstructionKind::Br]
        );
        assert!(first.contains(2));
        assert!(!first.contains(3));
    }
}
