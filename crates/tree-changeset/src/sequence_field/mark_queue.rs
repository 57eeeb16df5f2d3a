//! Queues that walk two mark lists in lockstep, splitting marks so that
//! paired marks always cover the same cells.

use crate::error::{fail, Result};
use crate::revision::RevisionMetadataSource;

use super::format::Mark;
use super::utils::{
    compare_cell_positions, is_fresh_attach, output_cell_empty, output_cell_id, split_mark,
    CellOrder,
};

/// A mark list consumed front to back. Split remainders are pushed back.
pub struct MarkQueue<'a> {
    marks: std::slice::Iter<'a, Mark>,
    stack: Vec<Mark>,
}

impl<'a> MarkQueue<'a> {
    pub fn new(marks: &'a [Mark]) -> Self {
        Self {
            marks: marks.iter(),
            stack: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.peek().is_none()
    }

    pub fn peek(&self) -> Option<&Mark> {
        self.stack.last().or_else(|| self.marks.as_slice().first())
    }

    pub fn pop(&mut self) -> Option<Mark> {
        self.stack.pop().or_else(|| self.marks.next().cloned())
    }

    pub fn push_front(&mut self, mark: Mark) {
        self.stack.push(mark);
    }

    /// Pops at most `length` cells of the next mark.
    pub fn pop_prefix(&mut self, length: u32) -> Result<Option<Mark>> {
        let Some(mark) = self.pop() else {
            return Ok(None);
        };
        if length >= mark.count {
            return Ok(Some(mark));
        }
        let (head, tail) = split_mark(&mark, length)?;
        self.stack.push(tail);
        Ok(Some(head))
    }
}

/// How the base list's cells are matched against the new list's input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// Base output cells meet new input cells.
    Compose,
    /// Base input cells meet new input cells.
    Rebase,
}

enum Step {
    Base(Option<u32>),
    New(Option<u32>),
    Both,
}

/// Pairs the marks of a base list and a new list.
pub struct MarkPairQueue<'a> {
    base: MarkQueue<'a>,
    new: MarkQueue<'a>,
    mode: QueueMode,
    metadata: &'a dyn RevisionMetadataSource,
}

impl<'a> MarkPairQueue<'a> {
    pub fn new(
        base: &'a [Mark],
        new: &'a [Mark],
        mode: QueueMode,
        metadata: &'a dyn RevisionMetadataSource,
    ) -> Self {
        Self {
            base: MarkQueue::new(base),
            new: MarkQueue::new(new),
            mode,
            metadata,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty() && self.new.is_empty()
    }

    /// Next pair of marks. When both are present they have the same count.
    pub fn pop(&mut self) -> Result<(Option<Mark>, Option<Mark>)> {
        let step = match (self.base.peek(), self.new.peek()) {
            (None, None) => fail!("popped an exhausted mark queue"),
            (Some(_), None) => Step::Base(None),
            (None, Some(_)) => Step::New(None),
            (Some(base), Some(new)) => self.step(base, new),
        };
        match step {
            Step::Base(len) => Ok((self.pop_base(len)?, None)),
            Step::New(len) => Ok((None, self.pop_new(len)?)),
            Step::Both => {
                let len = match (self.base.peek(), self.new.peek()) {
                    (Some(b), Some(n)) => b.count.min(n.count),
                    _ => fail!("paired queue lost a mark"),
                };
                Ok((self.base.pop_prefix(len)?, self.new.pop_prefix(len)?))
            }
        }
    }

    fn pop_base(&mut self, len: Option<u32>) -> Result<Option<Mark>> {
        match len {
            Some(len) => self.base.pop_prefix(len),
            None => Ok(self.base.pop()),
        }
    }

    fn pop_new(&mut self, len: Option<u32>) -> Result<Option<Mark>> {
        match len {
            Some(len) => self.new.pop_prefix(len),
            None => Ok(self.new.pop()),
        }
    }

    fn step(&self, base: &Mark, new: &Mark) -> Step {
        let base_cell = match self.mode {
            QueueMode::Compose => output_cell_empty(base).then(|| output_cell_id(base)).flatten(),
            QueueMode::Rebase => base.cell_id.clone(),
        };
        match (base_cell, &new.cell_id) {
            (None, None) => Step::Both,
            (Some(_), None) => Step::Base(None),
            (None, Some(_)) => Step::New(None),
            (Some(base_cell), Some(new_cell)) => match compare_cell_positions(
                &base_cell,
                base.count,
                new_cell,
                new.count,
                is_fresh_attach(new),
                self.metadata,
            ) {
                CellOrder::Same => Step::Both,
                CellOrder::BaseFirst(len) => Step::Base(len),
                CellOrder::NewFirst(len) => Step::New(len),
            },
        }
    }

    /// Cuts the popped pair to `length` cells, queueing the remainders.
    pub fn truncate(
        &mut self,
        base: Option<Mark>,
        new: Option<Mark>,
        length: u32,
    ) -> Result<(Option<Mark>, Option<Mark>)> {
        let base = match base {
            Some(mark) if mark.count > length => {
                let (head, tail) = split_mark(&mark, length)?;
                self.base.push_front(tail);
                Some(head)
            }
            other => other,
        };
        let new = match new {
            Some(mark) if mark.count > length => {
                let (head, tail) = split_mark(&mark, length)?;
                self.new.push_front(tail);
                Some(head)
            }
            other => other,
        };
        Ok((base, new))
    }
}
