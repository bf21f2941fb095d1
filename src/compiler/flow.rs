//! Bookkeeping for lowering structured control flow into labels and jumps,
//! shared by both code generators.

use log::debug;

use super::ast::{Expression, ExpressionKind};

/// Hands out program wide unique label numbers.
#[derive(Debug, Default)]
pub struct LabelCounter {
    next: usize,
}

impl LabelCounter {
    pub fn new() -> LabelCounter {
        LabelCounter::default()
    }

    pub fn next(&mut self) -> usize {
        let label = self.next;
        self.next += 1;
        debug!("Allocated label __{}", label);
        label
    }
}

/// The end labels of the loops enclosing the code being generated.
#[derive(Debug, Default)]
pub struct LoopStack {
    exits: Vec<usize>,
}

impl LoopStack {
    pub fn new() -> LoopStack {
        LoopStack::default()
    }

    pub fn push(&mut self, exit: usize) {
        self.exits.push(exit)
    }

    pub fn pop(&mut self) -> Option<usize> {
        self.exits.pop()
    }

    /// Where a `break` at the current position jumps to.
    pub fn innermost(&self) -> Option<usize> {
        self.exits.last().copied()
    }
}

/// One arm of an `if / else if / else` chain. The final `else` has no
/// condition.
#[derive(Debug)]
pub struct Arm<'a> {
    pub condition: Option<&'a Expression>,
    pub body: &'a Expression,
}

/// Flattens an `if` whose `otherwise` branches are themselves `if`s into its
/// arms, in source order. Anything that is not an `if` is a single
/// unconditional arm.
pub fn if_chain(expression: &Expression) -> Vec<Arm<'_>> {
    let mut arms = vec![];
    let mut current = expression;
    loop {
        match &current.kind {
            ExpressionKind::If {
                condition,
                then,
                otherwise,
            } => {
                arms.push(Arm {
                    condition: Some(&**condition),
                    body: &**then,
                });
                match otherwise {
                    Some(next) => current = &**next,
                    None => break,
                }
            }
            _ => {
                arms.push(Arm {
                    condition: None,
                    body: current,
                });
                break;
            }
        }
    }
    arms
}
