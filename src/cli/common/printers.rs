// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/// Pretty printers for reporting information.
use std::{
    borrow::Cow,
    sync::{Mutex, MutexGuard, PoisonError},
};

const VERTICAL: char = '│';
const UP_AND_RIGHT: char = '└';
const VERTICAL_AND_RIGHT: char = '├';

lazy_static::lazy_static! {
    static ref WARNING_PRINTER: Mutex<Vec<Vec<Cow<'static, str>>>> = Mutex::new(vec![]);
}

/// The symbol leading a line of a block in a tree-like summary. Only the first
/// line of a block gets a branch; the very last block closes the tree.
fn tree_symbol(i_line: usize, num_lines: usize, i_block: usize, num_blocks: usize) -> char {
    match (i_line, i_line + 1 == num_lines, i_block + 1 == num_blocks) {
        (0, false, _) => VERTICAL_AND_RIGHT,
        (0, _, false) => VERTICAL_AND_RIGHT,
        (0, true, true) => UP_AND_RIGHT,
        _ => VERTICAL,
    }
}

fn tree_lines(blocks: &[Vec<Cow<'static, str>>]) -> Vec<String> {
    let num_blocks = blocks.len();
    blocks
        .iter()
        .enumerate()
        .flat_map(|(i_block, block)| {
            let num_lines = block.len();
            block.iter().enumerate().map(move |(i_line, line)| {
                let symbol = tree_symbol(i_line, num_lines, i_block, num_blocks);
                format!("{symbol} {line}")
            })
        })
        .collect()
}

/// Collects blocks of information about a step (e.g. the inputs of
/// first-cal) and logs them under a bold title.
pub(crate) struct InfoPrinter {
    title: Cow<'static, str>,
    blocks: Vec<Vec<Cow<'static, str>>>,
}

impl InfoPrinter {
    pub(crate) fn new(title: Cow<'static, str>) -> Self {
        Self {
            title,
            blocks: vec![],
        }
    }

    pub(crate) fn push_line(&mut self, line: Cow<'static, str>) {
        self.blocks.push(vec![line]);
    }

    pub(crate) fn push_block(&mut self, block: Vec<Cow<'static, str>>) {
        self.blocks.push(block);
    }

    pub(crate) fn display(self) {
        log::info!("{}", console::style(self.title).bold());
        for line in tree_lines(&self.blocks) {
            log::info!("{line}");
        }
        log::info!("");
    }
}

fn warnings() -> MutexGuard<'static, Vec<Vec<Cow<'static, str>>>> {
    WARNING_PRINTER
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

pub(crate) trait Warn {
    fn warn(self);
}

impl Warn for &'static str {
    fn warn(self) {
        warnings().push(vec![self.into()]);
    }
}

impl Warn for String {
    fn warn(self) {
        warnings().push(vec![self.into()]);
    }
}

impl Warn for Cow<'static, str> {
    fn warn(self) {
        warnings().push(vec![self]);
    }
}

impl Warn for Vec<Cow<'static, str>> {
    fn warn(self) {
        warnings().push(self);
    }
}

/// Print out any warnings that have been collected as CLI arguments have been
/// parsed, then forget them.
pub(crate) fn display_warnings() {
    log::debug!("Displaying warnings");
    let mut blocks = warnings();
    if blocks.is_empty() {
        return;
    }

    log::warn!("{}", console::style("Warnings").bold());
    for line in tree_lines(&blocks) {
        log::warn!("{line}");
    }
    log::warn!("");
    blocks.clear();
}
