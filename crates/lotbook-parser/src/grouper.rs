//! Splits raw QIF text into line groups

use crate::types::LineGroup;

const STANDALONE_PREFIXES: [&str; 3] = ["!Type", "!Option", "!Clear"];

/// Accumulates lines into `^`-terminated records.
///
/// Directive lines are emitted as soon as they are seen and do not flush the
/// record being accumulated. Blank lines are dropped.
#[derive(Debug, Default)]
pub struct LineGrouper {
    record: Vec<String>,
}

impl LineGrouper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group a whole document
    pub fn group(text: &str) -> Vec<LineGroup> {
        let mut grouper = LineGrouper::new();
        let mut groups: Vec<LineGroup> = text
            .lines()
            .filter_map(|line| grouper.push_line(line))
            .collect();
        groups.extend(grouper.finish());
        groups
    }

    /// Feed one raw line, returning a group when one is complete
    pub fn push_line(&mut self, line: &str) -> Option<LineGroup> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        if STANDALONE_PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
            return Some(LineGroup::Directive(trimmed.to_string()));
        }

        if trimmed == "^" {
            return Some(LineGroup::Record(std::mem::take(&mut self.record)));
        }

        self.record.push(trimmed.to_string());
        None
    }

    /// Flush a trailing record that was never terminated
    pub fn finish(self) -> Option<LineGroup> {
        if self.record.is_empty() {
            None
        } else {
            Some(LineGroup::Record(self.record))
        }
    }
}
