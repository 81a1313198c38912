use crate::types::BLANK_ID;

/// Transition rule of one expanded-target column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRule {
    /// The column holds blank; it can be entered from itself or the label before.
    Blank,
    /// The label equals the one two columns back, so the blank in between
    /// cannot be skipped.
    Repeat,
    /// Any other label; reachable by skipping the preceding blank.
    Distinct,
}

impl ColumnRule {
    pub fn allows_skip(self) -> bool {
        matches!(self, ColumnRule::Distinct)
    }
}

/// `A B C -> _ A _ B _ C _`
pub fn expand_targets(labels: &[u32]) -> Vec<u32> {
    let mut expanded = Vec::with_capacity(2 * labels.len() + 1);
    for &label in labels {
        expanded.push(BLANK_ID);
        expanded.push(label);
    }
    expanded.push(BLANK_ID);
    expanded
}

fn column_rules(expanded: &[u32]) -> Vec<ColumnRule> {
    expanded
        .iter()
        .enumerate()
        .map(|(s, &symbol)| {
            if symbol == BLANK_ID {
                ColumnRule::Blank
            } else if s >= 2 && expanded[s - 2] == symbol {
                ColumnRule::Repeat
            } else {
                ColumnRule::Distinct
            }
        })
        .collect()
}

/// Expanded target of a single sequence with its per-column rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedTargets {
    symbols: Vec<u32>,
    rules: Vec<ColumnRule>,
}

impl ExpandedTargets {
    pub fn new(labels: &[u32]) -> Self {
        let symbols = expand_targets(labels);
        let rules = column_rules(&symbols);
        Self { symbols, rules }
    }

    pub fn symbols(&self) -> &[u32] {
        &self.symbols
    }

    pub fn rules(&self) -> &[ColumnRule] {
        &self.rules
    }

    /// Lattice width, `2S + 1`.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn label_count(&self) -> usize {
        self.symbols.len() / 2
    }

    /// `is blank` mask for columns `2..`.
    pub fn blank_mask(&self) -> Vec<u8> {
        mask_from(&self.rules, ColumnRule::Blank)
    }

    /// `repeats the label two columns back` mask for columns `2..`.
    pub fn repeat_mask(&self) -> Vec<u8> {
        mask_from(&self.rules, ColumnRule::Repeat)
    }
}

fn mask_from(rules: &[ColumnRule], wanted: ColumnRule) -> Vec<u8> {
    rules
        .iter()
        .skip(2)
        .map(|&rule| u8::from(rule == wanted))
        .collect()
}

/// Expanded targets of a batch, padded with blank to a shared width.
///
/// Row `n` holds the expansion of the first `target_lengths[n]` labels of
/// sequence `n`; anything past that is blank, so padded columns never allow a
/// skip and only feed columns further right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedBatch {
    symbols: Vec<u32>,
    rules: Vec<ColumnRule>,
    label_counts: Vec<usize>,
    batch: usize,
    width: usize,
}

impl ExpandedBatch {
    /// `labels[n]` must already be truncated to its target length.
    pub fn new(labels: &[Vec<u32>]) -> Self {
        let max_labels = labels.iter().map(Vec::len).max().unwrap_or(0);
        let width = 2 * max_labels + 1;
        let mut symbols = Vec::with_capacity(labels.len() * width);
        let mut rules = Vec::with_capacity(labels.len() * width);
        for row in labels {
            let mut expanded = expand_targets(row);
            expanded.resize(width, BLANK_ID);
            rules.extend(column_rules(&expanded));
            symbols.extend(expanded);
        }
        Self {
            symbols,
            rules,
            label_counts: labels.iter().map(Vec::len).collect(),
            batch: labels.len(),
            width,
        }
    }

    /// Unpadded label count of every row.
    pub fn label_counts(&self) -> &[usize] {
        &self.label_counts
    }

    /// Row-major `(N, width)` symbols.
    pub fn symbols(&self) -> &[u32] {
        &self.symbols
    }

    pub fn row(&self, n: usize) -> &[u32] {
        &self.symbols[n * self.width..(n + 1) * self.width]
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Row-major `(N, width - 2)` blank mask.
    pub fn blank_mask(&self) -> Vec<u8> {
        self.batched_mask(ColumnRule::Blank)
    }

    /// Row-major `(N, width - 2)` repeat mask.
    pub fn repeat_mask(&self) -> Vec<u8> {
        self.batched_mask(ColumnRule::Repeat)
    }

    fn batched_mask(&self, wanted: ColumnRule) -> Vec<u8> {
        if self.width == 0 {
            return Vec::new();
        }
        self.rules
            .chunks(self.width)
            .flat_map(|row| mask_from(row, wanted))
            .collect()
    }
}
