//! Line-oriented unified diff.
//!
//! Matching follows the longest-common-block recursion of Python's `difflib.SequenceMatcher`
//! (without junk heuristics) and the output is formatted like `difflib.unified_diff` with an
//! empty line terminator, so diff artifacts are interchangeable with difflib generated ones.

use std::collections::HashMap;

pub const BASELINE_LABEL: &str = "baseline";
pub const CANDIDATE_LABEL: &str = "candidate";

const CONTEXT_LINES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Equal,
    Replace,
    Delete,
    Insert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Opcode {
    tag: Tag,
    i1: usize,
    i2: usize,
    j1: usize,
    j2: usize,
}

/// Diff of a baseline and a candidate text, one entry per diff line, empty when they have the
/// same lines.
pub fn diff_texts(baseline: &str, candidate: &str) -> Vec<String> {
    let a = split_lines(baseline);
    let b = split_lines(candidate);
    unified_diff(&a, &b, BASELINE_LABEL, CANDIDATE_LABEL, CONTEXT_LINES)
}

/// Splits on the same line boundaries as Python's `str.splitlines`, dropping the terminators.
pub fn split_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((index, c)) = chars.next() {
        let is_break = matches!(
            c,
            '\n' | '\r' | '\u{0b}' | '\u{0c}' | '\u{1c}' | '\u{1d}' | '\u{1e}' | '\u{85}'
                | '\u{2028}' | '\u{2029}'
        );
        if !is_break {
            continue;
        }
        lines.push(&text[start..index]);
        start = index + c.len_utf8();
        if c == '\r' {
            if let Some((next, '\n')) = chars.peek().copied() {
                chars.next();
                start = next + 1;
            }
        }
    }
    if start < text.len() {
        lines.push(&text[start..]);
    }
    lines
}

pub fn unified_diff(
    a: &[&str],
    b: &[&str],
    from_label: &str,
    to_label: &str,
    context: usize,
) -> Vec<String> {
    let mut out = Vec::new();
    for group in grouped_opcodes(&opcodes(a, b), context) {
        if out.is_empty() {
            out.push(format!("--- {from_label}"));
            out.push(format!("+++ {to_label}"));
        }
        let (first, last) = (group[0], group[group.len() - 1]);
        out.push(format!(
            "@@ -{} +{} @@",
            format_range(first.i1, last.i2),
            format_range(first.j1, last.j2)
        ));
        for op in group {
            match op.tag {
                Tag::Equal => out.extend(a[op.i1..op.i2].iter().map(|line| format!(" {line}"))),
                Tag::Delete => out.extend(a[op.i1..op.i2].iter().map(|line| format!("-{line}"))),
                Tag::Insert => out.extend(b[op.j1..op.j2].iter().map(|line| format!("+{line}"))),
                Tag::Replace => {
                    out.extend(a[op.i1..op.i2].iter().map(|line| format!("-{line}")));
                    out.extend(b[op.j1..op.j2].iter().map(|line| format!("+{line}")));
                }
            }
        }
    }
    out
}

fn format_range(start: usize, stop: usize) -> String {
    let length = stop - start;
    match length {
        0 => format!("{start},0"),
        1 => format!("{}", start + 1),
        _ => format!("{},{length}", start + 1),
    }
}

/// Longest matching block in `a[alo..ahi]` / `b[blo..bhi]`, earliest in `a` then in `b`.
fn longest_match(
    a: &[&str],
    b_index: &HashMap<&str, Vec<usize>>,
    (alo, ahi): (usize, usize),
    (blo, bhi): (usize, usize),
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0);
    let mut run_lengths = HashMap::<usize, usize>::new();
    for (i, line) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut next = HashMap::new();
        for &j in b_index.get(line).into_iter().flatten() {
            if j < blo {
                continue;
            }
            if j >= bhi {
                break;
            }
            let k = j
                .checked_sub(1)
                .and_then(|prev| run_lengths.get(&prev))
                .copied()
                .unwrap_or(0)
                + 1;
            next.insert(j, k);
            if k > best_size {
                best_i = i + 1 - k;
                best_j = j + 1 - k;
                best_size = k;
            }
        }
        run_lengths = next;
    }
    (best_i, best_j, best_size)
}

fn matching_blocks(a: &[&str], b: &[&str]) -> Vec<(usize, usize, usize)> {
    let mut b_index = HashMap::<&str, Vec<usize>>::new();
    for (j, line) in b.iter().enumerate() {
        b_index.entry(*line).or_default().push(j);
    }

    let mut queue = vec![(0, a.len(), 0, b.len())];
    let mut blocks = Vec::new();
    while let Some((alo, ahi, blo, bhi)) = queue.pop() {
        let (i, j, k) = longest_match(a, &b_index, (alo, ahi), (blo, bhi));
        if k == 0 {
            continue;
        }
        blocks.push((i, j, k));
        if alo < i && blo < j {
            queue.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            queue.push((i + k, ahi, j + k, bhi));
        }
    }
    blocks.sort_unstable();

    let mut merged: Vec<(usize, usize, usize)> = Vec::with_capacity(blocks.len() + 1);
    for (i, j, k) in blocks {
        match merged.last_mut() {
            Some((pi, pj, pk)) if *pi + *pk == i && *pj + *pk == j => *pk += k,
            _ => merged.push((i, j, k)),
        }
    }
    merged.push((a.len(), b.len(), 0));
    merged
}

fn opcodes(a: &[&str], b: &[&str]) -> Vec<Opcode> {
    let (mut i, mut j) = (0, 0);
    let mut codes = Vec::new();
    for (ai, bj, size) in matching_blocks(a, b) {
        let tag = match (i < ai, j < bj) {
            (true, true) => Some(Tag::Replace),
            (true, false) => Some(Tag::Delete),
            (false, true) => Some(Tag::Insert),
            (false, false) => None,
        };
        if let Some(tag) = tag {
            codes.push(Opcode {
                tag,
                i1: i,
                i2: ai,
                j1: j,
                j2: bj,
            });
        }
        i = ai + size;
        j = bj + size;
        if size > 0 {
            codes.push(Opcode {
                tag: Tag::Equal,
                i1: ai,
                i2: i,
                j1: bj,
                j2: j,
            });
        }
    }
    codes
}

/// Hunks of changes with up to `n` lines of surrounding context.
fn grouped_opcodes(codes: &[Opcode], n: usize) -> Vec<Vec<Opcode>> {
    let mut codes = codes.to_vec();
    if codes.is_empty() {
        codes.push(Opcode {
            tag: Tag::Equal,
            i1: 0,
            i2: 1,
            j1: 0,
            j2: 1,
        });
    }
    if let Some(first) = codes.first_mut().filter(|op| op.tag == Tag::Equal) {
        first.i1 = first.i1.max(first.i2.saturating_sub(n));
        first.j1 = first.j1.max(first.j2.saturating_sub(n));
    }
    if let Some(last) = codes.last_mut().filter(|op| op.tag == Tag::Equal) {
        last.i2 = last.i2.min(last.i1 + n);
        last.j2 = last.j2.min(last.j1 + n);
    }

    let mut groups = Vec::new();
    let mut group = Vec::new();
    for mut op in codes {
        if op.tag == Tag::Equal && op.i2 - op.i1 > 2 * n {
            group.push(Opcode {
                i2: op.i2.min(op.i1 + n),
                j2: op.j2.min(op.j1 + n),
                ..op
            });
            groups.push(std::mem::take(&mut group));
            op.i1 = op.i1.max(op.i2.saturating_sub(n));
            op.j1 = op.j1.max(op.j2.saturating_sub(n));
        }
        group.push(op);
    }
    if !(group.is_empty() || group.len() == 1 && group[0].tag == Tag::Equal) {
        groups.push(group);
    }
    groups
}
