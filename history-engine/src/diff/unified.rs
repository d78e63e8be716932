//! Unified diff rendering.

use super::lcs::{edit_script, Op};

const NO_NEWLINE: &str = "\\ No newline at end of file\n";

/// Split text into lines, each keeping its trailing `\n`.
pub fn lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// Render a unified diff of `old` against `new`.
///
/// Identical inputs give an empty string. Returns `None` when the inputs
/// exceed the `max_cells` ceiling of the edit script.
pub fn unified_diff(
    old: &str,
    new: &str,
    old_label: &str,
    new_label: &str,
    context: usize,
    max_cells: usize,
) -> Option<String> {
    let old_lines = lines(old);
    let new_lines = lines(new);
    let ops = edit_script(&old_lines, &new_lines, max_cells)?;

    let hunks = hunk_ranges(&ops, context);
    if hunks.is_empty() {
        return Some(String::new());
    }

    // lines of each side consumed before op k
    let mut old_pos = Vec::with_capacity(ops.len() + 1);
    let mut new_pos = Vec::with_capacity(ops.len() + 1);
    let (mut o, mut n) = (0usize, 0usize);
    for op in &ops {
        old_pos.push(o);
        new_pos.push(n);
        match op {
            Op::Equal(..) => {
                o += 1;
                n += 1;
            }
            Op::Delete(_) => o += 1,
            Op::Insert(_) => n += 1,
        }
    }

    let mut out = format!("--- {old_label}\n+++ {new_label}\n");
    for (start, end) in hunks {
        let slice = &ops[start..end];
        let old_count = slice.iter().filter(|op| !matches!(op, Op::Insert(_))).count();
        let new_count = slice.iter().filter(|op| !matches!(op, Op::Delete(_))).count();

        out.push_str(&format!(
            "@@ -{} +{} @@\n",
            range(old_pos[start], old_count),
            range(new_pos[start], new_count)
        ));

        for op in slice {
            let (prefix, line) = match *op {
                Op::Equal(i, _) => (' ', old_lines[i]),
                Op::Delete(i) => ('-', old_lines[i]),
                Op::Insert(j) => ('+', new_lines[j]),
            };
            out.push(prefix);
            out.push_str(line);
            if !line.ends_with('\n') {
                out.push('\n');
                out.push_str(NO_NEWLINE);
            }
        }
    }

    Some(out)
}

/// `start,count` as printed in a hunk header; the count is dropped when it is 1.
fn range(before: usize, count: usize) -> String {
    match count {
        0 => format!("{before},0"),
        1 => format!("{}", before + 1),
        _ => format!("{},{}", before + 1, count),
    }
}

/// Op index ranges `[start, end)` of each hunk. Changes separated by at most
/// `2 * context` unchanged lines share a hunk.
fn hunk_ranges(ops: &[Op], context: usize) -> Vec<(usize, usize)> {
    let mut hunks: Vec<(usize, usize)> = Vec::new();

    for (k, op) in ops.iter().enumerate() {
        if matches!(op, Op::Equal(..)) {
            continue;
        }
        let start = k.saturating_sub(context);
        let end = (k + 1 + context).min(ops.len());
        match hunks.last_mut() {
            Some(last) if start <= last.1 => last.1 = end,
            _ => hunks.push((start, end)),
        }
    }

    hunks
}
