//! Longest-common-subsequence edit scripts over lines.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Old line `.0` equals new line `.1`
    Equal(usize, usize),
    /// Old line removed
    Delete(usize),
    /// New line added
    Insert(usize),
}

/// Minimal edit script turning `old` into `new`.
///
/// Equal lines are matched as early as possible; on a tie a deletion comes
/// before an insertion. Returns `None` when the table would exceed
/// `max_cells` entries.
pub fn edit_script<T: PartialEq>(old: &[T], new: &[T], max_cells: usize) -> Option<Vec<Op>> {
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let (a, b) = (&old[prefix..], &new[prefix..]);
    let (n, m) = (a.len(), b.len());

    let cells = (n + 1).checked_mul(m + 1)?;
    if cells > max_cells {
        return None;
    }

    // table[i * width + j] = LCS length of a[i..] and b[j..]
    let width = m + 1;
    let mut table = vec![0u32; cells];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i * width + j] = if a[i] == b[j] {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let mut ops: Vec<Op> = (0..prefix).map(|k| Op::Equal(k, k)).collect();
    ops.reserve(n + m);

    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            ops.push(Op::Equal(prefix + i, prefix + j));
            i += 1;
            j += 1;
        } else if table[(i + 1) * width + j] >= table[i * width + j + 1] {
            ops.push(Op::Delete(prefix + i));
            i += 1;
        } else {
            ops.push(Op::Insert(prefix + j));
            j += 1;
        }
    }
    ops.extend((i..n).map(|k| Op::Delete(prefix + k)));
    ops.extend((j..m).map(|k| Op::Insert(prefix + k)));

    Some(ops)
}
