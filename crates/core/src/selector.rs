//! Terminal-step selection over per-sample action code sequences.

use ndarray::{ArrayView1, ArrayView2, Axis};

/// Index of the first `end_id` in `codes`, or the last step when the policy
/// never emitted it.
///
/// A terminal marker at position 0 is an empty edit and is returned as-is.
pub fn select_terminal_step(codes: ArrayView1<'_, i64>, end_id: i64) -> usize {
    codes
        .iter()
        .position(|&code| code == end_id)
        .unwrap_or_else(|| codes.len().saturating_sub(1))
}

/// Per-row [`select_terminal_step`] over a `[batch, steps]` code matrix.
pub fn select_terminal_steps(codes: ArrayView2<'_, i64>, end_id: i64) -> Vec<usize> {
    codes
        .axis_iter(Axis(0))
        .map(|row| select_terminal_step(row, end_id))
        .collect()
}
