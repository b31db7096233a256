//! Savitzky-Golay smoothing with a window sized from a 0-1 factor.
//!
//! The factor picks the window between the narrowest usable one (polynomial
//! order + 1, rounded up to odd) and the widest one (series length, rounded
//! down to odd).

use crate::error::PlotError;
use serde::Serialize;

pub const DEFAULT_POLY_ORDER: usize = 3;

/// Smoothing factor plus polynomial order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Smoothing {
    pub factor: f64,
    pub poly_order: usize,
}

impl Smoothing {
    pub fn apply(&self, ys: &[f64]) -> Result<Vec<f64>, PlotError> {
        let window = window_size(ys.len(), self.factor, self.poly_order)?;
        Ok(savgol_filter(ys, window, self.poly_order))
    }
}

fn ensure_odd(x: usize, round_up: bool) -> usize {
    match (x % 2 == 0, round_up) {
        (false, _) => x,
        (true, true) => x + 1,
        (true, false) => x.saturating_sub(1),
    }
}

/// Odd window size for a series of length `len`.
///
/// Any `len > poly_order + 1` is accepted, including lengths where the
/// smallest and largest window coincide; that window is then used for every
/// factor. Shorter series are `InsufficientData`.
pub fn window_size(len: usize, factor: f64, poly_order: usize) -> Result<usize, PlotError> {
    if len <= poly_order + 1 {
        return Err(PlotError::InsufficientData { len, poly_order });
    }
    let min_win = ensure_odd(poly_order + 1, true);
    let max_win = ensure_odd(len, false);
    debug_assert!(min_win <= max_win);

    let factor = factor.clamp(0.0, 1.0);
    let win = (min_win as f64 + factor * (max_win - min_win) as f64) as usize;
    Ok(ensure_odd(win, false).max(min_win))
}

/// Savitzky-Golay filter; edges are fitted on the first/last full window.
///
/// `window` must be odd, greater than `poly_order` and at most `ys.len()`.
pub fn savgol_filter(ys: &[f64], window: usize, poly_order: usize) -> Vec<f64> {
    let n = ys.len();
    let half = window / 2;
    let weights = center_weights(window, poly_order);

    let mut out = vec![0.0; n];
    for i in half..n - half {
        out[i] = weights
            .iter()
            .zip(&ys[i - half..=i + half])
            .map(|(w, y)| w * y)
            .sum();
    }

    // Fits are in window-centered coordinates: position k maps to k - half.
    let head = fit_polynomial(&ys[..window], poly_order);
    for (i, slot) in out.iter_mut().enumerate().take(half) {
        *slot = eval_polynomial(&head, i as f64 - half as f64);
    }
    let tail = fit_polynomial(&ys[n - window..], poly_order);
    for i in n - half..n {
        out[i] = eval_polynomial(&tail, (i - (n - window)) as f64 - half as f64);
    }
    out
}

fn centered_offsets(window: usize) -> Vec<f64> {
    let half = (window / 2) as f64;
    (0..window).map(|k| k as f64 - half).collect()
}

/// Convolution weights that evaluate the least-squares fit at the window center.
fn center_weights(window: usize, poly_order: usize) -> Vec<f64> {
    let offsets = centered_offsets(window);
    let gram = gram_matrix(&offsets, poly_order);

    // Row 0 of (A^T A)^-1 A^T: solve (A^T A) b = e0, weight_k = sum_j A[k][j] b_j.
    let mut e0 = vec![0.0; poly_order + 1];
    e0[0] = 1.0;
    let b = solve(gram, e0);
    offsets
        .iter()
        .map(|&t| eval_polynomial(&b, t))
        .collect()
}

/// Least-squares polynomial through `(i - half, ys[i])` for an odd-length window;
/// coefficients lowest order first.
fn fit_polynomial(ys: &[f64], poly_order: usize) -> Vec<f64> {
    let xs = centered_offsets(ys.len());
    let gram = gram_matrix(&xs, poly_order);
    let rhs: Vec<f64> = (0..=poly_order)
        .map(|j| xs.iter().zip(ys).map(|(x, y)| x.powi(j as i32) * y).sum())
        .collect();
    solve(gram, rhs)
}

fn gram_matrix(xs: &[f64], poly_order: usize) -> Vec<Vec<f64>> {
    let m = poly_order + 1;
    let mut gram = vec![vec![0.0; m]; m];
    for (r, row) in gram.iter_mut().enumerate() {
        for (c, cell) in row.iter_mut().enumerate() {
            *cell = xs.iter().map(|x| x.powi((r + c) as i32)).sum();
        }
    }
    gram
}

fn eval_polynomial(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// Gaussian elimination with partial pivoting on a small dense system.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Vec<f64> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        a.swap(col, pivot);
        b.swap(col, pivot);

        let p = a[col][col];
        if p == 0.0 {
            continue;
        }
        for row in col + 1..n {
            let f = a[row][col] / p;
            if f == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= f * a[col][k];
            }
            b[row] -= f * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let s: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = if a[row][row] == 0.0 {
            0.0
        } else {
            (b[row] - s) / a[row][row]
        };
    }
    x
}
