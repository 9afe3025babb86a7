//! Small dense linear algebra helpers.

use ndarray::Array2;

/// Pivots smaller than this are treated as zero.
const SINGULAR_EPS: f64 = 1e-12;

/// Invert a square matrix by Gauss–Jordan elimination with partial pivoting.
///
/// Returns `None` if the matrix is not square or is singular.
#[must_use]
pub fn invert(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    if n != a.ncols() {
        return None;
    }

    let mut m = a.clone();
    let mut inv = Array2::<f64>::eye(n);

    for col in 0..n {
        // Partial pivot
        let mut pivot_row = col;
        let mut pivot_abs = m[[col, col]].abs();
        for row in (col + 1)..n {
            let v = m[[row, col]].abs();
            if v > pivot_abs {
                pivot_abs = v;
                pivot_row = row;
            }
        }
        if !(pivot_abs > SINGULAR_EPS) {
            return None;
        }
        if pivot_row != col {
            swap_rows(&mut m, col, pivot_row);
            swap_rows(&mut inv, col, pivot_row);
        }

        let pivot = m[[col, col]];
        for j in 0..n {
            m[[col, j]] /= pivot;
            inv[[col, j]] /= pivot;
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = m[[row, col]];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                m[[row, j]] -= factor * m[[col, j]];
                inv[[row, j]] -= factor * inv[[col, j]];
            }
        }
    }

    Some(inv)
}

fn swap_rows(m: &mut Array2<f64>, a: usize, b: usize) {
    for j in 0..m.ncols() {
        m.swap([a, j], [b, j]);
    }
}

/// Make a matrix exactly symmetric by averaging it with its transpose.
#[must_use]
pub fn symmetrize(m: &Array2<f64>) -> Array2<f64> {
    (m + &m.t()) * 0.5
}
