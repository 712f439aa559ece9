use nalgebra::{DMatrix, DVector};

/// Lawson-Hanson active-set solver for `min ||A x - b||` subject to `x >= 0`.
///
/// The redistribution systems this feeds are small (tens of columns), so the
/// passive-set subproblems are solved with an SVD, which also rides out the
/// rank-deficient neighborhoods the VRM produces. Always runs in `f64`; the
/// solver does not converge reliably in single precision.
pub fn nnls(a: &DMatrix<f64>, b: &DVector<f64>) -> DVector<f64> {
    let n = a.ncols();
    let mut x = DVector::<f64>::zeros(n);
    let mut passive = vec![false; n];

    let tol = 1e-12 * a.amax().max(1.0);
    let max_outer = 3 * n + 10;

    let mut w = a.transpose() * (b - a * &x);

    for _ in 0..max_outer {
        // most-violated inactive constraint
        let mut best: Option<(usize, f64)> = None;
        for j in 0..n {
            if !passive[j] && w[j] > tol {
                if best.map_or(true, |(_, bw)| w[j] > bw) {
                    best = Some((j, w[j]));
                }
            }
        }
        let Some((j_enter, _)) = best else {
            break;
        };
        passive[j_enter] = true;

        // inner loop: solve on the passive set, stepping back whenever the
        // unconstrained solution leaves the feasible region
        loop {
            let cols: Vec<usize> = (0..n).filter(|&j| passive[j]).collect();
            let sub = a.select_columns(cols.iter());
            let z_sub = sub
                .svd(true, true)
                .solve(b, 1e-13)
                .expect("SVD solve cannot fail with both factors computed");

            if z_sub.iter().all(|&v| v > 0.0) {
                x.fill(0.0);
                for (k, &j) in cols.iter().enumerate() {
                    x[j] = z_sub[k];
                }
                break;
            }

            // step length to the first coordinate that would go negative
            let mut alpha = f64::INFINITY;
            for (k, &j) in cols.iter().enumerate() {
                if z_sub[k] <= 0.0 {
                    let denom = x[j] - z_sub[k];
                    if denom > 0.0 {
                        alpha = alpha.min(x[j] / denom);
                    }
                }
            }
            if !alpha.is_finite() {
                alpha = 0.0;
            }

            for (k, &j) in cols.iter().enumerate() {
                x[j] += alpha * (z_sub[k] - x[j]);
            }
            for &j in &cols {
                if x[j] <= tol {
                    x[j] = 0.0;
                    passive[j] = false;
                }
            }
            if cols.iter().all(|&j| !passive[j]) {
                // everything stepped out; give up on this entering index
                break;
            }
        }

        w = a.transpose() * (b - a * &x);
    }

    x
}

/// Residual of a candidate solution, `||A x - b||`.
pub fn residual(a: &DMatrix<f64>, b: &DVector<f64>, x: &DVector<f64>) -> f64 {
    (b - a * x).norm()
}

#[test]
fn nnls_unconstrained_case_test() {
    // identity system with a positive rhs: solution is the rhs itself
    let a = DMatrix::<f64>::identity(3, 3);
    let b = DVector::from_vec(vec![1.0, 2.0, 0.5]);
    let x = nnls(&a, &b);
    assert!((&x - &b).norm() < 1e-10);
}

#[test]
fn nnls_clamps_negative_test() {
    // unconstrained solution would be (-1, 2); NNLS must clamp x0 to zero
    let a = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]);
    let b = DVector::from_vec(vec![-1.0, 2.0]);
    let x = nnls(&a, &b);
    assert!(x[0].abs() < 1e-12);
    assert!((x[1] - 2.0).abs() < 1e-10);
    assert!(x.iter().all(|&v| v >= 0.0));
}

#[test]
fn nnls_overdetermined_test() {
    // classic small test: 4x3 overdetermined, all-positive optimum
    let a = DMatrix::from_row_slice(
        4,
        3,
        &[
            1.0, 1.0, 0.0, //
            1.0, 0.0, 1.0, //
            0.0, 1.0, 1.0, //
            1.0, 1.0, 1.0,
        ],
    );
    let xtrue = DVector::from_vec(vec![0.5, 1.0, 0.25]);
    let b = &a * &xtrue;
    let x = nnls(&a, &b);
    assert!((&x - &xtrue).norm() < 1e-8);
    assert!(residual(&a, &b, &x) < 1e-8);
}
