/// Poor man's approx assertion for matrices
#[macro_export]
macro_rules! assert_approx_matrix_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let diff = $x - $y;

        let max_absdiff = diff.abs().max();
        let approx_eq = max_absdiff <= $tol;

        if !approx_eq {
            println!("abstol: {:e}", $tol);
            println!("left: {}", $x);
            println!("right: {}", $y);
            println!("diff: {:e}", diff);
        }
        assert!(approx_eq);
    }};
}

/// Approx assertion for tensors: equal rank, equal dimension (unless scalar) and
/// entries within an absolute tolerance.
#[macro_export]
macro_rules! assert_approx_tensor_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let (x, y) = (&$x, &$y);
        assert_eq!(x.rank(), y.rank(), "tensor ranks differ");
        if x.rank() > 0 {
            assert_eq!(x.dim(), y.dim(), "tensor dimensions differ");
        }
        let max_absdiff = x
            .as_slice()
            .iter()
            .zip(y.as_slice())
            .map(|(a, b): (&f64, &f64)| (a - b).abs())
            .fold(0.0, f64::max);
        if max_absdiff > $tol {
            println!("abstol: {:e}", $tol);
            println!("left: {:?}", x.as_slice());
            println!("right: {:?}", y.as_slice());
            println!("max abs diff: {:e}", max_absdiff);
        }
        assert!(max_absdiff <= $tol);
    }};
}

#[macro_export]
macro_rules! assert_panics {
    ($e:expr) => {{
        use std::panic::catch_unwind;
        use std::stringify;
        let expr_string = stringify!($e);
        let result = catch_unwind(|| $e);
        if result.is_ok() {
            panic!("assert_panics!({}) failed.", expr_string);
        }
    }};
}
