use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Zero};
use thiserror::Error;

/// An evaluation `(x, f(x))` of a polynomial.
pub type Point = (BigInt, BigInt);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterpolationError {
    #[error("degenerate interpolation: evaluation point x = {x} appears more than once")]
    DegenerateInterpolation { x: BigInt },

    #[error("unsupported degree {degree}: the closed form only reconstructs degree 2")]
    UnsupportedDegree { degree: usize },

    #[error("interpolation needs {needed} points but only {got} were given")]
    InsufficientPoints { needed: usize, got: usize },

    #[error("interpolated value {numerator}/{denominator} is not an integer")]
    InexactDivision {
        numerator: BigInt,
        denominator: BigInt,
    },
}

/// Strategy used to recover `f(0)` from a set of evaluations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolator {
    /// Closed-form formula for degree 2 polynomials.
    ClosedForm,
    /// General Lagrange interpolation for any degree.
    Lagrange,
}

impl Interpolator {
    /// Picks the closed form for degree 2 and the general path otherwise.
    pub fn for_degree(degree: usize) -> Self {
        if degree == 2 {
            Self::ClosedForm
        } else {
            Self::Lagrange
        }
    }

    /// Reconstructs `f(0)` of a polynomial of the given degree using the first
    /// `degree + 1` points.
    pub fn reconstruct(&self, degree: usize, points: &[Point]) -> Result<BigInt, InterpolationError> {
        if *self == Self::ClosedForm && degree != 2 {
            return Err(InterpolationError::UnsupportedDegree { degree });
        }
        let needed = degree + 1;
        if points.len() < needed {
            return Err(InterpolationError::InsufficientPoints {
                needed,
                got: points.len(),
            });
        }
        let points = &points[..needed];
        match self {
            Self::ClosedForm => reconstruct_closed_form(points),
            Self::Lagrange => interpolate_polynomial_at(points, &BigInt::zero()),
        }
    }
}

/// Reconstructs `f(0)` from exactly three points with the closed-form degree 2
/// formula. Any other number of points is rejected.
pub fn reconstruct_closed_form(points: &[Point]) -> Result<BigInt, InterpolationError> {
    let points: &[Point; 3] =
        points
            .try_into()
            .map_err(|_| InterpolationError::UnsupportedDegree {
                degree: points.len().saturating_sub(1),
            })?;
    reconstruct_degree2(points)
}

/// Closed-form Lagrange interpolation at zero for a degree 2 polynomial:
///
/// ```text
/// f(0) = [y2*x0*x1*(x0-x1) + y0*x1*x2*(x1-x2) + y1*x0*x2*(x2-x0)]
///        / [(x2^2 - x2*(x0+x1) + x0*x1) * (x0-x1)]
/// ```
pub fn reconstruct_degree2(points: &[Point; 3]) -> Result<BigInt, InterpolationError> {
    let [(x0, y0), (x1, y1), (x2, y2)] = points;
    ensure_distinct(&[x0, x1, x2])?;

    let numerator = y2 * x0 * x1 * (x0 - x1) + y0 * x1 * x2 * (x1 - x2) + y1 * x0 * x2 * (x2 - x0);
    let denominator = (x2 * x2 - x2 * (x0 + x1) + x0 * x1) * (x0 - x1);

    exact_divide(numerator, denominator)
}

/// Computes the lagrange basis evaluated at `x`. Each basis element is returned
/// as a `(numerator, denominator)` fraction so that no precision is lost.
pub fn compute_lagrange_basis(
    nodes: &[BigInt],
    x: &BigInt,
) -> Result<Vec<(BigInt, BigInt)>, InterpolationError> {
    ensure_distinct(&nodes.iter().collect::<Vec<_>>())?;

    let mut lagrange_basis = Vec::with_capacity(nodes.len());
    for (j, x_j) in nodes.iter().enumerate() {
        let mut numerator = BigInt::one();
        let mut denominator = BigInt::one();
        for (m, x_m) in nodes.iter().enumerate() {
            if m != j {
                numerator *= x - x_m;
                denominator *= x_j - x_m;
            }
        }
        lagrange_basis.push((numerator, denominator));
    }
    Ok(lagrange_basis)
}

/// Computes the evaluation at `x` of the polynomial interpolating `points`.
/// The polynomial has degree `points.len() - 1`.
pub fn interpolate_polynomial_at(points: &[Point], x: &BigInt) -> Result<BigInt, InterpolationError> {
    if points.is_empty() {
        return Err(InterpolationError::InsufficientPoints { needed: 1, got: 0 });
    }
    let nodes: Vec<BigInt> = points.iter().map(|(x_i, _)| x_i.clone()).collect();
    let lagrange_basis = compute_lagrange_basis(&nodes, x)?;

    // Accumulate the sum as a single reduced fraction.
    let mut numerator = BigInt::zero();
    let mut denominator = BigInt::one();
    for ((_, y), (basis_num, basis_den)) in points.iter().zip(lagrange_basis) {
        numerator = numerator * &basis_den + y * basis_num * &denominator;
        denominator *= basis_den;

        let gcd = numerator.gcd(&denominator);
        if !gcd.is_zero() && !gcd.is_one() {
            numerator /= &gcd;
            denominator /= &gcd;
        }
    }

    exact_divide(numerator, denominator)
}

fn ensure_distinct(xs: &[&BigInt]) -> Result<(), InterpolationError> {
    for (i, x) in xs.iter().enumerate() {
        if xs[i + 1..].contains(x) {
            return Err(InterpolationError::DegenerateInterpolation { x: (*x).clone() });
        }
    }
    Ok(())
}

fn exact_divide(numerator: BigInt, denominator: BigInt) -> Result<BigInt, InterpolationError> {
    let (quotient, remainder) = numerator.div_rem(&denominator);
    if remainder.is_zero() {
        Ok(quotient)
    } else {
        Err(InterpolationError::InexactDivision {
            numerator,
            denominator,
        })
    }
}
