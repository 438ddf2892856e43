pub mod lagrange;
pub mod polynomial;

pub use lagrange::{InterpolationError, Interpolator, Point};
pub use polynomial::Polynomial;
