/*!
Numeric building blocks shared by the FSPT crates.

- [`sort`]: in-place quick-sort of row-major matrices by a single column,
  preserving row integrity
- [`stats`]: median and quartiles over sorted sequences
- [`binomial`]: memoised binomial coefficients backed by a process-wide
  Pascal triangle
- [`poly`]: quadratic equation solver
- [`rng`]: the process-wide seedable random source

The random source and the Pascal triangle are process-wide state with
explicit initialisation points; everything else is free functions over
slices.
*/

pub mod binomial;
pub mod poly;
pub mod rng;
pub mod sort;
pub mod stats;

pub use binomial::binomial;
pub use poly::solve_quadratic;
