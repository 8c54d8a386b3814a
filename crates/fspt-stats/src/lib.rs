/*!
Statistical tests backing the FSPT split criterion.

- [`kolmogorov`]: the exact (matrix-power) and asymptotic CDF of
  Kolmogorov's goodness-of-fit statistic
- [`boundary`]: the distance-to-boundary uniformity test, which decides
  whether the points inside a box are plausibly uniform over it
*/

pub mod boundary;
pub mod kolmogorov;

pub use boundary::uniformity_p_value;
pub use kolmogorov::kolmogorov_cdf;
