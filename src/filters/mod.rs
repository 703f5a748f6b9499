pub mod complementary;
pub mod rate_integral;

pub use complementary::{AttitudeFusion, FusionOutput, ScalarComplementaryFilter};
pub use rate_integral::RateIntegral;
