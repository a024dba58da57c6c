pub mod expreg;
pub mod linreg;
pub mod robust;
pub mod stats;

pub use expreg::{SatExpFit, SatExpReg};
pub use linreg::LinReg;
pub use robust::{
    count_outliers, dixon_test, iqr, resist_mean, resist_std, DixonConfidence, DixonError,
    DixonOutliers, RobustOptions,
};
pub use stats::{
    adjusted_r2, aic_from_rss, mad, median, median_spacing, quantile, r2_from_predictions, rmse,
};
