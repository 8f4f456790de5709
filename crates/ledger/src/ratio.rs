//! Collateralization ratio.

/// `price * collateral / (debt * rate)`, or 0 when there is no debt.
///
/// A non-finite result (zero or missing rate) also reads as 0.
#[inline]
pub fn collateralization_ratio(price: f64, collateral: f64, debt: f64, rate: f64) -> f64 {
    if debt == 0.0 {
        return 0.0;
    }
    let ratio = price * collateral / (debt * rate);
    if ratio.is_finite() {
        ratio
    } else {
        0.0
    }
}
