//! Revenue split between the platform (admin) and the teacher.
//!
//! All arithmetic is integer math on minor currency units. The admin share is
//! rounded half-up and the teacher share is whatever remains, so the two always
//! add back to the gross amount exactly.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 1 basis point = 0.01%.
pub const BPS_DENOMINATOR: i32 = 10_000;

/// Platform fee used when a deployment does not configure one (10%).
pub const DEFAULT_FEE_RATE_BPS: i32 = 1_000;

/// Largest single amount the ledger accepts (one billion in major units).
/// Keeps per-teacher and platform sums far from `i64::MAX`.
pub const MAX_AMOUNT_CENTS: i64 = 100_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    #[error("amount must not be negative, got {0} cents")]
    InvalidAmount(i64),

    #[error("amount must not exceed {max} cents, got {0} cents", max = MAX_AMOUNT_CENTS)]
    AmountTooLarge(i64),

    #[error("fee rate must be within 0..=10000 bps, got {0}")]
    InvalidFeeRate(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub admin_amount: i64,
    pub teacher_amount: i64,
}

impl Split {
    pub fn gross(&self) -> i64 {
        self.admin_amount + self.teacher_amount
    }
}

pub fn validate_fee_rate(fee_rate_bps: i32) -> Result<(), SplitError> {
    if !(0..=BPS_DENOMINATOR).contains(&fee_rate_bps) {
        return Err(SplitError::InvalidFeeRate(fee_rate_bps));
    }
    Ok(())
}

/// Split `gross_cents` at `fee_rate_bps`.
///
/// `admin = round_half_up(gross * bps / 10000)`, `teacher = gross - admin`.
pub fn split(gross_cents: i64, fee_rate_bps: i32) -> Result<Split, SplitError> {
    if gross_cents < 0 {
        return Err(SplitError::InvalidAmount(gross_cents));
    }
    if gross_cents > MAX_AMOUNT_CENTS {
        return Err(SplitError::AmountTooLarge(gross_cents));
    }
    validate_fee_rate(fee_rate_bps)?;

    let denominator = i128::from(BPS_DENOMINATOR);
    let scaled = i128::from(gross_cents) * i128::from(fee_rate_bps);
    let admin = (scaled + denominator / 2) / denominator;

    // admin <= gross because bps <= 10000, so the cast cannot truncate.
    let admin_amount = admin as i64;
    Ok(Split {
        admin_amount,
        teacher_amount: gross_cents - admin_amount,
    })
}

/// Owns the deployment's fee rate. Presentation layers never compute the split
/// themselves; every new payment goes through here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitCalculator {
    fee_rate_bps: i32,
}

impl SplitCalculator {
    pub fn new(fee_rate_bps: i32) -> Result<Self, SplitError> {
        validate_fee_rate(fee_rate_bps)?;
        Ok(Self { fee_rate_bps })
    }

    pub fn fee_rate_bps(&self) -> i32 {
        self.fee_rate_bps
    }

    pub fn split(&self, gross_cents: i64) -> Result<Split, SplitError> {
        split(gross_cents, self.fee_rate_bps)
    }
}

impl Default for SplitCalculator {
    fn default() -> Self {
        Self {
            fee_rate_bps: DEFAULT_FEE_RATE_BPS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_ten_percent() {
        assert_eq!(
            split(10_000, 1_000).unwrap(),
            Split {
                admin_amount: 1_000,
                teacher_amount: 9_000
            }
        );
    }

    #[test]
    fn rounds_admin_share_half_up() {
        // 9.9 cents -> 10
        let s = split(99, 1_000).unwrap();
        assert_eq!((s.admin_amount, s.teacher_amount), (10, 89));

        // exactly 0.5 cents -> 1
        let s = split(5, 1_000).unwrap();
        assert_eq!((s.admin_amount, s.teacher_amount), (1, 4));

        // 0.4 cents -> 0
        let s = split(4, 1_000).unwrap();
        assert_eq!((s.admin_amount, s.teacher_amount), (0, 4));
    }

    #[test]
    fn zero_gross_splits_to_zero() {
        let s = split(0, 1_000).unwrap();
        assert_eq!((s.admin_amount, s.teacher_amount), (0, 0));
    }

    #[test]
    fn rejects_out_of_range_amount() {
        assert_eq!(split(-1, 1_000), Err(SplitError::InvalidAmount(-1)));
        assert_eq!(
            split(MAX_AMOUNT_CENTS + 1, 1_000),
            Err(SplitError::AmountTooLarge(MAX_AMOUNT_CENTS + 1))
        );
        assert!(split(MAX_AMOUNT_CENTS, 1_000).is_ok());
    }

    #[test]
    fn rejects_out_of_range_fee_rate() {
        assert_eq!(split(100, -1), Err(SplitError::InvalidFeeRate(-1)));
        assert_eq!(split(100, 10_001), Err(SplitError::InvalidFeeRate(10_001)));
        assert!(SplitCalculator::new(10_001).is_err());
    }

    #[test]
    fn boundary_rates() {
        let s = split(12_345, 0).unwrap();
        assert_eq!((s.admin_amount, s.teacher_amount), (0, 12_345));

        let s = split(12_345, 10_000).unwrap();
        assert_eq!((s.admin_amount, s.teacher_amount), (12_345, 0));
    }

    #[test]
    fn large_amounts_do_not_overflow() {
        let s = split(i64::MAX, 10_000).unwrap();
        assert_eq!(s.admin_amount, i64::MAX);
        assert_eq!(s.teacher_amount, 0);
    }

    #[test]
    fn shares_reconstruct_gross_and_admin_is_nearest_cent() {
        for fee_rate_bps in [0, 1, 250, 333, 1_000, 1_500, 4_999, 5_000, 9_999, 10_000] {
            for gross in 0..3_000i64 {
                let s = split(gross, fee_rate_bps).unwrap();
                assert_eq!(s.gross(), gross);

                // round-half-up: admin*10000 - 5000 <= gross*bps < admin*10000 + 5000
                let exact = i128::from(gross) * i128::from(fee_rate_bps);
                let admin = i128::from(s.admin_amount) * 10_000;
                assert!(admin - 5_000 <= exact && exact < admin + 5_000);
            }
        }
    }

    #[test]
    fn calculator_uses_configured_rate() {
        let calculator = SplitCalculator::new(2_000).unwrap();
        assert_eq!(calculator.fee_rate_bps(), 2_000);
        assert_eq!(calculator.split(1_000).unwrap().admin_amount, 200);
        assert_eq!(SplitCalculator::default().fee_rate_bps(), DEFAULT_FEE_RATE_BPS);
    }
}
