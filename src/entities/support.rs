// SupportRecord - one disbursement fact
//
// Year and month stay text to preserve the source formatting ("2005", "1").
// Amount is an exact decimal; only yearly averages ever pass through f64.

use super::institution::Institution;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SupportRecord {
    pub institution: Institution,
    pub year: String,
    pub month: String,
    pub amount: Decimal,
}

impl SupportRecord {
    pub fn new(
        institution: Institution,
        year: impl Into<String>,
        month: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        SupportRecord {
            institution,
            year: year.into(),
            month: month.into(),
            amount,
        }
    }

    /// Compute idempotency hash for duplicate detection across batches
    ///
    /// Covers all four fields; the amount is normalized so "10" and "10.0"
    /// hash the same.
    pub fn compute_idempotency_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}|{}",
            self.institution.id,
            self.year,
            self.month,
            self.amount.normalize()
        ));
        format!("{:x}", hasher.finalize())
    }
}
