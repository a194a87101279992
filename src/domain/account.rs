use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Account snapshot reported by the venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub balance: Decimal,
    pub equity: Decimal,
    pub used_margin: Decimal,
    pub open_position_count: usize,
    pub updated_at: DateTime<Utc>,
}

impl AccountInfo {
    pub fn new(balance: Decimal) -> Self {
        Self {
            balance,
            equity: balance,
            used_margin: Decimal::ZERO,
            open_position_count: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn free_margin(&self) -> Decimal {
        self.equity - self.used_margin
    }
}
