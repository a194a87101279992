//! Small rolling indicators used by the built-in strategies

use rust_decimal::Decimal;
use std::collections::VecDeque;

/// Fixed-length window of the most recent values
#[derive(Debug, Clone)]
pub struct Window {
    values: VecDeque<Decimal>,
    capacity: usize,
}

impl Window {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, value: Decimal) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Mean of the whole window, once full
    pub fn mean(&self) -> Option<Decimal> {
        if !self.is_full() {
            return None;
        }
        let sum: Decimal = self.values.iter().sum();
        Some(sum / Decimal::from(self.capacity))
    }

    pub fn max(&self) -> Option<Decimal> {
        self.values.iter().copied().max()
    }

    pub fn min(&self) -> Option<Decimal> {
        self.values.iter().copied().min()
    }
}

/// Wilder's relative strength index
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    prev_close: Option<Decimal>,
    seed_gains: Decimal,
    seed_losses: Decimal,
    seen: usize,
    avg_gain: Decimal,
    avg_loss: Decimal,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            prev_close: None,
            seed_gains: Decimal::ZERO,
            seed_losses: Decimal::ZERO,
            seen: 0,
            avg_gain: Decimal::ZERO,
            avg_loss: Decimal::ZERO,
        }
    }

    /// Feed a close; returns the RSI once `period` changes have been seen
    pub fn update(&mut self, close: Decimal) -> Option<Decimal> {
        let prev = self.prev_close.replace(close)?;
        let change = close - prev;
        let gain = change.max(Decimal::ZERO);
        let loss = (-change).max(Decimal::ZERO);
        let n = Decimal::from(self.period);

        self.seen += 1;
        if self.seen < self.period {
            self.seed_gains += gain;
            self.seed_losses += loss;
            return None;
        }
        if self.seen == self.period {
            self.avg_gain = (self.seed_gains + gain) / n;
            self.avg_loss = (self.seed_losses + loss) / n;
        } else {
            self.avg_gain = (self.avg_gain * (n - Decimal::ONE) + gain) / n;
            self.avg_loss = (self.avg_loss * (n - Decimal::ONE) + loss) / n;
        }

        let hundred = Decimal::ONE_HUNDRED;
        if self.avg_loss.is_zero() {
            return Some(if self.avg_gain.is_zero() {
                Decimal::from(50)
            } else {
                hundred
            });
        }
        let rs = self.avg_gain / self.avg_loss;
        Some(hundred - hundred / (Decimal::ONE + rs))
    }
}
