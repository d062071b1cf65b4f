//! Low-stock policy.

use common::ProductId;

use crate::events::LowStockWarning;

/// Threshold used when none is configured.
pub const DEFAULT_THRESHOLD: u32 = 5;

/// Returns true when `quantity` is strictly below `threshold`.
pub fn should_warn(quantity: u32, threshold: u32) -> bool {
    quantity < threshold
}

/// Process-wide low-stock threshold, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LowStockPolicy {
    threshold: u32,
}

impl LowStockPolicy {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn should_warn(&self, quantity: u32) -> bool {
        should_warn(quantity, self.threshold)
    }

    /// Builds the warning a mutation leaving `quantity` in stock must emit, if any.
    pub fn warning_for(&self, product_id: ProductId, quantity: u32) -> Option<LowStockWarning> {
        self.should_warn(quantity).then_some(LowStockWarning {
            id: product_id,
            quantity,
            threshold: self.threshold,
        })
    }
}

impl Default for LowStockPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}
