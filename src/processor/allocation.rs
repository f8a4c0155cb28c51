use serde::{Deserialize, Serialize};

use crate::types::AllocationComponent;

/// priority slot for one component in the allocation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AllocationPriority {
    First = 1,
    Second = 2,
    Third = 3,
    Fourth = 4,
}

/// pluggable precedence for splitting a payment across installment
/// components; the default order is penalty, fee, interest, principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRule {
    pub penalty_priority: AllocationPriority,
    pub fee_priority: AllocationPriority,
    pub interest_priority: AllocationPriority,
    pub principal_priority: AllocationPriority,
}

impl AllocationRule {
    /// standard order: penalty -> fee -> interest -> principal
    pub fn standard() -> Self {
        Self {
            penalty_priority: AllocationPriority::First,
            fee_priority: AllocationPriority::Second,
            interest_priority: AllocationPriority::Third,
            principal_priority: AllocationPriority::Fourth,
        }
    }

    /// interest-first order used by some products
    pub fn interest_first() -> Self {
        Self {
            interest_priority: AllocationPriority::First,
            penalty_priority: AllocationPriority::Second,
            fee_priority: AllocationPriority::Third,
            principal_priority: AllocationPriority::Fourth,
        }
    }

    /// principal-first order (early principal recovery products)
    pub fn principal_first() -> Self {
        Self {
            principal_priority: AllocationPriority::First,
            interest_priority: AllocationPriority::Second,
            penalty_priority: AllocationPriority::Third,
            fee_priority: AllocationPriority::Fourth,
        }
    }

    /// components sorted by their priority
    pub fn ordered_components(&self) -> [AllocationComponent; 4] {
        let mut priorities = [
            (self.penalty_priority, AllocationComponent::Penalty),
            (self.fee_priority, AllocationComponent::Fee),
            (self.interest_priority, AllocationComponent::Interest),
            (self.principal_priority, AllocationComponent::Principal),
        ];
        priorities.sort_by_key(|&(priority, _)| priority);
        [
            priorities[0].1,
            priorities[1].1,
            priorities[2].1,
            priorities[3].1,
        ]
    }
}

impl Default for AllocationRule {
    fn default() -> Self {
        Self::standard()
    }
}
