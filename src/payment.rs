//! Static payment method catalog.
//!
//! Every offer names a payment method by id. A method fixes two protocol
//! parameters: the maximum trade duration (how long the payment leg may take
//! before the trade is considered stale and disputable) and a trade limit
//! derived from the method's chargeback risk tier.
//!
//! The registry is built once at process start and never mutated afterwards.
//! All lookups go through [`PaymentMethodRegistry`].

use std::{collections::HashMap, time::Duration};

use bitcoin::Amount;

const DAY: Duration = Duration::from_secs(86_400);

/// Chargeback risk tier of a payment method. Riskier methods get lower
/// trade limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskTier {
    /// Practically irreversible payment rails.
    VeryLow,
    /// Reversal requires in-person or legal effort.
    Low,
    /// Reversible with some effort.
    Mid,
    /// Easily reversible (most consumer bank rails).
    High,
}

impl RiskTier {
    /// Default trade limit for this tier.
    pub fn default_trade_limit(&self) -> Amount {
        match self {
            RiskTier::VeryLow => Amount::from_sat(10_000_000_000), // 100 BTC
            RiskTier::Low => Amount::from_sat(5_000_000_000),      // 50 BTC
            RiskTier::Mid => Amount::from_sat(2_500_000_000),      // 25 BTC
            RiskTier::High => Amount::from_sat(1_250_000_000),     // 12.5 BTC
        }
    }
}

/// One catalog entry. Immutable after process start.
#[derive(Debug, Clone)]
pub struct PaymentMethod {
    /// Method identifier as referenced by offers.
    pub id: String,
    /// Maximum duration of the payment leg of a trade.
    pub max_trade_period: Duration,
    /// Risk tier the trade limit derives from.
    pub risk: RiskTier,
    /// Maximum trade amount accepted for this method.
    pub trade_limit: Amount,
}

impl PaymentMethod {
    fn new(id: &str, max_trade_period: Duration, risk: RiskTier) -> Self {
        Self {
            id: id.to_string(),
            max_trade_period,
            risk,
            trade_limit: risk.default_trade_limit(),
        }
    }
}

/// Process-wide payment method lookup table, built once at startup.
#[derive(Debug)]
pub struct PaymentMethodRegistry {
    methods: HashMap<String, PaymentMethod>,
}

impl PaymentMethodRegistry {
    /// The built-in catalog.
    pub fn builtin() -> Self {
        Self::from_methods(vec![
            PaymentMethod::new("SEPA", 6 * DAY, RiskTier::High),
            PaymentMethod::new("SEPA_INSTANT", DAY, RiskTier::High),
            PaymentMethod::new("NATIONAL_BANK", 4 * DAY, RiskTier::High),
            PaymentMethod::new("SAME_BANK", 2 * DAY, RiskTier::High),
            PaymentMethod::new("FASTER_PAYMENTS", DAY, RiskTier::High),
            PaymentMethod::new("REVOLUT", DAY, RiskTier::High),
            PaymentMethod::new("SWISH", DAY, RiskTier::Low),
            PaymentMethod::new("MONEY_GRAM", 4 * DAY, RiskTier::Mid),
            PaymentMethod::new("WESTERN_UNION", 4 * DAY, RiskTier::Mid),
            PaymentMethod::new("CASH_DEPOSIT", 4 * DAY, RiskTier::High),
            PaymentMethod::new("CASH_BY_MAIL", 8 * DAY, RiskTier::High),
            PaymentMethod::new("F2F", 4 * DAY, RiskTier::Low),
            PaymentMethod::new("ADVANCED_CASH", DAY, RiskTier::VeryLow),
        ])
    }

    /// Builds a registry from an explicit method list. Later duplicates of
    /// an id replace earlier ones.
    pub fn from_methods(methods: Vec<PaymentMethod>) -> Self {
        Self {
            methods: methods.into_iter().map(|m| (m.id.clone(), m)).collect(),
        }
    }

    /// Looks up a method by id.
    pub fn get(&self, id: &str) -> Option<&PaymentMethod> {
        self.methods.get(id)
    }

    /// Maximum trade duration for a method, if the method exists.
    pub fn max_trade_period(&self, id: &str) -> Option<Duration> {
        self.get(id).map(|m| m.max_trade_period)
    }

    /// Whether `amount` is within the method's trade limit. Unknown methods
    /// are never within limit.
    pub fn is_within_limit(&self, id: &str, amount: Amount) -> bool {
        self.get(id).map(|m| amount <= m.trade_limit).unwrap_or(false)
    }

    /// Number of catalog entries.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let registry = PaymentMethodRegistry::builtin();
        let sepa = registry.get("SEPA").unwrap();
        assert_eq!(sepa.max_trade_period, 6 * DAY);
        assert_eq!(sepa.risk, RiskTier::High);
        assert!(registry.get("CARRIER_PIGEON").is_none());
    }

    #[test]
    fn test_trade_limits_follow_risk_tier() {
        let registry = PaymentMethodRegistry::builtin();
        // High risk: 12.5 BTC limit.
        assert!(registry.is_within_limit("SEPA", Amount::from_sat(1_250_000_000)));
        assert!(!registry.is_within_limit("SEPA", Amount::from_sat(1_250_000_001)));
        // Very low risk: 100 BTC limit.
        assert!(registry.is_within_limit("ADVANCED_CASH", Amount::from_sat(9_999_999_999)));
        // Unknown method never passes.
        assert!(!registry.is_within_limit("CARRIER_PIGEON", Amount::from_sat(1)));
    }

    #[test]
    fn test_custom_catalog_replaces_duplicates() {
        let registry = PaymentMethodRegistry::from_methods(vec![
            PaymentMethod::new("SEPA", DAY, RiskTier::High),
            PaymentMethod::new("SEPA", 2 * DAY, RiskTier::Low),
        ]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.max_trade_period("SEPA").unwrap(), 2 * DAY);
    }
}
