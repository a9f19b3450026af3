//! Product catalog: maps provider product ids to plans.

use crate::error::{CoreError, CoreResult};
use keygate_types::Plan;
use std::collections::HashMap;

/// Maps payment-provider product ids to local plans.
///
/// Webhook success events carry a product id; renewal events sometimes
/// carry only a subscription id, in which case the processor falls back to
/// [`ProductCatalog::default_plan`].
#[derive(Debug, Clone)]
pub struct ProductCatalog {
    entries: HashMap<String, Plan>,
}

impl ProductCatalog {
    /// Builds the catalog with the standard product ids.
    #[must_use]
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert("prod_free_trial".to_string(), Plan::FreeTrial);
        entries.insert("prod_monthly".to_string(), Plan::Monthly);
        entries.insert("prod_yearly".to_string(), Plan::Yearly);
        entries.insert("prod_lifetime".to_string(), Plan::Lifetime);
        Self { entries }
    }

    /// Adds or overrides a product mapping (provider dashboards issue
    /// opaque ids; deployments register theirs here).
    #[must_use]
    pub fn with_product(mut self, product_id: impl Into<String>, plan: Plan) -> Self {
        self.entries.insert(product_id.into(), plan);
        self
    }

    /// Resolves a product id to its plan.
    ///
    /// Unknown ids fall back to substring matching on the plan name, so
    /// provider ids like `pdt_yearly_2024` still resolve; anything else is
    /// a validation error.
    pub fn plan_for(&self, product_id: &str) -> CoreResult<Plan> {
        if let Some(plan) = self.entries.get(product_id) {
            return Ok(*plan);
        }
        for plan in [Plan::Lifetime, Plan::Yearly, Plan::Monthly, Plan::FreeTrial] {
            if product_id.contains(plan.as_str()) {
                return Ok(plan);
            }
        }
        Err(CoreError::Validation(format!(
            "unknown product id: {product_id}"
        )))
    }

    /// The plan assumed when an event carries no product detail.
    #[must_use]
    pub fn default_plan(&self) -> Plan {
        Plan::Monthly
    }
}

impl Default for ProductCatalog {
    fn default() -> Self {
        Self::new()
    }
}
