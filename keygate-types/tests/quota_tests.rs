use keygate_types::{Plan, PlanQuota};

#[test]
fn limits_increase_with_plan_tier() {
    let trial = PlanQuota::for_plan(Plan::FreeTrial);
    let monthly = PlanQuota::for_plan(Plan::Monthly);
    let yearly = PlanQuota::for_plan(Plan::Yearly);
    let lifetime = PlanQuota::for_plan(Plan::Lifetime);

    assert!(trial.daily_limit < monthly.daily_limit);
    assert!(monthly.daily_limit < yearly.daily_limit);
    assert!(yearly.daily_limit < lifetime.daily_limit);

    assert!(trial.max_batch_size < monthly.max_batch_size);
    assert!(trial.rate_limit_per_minute < lifetime.rate_limit_per_minute);
}

#[test]
fn trial_has_keywords_only() {
    let trial = PlanQuota::for_plan(Plan::FreeTrial);
    assert!(trial.has_feature("keywords"));
    assert!(!trial.has_feature("categories"));
    assert!(!trial.has_feature("bulk_export"));
}

#[test]
fn paid_plans_include_categories() {
    for plan in [Plan::Monthly, Plan::Yearly, Plan::Lifetime] {
        assert!(PlanQuota::for_plan(plan).has_feature("categories"));
    }
}

#[test]
fn quota_serializes_with_all_fields() {
    let quota = PlanQuota::for_plan(Plan::Monthly);
    let json = serde_json::to_value(&quota).unwrap();
    assert_eq!(json["daily_limit"], 500);
    assert_eq!(json["monthly_limit"], 10_000);
    assert!(json["features"].is_array());
}
