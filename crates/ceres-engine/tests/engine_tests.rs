//! End-to-end tests of the quote-to-cash flow against an in-memory database.

use std::sync::Arc;

use ceres_core::{
    new_id, Actor, CommissionBase, CommissionRule, CoreError, EngineEvent, LineItemPatch, Money,
    NewOpportunity, PayStatus, PaymentMethod, Percent, Product, ProductStatus, Role, RuleScope,
    SaleStatus, Stage,
};
use ceres_db::{CommissionFilter, Database, DbConfig, OpportunityFilter};
use ceres_engine::{
    ConversionRequest, DirectSaleRequest, EngineConfig, EngineError, RecordingSink, SaleItemInput,
    SalesEngine,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// =============================================================================
// Fixtures
// =============================================================================

async fn test_engine() -> SalesEngine {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    SalesEngine::new(db, EngineConfig::default())
}

fn product(name: &str, category: &str, list_cents: i64, cost_cents: i64, max_discount: Decimal) -> Product {
    let now = Utc::now();
    Product {
        id: new_id(),
        name: name.to_string(),
        list_price: Money::from_cents(list_cents),
        unit_cost: Money::from_cents(cost_cents),
        max_discount_percent: Percent::new(max_discount).unwrap(),
        category: category.to_string(),
        status: ProductStatus::Active,
        created_at: now,
        updated_at: now,
    }
}

/// Harrow at 100.00 (cost 60.00) and a filter at 50.00 (cost 30.00).
async fn catalog(engine: &SalesEngine) -> (Product, Product) {
    let harrow = product("Disc Harrow", "implements", 10000, 6000, dec!(15));
    let filter = product("Hydraulic Filter", "parts", 5000, 3000, dec!(10));
    engine.database().products().insert(&harrow).await.unwrap();
    engine.database().products().insert(&filter).await.unwrap();
    (harrow, filter)
}

/// `age_minutes` backdates `created_at`; older rules win ties within a scope.
async fn add_rule(
    engine: &SalesEngine,
    scope: RuleScope,
    target: Option<&str>,
    base: CommissionBase,
    percent: Decimal,
    age_minutes: i64,
) -> CommissionRule {
    let rule = CommissionRule {
        id: new_id(),
        scope,
        product_id: (scope == RuleScope::Product).then(|| target.unwrap().to_string()),
        category: (scope == RuleScope::Category).then(|| target.unwrap().to_string()),
        base,
        percent: Percent::new(percent).unwrap(),
        active: true,
        created_at: Utc::now() - Duration::minutes(age_minutes),
    };
    engine.database().rules().insert(&rule).await.unwrap();
    rule
}

async fn open_opportunity(engine: &SalesEngine) -> String {
    engine
        .create_opportunity(NewOpportunity {
            client_id: "client-1".to_string(),
            seller_id: "seller-1".to_string(),
            title: "Soil preparation package".to_string(),
            probability: 50,
            ..Default::default()
        })
        .await
        .unwrap()
        .id
}

fn pay_with(methods: &[PaymentMethod], final_discount: Decimal) -> ConversionRequest {
    ConversionRequest {
        payment_methods: methods.to_vec(),
        final_discount_percent: final_discount,
        services: Vec::new(),
    }
}

fn direct_sale(items: Vec<SaleItemInput>) -> DirectSaleRequest {
    DirectSaleRequest {
        client_id: "walk-in".to_string(),
        seller_id: "seller-2".to_string(),
        items,
        payment_methods: vec![PaymentMethod::Cash],
        ..Default::default()
    }
}

/// Makes every commission insert abort until [`restore_commission_inserts`].
async fn reject_commission_inserts(engine: &SalesEngine) {
    sqlx::query(
        "CREATE TRIGGER reject_commissions BEFORE INSERT ON commissions \
         BEGIN SELECT RAISE(ABORT, 'commission ledger unavailable'); END",
    )
    .execute(engine.database().pool())
    .await
    .unwrap();
}

async fn restore_commission_inserts(engine: &SalesEngine) {
    sqlx::query("DROP TRIGGER reject_commissions")
        .execute(engine.database().pool())
        .await
        .unwrap();
}

fn admin() -> Actor {
    Actor::new("admin-1", Role::Admin)
}

// =============================================================================
// Proposal → Sale → Commission
// =============================================================================

#[tokio::test]
async fn test_full_quote_to_cash_flow() {
    let sink = Arc::new(RecordingSink::new());
    let engine = test_engine().await.with_event_sink(sink.clone());
    let (harrow, filter) = catalog(&engine).await;
    add_rule(&engine, RuleScope::Global, None, CommissionBase::Gross, dec!(10), 0).await;

    let opp_id = open_opportunity(&engine).await;

    let opp = engine
        .add_line_item(&opp_id, &harrow.id, 3, Some(dec!(100)), Some(dec!(10)))
        .await
        .unwrap();
    assert_eq!(opp.items[0].subtotal, Money::from_cents(27000));

    let opp = engine.add_line_item(&opp_id, &filter.id, 1, None, None).await.unwrap();
    assert_eq!(opp.gross_value, Some(Money::from_cents(32000)));

    let opp = engine
        .set_value_adjustment(&opp_id, Money::from_cents(-2000))
        .await
        .unwrap();
    assert_eq!(opp.gross_value, Some(Money::from_cents(30000)));

    engine.transition_stage(&opp_id, Stage::Closing).await.unwrap();

    let outcome = engine
        .win_opportunity(&opp_id, pay_with(&[PaymentMethod::Pix], dec!(5)))
        .await
        .unwrap();
    assert!(outcome.created);

    let sale = &outcome.sale;
    assert_eq!(sale.gross_value, Money::from_cents(28500));
    assert_eq!(sale.total_cost, Money::from_cents(21000));
    assert_eq!(sale.estimated_profit, Money::from_cents(7500));
    assert_eq!(sale.items.len(), 2);

    let commission = outcome.commission.expect("global rule applies");
    assert_eq!(commission.amount, Money::from_cents(2850));
    assert_eq!(commission.pay_status, PayStatus::Pending);
    assert_eq!(commission.seller_id, "seller-1");

    let won = engine.get_opportunity(&opp_id).await.unwrap();
    assert_eq!(won.stage, Stage::Won);
    assert_eq!(won.sale_id.as_deref(), Some(sale.id.as_str()));
    assert!(won.closed_at.is_some());

    let names: Vec<&str> = sink.take().iter().map(EngineEvent::name).collect();
    assert_eq!(names, vec!["opportunity_won", "sale_created", "commission_created"]);
}

#[tokio::test]
async fn test_unit_cost_is_read_at_conversion_time() {
    let engine = test_engine().await;
    let (mut harrow, _) = catalog(&engine).await;
    let opp_id = open_opportunity(&engine).await;
    engine.add_line_item(&opp_id, &harrow.id, 2, None, None).await.unwrap();

    harrow.unit_cost = Money::from_cents(7000);
    engine.database().products().update(&harrow).await.unwrap();

    let outcome = engine
        .win_opportunity(&opp_id, pay_with(&[PaymentMethod::Cash], Decimal::ZERO))
        .await
        .unwrap();
    assert_eq!(outcome.sale.total_cost, Money::from_cents(14000));
    assert_eq!(outcome.sale.estimated_profit, Money::from_cents(6000));
}

#[tokio::test]
async fn test_conversion_retry_yields_one_sale_and_one_commission() {
    let sink = Arc::new(RecordingSink::new());
    let engine = test_engine().await.with_event_sink(sink.clone());
    let (harrow, _) = catalog(&engine).await;
    add_rule(&engine, RuleScope::Global, None, CommissionBase::Gross, dec!(10), 0).await;

    let opp_id = open_opportunity(&engine).await;
    engine.add_line_item(&opp_id, &harrow.id, 1, None, None).await.unwrap();

    let request = pay_with(&[PaymentMethod::Pix, PaymentMethod::Financing], Decimal::ZERO);
    let first = engine.win_opportunity(&opp_id, request.clone()).await.unwrap();
    let second = engine.win_opportunity(&opp_id, request).await.unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.sale.id, second.sale.id);
    assert_eq!(
        first.commission.map(|c| c.id),
        second.commission.map(|c| c.id)
    );

    let commissions = engine
        .list_commissions(&CommissionFilter {
            seller_id: Some("seller-1".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(commissions.len(), 1);

    // the retry publishes nothing new
    assert_eq!(sink.take().len(), 3);
}

#[tokio::test]
async fn test_win_without_payment_method_keeps_stage() {
    let engine = test_engine().await;
    let (harrow, _) = catalog(&engine).await;
    let opp_id = open_opportunity(&engine).await;
    engine.add_line_item(&opp_id, &harrow.id, 1, None, None).await.unwrap();
    engine.transition_stage(&opp_id, Stage::Proposal).await.unwrap();

    let err = engine
        .win_opportunity(&opp_id, pay_with(&[], Decimal::ZERO))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::ConversionFailed { .. }));
    assert!(matches!(err.core(), Some(CoreError::MissingPaymentMethod)));

    let opp = engine.get_opportunity(&opp_id).await.unwrap();
    assert_eq!(opp.stage, Stage::Proposal);
    assert!(opp.sale_id.is_none());
    assert!(engine
        .database()
        .sales()
        .get_by_opportunity(&opp_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_win_without_items_or_manual_value_fails() {
    let engine = test_engine().await;
    let opp_id = open_opportunity(&engine).await;

    let err = engine
        .win_opportunity(&opp_id, pay_with(&[PaymentMethod::Cash], Decimal::ZERO))
        .await
        .unwrap_err();

    assert!(matches!(err.core(), Some(CoreError::NoItemsNoManualValue)));
    assert_eq!(engine.get_opportunity(&opp_id).await.unwrap().stage, Stage::Lead);
}

#[tokio::test]
async fn test_final_discount_above_configured_ceiling_is_rejected() {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let mut config = EngineConfig::default();
    config.sales.max_final_discount_percent = dec!(10);
    let engine = SalesEngine::new(db, config);

    let (harrow, _) = catalog(&engine).await;
    let opp_id = open_opportunity(&engine).await;
    engine.add_line_item(&opp_id, &harrow.id, 1, None, None).await.unwrap();

    let err = engine
        .win_opportunity(&opp_id, pay_with(&[PaymentMethod::Cash], dec!(12)))
        .await
        .unwrap_err();

    assert!(matches!(err.core(), Some(CoreError::FinalDiscountExceedsLimit { .. })));
    assert_eq!(engine.get_opportunity(&opp_id).await.unwrap().stage, Stage::Lead);
}

#[tokio::test]
async fn test_manual_value_sale_uses_estimated_margin() {
    let engine = test_engine().await;
    let opp = engine
        .create_opportunity(NewOpportunity {
            client_id: "client-9".to_string(),
            seller_id: "seller-1".to_string(),
            title: "Used combine".to_string(),
            manual_value: Some(Money::from_cents(100000)),
            estimated_margin_percent: Some(Percent::new(dec!(20)).unwrap()),
            ..Default::default()
        })
        .await
        .unwrap();

    let outcome = engine
        .win_opportunity(&opp.id, pay_with(&[PaymentMethod::BankTransfer], Decimal::ZERO))
        .await
        .unwrap();

    assert!(outcome.sale.items.is_empty());
    assert_eq!(outcome.sale.gross_value, Money::from_cents(100000));
    assert_eq!(outcome.sale.estimated_profit, Money::from_cents(20000));
}

// =============================================================================
// Opportunity Editing
// =============================================================================

#[tokio::test]
async fn test_rejected_discount_leaves_opportunity_untouched() {
    let engine = test_engine().await;
    let (harrow, _) = catalog(&engine).await;
    let opp_id = open_opportunity(&engine).await;
    let before = engine.add_line_item(&opp_id, &harrow.id, 2, None, None).await.unwrap();

    let err = engine
        .update_line_item(
            &opp_id,
            &harrow.id,
            LineItemPatch {
                discount_percent: Some(Percent::new(dec!(20)).unwrap()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err.core(), Some(CoreError::DiscountExceedsLimit { .. })));

    let after = engine.get_opportunity(&opp_id).await.unwrap();
    assert_eq!(after.version, before.version);
    assert_eq!(after.items, before.items);
    assert_eq!(after.gross_value, Some(Money::from_cents(20000)));
}

#[tokio::test]
async fn test_oversized_value_adjustment_is_rejected() {
    let engine = test_engine().await;
    let (harrow, _) = catalog(&engine).await;
    let opp_id = open_opportunity(&engine).await;
    let before = engine.add_line_item(&opp_id, &harrow.id, 1, None, None).await.unwrap();

    let err = engine
        .set_value_adjustment(&opp_id, Money::from_cents(i64::MAX))
        .await
        .unwrap_err();
    assert!(matches!(err.core(), Some(CoreError::AmountOverflow)));

    let after = engine.get_opportunity(&opp_id).await.unwrap();
    assert_eq!(after.version, before.version);
    assert_eq!(after.value_adjustment, Money::zero());
    assert_eq!(after.gross_value, Some(Money::from_cents(10000)));
}

#[tokio::test]
async fn test_price_edit_derives_discount() {
    let engine = test_engine().await;
    let (harrow, _) = catalog(&engine).await;
    let opp_id = open_opportunity(&engine).await;
    engine.add_line_item(&opp_id, &harrow.id, 1, None, None).await.unwrap();

    let opp = engine
        .update_line_item(
            &opp_id,
            &harrow.id,
            LineItemPatch {
                unit_price: Some(dec!(88)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let item = &opp.items[0];
    assert_eq!(item.discount_percent.value(), dec!(12));
    assert_eq!(item.unit_price, dec!(88));
}

#[tokio::test]
async fn test_remove_last_item_clears_gross_value() {
    let engine = test_engine().await;
    let (harrow, _) = catalog(&engine).await;
    let opp_id = open_opportunity(&engine).await;
    engine.add_line_item(&opp_id, &harrow.id, 1, None, None).await.unwrap();

    let opp = engine.remove_line_item(&opp_id, &harrow.id).await.unwrap();
    assert!(opp.items.is_empty());
    assert_eq!(opp.gross_value, None);
}

#[tokio::test]
async fn test_unknown_product_is_rejected() {
    let engine = test_engine().await;
    let opp_id = open_opportunity(&engine).await;

    let err = engine
        .add_line_item(&opp_id, "no-such-product", 1, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err.core(), Some(CoreError::ProductNotFound(_))));
}

#[tokio::test]
async fn test_lost_is_terminal_until_admin_correction() {
    let engine = test_engine().await;
    let opp_id = open_opportunity(&engine).await;

    let lost = engine.transition_stage(&opp_id, Stage::Lost).await.unwrap();
    assert!(lost.closed_at.is_some());

    let err = engine.transition_stage(&opp_id, Stage::Qualified).await.unwrap_err();
    assert!(matches!(err.core(), Some(CoreError::InvalidStageTransition { .. })));

    let seller = Actor::new("seller-1", Role::Seller);
    let err = engine
        .correct_stage(&opp_id, Stage::Qualified, &seller)
        .await
        .unwrap_err();
    assert!(matches!(err.core(), Some(CoreError::AdminOnly { .. })));

    let corrected = engine
        .correct_stage(&opp_id, Stage::Qualified, &admin())
        .await
        .unwrap();
    assert_eq!(corrected.stage, Stage::Qualified);
    assert!(!corrected.is_editable());
}

#[tokio::test]
async fn test_list_opportunities_by_stage() {
    let engine = test_engine().await;
    let first = open_opportunity(&engine).await;
    open_opportunity(&engine).await;
    engine.transition_stage(&first, Stage::Qualified).await.unwrap();

    let qualified = engine
        .list_opportunities(&OpportunityFilter {
            stage: Some(Stage::Qualified),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(qualified.len(), 1);
    assert_eq!(qualified[0].id, first);
}

// =============================================================================
// Commission Resolution
// =============================================================================

#[tokio::test]
async fn test_rule_precedence_product_category_global() {
    let engine = test_engine().await;
    let (harrow, filter) = catalog(&engine).await;
    add_rule(&engine, RuleScope::Global, None, CommissionBase::Gross, dec!(1), 30).await;
    let category = add_rule(
        &engine,
        RuleScope::Category,
        Some("implements"),
        CommissionBase::Gross,
        dec!(2),
        20,
    )
    .await;
    let product_rule = add_rule(
        &engine,
        RuleScope::Product,
        Some(&harrow.id),
        CommissionBase::Profit,
        dec!(10),
        10,
    )
    .await;

    let outcome = engine
        .create_sale_direct(direct_sale(vec![SaleItemInput::at_list_price(&harrow.id, 1)]))
        .await
        .unwrap();
    let commission = outcome.commission.unwrap();
    assert_eq!(commission.rule_id.as_deref(), Some(product_rule.id.as_str()));
    assert_eq!(commission.base, CommissionBase::Profit);
    // profit 100.00 - 60.00 = 40.00
    assert_eq!(commission.amount, Money::from_cents(400));

    engine.database().rules().set_active(&product_rule.id, false).await.unwrap();
    let outcome = engine
        .create_sale_direct(direct_sale(vec![SaleItemInput::at_list_price(&harrow.id, 1)]))
        .await
        .unwrap();
    let commission = outcome.commission.unwrap();
    assert_eq!(commission.rule_id.as_deref(), Some(category.id.as_str()));
    assert_eq!(commission.amount, Money::from_cents(200));

    let outcome = engine
        .create_sale_direct(direct_sale(vec![SaleItemInput::at_list_price(&filter.id, 1)]))
        .await
        .unwrap();
    let commission = outcome.commission.unwrap();
    assert_eq!(commission.base, CommissionBase::Gross);
    assert_eq!(commission.amount, Money::from_cents(50));
}

#[tokio::test]
async fn test_no_applicable_rule_keeps_the_sale() {
    let sink = Arc::new(RecordingSink::new());
    let engine = test_engine().await.with_event_sink(sink.clone());
    let (harrow, _) = catalog(&engine).await;
    let opp_id = open_opportunity(&engine).await;
    engine.add_line_item(&opp_id, &harrow.id, 1, None, None).await.unwrap();

    let outcome = engine
        .win_opportunity(&opp_id, pay_with(&[PaymentMethod::Cash], Decimal::ZERO))
        .await
        .unwrap();

    assert!(outcome.created);
    assert!(outcome.commission.is_none());
    assert_eq!(engine.get_opportunity(&opp_id).await.unwrap().stage, Stage::Won);
    assert!(engine.get_commission(&outcome.sale.id).await.unwrap().is_none());

    let names: Vec<&str> = sink.take().iter().map(EngineEvent::name).collect();
    assert_eq!(names, vec!["opportunity_won", "sale_created"]);
}

#[tokio::test]
async fn test_service_base_uses_service_total() {
    let engine = test_engine().await;
    let (harrow, _) = catalog(&engine).await;
    add_rule(
        &engine,
        RuleScope::Global,
        None,
        CommissionBase::Maintenance,
        dec!(10),
        0,
    )
    .await;

    let mut request = direct_sale(vec![SaleItemInput::at_list_price(&harrow.id, 1)]);
    request.services = vec![ceres_core::NewServiceLine {
        service_item_id: None,
        kind: ceres_core::ServiceKind::Maintenance,
        description: "First maintenance visit".to_string(),
        total: Money::from_cents(35000),
    }];

    let outcome = engine.create_sale_direct(request).await.unwrap();
    assert_eq!(outcome.sale.gross_value, Money::from_cents(10000));
    assert_eq!(outcome.commission.unwrap().amount, Money::from_cents(3500));
}

// =============================================================================
// Commission Ledger
// =============================================================================

#[tokio::test]
async fn test_pay_status_lifecycle_is_admin_only() {
    let engine = test_engine().await;
    let (harrow, _) = catalog(&engine).await;
    add_rule(&engine, RuleScope::Global, None, CommissionBase::Gross, dec!(10), 0).await;

    let outcome = engine
        .create_sale_direct(direct_sale(vec![SaleItemInput::at_list_price(&harrow.id, 1)]))
        .await
        .unwrap();
    let commission_id = outcome.commission.unwrap().id;

    let seller = Actor::new("seller-2", Role::Seller);
    let err = engine
        .update_commission_pay_status(&commission_id, PayStatus::Approved, &seller)
        .await
        .unwrap_err();
    assert!(matches!(err.core(), Some(CoreError::AdminOnly { .. })));

    let approved = engine
        .update_commission_pay_status(&commission_id, PayStatus::Approved, &admin())
        .await
        .unwrap();
    assert_eq!(approved.pay_status, PayStatus::Approved);
    assert!(approved.pay_status_date.is_none());

    let paid = engine
        .update_commission_pay_status(&commission_id, PayStatus::Paid, &admin())
        .await
        .unwrap();
    assert!(paid.pay_status_date.is_some());

    let err = engine
        .update_commission_pay_status(&commission_id, PayStatus::Canceled, &admin())
        .await
        .unwrap_err();
    assert!(matches!(err.core(), Some(CoreError::InvalidPayStatusTransition { .. })));

    let stored = engine.get_commission(&outcome.sale.id).await.unwrap().unwrap();
    assert_eq!(stored.pay_status, PayStatus::Paid);
    assert!(stored.pay_status_date.is_some());
}

#[tokio::test]
async fn test_canceled_commission_is_not_regenerated_until_recommission() {
    let engine = test_engine().await;
    let (harrow, _) = catalog(&engine).await;
    add_rule(&engine, RuleScope::Global, None, CommissionBase::Gross, dec!(10), 0).await;

    let outcome = engine
        .create_sale_direct(direct_sale(vec![SaleItemInput::at_list_price(&harrow.id, 1)]))
        .await
        .unwrap();
    let sale_id = outcome.sale.id.clone();
    let original = outcome.commission.unwrap();

    engine
        .update_commission_pay_status(&original.id, PayStatus::Canceled, &admin())
        .await
        .unwrap();
    let current = engine.get_commission(&sale_id).await.unwrap().unwrap();
    assert_eq!(current.id, original.id);
    assert_eq!(current.pay_status, PayStatus::Canceled);

    let fresh = engine.recommission(&sale_id).await.unwrap().unwrap();
    assert_ne!(fresh.id, original.id);
    assert_eq!(fresh.pay_status, PayStatus::Pending);
    assert_eq!(fresh.amount, original.amount);

    let again = engine.recommission(&sale_id).await.unwrap().unwrap();
    assert_eq!(again.id, fresh.id);
    assert_eq!(engine.get_commission(&sale_id).await.unwrap().unwrap().id, fresh.id);
}

#[tokio::test]
async fn test_commission_failure_keeps_sale_and_retry_records_it() {
    let sink = Arc::new(RecordingSink::new());
    let engine = test_engine().await.with_event_sink(sink.clone());
    let (harrow, _) = catalog(&engine).await;
    add_rule(&engine, RuleScope::Global, None, CommissionBase::Gross, dec!(10), 0).await;

    let opp_id = open_opportunity(&engine).await;
    engine.add_line_item(&opp_id, &harrow.id, 2, None, None).await.unwrap();

    reject_commission_inserts(&engine).await;
    let first = engine
        .win_opportunity(&opp_id, pay_with(&[PaymentMethod::Pix], dec!(0)))
        .await
        .unwrap();
    assert!(first.created);
    assert!(first.commission.is_none());
    assert!(first
        .commission_error
        .as_deref()
        .is_some_and(|reason| reason.contains("commission ledger unavailable")));
    assert_eq!(engine.get_opportunity(&opp_id).await.unwrap().stage, Stage::Won);
    assert!(engine.get_commission(&first.sale.id).await.unwrap().is_none());

    restore_commission_inserts(&engine).await;
    let retry = engine
        .win_opportunity(&opp_id, pay_with(&[PaymentMethod::Pix], dec!(0)))
        .await
        .unwrap();
    assert!(!retry.created);
    assert_eq!(retry.sale.id, first.sale.id);
    assert!(retry.commission_error.is_none());
    let commission = retry.commission.unwrap();
    assert_eq!(commission.amount, Money::from_cents(2000));

    let again = engine
        .win_opportunity(&opp_id, pay_with(&[PaymentMethod::Pix], dec!(0)))
        .await
        .unwrap();
    assert_eq!(again.commission.unwrap().id, commission.id);
    assert_eq!(
        engine.list_commissions(&CommissionFilter::default()).await.unwrap().len(),
        1
    );

    let commission_events = sink
        .take()
        .iter()
        .filter(|event| matches!(event, EngineEvent::CommissionCreated(_)))
        .count();
    assert_eq!(commission_events, 1);
}

#[tokio::test]
async fn test_direct_sale_repeat_records_missing_commission() {
    let engine = test_engine().await;
    let (harrow, _) = catalog(&engine).await;
    add_rule(&engine, RuleScope::Global, None, CommissionBase::Gross, dec!(5), 0).await;

    let mut request = direct_sale(vec![SaleItemInput::at_list_price(&harrow.id, 1)]);
    request.idempotency_key = Some("till-3-receipt-0107".to_string());

    reject_commission_inserts(&engine).await;
    let first = engine.create_sale_direct(request.clone()).await.unwrap();
    assert!(first.commission.is_none());
    assert!(first.commission_error.is_some());

    restore_commission_inserts(&engine).await;
    let repeat = engine.create_sale_direct(request).await.unwrap();
    assert!(!repeat.created);
    assert_eq!(repeat.sale.id, first.sale.id);
    assert_eq!(repeat.commission.unwrap().amount, Money::from_cents(500));
}

#[tokio::test]
async fn test_repeat_request_keeps_canceled_commission() {
    let engine = test_engine().await;
    let (harrow, _) = catalog(&engine).await;
    add_rule(&engine, RuleScope::Global, None, CommissionBase::Gross, dec!(10), 0).await;

    let mut request = direct_sale(vec![SaleItemInput::at_list_price(&harrow.id, 1)]);
    request.idempotency_key = Some("till-3-receipt-0108".to_string());

    let first = engine.create_sale_direct(request.clone()).await.unwrap();
    let original = first.commission.unwrap();
    engine
        .update_commission_pay_status(&original.id, PayStatus::Canceled, &admin())
        .await
        .unwrap();

    let repeat = engine.create_sale_direct(request).await.unwrap();
    let commission = repeat.commission.unwrap();
    assert_eq!(commission.id, original.id);
    assert_eq!(commission.pay_status, PayStatus::Canceled);
    assert_eq!(
        engine.list_commissions(&CommissionFilter::default()).await.unwrap().len(),
        1
    );
}

// =============================================================================
// Direct Sales & Sale Edits
// =============================================================================

#[tokio::test]
async fn test_direct_sale_idempotency_key() {
    let engine = test_engine().await;
    let (harrow, _) = catalog(&engine).await;

    let mut request = direct_sale(vec![SaleItemInput::at_list_price(&harrow.id, 2)]);
    request.idempotency_key = Some("till-7-receipt-0042".to_string());
    request.final_discount_percent = dec!(5);

    let first = engine.create_sale_direct(request.clone()).await.unwrap();
    let second = engine.create_sale_direct(request).await.unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.sale.id, second.sale.id);
    assert_eq!(first.sale.gross_value, Money::from_cents(19000));
    assert!(first.sale.opportunity_id.is_none());
    assert_eq!(
        engine.database().sales().list_by_seller("seller-2", 10).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_direct_sale_requires_items() {
    let engine = test_engine().await;
    let err = engine.create_sale_direct(direct_sale(Vec::new())).await.unwrap_err();
    assert!(matches!(err.core(), Some(CoreError::ItemsRequired)));
}

#[tokio::test]
async fn test_direct_sale_rejects_duplicate_products() {
    let engine = test_engine().await;
    let (harrow, _) = catalog(&engine).await;

    let err = engine
        .create_sale_direct(direct_sale(vec![
            SaleItemInput::at_list_price(&harrow.id, 1),
            SaleItemInput::at_list_price(&harrow.id, 2),
        ]))
        .await
        .unwrap_err();
    assert!(matches!(err.core(), Some(CoreError::DuplicateLineItem(_))));
    assert!(engine
        .database()
        .sales()
        .list_by_seller("seller-2", 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_replace_sale_items_recomputes_totals() {
    let engine = test_engine().await;
    let (harrow, filter) = catalog(&engine).await;

    let outcome = engine
        .create_sale_direct(direct_sale(vec![SaleItemInput::at_list_price(&harrow.id, 1)]))
        .await
        .unwrap();

    let sale = engine
        .replace_sale_items(
            &outcome.sale.id,
            vec![SaleItemInput::at_list_price(&filter.id, 2)],
            dec!(10),
        )
        .await
        .unwrap();

    assert_eq!(sale.items.len(), 1);
    assert_eq!(sale.items[0].product_id, filter.id);
    assert_eq!(sale.gross_value, Money::from_cents(9000));
    assert_eq!(sale.total_cost, Money::from_cents(6000));
    assert_eq!(sale.estimated_profit, Money::from_cents(3000));

    let stored = engine.get_sale(&sale.id).await.unwrap();
    assert_eq!(stored.items.len(), 1);
    assert_eq!(stored.gross_value, sale.gross_value);

    let err = engine
        .replace_sale_items(&sale.id, Vec::new(), Decimal::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err.core(), Some(CoreError::ItemsRequired)));
}

#[tokio::test]
async fn test_cancel_sale_cancels_open_commission() {
    let engine = test_engine().await;
    let (harrow, _) = catalog(&engine).await;
    add_rule(&engine, RuleScope::Global, None, CommissionBase::Gross, dec!(10), 0).await;

    let outcome = engine
        .create_sale_direct(direct_sale(vec![SaleItemInput::at_list_price(&harrow.id, 1)]))
        .await
        .unwrap();
    let sale_id = outcome.sale.id;

    let canceled = engine.cancel_sale(&sale_id).await.unwrap();
    assert_eq!(canceled.status, SaleStatus::Canceled);

    let commission = engine.get_commission(&sale_id).await.unwrap().unwrap();
    assert_eq!(commission.pay_status, PayStatus::Canceled);

    let err = engine.recommission(&sale_id).await.unwrap_err();
    assert!(matches!(err.core(), Some(CoreError::SaleCanceled(_))));

    let err = engine.set_payment_received(&sale_id, true).await.unwrap_err();
    assert!(matches!(err.core(), Some(CoreError::SaleCanceled(_))));
}

#[tokio::test]
async fn test_payment_received_and_document_snapshot() {
    let engine = test_engine().await;
    let (harrow, filter) = catalog(&engine).await;

    let outcome = engine
        .create_sale_direct(direct_sale(vec![
            SaleItemInput::at_list_price(&harrow.id, 1),
            SaleItemInput {
                product_id: filter.id.clone(),
                quantity: 2,
                unit_price: None,
                discount_percent: Some(dec!(10)),
            },
        ]))
        .await
        .unwrap();

    let sale = engine.set_payment_received(&outcome.sale.id, true).await.unwrap();
    assert!(sale.payment_received);

    let doc = engine.document_snapshot(&sale.id).await.unwrap();
    assert_eq!(doc.client_id, "walk-in");
    assert_eq!(doc.items.len(), 2);
    assert_eq!(doc.items[0].product_name, "Disc Harrow");
    assert_eq!(doc.payment_methods, vec![PaymentMethod::Cash]);
    assert!(doc.payment_received);
    assert_eq!(doc.totals.gross_value, sale.gross_value);
}

#[tokio::test]
async fn test_missing_sale_is_not_found() {
    let engine = test_engine().await;
    let err = engine.get_sale("missing").await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "Sale", .. }));

    let err = engine
        .win_opportunity("missing", pay_with(&[PaymentMethod::Cash], Decimal::ZERO))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "Opportunity", .. }));
}

#[tokio::test]
async fn test_channel_sink_receives_sale_created() {
    let (engine, mut events) = test_engine().await.with_channel_sink();
    let (harrow, _) = catalog(&engine).await;

    engine
        .create_sale_direct(direct_sale(vec![SaleItemInput::at_list_price(&harrow.id, 1)]))
        .await
        .unwrap();

    match events.recv().await.unwrap() {
        EngineEvent::SaleCreated(event) => {
            assert_eq!(event.seller_id, "seller-2");
            assert_eq!(event.gross_value, Money::from_cents(10000));
            assert!(event.opportunity_id.is_none());
        }
        other => panic!("unexpected event {}", other.name()),
    }
    assert!(events.try_recv().is_err());
}
