//! # Seed Data Generator
//!
//! Populates a development database with a small dealer catalog, the
//! service catalog and a baseline set of commission rules.
//!
//! ## Usage
//! ```bash
//! # Seed ./ceres_dev.db
//! cargo run -p ceres-engine --bin seed
//!
//! # Specify database path
//! cargo run -p ceres-engine --bin seed -- --db ./data/ceres.db
//! ```
//!
//! ## Generated Data
//! - Products in four categories (tractors, implements, sprayers, parts),
//!   cost at 55-75% of list price
//! - One service item per service kind
//! - Rules: 3% of gross globally, 10% of profit on sprayers, 5% of the
//!   maintenance total on parts sales, 4% of gross for the flagship tractor

use std::env;

use ceres_core::{
    new_id, CommissionBase, CommissionRule, Money, Percent, Product, ProductStatus, RuleScope,
    ServiceItem, ServiceKind,
};
use ceres_db::{Database, DbConfig};
use chrono::Utc;
use rust_decimal::Decimal;

/// (category, name, list price in whole currency units, max discount %)
const CATALOG: &[(&str, &str, i64, i64)] = &[
    ("tractors", "Tractor 75cv 4x4", 285_000, 8),
    ("tractors", "Tractor 110cv 4x4", 412_000, 8),
    ("tractors", "Compact Tractor 25cv", 98_500, 10),
    ("implements", "Disc Harrow 24 Discs", 38_900, 12),
    ("implements", "Subsoiler 5 Shanks", 27_400, 12),
    ("implements", "Planter 7 Rows", 164_000, 10),
    ("implements", "Rotary Mower 1.7m", 14_750, 15),
    ("sprayers", "Trailed Sprayer 2000L", 126_000, 10),
    ("sprayers", "Mounted Sprayer 600L", 31_200, 12),
    ("sprayers", "Backpack Sprayer 20L", 690, 20),
    ("parts", "Hydraulic Filter", 240, 25),
    ("parts", "Harrow Disc 26in", 410, 25),
    ("parts", "PTO Shaft", 1_850, 20),
];

const SERVICES: &[(ServiceKind, &str, i64)] = &[
    (ServiceKind::Maintenance, "Preventive Maintenance Visit", 850),
    (ServiceKind::Revision, "500h Revision", 2_400),
    (ServiceKind::Spraying, "Spraying per Hectare", 95),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ceres_engine::init_tracing();

    let args: Vec<String> = env::args().collect();
    let mut db_path = String::from("./ceres_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Ceres Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./ceres_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Ceres Seed Data Generator");
    println!("=========================");
    println!("Database: {}", db_path);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.products().list(false).await?.len();
    if existing > 0 {
        println!("⚠ Database already has {} products", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let mut flagship = None;
    for (index, (category, name, list_price, max_discount)) in CATALOG.iter().enumerate() {
        let product = generate_product(category, name, *list_price, *max_discount, index)?;
        if let Err(e) = db.products().insert(&product).await {
            eprintln!("Failed to insert {}: {}", product.name, e);
            continue;
        }
        if flagship.is_none() {
            flagship = Some(product.id.clone());
        }
    }
    println!("✓ Inserted {} products", CATALOG.len());

    for (kind, name, price) in SERVICES {
        let item = ServiceItem {
            id: new_id(),
            name: name.to_string(),
            kind: *kind,
            default_price: Money::from_major_minor(*price, 0),
            active: true,
            created_at: Utc::now(),
        };
        db.products().insert_service_item(&item).await?;
    }
    println!("✓ Inserted {} service items", SERVICES.len());

    let mut rules = vec![
        rule(RuleScope::Global, None, None, CommissionBase::Gross, 3)?,
        rule(RuleScope::Category, None, Some("sprayers"), CommissionBase::Profit, 10)?,
        rule(RuleScope::Category, None, Some("parts"), CommissionBase::Maintenance, 5)?,
    ];
    if let Some(product_id) = flagship.as_deref() {
        rules.push(rule(RuleScope::Product, Some(product_id), None, CommissionBase::Gross, 4)?);
    }
    for commission_rule in &rules {
        db.rules().insert(commission_rule).await?;
    }
    println!("✓ Inserted {} commission rules", rules.len());

    println!();
    println!("✓ Seed complete!");
    Ok(())
}

fn generate_product(
    category: &str,
    name: &str,
    list_price: i64,
    max_discount: i64,
    seed: usize,
) -> Result<Product, Box<dyn std::error::Error>> {
    let now = Utc::now();
    let list_price = Money::from_major_minor(list_price, 0);
    let cost_pct = 55 + (seed * 7 % 21) as i64;

    Ok(Product {
        id: new_id(),
        name: name.to_string(),
        list_price,
        unit_cost: Money::from_cents(list_price.cents() * cost_pct / 100),
        max_discount_percent: Percent::new(Decimal::from(max_discount))?,
        category: category.to_string(),
        status: ProductStatus::Active,
        created_at: now,
        updated_at: now,
    })
}

fn rule(
    scope: RuleScope,
    product_id: Option<&str>,
    category: Option<&str>,
    base: CommissionBase,
    percent: i64,
) -> Result<CommissionRule, Box<dyn std::error::Error>> {
    Ok(CommissionRule {
        id: new_id(),
        scope,
        product_id: product_id.map(str::to_string),
        category: category.map(str::to_string),
        base,
        percent: Percent::new(Decimal::from(percent))?,
        active: true,
        created_at: Utc::now(),
    })
}
