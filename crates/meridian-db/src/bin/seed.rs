//! # Seed Data Generator
//!
//! Populates a development database with products for manual testing.
//!
//! ## Usage
//! ```bash
//! # Generate 500 products (default)
//! cargo run -p meridian-db --bin seed
//!
//! # Generate custom amount
//! cargo run -p meridian-db --bin seed -- --count 2000
//!
//! # Specify database path
//! cargo run -p meridian-db --bin seed -- --db ./data/meridian.db
//! ```

use std::env;

use meridian_db::catalog::{CatalogManager, NewProduct};
use meridian_db::{Database, DbConfig, EventBus};
use tracing_subscriber::EnvFilter;

/// Product categories for realistic test data.
const CATEGORIES: &[(&str, &[&str])] = &[
    (
        "BEV",
        &[
            "Cola", "Lemon Soda", "Orange Soda", "Sparkling Water", "Still Water", "Iced Tea",
            "Energy Drink", "Apple Juice", "Orange Juice", "Cold Brew",
        ],
    ),
    (
        "SNK",
        &[
            "Salted Chips", "Paprika Chips", "Tortilla Chips", "Chocolate Bar", "Gummy Bears",
            "Trail Mix", "Salted Peanuts", "Crackers", "Cookies", "Granola Bar",
        ],
    ),
    (
        "GRO",
        &[
            "White Bread", "Wheat Bread", "Spaghetti", "Penne", "White Rice", "Brown Rice",
            "Canned Beans", "Canned Corn", "Tomato Sauce", "Olive Oil",
        ],
    ),
    (
        "DRY",
        &[
            "Whole Milk", "Skim Milk", "Oat Milk", "Butter", "Cheddar", "Mozzarella", "Yogurt",
            "Cream", "Eggs Dozen", "Cottage Cheese",
        ],
    ),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args: Vec<String> = env::args().collect();

    let mut count: usize = 500;
    let mut db_path = String::from("./meridian_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(500);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Meridian POS Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of products to generate (default: 500)");
                println!("  -d, --db <PATH>    Database file path (default: ./meridian_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Meridian POS Seed Data Generator");
    println!("================================");
    println!("Database: {}", db_path);
    println!("Products: {}", count);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    let catalog = CatalogManager::new(db.clone(), EventBus::default());

    println!("Connected, migrations applied");

    let existing = db.products().count().await?;
    if existing > 0 {
        println!("Database already has {} products, skipping seed.", existing);
        println!("Delete the database file to regenerate.");
        return Ok(());
    }

    let mut generated = 0;
    let start = std::time::Instant::now();

    'outer: for (category, names) in CATEGORIES {
        for (idx, name) in names.iter().enumerate() {
            for batch in 0..((count / (CATEGORIES.len() * names.len())) + 1) {
                if generated >= count {
                    break 'outer;
                }

                let seed = generated + idx * 31 + batch * 7;
                let price_cents = 149 + ((seed * 17) % 1200) as i64;

                let input = NewProduct {
                    sku: format!("{}-{:04}", category, generated),
                    name: format!("{} {}", name, batch + 1),
                    description: None,
                    sale_price_cents: price_cents,
                    purchase_price_cents: price_cents * (55 + (seed % 25) as i64) / 100,
                    initial_stock: (seed % 80) as i64,
                    min_stock_alert: 5,
                };

                if let Err(e) = catalog.create_product(input).await {
                    eprintln!("Failed to insert product {}: {}", generated, e);
                    continue;
                }

                generated += 1;
                if generated % 100 == 0 {
                    println!("  Generated {} products...", generated);
                }
            }
        }
    }

    let elapsed = start.elapsed();
    println!();
    println!("Generated {} products in {:?}", generated, elapsed);

    let pending = db.sync_outbox().pending_count().await?;
    println!("Outbox entries pending delivery: {}", pending);

    println!();
    println!("Seed complete");

    Ok(())
}
