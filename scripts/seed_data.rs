//! Seed script for the building portal
//!
//! Populates a database with a demo admin, one building, a few flats and a
//! contribution for the current month, so the front end has something to show.
//! Run: cargo run --bin seed_data
//! Safe to run twice; records that already exist are skipped.

use anyhow::Context;
use building_portal::auth::{hash_password, DEFAULT_BCRYPT_COST};
use building_portal::error::StorageError;
use building_portal::models::{Admin, Building, Contribution, Flat};
use building_portal::storage::Storage;
use chrono::{Datelike, Utc};
use uuid::Uuid;

const DEMO_EMAIL: &str = "admin@building.local";
const DEMO_PASSWORD: &str = "admin123";
const DEMO_BUILDING: &str = "B-1";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_target(false).init();

    let db_path = std::env::var("DB_PATH").unwrap_or_else(|_| "portal_data".to_string());
    let storage = Storage::open(&db_path).with_context(|| format!("failed to open {db_path}"))?;
    let now = Utc::now();

    let admin = Admin {
        id: Uuid::new_v4().to_string(),
        username: "manager".to_string(),
        email: DEMO_EMAIL.to_string(),
        password_hash: hash_password(DEMO_PASSWORD, DEFAULT_BCRYPT_COST)?,
        created_at: now,
    };
    skip_existing(storage.create_admin(&admin), "admin")?;

    let building = match storage.find_building_by_number(DEMO_BUILDING)? {
        Some(existing) => existing,
        None => {
            let building = Building {
                id: Uuid::new_v4().to_string(),
                building_number: DEMO_BUILDING.to_string(),
                name: Some("Green View".to_string()),
                created_at: now,
            };
            storage.create_building(&building)?;
            building
        }
    };

    let residents = [
        ("A-101", "01710000001", "Karim Ahmed"),
        ("A-102", "01710000002", "Nasrin Akter"),
        ("B-201", "01710000003", "Rafiq Islam"),
    ];
    let mut first_flat = None;
    for (number, phone, name) in residents {
        let flat = Flat {
            id: Uuid::new_v4().to_string(),
            flat_number: number.to_string(),
            building_id: building.id.clone(),
            name: Some(name.to_string()),
            phone: Some(phone.to_string()),
            owner_name: Some(name.to_string()),
            owner_phone: Some(phone.to_string()),
            owner_email: None,
            renter_name: None,
            renter_phone: None,
            renter_email: None,
            is_occupied: true,
            created_at: now,
            updated_at: now,
        };
        if skip_existing(storage.create_flat(&flat), "flat")? {
            first_flat.get_or_insert(flat);
        }
    }

    if let Some(flat) = first_flat {
        let contribution = Contribution {
            id: Uuid::new_v4().to_string(),
            flat_id: flat.id.clone(),
            month: now.month(),
            year: now.year(),
            amount: 500.0,
            created_at: now,
            updated_at: now,
        };
        skip_existing(storage.create_contribution(&contribution), "contribution")?;
        tracing::info!("Flat {} can sign in with phone {}", flat.flat_number, flat.phone.unwrap_or_default());
    }

    storage.flush()?;
    tracing::info!("Seeded {} (admin {} / {})", db_path, DEMO_EMAIL, DEMO_PASSWORD);
    Ok(())
}

/// `Ok(true)` when the record was written, `Ok(false)` when it was already there.
fn skip_existing(result: Result<(), StorageError>, what: &str) -> anyhow::Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(StorageError::Duplicate { index }) => {
            tracing::info!("Skipping {}: already present ({})", what, index);
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
