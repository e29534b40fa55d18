use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Portal administrator. The hash never leaves the store; responses use `AdminProfile`.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Admin {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Public admin fields, also the principal attached by the admin gate.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct AdminProfile {
    pub id: String,
    pub username: String,
    pub email: String,
}

impl From<&Admin> for AdminProfile {
    fn from(admin: &Admin) -> Self {
        Self {
            id: admin.id.clone(),
            username: admin.username.clone(),
            email: admin.email.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Building {
    pub id: String,
    pub building_number: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A flat doubles as a billing entity and as the resident principal:
/// `(flat_number, phone)` is the resident's shared secret.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Flat {
    pub id: String,
    pub flat_number: String,
    pub building_id: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub owner_name: Option<String>,
    pub owner_phone: Option<String>,
    pub owner_email: Option<String>,
    pub renter_name: Option<String>,
    pub renter_phone: Option<String>,
    pub renter_email: Option<String>,
    pub is_occupied: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Flat with its building reference populated; the principal attached by the flat gate.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct FlatProfile {
    #[serde(flatten)]
    pub flat: Flat,
    pub building: Option<Building>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Contribution {
    pub id: String,
    pub flat_id: String,
    pub month: u32,
    pub year: i32,
    pub amount: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Debug, Clone)]
pub struct ContributionWithFlat {
    #[serde(flatten)]
    pub contribution: Contribution,
    pub flat: Option<Flat>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CylinderLog {
    pub id: String,
    pub building_id: String,
    pub date: NaiveDate,
    pub cylinders_purchased: u32,
    pub dealer: Option<String>,
    pub cost: f64,
    pub other_cost: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Debug, Clone)]
pub struct CylinderLogWithBuilding {
    #[serde(flatten)]
    pub log: CylinderLog,
    pub building: Option<Building>,
}

/// JWT claims: the principal id and the issue/expiry instants in unix seconds.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuthPayload {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}
