//! Resource routes: buildings, flats, contributions and cylinder logs for
//! admins, plus the signed-in resident's own contributions.
//!
//! Every handler here runs behind one of the gates in `middleware`; the
//! resolved principal is read from the request extensions.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Extension, Json, Router,
};
use chrono::{Datelike, Local, NaiveDate, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, MessageResponse, StorageError};
use crate::models::{
    AdminProfile, Building, Contribution, ContributionWithFlat, CylinderLog, CylinderLogWithBuilding, Flat,
    FlatProfile,
};
use crate::rest::{present, AppState};

type SharedState = State<Arc<AppState>>;

/// Routes behind the admin gate.
pub fn admin_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/buildings", post(create_building).get(list_buildings))
        .route("/buildings/:number", get(get_building).delete(delete_building))
        .route("/flats", post(create_flat).get(list_flats))
        .route("/flats/:id", get(get_flat).put(update_flat).delete(delete_flat))
        .route("/contributions", post(create_contribution).get(list_contributions))
        .route("/contributions/create", post(create_contribution))
        .route("/contributions/flat/:flat_id", get(list_flat_contributions))
        .route("/contributions/:id", put(update_contribution).delete(delete_contribution))
        .route("/cylinder-logs", post(create_cylinder_log).get(list_cylinder_logs))
        .route("/cylinder-logs/:id", put(update_cylinder_log).delete(delete_cylinder_log))
}

/// Routes behind the flat gate.
pub fn resident_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/resident/contributions", get(resident_contributions))
        .route("/resident/contributions/current", get(resident_current_contribution))
        .route("/contributions/flat/current/:flat_id", get(flat_current_contribution))
}

// --- Pagination ---

const DEFAULT_PAGE: usize = 1;
const DEFAULT_LIMIT: usize = 15;

#[derive(Deserialize, Debug, Default)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub all: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Page {
    pub page: usize,
    pub limit: usize,
}

impl PageQuery {
    /// `None` when the caller asked for everything with `all=true`.
    pub fn page(&self) -> Result<Option<Page>, ApiError> {
        if self.all == Some(true) {
            return Ok(None);
        }
        let page = self.page.unwrap_or(DEFAULT_PAGE);
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if page == 0 || limit == 0 {
            return Err(ApiError::validation("Page and limit must be positive"));
        }
        Ok(Some(Page { page, limit }))
    }
}

/// Slice one page out of `items`; returns the page, the total count and the page count.
pub fn paginate<T>(items: Vec<T>, page: Page) -> (Vec<T>, usize, usize) {
    let total = items.len();
    let total_pages = total.div_ceil(page.limit);
    let skip = (page.page - 1).saturating_mul(page.limit);
    let slice = items.into_iter().skip(skip).take(page.limit).collect();
    (slice, total, total_pages)
}

fn page_from(query: Result<Query<PageQuery>, QueryRejection>) -> Result<Option<Page>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::validation(e.body_text()))?;
    query.page()
}

// --- Buildings ---

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateBuildingRequest {
    pub building_number: Option<String>,
    pub name: Option<String>,
}

const DUPLICATE_BUILDING: &str = "A building with this number already exists";
const BUILDING_NOT_FOUND: &str = "Couldn't find any building with this number";

async fn create_building(
    State(state): SharedState,
    Extension(admin): Extension<AdminProfile>,
    payload: Result<Json<CreateBuildingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Building>), ApiError> {
    let Json(payload) = payload?;
    let Some(building_number) = present(payload.building_number) else {
        return Err(ApiError::validation("Building number is required"));
    };

    if state.storage.find_building_by_number(&building_number)?.is_some() {
        return Err(ApiError::conflict(DUPLICATE_BUILDING));
    }

    let building = Building {
        id: Uuid::new_v4().to_string(),
        building_number,
        name: present(payload.name),
        created_at: Utc::now(),
    };
    state
        .storage
        .create_building(&building)
        .map_err(|e| duplicate_as(e, DUPLICATE_BUILDING))?;

    info!("Building {} created by {}", building.building_number, admin.email);
    Ok((StatusCode::CREATED, Json(building)))
}

async fn list_buildings(State(state): SharedState) -> Result<Json<Vec<Building>>, ApiError> {
    Ok(Json(state.storage.list_buildings()?))
}

async fn get_building(State(state): SharedState, Path(number): Path<String>) -> Result<Json<Building>, ApiError> {
    state
        .storage
        .find_building_by_number(&number)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(BUILDING_NOT_FOUND))
}

async fn delete_building(
    State(state): SharedState,
    Extension(admin): Extension<AdminProfile>,
    Path(number): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .storage
        .delete_building_by_number(&number)?
        .ok_or_else(|| ApiError::not_found(BUILDING_NOT_FOUND))?;

    info!("Building {} deleted by {}", number, admin.email);
    Ok(Json(MessageResponse::new("Building has been deleted")))
}

// --- Flats ---

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateFlatRequest {
    pub building_id: Option<String>,
    pub flat_number: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub owner_name: Option<String>,
    pub owner_phone: Option<String>,
    pub owner_email: Option<String>,
    pub renter_name: Option<String>,
    pub renter_phone: Option<String>,
    pub renter_email: Option<String>,
    pub is_occupied: Option<bool>,
}

/// Contact and occupancy changes. Absent fields are left as they are;
/// the flat number and building are fixed after creation.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFlatRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub owner_name: Option<String>,
    pub owner_phone: Option<String>,
    pub owner_email: Option<String>,
    pub renter_name: Option<String>,
    pub renter_phone: Option<String>,
    pub renter_email: Option<String>,
    pub is_occupied: Option<bool>,
}

const FLAT_NOT_FOUND: &str = "Couldn't find any flat with this ID";

async fn create_flat(
    State(state): SharedState,
    Extension(admin): Extension<AdminProfile>,
    payload: Result<Json<CreateFlatRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<FlatProfile>), ApiError> {
    let Json(payload) = payload?;
    let (Some(building_id), Some(flat_number)) = (present(payload.building_id), present(payload.flat_number)) else {
        return Err(ApiError::validation("Building and flat number are required"));
    };

    let building = state
        .storage
        .get_building(&building_id)?
        .ok_or_else(|| ApiError::not_found("Couldn't find any building with this ID"))?;

    let now = Utc::now();
    let flat = Flat {
        id: Uuid::new_v4().to_string(),
        flat_number,
        building_id,
        name: present(payload.name),
        phone: present(payload.phone),
        owner_name: present(payload.owner_name),
        owner_phone: present(payload.owner_phone),
        owner_email: present(payload.owner_email),
        renter_name: present(payload.renter_name),
        renter_phone: present(payload.renter_phone),
        renter_email: present(payload.renter_email),
        is_occupied: payload.is_occupied.unwrap_or(false),
        created_at: now,
        updated_at: now,
    };
    state
        .storage
        .create_flat(&flat)
        .map_err(|e| duplicate_as(e, "A flat with this number already exists in the building"))?;

    info!("Flat {} in building {} created by {}", flat.flat_number, building.building_number, admin.email);
    Ok((
        StatusCode::CREATED,
        Json(FlatProfile {
            flat,
            building: Some(building),
        }),
    ))
}

async fn list_flats(State(state): SharedState) -> Result<Json<Vec<FlatProfile>>, ApiError> {
    let buildings: HashMap<String, Building> = state
        .storage
        .list_buildings()?
        .into_iter()
        .map(|b| (b.id.clone(), b))
        .collect();

    let flats = state
        .storage
        .list_flats()?
        .into_iter()
        .map(|flat| {
            let building = buildings.get(&flat.building_id).cloned();
            FlatProfile { flat, building }
        })
        .collect();
    Ok(Json(flats))
}

async fn get_flat(State(state): SharedState, Path(id): Path<String>) -> Result<Json<FlatProfile>, ApiError> {
    state
        .storage
        .get_flat_profile(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(FLAT_NOT_FOUND))
}

async fn update_flat(
    State(state): SharedState,
    Path(id): Path<String>,
    payload: Result<Json<UpdateFlatRequest>, JsonRejection>,
) -> Result<Json<FlatProfile>, ApiError> {
    let Json(payload) = payload?;
    let mut flat = state
        .storage
        .get_flat(&id)?
        .ok_or_else(|| ApiError::not_found(FLAT_NOT_FOUND))?;

    macro_rules! apply {
        ($($field:ident),*) => {
            $(if let Some(value) = payload.$field {
                flat.$field = present(Some(value));
            })*
        };
    }
    apply!(name, phone, owner_name, owner_phone, owner_email, renter_name, renter_phone, renter_email);
    if let Some(is_occupied) = payload.is_occupied {
        flat.is_occupied = is_occupied;
    }
    flat.updated_at = Utc::now();

    state.storage.update_flat(&flat)?;
    Ok(Json(state.storage.populate_flat(flat)?))
}

async fn delete_flat(
    State(state): SharedState,
    Extension(admin): Extension<AdminProfile>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let flat = state
        .storage
        .delete_flat(&id)?
        .ok_or_else(|| ApiError::not_found(FLAT_NOT_FOUND))?;

    info!("Flat {} ({}) deleted by {}", flat.flat_number, flat.id, admin.email);
    Ok(Json(MessageResponse::new("Flat has been deleted")))
}

// --- Contributions ---

/// Month, year and amount arrive from form inputs, as numbers or numeric strings.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContributionRequest {
    pub flat_id: Option<String>,
    #[serde(default, deserialize_with = "number_or_text")]
    pub month: Option<u32>,
    #[serde(default, deserialize_with = "number_or_text")]
    pub year: Option<i32>,
    #[serde(default, deserialize_with = "number_or_text")]
    pub amount: Option<f64>,
}

/// Accepts `3` and `"3"` alike; a blank string counts as absent.
fn number_or_text<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Deserialize<'de>,
    T::Err: Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw<N> {
        Number(N),
        Text(String),
    }

    match Option::<Raw<T>>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(Raw::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| de::Error::custom(format!("invalid number {text:?}: {e}"))),
    }
}

struct ValidContribution {
    flat_id: String,
    month: u32,
    year: i32,
    amount: f64,
}

impl ContributionRequest {
    /// Zero counts as missing, as it does for the front end's forms.
    fn validate(self) -> Result<ValidContribution, ApiError> {
        let (Some(flat_id), Some(month), Some(year), Some(amount)) = (
            present(self.flat_id),
            self.month.filter(|m| *m != 0),
            self.year.filter(|y| *y != 0),
            self.amount.filter(|a| *a != 0.0),
        ) else {
            return Err(ApiError::validation("Flat ID, amount, month and year are required"));
        };
        if !(1..=12).contains(&month) {
            return Err(ApiError::validation("Month must be between 1 and 12"));
        }
        Ok(ValidContribution {
            flat_id,
            month,
            year,
            amount,
        })
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ContributionPage {
    pub contributions: Vec<ContributionWithFlat>,
    pub total_contributions: usize,
    pub total_pages: usize,
}

const DUPLICATE_CONTRIBUTION: &str = "A contribution for this month already exists";
const STALE_RECORD: &str = "This record was changed by another request, please try again";
const CONTRIBUTION_NOT_FOUND: &str = "Couldn't find any contribution with this ID";

fn with_flats(state: &AppState, contributions: Vec<Contribution>) -> Result<Vec<ContributionWithFlat>, ApiError> {
    let flats: HashMap<String, Flat> = state
        .storage
        .list_flats()?
        .into_iter()
        .map(|f| (f.id.clone(), f))
        .collect();
    Ok(contributions
        .into_iter()
        .map(|contribution| {
            let flat = flats.get(&contribution.flat_id).cloned();
            ContributionWithFlat { contribution, flat }
        })
        .collect())
}

async fn create_contribution(
    State(state): SharedState,
    Extension(admin): Extension<AdminProfile>,
    payload: Result<Json<ContributionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Contribution>), ApiError> {
    let Json(payload) = payload?;
    let valid = payload.validate()?;

    if state.storage.get_flat(&valid.flat_id)?.is_none() {
        return Err(ApiError::not_found(FLAT_NOT_FOUND));
    }

    let now = Utc::now();
    let contribution = Contribution {
        id: Uuid::new_v4().to_string(),
        flat_id: valid.flat_id,
        month: valid.month,
        year: valid.year,
        amount: valid.amount,
        created_at: now,
        updated_at: now,
    };
    state
        .storage
        .create_contribution(&contribution)
        .map_err(|e| duplicate_as(e, DUPLICATE_CONTRIBUTION))?;

    info!(
        "Contribution {}/{} for flat {} recorded by {}",
        contribution.month, contribution.year, contribution.flat_id, admin.email
    );
    Ok((StatusCode::CREATED, Json(contribution)))
}

async fn list_contributions(
    State(state): SharedState,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let page = page_from(query)?;
    let contributions = state.storage.list_contributions()?;

    let Some(page) = page else {
        return Ok(Json(with_flats(&state, contributions)?).into_response());
    };
    let (slice, total, total_pages) = paginate(contributions, page);
    Ok(Json(ContributionPage {
        contributions: with_flats(&state, slice)?,
        total_contributions: total,
        total_pages,
    })
    .into_response())
}

async fn list_flat_contributions(
    State(state): SharedState,
    Path(flat_id): Path<String>,
) -> Result<Json<Vec<ContributionWithFlat>>, ApiError> {
    let contributions = state.storage.list_contributions_for_flat(&flat_id)?;
    Ok(Json(with_flats(&state, contributions)?))
}

async fn update_contribution(
    State(state): SharedState,
    Path(id): Path<String>,
    payload: Result<Json<ContributionRequest>, JsonRejection>,
) -> Result<Json<ContributionWithFlat>, ApiError> {
    let Json(payload) = payload?;
    let valid = payload.validate()?;

    let previous = state
        .storage
        .get_contribution(&id)?
        .ok_or_else(|| ApiError::not_found(CONTRIBUTION_NOT_FOUND))?;
    let flat = state
        .storage
        .get_flat(&valid.flat_id)?
        .ok_or_else(|| ApiError::not_found(FLAT_NOT_FOUND))?;

    let updated = Contribution {
        flat_id: valid.flat_id,
        month: valid.month,
        year: valid.year,
        amount: valid.amount,
        updated_at: Utc::now(),
        ..previous.clone()
    };
    state
        .storage
        .update_contribution(&previous, &updated)
        .map_err(|e| duplicate_as(e, DUPLICATE_CONTRIBUTION))?;

    Ok(Json(ContributionWithFlat {
        contribution: updated,
        flat: Some(flat),
    }))
}

async fn delete_contribution(State(state): SharedState, Path(id): Path<String>) -> Result<Json<MessageResponse>, ApiError> {
    state
        .storage
        .delete_contribution(&id)?
        .ok_or_else(|| ApiError::not_found(CONTRIBUTION_NOT_FOUND))?;
    Ok(Json(MessageResponse::new("Contribution has been deleted")))
}

// --- Cylinder logs ---

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct CylinderLogRequest {
    pub building_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub cylinders_purchased: Option<u32>,
    pub dealer: Option<String>,
    pub cost: Option<f64>,
    pub other_cost: Option<f64>,
}

struct ValidCylinderLog {
    building_id: String,
    date: NaiveDate,
    cylinders_purchased: u32,
    dealer: Option<String>,
    cost: f64,
    other_cost: f64,
}

impl CylinderLogRequest {
    fn validate(self) -> Result<ValidCylinderLog, ApiError> {
        let (Some(building_id), Some(date), Some(cylinders_purchased), Some(cost)) = (
            present(self.building_id),
            self.date,
            self.cylinders_purchased.filter(|n| *n != 0),
            self.cost.filter(|c| *c != 0.0),
        ) else {
            return Err(ApiError::validation(
                "Building ID, date, cylinders purchased and cost are required",
            ));
        };
        Ok(ValidCylinderLog {
            building_id,
            date,
            cylinders_purchased,
            dealer: present(self.dealer),
            cost,
            other_cost: self.other_cost.unwrap_or(0.0),
        })
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CylinderLogPage {
    pub cylinder_logs: Vec<CylinderLogWithBuilding>,
    pub total_cylinder_logs: usize,
    pub total_pages: usize,
}

const CYLINDER_LOG_NOT_FOUND: &str = "Couldn't find any cylinder log with this ID";

fn with_buildings(state: &AppState, logs: Vec<CylinderLog>) -> Result<Vec<CylinderLogWithBuilding>, ApiError> {
    let buildings: HashMap<String, Building> = state
        .storage
        .list_buildings()?
        .into_iter()
        .map(|b| (b.id.clone(), b))
        .collect();
    Ok(logs
        .into_iter()
        .map(|log| {
            let building = buildings.get(&log.building_id).cloned();
            CylinderLogWithBuilding { log, building }
        })
        .collect())
}

fn require_building(state: &AppState, building_id: &str) -> Result<(), ApiError> {
    match state.storage.get_building(building_id)? {
        Some(_) => Ok(()),
        None => Err(ApiError::not_found("Couldn't find any building with this ID")),
    }
}

async fn create_cylinder_log(
    State(state): SharedState,
    Extension(admin): Extension<AdminProfile>,
    payload: Result<Json<CylinderLogRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CylinderLog>), ApiError> {
    let Json(payload) = payload?;
    let valid = payload.validate()?;
    require_building(&state, &valid.building_id)?;

    let now = Utc::now();
    let log = CylinderLog {
        id: Uuid::new_v4().to_string(),
        building_id: valid.building_id,
        date: valid.date,
        cylinders_purchased: valid.cylinders_purchased,
        dealer: valid.dealer,
        cost: valid.cost,
        other_cost: valid.other_cost,
        created_at: now,
        updated_at: now,
    };
    state.storage.put_cylinder_log(&log)?;

    info!("Cylinder log {} ({} cylinders) recorded by {}", log.id, log.cylinders_purchased, admin.email);
    Ok((StatusCode::CREATED, Json(log)))
}

async fn list_cylinder_logs(
    State(state): SharedState,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let page = page_from(query)?;
    let logs = state.storage.list_cylinder_logs()?;

    let Some(page) = page else {
        return Ok(Json(with_buildings(&state, logs)?).into_response());
    };
    let (slice, total, total_pages) = paginate(logs, page);
    Ok(Json(CylinderLogPage {
        cylinder_logs: with_buildings(&state, slice)?,
        total_cylinder_logs: total,
        total_pages,
    })
    .into_response())
}

async fn update_cylinder_log(
    State(state): SharedState,
    Path(id): Path<String>,
    payload: Result<Json<CylinderLogRequest>, JsonRejection>,
) -> Result<Json<CylinderLog>, ApiError> {
    let Json(payload) = payload?;
    let valid = payload.validate()?;

    let previous = state
        .storage
        .get_cylinder_log(&id)?
        .ok_or_else(|| ApiError::not_found(CYLINDER_LOG_NOT_FOUND))?;
    require_building(&state, &valid.building_id)?;

    let log = CylinderLog {
        building_id: valid.building_id,
        date: valid.date,
        cylinders_purchased: valid.cylinders_purchased,
        dealer: valid.dealer,
        cost: valid.cost,
        other_cost: valid.other_cost,
        updated_at: Utc::now(),
        ..previous
    };
    state.storage.put_cylinder_log(&log)?;
    Ok(Json(log))
}

async fn delete_cylinder_log(State(state): SharedState, Path(id): Path<String>) -> Result<Json<MessageResponse>, ApiError> {
    state
        .storage
        .delete_cylinder_log(&id)?
        .ok_or_else(|| ApiError::not_found(CYLINDER_LOG_NOT_FOUND))?;
    Ok(Json(MessageResponse::new("Cylinder log has been deleted")))
}

// --- Resident views ---

async fn resident_contributions(
    State(state): SharedState,
    Extension(resident): Extension<FlatProfile>,
) -> Result<Json<Vec<Contribution>>, ApiError> {
    Ok(Json(state.storage.list_contributions_for_flat(&resident.flat.id)?))
}

async fn resident_current_contribution(
    State(state): SharedState,
    Extension(resident): Extension<FlatProfile>,
) -> Result<Json<Contribution>, ApiError> {
    current_contribution(&state, &resident.flat.id).map(Json)
}

/// Path form used by the resident dashboard; the id must be the signed-in flat's own.
async fn flat_current_contribution(
    State(state): SharedState,
    Extension(resident): Extension<FlatProfile>,
    Path(flat_id): Path<String>,
) -> Result<Json<Contribution>, ApiError> {
    if flat_id != resident.flat.id {
        return Err(ApiError::unauthorized("Unauthorized"));
    }
    current_contribution(&state, &flat_id).map(Json)
}

/// Month and year come from the server's local clock.
fn current_contribution(state: &AppState, flat_id: &str) -> Result<Contribution, ApiError> {
    let today = Local::now();
    state
        .storage
        .find_contribution(flat_id, today.month(), today.year())?
        .ok_or_else(|| ApiError::not_found("Couldn't find any contribution for the current month"))
}

/// Map a unique-index clash to a 400 with `message` and a lost update race to a
/// retry hint; other storage errors stay internal.
fn duplicate_as(err: StorageError, message: &str) -> ApiError {
    match err {
        StorageError::Duplicate { .. } => ApiError::conflict(message),
        StorageError::Stale { .. } => ApiError::conflict(STALE_RECORD),
        other => other.into(),
    }
}
