use serde::{de::DeserializeOwned, Serialize};
use sled::{Db, Tree};

use crate::error::StorageError;
use crate::models::{Admin, Building, Contribution, CylinderLog, Flat, FlatProfile};

pub type StorageResult<T> = Result<T, StorageError>;

/// Document store on Sled.
///
/// Each collection is a tree of JSON documents keyed by id. Unique constraints
/// live in separate index trees mapping the unique key to the owning id; a key
/// is claimed with a compare-and-swap from absent, so of two concurrent writers
/// of the same key exactly one wins.
#[derive(Clone)] // Sled handles are cheap to clone and thread-safe
pub struct Storage {
    db: Db,
    admins: Tree,
    admins_by_email: Tree,
    buildings: Tree,
    buildings_by_number: Tree,
    flats: Tree,
    flats_by_building_number: Tree,
    contributions: Tree,
    contributions_by_period: Tree,
    cylinder_logs: Tree,
}

impl Storage {
    /// Open or create the Sled database at the given path
    pub fn open(path: &str) -> StorageResult<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory database removed on drop. Used by tests and dry runs.
    pub fn temporary() -> StorageResult<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> StorageResult<Self> {
        Ok(Self {
            admins: db.open_tree("admins")?,
            admins_by_email: db.open_tree("admins_by_email")?,
            buildings: db.open_tree("buildings")?,
            buildings_by_number: db.open_tree("buildings_by_number")?,
            flats: db.open_tree("flats")?,
            flats_by_building_number: db.open_tree("flats_by_building_number")?,
            contributions: db.open_tree("contributions")?,
            contributions_by_period: db.open_tree("contributions_by_period")?,
            cylinder_logs: db.open_tree("cylinder_logs")?,
            db,
        })
    }

    /// Flush dirty pages to disk.
    pub fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }

    // --- Admins ---

    pub fn create_admin(&self, admin: &Admin) -> StorageResult<()> {
        claim(&self.admins_by_email, "admins_by_email", admin.email.as_bytes(), &admin.id)?;
        if let Err(e) = put(&self.admins, &admin.id, admin) {
            release(&self.admins_by_email, admin.email.as_bytes(), &admin.id)?;
            return Err(e);
        }
        Ok(())
    }

    pub fn get_admin(&self, id: &str) -> StorageResult<Option<Admin>> {
        fetch(&self.admins, id)
    }

    pub fn find_admin_by_email(&self, email: &str) -> StorageResult<Option<Admin>> {
        match self.admins_by_email.get(email.as_bytes())? {
            Some(id) => fetch(&self.admins, &String::from_utf8_lossy(&id)),
            None => Ok(None),
        }
    }

    pub fn count_admins(&self) -> usize {
        self.admins.len()
    }

    // --- Buildings ---

    pub fn create_building(&self, building: &Building) -> StorageResult<()> {
        let key = building.building_number.as_bytes();
        claim(&self.buildings_by_number, "buildings_by_number", key, &building.id)?;
        if let Err(e) = put(&self.buildings, &building.id, building) {
            release(&self.buildings_by_number, key, &building.id)?;
            return Err(e);
        }
        Ok(())
    }

    pub fn get_building(&self, id: &str) -> StorageResult<Option<Building>> {
        fetch(&self.buildings, id)
    }

    pub fn find_building_by_number(&self, number: &str) -> StorageResult<Option<Building>> {
        match self.buildings_by_number.get(number.as_bytes())? {
            Some(id) => fetch(&self.buildings, &String::from_utf8_lossy(&id)),
            None => Ok(None),
        }
    }

    pub fn list_buildings(&self) -> StorageResult<Vec<Building>> {
        let mut buildings: Vec<Building> = scan(&self.buildings)?;
        buildings.sort_by(|a, b| a.building_number.cmp(&b.building_number));
        Ok(buildings)
    }

    pub fn delete_building_by_number(&self, number: &str) -> StorageResult<Option<Building>> {
        let Some(building) = self.find_building_by_number(number)? else {
            return Ok(None);
        };
        self.buildings.remove(building.id.as_bytes())?;
        release(&self.buildings_by_number, number.as_bytes(), &building.id)?;
        Ok(Some(building))
    }

    // --- Flats ---

    pub fn create_flat(&self, flat: &Flat) -> StorageResult<()> {
        let key = flat_key(&flat.building_id, &flat.flat_number);
        claim(&self.flats_by_building_number, "flats_by_building_number", &key, &flat.id)?;
        if let Err(e) = put(&self.flats, &flat.id, flat) {
            release(&self.flats_by_building_number, &key, &flat.id)?;
            return Err(e);
        }
        Ok(())
    }

    pub fn get_flat(&self, id: &str) -> StorageResult<Option<Flat>> {
        fetch(&self.flats, id)
    }

    /// Replace a flat's document. Number and building are fixed after creation,
    /// so the unique index is untouched.
    pub fn update_flat(&self, flat: &Flat) -> StorageResult<()> {
        put(&self.flats, &flat.id, flat)
    }

    pub fn delete_flat(&self, id: &str) -> StorageResult<Option<Flat>> {
        let Some(bytes) = self.flats.remove(id.as_bytes())? else {
            return Ok(None);
        };
        let flat: Flat = serde_json::from_slice(&bytes)?;
        release(
            &self.flats_by_building_number,
            &flat_key(&flat.building_id, &flat.flat_number),
            &flat.id,
        )?;
        Ok(Some(flat))
    }

    pub fn list_flats(&self) -> StorageResult<Vec<Flat>> {
        let mut flats: Vec<Flat> = scan(&self.flats)?;
        flats.sort_by(|a, b| a.flat_number.cmp(&b.flat_number));
        Ok(flats)
    }

    /// Resident lookup by the exact `(flat_number, phone)` pair.
    pub fn find_flat_by_credentials(&self, flat_number: &str, phone: &str) -> StorageResult<Option<Flat>> {
        for item in self.flats.iter() {
            let (_, value) = item?;
            let flat: Flat = serde_json::from_slice(&value)?;
            if flat.flat_number == flat_number && flat.phone.as_deref() == Some(phone) {
                return Ok(Some(flat));
            }
        }
        Ok(None)
    }

    /// Attach the referenced building to a flat.
    pub fn populate_flat(&self, flat: Flat) -> StorageResult<FlatProfile> {
        let building = self.get_building(&flat.building_id)?;
        Ok(FlatProfile { flat, building })
    }

    pub fn get_flat_profile(&self, id: &str) -> StorageResult<Option<FlatProfile>> {
        match self.get_flat(id)? {
            Some(flat) => self.populate_flat(flat).map(Some),
            None => Ok(None),
        }
    }

    // --- Contributions ---

    pub fn create_contribution(&self, contribution: &Contribution) -> StorageResult<()> {
        let key = period_key(&contribution.flat_id, contribution.month, contribution.year);
        claim(&self.contributions_by_period, "contributions_by_period", &key, &contribution.id)?;
        if let Err(e) = put(&self.contributions, &contribution.id, contribution) {
            release(&self.contributions_by_period, &key, &contribution.id)?;
            return Err(e);
        }
        Ok(())
    }

    pub fn get_contribution(&self, id: &str) -> StorageResult<Option<Contribution>> {
        fetch(&self.contributions, id)
    }

    pub fn find_contribution(&self, flat_id: &str, month: u32, year: i32) -> StorageResult<Option<Contribution>> {
        match self.contributions_by_period.get(period_key(flat_id, month, year))? {
            Some(id) => fetch(&self.contributions, &String::from_utf8_lossy(&id)),
            None => Ok(None),
        }
    }

    /// Replace a contribution, moving its period key when flat/month/year change.
    ///
    /// `previous` must still be the stored version: the record is swapped in with
    /// a compare-and-swap against it, so of two updates read from the same version
    /// only one lands and the other gets `Stale` with its claimed key released.
    /// Fails with `Duplicate` if another record already owns the new period.
    pub fn update_contribution(&self, previous: &Contribution, updated: &Contribution) -> StorageResult<()> {
        let old_key = period_key(&previous.flat_id, previous.month, previous.year);
        let new_key = period_key(&updated.flat_id, updated.month, updated.year);
        let moved = old_key != new_key;
        let stale = || StorageError::Stale { id: previous.id.clone() };

        let stored = self.contributions.get(previous.id.as_bytes())?;
        let current: Option<Contribution> = stored.as_deref().map(|b| serde_json::from_slice(b)).transpose()?;
        if current.as_ref() != Some(previous) {
            return Err(stale());
        }
        let bytes = serde_json::to_vec(updated)?;

        if moved {
            claim(&self.contributions_by_period, "contributions_by_period", &new_key, &updated.id)?;
        }
        let swapped = self
            .contributions
            .compare_and_swap(previous.id.as_bytes(), stored, Some(bytes))
            .map_err(StorageError::from)
            .and_then(|outcome| outcome.map_err(|_| stale()));
        if let Err(e) = swapped {
            if moved {
                release(&self.contributions_by_period, &new_key, &updated.id)?;
            }
            return Err(e);
        }
        if moved {
            release(&self.contributions_by_period, &old_key, &previous.id)?;
        }
        Ok(())
    }

    pub fn delete_contribution(&self, id: &str) -> StorageResult<Option<Contribution>> {
        let Some(bytes) = self.contributions.remove(id.as_bytes())? else {
            return Ok(None);
        };
        let contribution: Contribution = serde_json::from_slice(&bytes)?;
        release(
            &self.contributions_by_period,
            &period_key(&contribution.flat_id, contribution.month, contribution.year),
            &contribution.id,
        )?;
        Ok(Some(contribution))
    }

    /// All contributions, newest period first.
    pub fn list_contributions(&self) -> StorageResult<Vec<Contribution>> {
        let mut contributions: Vec<Contribution> = scan(&self.contributions)?;
        sort_by_period(&mut contributions);
        Ok(contributions)
    }

    pub fn list_contributions_for_flat(&self, flat_id: &str) -> StorageResult<Vec<Contribution>> {
        let mut contributions: Vec<Contribution> = scan::<Contribution>(&self.contributions)?
            .into_iter()
            .filter(|c| c.flat_id == flat_id)
            .collect();
        sort_by_period(&mut contributions);
        Ok(contributions)
    }

    // --- Cylinder logs ---

    pub fn put_cylinder_log(&self, log: &CylinderLog) -> StorageResult<()> {
        put(&self.cylinder_logs, &log.id, log)
    }

    pub fn get_cylinder_log(&self, id: &str) -> StorageResult<Option<CylinderLog>> {
        fetch(&self.cylinder_logs, id)
    }

    pub fn delete_cylinder_log(&self, id: &str) -> StorageResult<Option<CylinderLog>> {
        match self.cylinder_logs.remove(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All cylinder logs, most recent purchase first.
    pub fn list_cylinder_logs(&self) -> StorageResult<Vec<CylinderLog>> {
        let mut logs: Vec<CylinderLog> = scan(&self.cylinder_logs)?;
        logs.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.created_at.cmp(&a.created_at)));
        Ok(logs)
    }
}

fn flat_key(building_id: &str, flat_number: &str) -> Vec<u8> {
    format!("{building_id}\0{flat_number}").into_bytes()
}

fn period_key(flat_id: &str, month: u32, year: i32) -> Vec<u8> {
    format!("{flat_id}\0{year}\0{month}").into_bytes()
}

fn sort_by_period(contributions: &mut [Contribution]) {
    contributions.sort_by(|a, b| b.year.cmp(&a.year).then_with(|| b.month.cmp(&a.month)));
}

fn put<T: Serialize>(tree: &Tree, id: &str, doc: &T) -> StorageResult<()> {
    tree.insert(id.as_bytes(), serde_json::to_vec(doc)?)?;
    Ok(())
}

fn fetch<T: DeserializeOwned>(tree: &Tree, id: &str) -> StorageResult<Option<T>> {
    match tree.get(id.as_bytes())? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn scan<T: DeserializeOwned>(tree: &Tree) -> StorageResult<Vec<T>> {
    let mut docs = vec![];
    for item in tree.iter() {
        let (_, value) = item?;
        docs.push(serde_json::from_slice(&value)?);
    }
    Ok(docs)
}

/// Claim `key` in a unique index for `id`; fails if any record already owns it.
fn claim(index: &Tree, name: &'static str, key: &[u8], id: &str) -> StorageResult<()> {
    match index.compare_and_swap(key, None::<&[u8]>, Some(id.as_bytes()))? {
        Ok(()) => Ok(()),
        Err(_) => Err(StorageError::Duplicate { index: name }),
    }
}

/// Drop `key` from an index, but only while `id` still owns it.
fn release(index: &Tree, key: &[u8], id: &str) -> StorageResult<()> {
    // A lost swap means another record owns the key now; leave it alone.
    let _ = index.compare_and_swap(key, Some(id.as_bytes()), None::<&[u8]>)?;
    Ok(())
}
