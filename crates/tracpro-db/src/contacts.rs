//! Database operations for `orgs`, `regions`, `groups`, `contacts`, and
//! contact data fields.

use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `orgs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrgRow {
    pub id: i64,
    pub name: String,
    pub utc_offset_minutes: i32,
}

/// A row from the `regions` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RegionRow {
    pub id: i64,
    pub org_id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub parent_id: Option<i64>,
    pub is_active: bool,
}

/// A row from the `groups` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GroupRow {
    pub id: i64,
    pub org_id: i64,
    pub uuid: Uuid,
    pub name: String,
}

/// A row from the `contacts` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ContactRow {
    pub id: i64,
    pub org_id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub urn: String,
    pub region_id: Option<i64>,
    pub language: Option<String>,
    pub is_active: bool,
}

/// A row from the `contact_fields` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ContactFieldRow {
    pub id: i64,
    pub contact_id: i64,
    pub field_id: i64,
    pub value: i64,
}

const CONTACT_COLUMNS: &str = "id, org_id, uuid, name, urn, region_id, language, is_active";

// ---------------------------------------------------------------------------
// orgs / regions
// ---------------------------------------------------------------------------

/// Fetches an org by id.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists, or [`DbError::Sqlx`] if
/// the query fails.
pub async fn get_org(pool: &PgPool, id: i64) -> Result<OrgRow, DbError> {
    sqlx::query_as::<_, OrgRow>("SELECT id, name, utc_offset_minutes FROM orgs WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

/// Returns all orgs. Scheduled jobs iterate these.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_orgs(pool: &PgPool) -> Result<Vec<OrgRow>, DbError> {
    let rows =
        sqlx::query_as::<_, OrgRow>("SELECT id, name, utc_offset_minutes FROM orgs ORDER BY id")
            .fetch_all(pool)
            .await?;

    Ok(rows)
}

/// Fetches a region by id.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists, or [`DbError::Sqlx`] if
/// the query fails.
pub async fn get_region(pool: &PgPool, id: i64) -> Result<RegionRow, DbError> {
    sqlx::query_as::<_, RegionRow>(
        "SELECT id, org_id, uuid, name, parent_id, is_active FROM regions WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Fetches a region by external UUID within an org. RapidPro models regions
/// as contact groups, so this is how a fetched contact's group memberships
/// resolve to a home region.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_region_by_uuid(
    pool: &PgPool,
    org_id: i64,
    uuid: Uuid,
) -> Result<Option<RegionRow>, DbError> {
    let row = sqlx::query_as::<_, RegionRow>(
        "SELECT id, org_id, uuid, name, parent_id, is_active \
         FROM regions WHERE org_id = $1 AND uuid = $2",
    )
    .bind(org_id)
    .bind(uuid)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Returns (region id, parent id) edges for an org, the input to
/// `tracpro_core::regions::RegionTree`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn region_edges(pool: &PgPool, org_id: i64) -> Result<Vec<(i64, Option<i64>)>, DbError> {
    let rows = sqlx::query_as::<_, (i64, Option<i64>)>(
        "SELECT id, parent_id FROM regions WHERE org_id = $1",
    )
    .bind(org_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

// ---------------------------------------------------------------------------
// groups
// ---------------------------------------------------------------------------

/// Fetches a group by external UUID within an org.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists, or [`DbError::Sqlx`] if
/// the query fails.
pub async fn get_group_by_uuid(pool: &PgPool, org_id: i64, uuid: Uuid) -> Result<GroupRow, DbError> {
    sqlx::query_as::<_, GroupRow>(
        "SELECT id, org_id, uuid, name FROM groups WHERE org_id = $1 AND uuid = $2",
    )
    .bind(org_id)
    .bind(uuid)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Adds a contact to a group; a no-op when already a member.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn add_contact_to_group(
    pool: &PgPool,
    contact_id: i64,
    group_id: i64,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO contact_groups (contact_id, group_id) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(contact_id)
    .bind(group_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Removes a contact from a group; a no-op when not a member.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the delete fails.
pub async fn remove_contact_from_group(
    pool: &PgPool,
    contact_id: i64,
    group_id: i64,
) -> Result<(), DbError> {
    sqlx::query("DELETE FROM contact_groups WHERE contact_id = $1 AND group_id = $2")
        .bind(contact_id)
        .bind(group_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Returns the active contacts currently in a group.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn contacts_in_group(pool: &PgPool, group_id: i64) -> Result<Vec<ContactRow>, DbError> {
    let rows = sqlx::query_as::<_, ContactRow>(
        "SELECT c.id, c.org_id, c.uuid, c.name, c.urn, c.region_id, c.language, c.is_active \
         FROM contacts c \
         JOIN contact_groups cg ON cg.contact_id = c.id \
         WHERE cg.group_id = $1 AND c.is_active = TRUE \
         ORDER BY c.id",
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns the group UUIDs a contact belongs to, for pushing contact
/// updates back to RapidPro.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn contact_group_uuids(pool: &PgPool, contact_id: i64) -> Result<Vec<Uuid>, DbError> {
    let rows = sqlx::query_scalar::<_, Uuid>(
        "SELECT g.uuid FROM groups g \
         JOIN contact_groups cg ON cg.group_id = g.id \
         WHERE cg.contact_id = $1 \
         ORDER BY g.uuid",
    )
    .bind(contact_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

// ---------------------------------------------------------------------------
// contacts
// ---------------------------------------------------------------------------

/// Fetches a contact by id.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists, or [`DbError::Sqlx`] if
/// the query fails.
pub async fn get_contact(pool: &PgPool, id: i64) -> Result<ContactRow, DbError> {
    sqlx::query_as::<_, ContactRow>(&format!(
        "SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Fetches a contact by external UUID within an org.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_contact_by_uuid(
    pool: &PgPool,
    org_id: i64,
    uuid: Uuid,
) -> Result<Option<ContactRow>, DbError> {
    let row = sqlx::query_as::<_, ContactRow>(&format!(
        "SELECT {CONTACT_COLUMNS} FROM contacts WHERE org_id = $1 AND uuid = $2"
    ))
    .bind(org_id)
    .bind(uuid)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Inserts a contact fetched from RapidPro. Conflicts on `(org_id, uuid)`
/// refresh the mutable fields.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn create_contact(
    pool: &PgPool,
    org_id: i64,
    uuid: Uuid,
    name: &str,
    urn: &str,
    region_id: Option<i64>,
    language: Option<&str>,
) -> Result<ContactRow, DbError> {
    let row = sqlx::query_as::<_, ContactRow>(&format!(
        "INSERT INTO contacts (org_id, uuid, name, urn, region_id, language) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (org_id, uuid) DO UPDATE SET \
             name      = EXCLUDED.name, \
             urn       = EXCLUDED.urn, \
             region_id = EXCLUDED.region_id, \
             language  = EXCLUDED.language \
         RETURNING {CONTACT_COLUMNS}"
    ))
    .bind(org_id)
    .bind(uuid)
    .bind(name)
    .bind(urn)
    .bind(region_id)
    .bind(language)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

// ---------------------------------------------------------------------------
// data fields
// ---------------------------------------------------------------------------

/// Fetches a data field definition by id.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists, or [`DbError::Sqlx`] if
/// the query fails.
pub async fn get_data_field(
    pool: &PgPool,
    id: i64,
) -> Result<(i64, String, String), DbError> {
    sqlx::query_as::<_, (i64, String, String)>(
        "SELECT id, key, label FROM data_fields WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Returns the contact-field values for one data field across the active
/// contacts of the given regions. This is the tracker's snapshot source.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn contact_fields_for(
    pool: &PgPool,
    field_id: i64,
    region_ids: &[i64],
) -> Result<Vec<ContactFieldRow>, DbError> {
    let rows = sqlx::query_as::<_, ContactFieldRow>(
        "SELECT cf.id, cf.contact_id, cf.field_id, cf.value \
         FROM contact_fields cf \
         JOIN contacts c ON c.id = cf.contact_id \
         WHERE cf.field_id = $1 \
           AND c.is_active = TRUE \
           AND c.region_id = ANY($2) \
         ORDER BY cf.id",
    )
    .bind(field_id)
    .bind(region_ids)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Zeroes the contact-field values in a tracker's scope at a period
/// boundary, returning the affected contact ids so the engine can push the
/// reset values back to RapidPro.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn reset_contact_fields(
    pool: &PgPool,
    field_id: i64,
    region_ids: &[i64],
) -> Result<Vec<i64>, DbError> {
    let rows = sqlx::query_scalar::<_, i64>(
        "UPDATE contact_fields cf SET value = 0 \
         FROM contacts c \
         WHERE c.id = cf.contact_id \
           AND cf.field_id = $1 \
           AND c.is_active = TRUE \
           AND c.region_id = ANY($2) \
         RETURNING cf.contact_id",
    )
    .bind(field_id)
    .bind(region_ids)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
