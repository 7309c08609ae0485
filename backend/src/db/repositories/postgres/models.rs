use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{Bool, Timestamptz};

use super::schema::views;
use crate::models::ViewRecord;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = views)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ViewRow {
    pub view_id: i64,
    pub time_original: DateTime<Utc>,
    pub time_main: DateTime<Utc>,
    pub layers_list: Vec<String>,
    pub last_update: DateTime<Utc>,
    pub driving_layer: Option<String>,
}

impl From<ViewRow> for ViewRecord {
    fn from(row: ViewRow) -> Self {
        ViewRecord {
            id: row.view_id,
            time_original: row.time_original,
            time_main: row.time_main,
            layers: row.layers_list.into_iter().collect(),
            last_update: row.last_update,
            driving_layer: row.driving_layer,
        }
    }
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = views)]
#[diesel(primary_key(view_id))]
#[diesel(treat_none_as_null = true)]
pub struct NewViewRow {
    pub view_id: i64,
    pub time_original: DateTime<Utc>,
    pub time_main: DateTime<Utc>,
    pub layers_list: Vec<String>,
    pub last_update: DateTime<Utc>,
    pub driving_layer: Option<String>,
}

impl From<&ViewRecord> for NewViewRow {
    fn from(record: &ViewRecord) -> Self {
        NewViewRow {
            view_id: record.id,
            time_original: record.time_original,
            time_main: record.time_main,
            layers_list: record.layers.iter().cloned().collect(),
            last_update: record.last_update,
            driving_layer: record.driving_layer.clone(),
        }
    }
}

/// Result of `pg_try_advisory_lock` / `pg_advisory_unlock`.
#[derive(Debug, QueryableByName)]
pub struct AdvisoryLockRow {
    #[diesel(sql_type = Bool)]
    pub ok: bool,
}

#[derive(Debug, QueryableByName)]
pub struct NearestRow {
    #[diesel(sql_type = Timestamptz)]
    pub nearest: DateTime<Utc>,
}
