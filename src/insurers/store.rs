use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::core::shared::error::PqrsError;
use crate::core::shared::schema::{insurer_emails, insurers, tickets};
use crate::core::shared::utils::DbPool;

diesel::define_sql_function!(fn lower(x: diesel::sql_types::Text) -> diesel::sql_types::Text);

/// Operations the directory services run inside one transaction.
pub trait DirectoryTx {
    fn insurer_name_taken(&mut self, name: &str, except_id: Option<i32>) -> Result<bool, PqrsError>;
    fn insert_insurer(&mut self, name: &str, active: bool, now: DateTime<Utc>) -> Result<i32, PqrsError>;
    /// Returns the number of rows updated.
    fn update_insurer(&mut self, id: i32, name: &str, active: bool) -> Result<usize, PqrsError>;
    fn deactivate_emails(&mut self, insurer_id: i32) -> Result<usize, PqrsError>;
    fn insert_email(&mut self, insurer_id: i32, email: &str, now: DateTime<Utc>) -> Result<(), PqrsError>;
    fn count_tickets(&mut self, insurer_id: i32) -> Result<i64, PqrsError>;
    fn delete_emails(&mut self, insurer_id: i32) -> Result<usize, PqrsError>;
    fn delete_insurer(&mut self, insurer_id: i32) -> Result<usize, PqrsError>;
}

/// Runs a unit of directory work atomically: all of it commits or none does.
pub trait DirectoryStore {
    fn transaction<T, F>(&self, f: F) -> Result<T, PqrsError>
    where
        F: FnOnce(&mut dyn DirectoryTx) -> Result<T, PqrsError>;
}

impl DirectoryTx for PgConnection {
    fn insurer_name_taken(&mut self, name: &str, except_id: Option<i32>) -> Result<bool, PqrsError> {
        let mut query = insurers::table
            .filter(lower(insurers::name).eq(name.to_lowercase()))
            .into_boxed();
        if let Some(id) = except_id {
            query = query.filter(insurers::id.ne(id));
        }
        let count: i64 = query.count().get_result(self)?;
        Ok(count > 0)
    }

    fn insert_insurer(&mut self, name: &str, active: bool, now: DateTime<Utc>) -> Result<i32, PqrsError> {
        let id = diesel::insert_into(insurers::table)
            .values((
                insurers::name.eq(name),
                insurers::active.eq(active),
                insurers::created_at.eq(now),
            ))
            .returning(insurers::id)
            .get_result(self)?;
        Ok(id)
    }

    fn update_insurer(&mut self, id: i32, name: &str, active: bool) -> Result<usize, PqrsError> {
        let updated = diesel::update(insurers::table.filter(insurers::id.eq(id)))
            .set((insurers::name.eq(name), insurers::active.eq(active)))
            .execute(self)?;
        Ok(updated)
    }

    fn deactivate_emails(&mut self, insurer_id: i32) -> Result<usize, PqrsError> {
        let updated = diesel::update(
            insurer_emails::table.filter(insurer_emails::insurer_id.eq(insurer_id)),
        )
        .set(insurer_emails::active.eq(false))
        .execute(self)?;
        Ok(updated)
    }

    fn insert_email(&mut self, insurer_id: i32, email: &str, now: DateTime<Utc>) -> Result<(), PqrsError> {
        diesel::insert_into(insurer_emails::table)
            .values((
                insurer_emails::insurer_id.eq(insurer_id),
                insurer_emails::email.eq(email),
                insurer_emails::active.eq(true),
                insurer_emails::created_at.eq(now),
            ))
            .execute(self)?;
        Ok(())
    }

    fn count_tickets(&mut self, insurer_id: i32) -> Result<i64, PqrsError> {
        let count = tickets::table
            .filter(tickets::insurer_id.eq(insurer_id))
            .count()
            .get_result(self)?;
        Ok(count)
    }

    fn delete_emails(&mut self, insurer_id: i32) -> Result<usize, PqrsError> {
        let deleted = diesel::delete(
            insurer_emails::table.filter(insurer_emails::insurer_id.eq(insurer_id)),
        )
        .execute(self)?;
        Ok(deleted)
    }

    fn delete_insurer(&mut self, insurer_id: i32) -> Result<usize, PqrsError> {
        let deleted = diesel::delete(insurers::table.filter(insurers::id.eq(insurer_id)))
            .execute(self)?;
        Ok(deleted)
    }
}

pub struct PgDirectory {
    pool: DbPool,
}

impl PgDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl DirectoryStore for PgDirectory {
    fn transaction<T, F>(&self, f: F) -> Result<T, PqrsError>
    where
        F: FnOnce(&mut dyn DirectoryTx) -> Result<T, PqrsError>,
    {
        let mut pooled = self.pool.get()?;
        let conn: &mut PgConnection = &mut pooled;
        conn.transaction::<T, PqrsError, _>(|tx| f(tx))
    }
}
