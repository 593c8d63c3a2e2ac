pub mod claim;
pub mod models;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::{debug, info};

use crate::schema::*;
use crate::utils::ms_since_epoch;
use models::{Device, RegistrationCode, Session, StatusRow, User};

pub use claim::ClaimError;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub struct Db {
    conn: SqliteConnection,
}

fn is_unique_violation(err: &DieselError) -> bool {
    matches!(
        err,
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)
    )
}

impl Db {
    pub fn connect(database_url: &str) -> Result<Self> {
        let mut conn = SqliteConnection::establish(database_url)?;
        diesel::sql_query("PRAGMA foreign_keys = ON").execute(&mut conn)?;

        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow!("failed to run migrations: {e}"))?;
        if !applied.is_empty() {
            info!("Applied {} migration(s) to {}", applied.len(), database_url);
        }

        Ok(Self { conn })
    }

    // ---------------
    // users, sessions
    // ---------------

    /// Returns `None` when the email is already taken.
    pub fn create_user(&mut self, user: &User) -> Result<Option<User>> {
        match diesel::insert_into(users::table)
            .values(user)
            .execute(&mut self.conn)
        {
            Ok(_) => Ok(Some(user.clone())),
            Err(e) if is_unique_violation(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn user_by_email(&mut self, email: &str) -> Result<Option<User>> {
        let res = users::table
            .filter(users::email.eq(email))
            .select(User::as_select())
            .first(&mut self.conn)
            .optional()?;

        Ok(res)
    }

    pub fn insert_session(&mut self, session: &Session) -> Result<()> {
        diesel::insert_into(sessions::table)
            .values(session)
            .execute(&mut self.conn)?;

        Ok(())
    }

    /// Owner of an unexpired session.
    pub fn session_user(&mut self, token: &str, now: DateTime<Utc>) -> Result<Option<User>> {
        let res = sessions::table
            .inner_join(users::table)
            .filter(sessions::token.eq(token))
            .filter(sessions::expires_at.gt(ms_since_epoch(now)))
            .select(User::as_select())
            .first(&mut self.conn)
            .optional()?;

        Ok(res)
    }

    pub fn delete_session(&mut self, token: &str) -> Result<()> {
        diesel::delete(sessions::table.filter(sessions::token.eq(token))).execute(&mut self.conn)?;

        Ok(())
    }

    pub fn delete_expired_sessions(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let n = diesel::delete(sessions::table.filter(sessions::expires_at.le(ms_since_epoch(now))))
            .execute(&mut self.conn)?;
        if n > 0 {
            debug!("Dropped {n} expired session(s)");
        }

        Ok(n)
    }

    // -------
    // devices
    // -------

    pub fn device(&mut self, device_id: &str) -> Result<Option<Device>> {
        let res = devices::table
            .find(device_id)
            .select(Device::as_select())
            .first(&mut self.conn)
            .optional()?;

        Ok(res)
    }

    pub fn devices_of(&mut self, user_id: &str) -> Result<Vec<Device>> {
        let res = devices::table
            .filter(devices::user_id.eq(user_id))
            .order((devices::registered_at.asc(), devices::device_id.asc()))
            .select(Device::as_select())
            .load(&mut self.conn)?;

        Ok(res)
    }

    pub fn update_device_name(&mut self, device_id: &str, name: &str) -> Result<()> {
        diesel::update(devices::table.find(device_id))
            .set(devices::device_name.eq(name))
            .execute(&mut self.conn)?;

        Ok(())
    }

    pub fn update_device_config(&mut self, device_id: &str, config_json: &str) -> Result<()> {
        diesel::update(devices::table.find(device_id))
            .set(devices::config.eq(config_json))
            .execute(&mut self.conn)?;

        Ok(())
    }

    // ------
    // status
    // ------

    pub fn device_status(&mut self, device_id: &str) -> Result<Option<StatusRow>> {
        let res = device_status::table
            .find(device_id)
            .select(StatusRow::as_select())
            .first(&mut self.conn)
            .optional()?;

        Ok(res)
    }

    /// Replaces the status snapshot of a device and refreshes its liveness.
    ///
    /// Returns whether a registered device was touched. Unregistered devices
    /// still get their snapshot stored.
    pub fn record_status(&mut self, row: &StatusRow, preview: Option<&str>) -> Result<bool> {
        let online = row.status == common::req::Status::Online.as_str();

        let touched = self.conn.transaction::<_, DieselError, _>(|conn| {
            diesel::insert_into(device_status::table)
                .values(row)
                .on_conflict(device_status::device_id)
                .do_update()
                .set(row)
                .execute(conn)?;

            let target = devices::table.find(&row.device_id);
            let n = match preview {
                Some(preview) => diesel::update(target)
                    .set((
                        devices::last_seen.eq(row.updated_at),
                        devices::is_online.eq(online),
                        devices::display_preview.eq(preview),
                    ))
                    .execute(conn)?,
                None => diesel::update(target)
                    .set((
                        devices::last_seen.eq(row.updated_at),
                        devices::is_online.eq(online),
                    ))
                    .execute(conn)?,
            };

            Ok(n > 0)
        })?;

        Ok(touched)
    }

    // ------------------
    // registration codes
    // ------------------

    /// Returns `false` when the code already exists.
    pub fn insert_code(&mut self, code: &RegistrationCode) -> Result<bool> {
        match diesel::insert_into(registration_codes::table)
            .values(code)
            .execute(&mut self.conn)
        {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    #[cfg(test)]
    pub fn code(&mut self, code: &str) -> Result<Option<RegistrationCode>> {
        let res = registration_codes::table
            .find(code)
            .select(RegistrationCode::as_select())
            .first(&mut self.conn)
            .optional()?;

        Ok(res)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use common::req::{Status, StatusReport, SystemInfo, Widgets};

    pub fn memory_db() -> Db {
        Db::connect(":memory:").unwrap()
    }

    pub fn user(db: &mut Db, id: &str) -> User {
        let user = User {
            id: id.to_owned(),
            email: format!("{id}@example.com"),
            password_hash: "x".to_owned(),
            created_at: 0,
        };
        db.create_user(&user).unwrap().unwrap()
    }

    pub fn owned_device(db: &mut Db, device_id: &str, user_id: &str) -> Device {
        device_registered_at(db, device_id, user_id, 1_000)
    }

    pub fn device_registered_at(db: &mut Db, device_id: &str, user_id: &str, at: i64) -> Device {
        let device = Device {
            device_id: device_id.to_owned(),
            user_id: user_id.to_owned(),
            device_name: "Lumy Display".to_owned(),
            registered_at: at,
            last_seen: None,
            is_online: false,
            display_preview: None,
            config: None,
        };
        diesel::insert_into(devices::table)
            .values(&device)
            .execute(&mut db.conn)
            .unwrap();
        device
    }

    fn report(status: Status) -> StatusReport {
        StatusReport {
            status,
            last_refresh: Some("2025-01-01T10:00:00".to_owned()),
            widgets: Widgets::new(),
            system: SystemInfo {
                cpu_temp: Some(51.0),
                ..Default::default()
            },
            display_preview: None,
        }
    }

    #[test]
    fn duplicate_email_is_reported() {
        let mut db = memory_db();
        let alice = user(&mut db, "alice");
        assert!(db.create_user(&alice).unwrap().is_none());
        assert_eq!(db.user_by_email("alice@example.com").unwrap().unwrap().id, "alice");
        assert!(db.user_by_email("bob@example.com").unwrap().is_none());
    }

    #[test]
    fn sessions_expire() {
        let mut db = memory_db();
        user(&mut db, "alice");
        let now = Utc::now();
        db.insert_session(&Session {
            token: "t1".to_owned(),
            user_id: "alice".to_owned(),
            created_at: ms_since_epoch(now),
            expires_at: ms_since_epoch(now + Duration::hours(1)),
        })
        .unwrap();

        assert_eq!(db.session_user("t1", now).unwrap().unwrap().id, "alice");
        assert!(db.session_user("t1", now + Duration::hours(2)).unwrap().is_none());
        assert!(db.session_user("nope", now).unwrap().is_none());

        assert_eq!(db.delete_expired_sessions(now + Duration::hours(2)).unwrap(), 1);
        assert!(db.session_user("t1", now).unwrap().is_none());
    }

    #[test]
    fn status_upsert_keeps_one_row() {
        let mut db = memory_db();
        let now = Utc::now();

        let first = StatusRow::from_report("lumy-1", &report(Status::Online), now).unwrap();
        assert!(!db.record_status(&first, None).unwrap());

        let later = now + Duration::seconds(60);
        let second = StatusRow::from_report("lumy-1", &report(Status::Offline), later).unwrap();
        db.record_status(&second, None).unwrap();

        let count: i64 = device_status::table.count().get_result(&mut db.conn).unwrap();
        assert_eq!(count, 1);

        let stored = db.device_status("lumy-1").unwrap().unwrap().to_status().unwrap();
        assert_eq!(stored.status, Status::Offline);
        assert_eq!(stored.system.cpu_temp, Some(51.0));
        assert_eq!(stored.updated_at.map(ms_since_epoch), Some(ms_since_epoch(later)));
    }

    #[test]
    fn status_push_touches_registered_device() {
        let mut db = memory_db();
        user(&mut db, "alice");
        owned_device(&mut db, "lumy-1", "alice");
        let now = Utc::now();

        let row = StatusRow::from_report("lumy-1", &report(Status::Online), now).unwrap();
        assert!(db.record_status(&row, Some("data:image/png;base64,AAAA")).unwrap());

        let device = db.device("lumy-1").unwrap().unwrap();
        assert!(device.is_online);
        assert_eq!(device.last_seen, Some(ms_since_epoch(now)));
        assert_eq!(device.display_preview.as_deref(), Some("data:image/png;base64,AAAA"));

        // a push without a preview keeps the previous one
        let row = StatusRow::from_report("lumy-1", &report(Status::Offline), now).unwrap();
        db.record_status(&row, None).unwrap();
        let device = db.device("lumy-1").unwrap().unwrap();
        assert!(!device.is_online);
        assert!(device.display_preview.is_some());
    }

    #[test]
    fn duplicate_code_is_rejected() {
        let mut db = memory_db();
        let code = RegistrationCode {
            code: "ABC-123".to_owned(),
            device_id: "lumy-1".to_owned(),
            created_at: 0,
            expires_at: 1,
            claimed_by: None,
            claimed_at: None,
        };
        assert!(db.insert_code(&code).unwrap());
        assert!(!db.insert_code(&code).unwrap());
        assert_eq!(db.code("ABC-123").unwrap().unwrap().device_id, "lumy-1");
    }

    #[test]
    fn devices_are_listed_per_owner() {
        let mut db = memory_db();
        user(&mut db, "alice");
        user(&mut db, "bob");
        device_registered_at(&mut db, "lumy-1", "alice", 3_000);
        device_registered_at(&mut db, "lumy-2", "bob", 1_000);
        device_registered_at(&mut db, "lumy-3", "alice", 2_000);
        device_registered_at(&mut db, "lumy-4", "alice", 3_000);
        device_registered_at(&mut db, "lumy-0", "alice", 3_000);

        let ids: Vec<_> = db
            .devices_of("alice")
            .unwrap()
            .into_iter()
            .map(|d| d.device_id)
            .collect();
        assert_eq!(ids, ["lumy-3", "lumy-0", "lumy-1", "lumy-4"]);

        db.update_device_name("lumy-1", "Kitchen").unwrap();
        assert_eq!(db.device("lumy-1").unwrap().unwrap().device_name, "Kitchen");
    }
}
