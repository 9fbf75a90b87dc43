use std::sync::Mutex;

use chrono::{DateTime, Utc};

use pqrserver::core::shared::error::PqrsError;
use pqrserver::insurers::{
    create_insurer, delete_insurer, update_insurer, DirectoryStore, DirectoryTx, InsurerForm,
};

#[derive(Debug, Clone, PartialEq)]
struct EmailRow {
    insurer_id: i32,
    email: String,
    active: bool,
}

#[derive(Debug, Clone, Default)]
struct Directory {
    /// (id, name, active)
    insurers: Vec<(i32, String, bool)>,
    emails: Vec<EmailRow>,
    /// insurer_id of every ticket
    tickets: Vec<i32>,
    next_id: i32,
    fail_on_email: Option<String>,
}

impl DirectoryTx for Directory {
    fn insurer_name_taken(&mut self, name: &str, except_id: Option<i32>) -> Result<bool, PqrsError> {
        Ok(self
            .insurers
            .iter()
            .any(|(id, n, _)| n.eq_ignore_ascii_case(name) && Some(*id) != except_id))
    }

    fn insert_insurer(&mut self, name: &str, active: bool, _now: DateTime<Utc>) -> Result<i32, PqrsError> {
        self.next_id += 1;
        self.insurers.push((self.next_id, name.to_string(), active));
        Ok(self.next_id)
    }

    fn update_insurer(&mut self, id: i32, name: &str, active: bool) -> Result<usize, PqrsError> {
        let mut updated = 0;
        for row in self.insurers.iter_mut().filter(|(i, _, _)| *i == id) {
            row.1 = name.to_string();
            row.2 = active;
            updated += 1;
        }
        Ok(updated)
    }

    fn deactivate_emails(&mut self, insurer_id: i32) -> Result<usize, PqrsError> {
        let mut updated = 0;
        for row in self.emails.iter_mut().filter(|e| e.insurer_id == insurer_id) {
            row.active = false;
            updated += 1;
        }
        Ok(updated)
    }

    fn insert_email(&mut self, insurer_id: i32, email: &str, _now: DateTime<Utc>) -> Result<(), PqrsError> {
        if self.fail_on_email.as_deref() == Some(email) {
            return Err(PqrsError::Database("connection reset".to_string()));
        }
        self.emails.push(EmailRow {
            insurer_id,
            email: email.to_string(),
            active: true,
        });
        Ok(())
    }

    fn count_tickets(&mut self, insurer_id: i32) -> Result<i64, PqrsError> {
        Ok(self.tickets.iter().filter(|id| **id == insurer_id).count() as i64)
    }

    fn delete_emails(&mut self, insurer_id: i32) -> Result<usize, PqrsError> {
        let before = self.emails.len();
        self.emails.retain(|e| e.insurer_id != insurer_id);
        Ok(before - self.emails.len())
    }

    fn delete_insurer(&mut self, insurer_id: i32) -> Result<usize, PqrsError> {
        let before = self.insurers.len();
        self.insurers.retain(|(id, _, _)| *id != insurer_id);
        Ok(before - self.insurers.len())
    }
}

/// Applies the closure to a copy and keeps it only on success.
#[derive(Default)]
struct MemoryStore {
    state: Mutex<Directory>,
}

impl DirectoryStore for MemoryStore {
    fn transaction<T, F>(&self, f: F) -> Result<T, PqrsError>
    where
        F: FnOnce(&mut dyn DirectoryTx) -> Result<T, PqrsError>,
    {
        let mut state = self.state.lock().unwrap();
        let mut working = state.clone();
        let result = f(&mut working)?;
        *state = working;
        Ok(result)
    }
}

impl MemoryStore {
    fn snapshot(&self) -> Directory {
        self.state.lock().unwrap().clone()
    }

    fn emails_of(&self, insurer_id: i32) -> Vec<(String, bool)> {
        self.snapshot()
            .emails
            .into_iter()
            .filter(|e| e.insurer_id == insurer_id)
            .map(|e| (e.email, e.active))
            .collect()
    }
}

fn form(name: &str, emails: &[&str]) -> InsurerForm {
    InsurerForm {
        name: name.to_string(),
        active: Some(true),
        emails: emails.iter().map(|e| e.to_string()).collect(),
    }
}

#[test]
fn test_create_inserts_insurer_and_active_emails() {
    let store = MemoryStore::default();
    let id = create_insurer(
        &store,
        form("EPS Andina", &["a@andina.com", "A@andina.com", "b@andina.com"]),
        Utc::now(),
    )
    .unwrap();

    assert_eq!(
        store.emails_of(id),
        vec![
            ("a@andina.com".to_string(), true),
            ("b@andina.com".to_string(), true)
        ]
    );
}

#[test]
fn test_duplicate_name_is_rejected() {
    let store = MemoryStore::default();
    create_insurer(&store, form("EPS Andina", &["a@andina.com"]), Utc::now()).unwrap();

    let err = create_insurer(&store, form("eps andina", &["x@y.com"]), Utc::now()).unwrap_err();
    assert!(matches!(err, PqrsError::Validation(_)));
    assert_eq!(store.snapshot().insurers.len(), 1);
}

#[test]
fn test_edit_deactivates_previous_emails_and_keeps_history() {
    let store = MemoryStore::default();
    let id = create_insurer(
        &store,
        form("EPS Pacífico", &["old1@pac.com", "old2@pac.com"]),
        Utc::now(),
    )
    .unwrap();

    update_insurer(
        &store,
        id,
        form("EPS Pacífico", &["new@pac.com", "old2@pac.com"]),
        Utc::now(),
    )
    .unwrap();

    let emails = store.emails_of(id);
    let active: Vec<&str> = emails
        .iter()
        .filter(|(_, a)| *a)
        .map(|(e, _)| e.as_str())
        .collect();
    assert_eq!(active, vec!["new@pac.com", "old2@pac.com"]);
    assert!(emails.contains(&("old1@pac.com".to_string(), false)));
    assert!(emails.contains(&("old2@pac.com".to_string(), false)));
    assert_eq!(emails.len(), 4);
}

#[test]
fn test_edit_allows_keeping_own_name_but_not_anothers() {
    let store = MemoryStore::default();
    let first = create_insurer(&store, form("EPS Uno", &["a@uno.com"]), Utc::now()).unwrap();
    create_insurer(&store, form("EPS Dos", &["a@dos.com"]), Utc::now()).unwrap();

    assert!(update_insurer(&store, first, form("EPS Uno", &["b@uno.com"]), Utc::now()).is_ok());
    assert!(matches!(
        update_insurer(&store, first, form("EPS Dos", &["b@uno.com"]), Utc::now()),
        Err(PqrsError::Validation(_))
    ));
}

#[test]
fn test_edit_missing_insurer_is_not_found() {
    let store = MemoryStore::default();
    assert!(matches!(
        update_insurer(&store, 77, form("EPS", &["a@eps.com"]), Utc::now()),
        Err(PqrsError::NotFound(_))
    ));
}

#[test]
fn test_failed_edit_rolls_back() {
    let store = MemoryStore::default();
    let id = create_insurer(&store, form("EPS Sur", &["keep@sur.com"]), Utc::now()).unwrap();
    store.state.lock().unwrap().fail_on_email = Some("boom@sur.com".to_string());

    let err = update_insurer(
        &store,
        id,
        form("EPS Sur Renombrada", &["boom@sur.com"]),
        Utc::now(),
    )
    .unwrap_err();
    assert!(matches!(err, PqrsError::Database(_)));

    let snapshot = store.snapshot();
    assert_eq!(snapshot.insurers[0].1, "EPS Sur");
    assert_eq!(store.emails_of(id), vec![("keep@sur.com".to_string(), true)]);
}

#[test]
fn test_delete_blocked_by_tickets() {
    let store = MemoryStore::default();
    let id = create_insurer(&store, form("EPS Norte", &["a@norte.com"]), Utc::now()).unwrap();
    store.state.lock().unwrap().tickets = vec![id, id, id];

    let err = delete_insurer(&store, id).unwrap_err();
    assert!(err.to_string().contains("3 associated PQRS"));
    assert_eq!(store.snapshot().insurers.len(), 1);
    assert_eq!(store.emails_of(id).len(), 1);
}

#[test]
fn test_delete_cascades_emails() {
    let store = MemoryStore::default();
    let id = create_insurer(
        &store,
        form("EPS Centro", &["a@centro.com", "b@centro.com"]),
        Utc::now(),
    )
    .unwrap();
    update_insurer(&store, id, form("EPS Centro", &["c@centro.com"]), Utc::now()).unwrap();

    assert_eq!(delete_insurer(&store, id).unwrap(), 3);
    let snapshot = store.snapshot();
    assert!(snapshot.insurers.is_empty());
    assert!(snapshot.emails.is_empty());
}

#[test]
fn test_delete_missing_insurer_is_not_found() {
    let store = MemoryStore::default();
    assert!(matches!(
        delete_insurer(&store, 5),
        Err(PqrsError::NotFound(_))
    ));
}
