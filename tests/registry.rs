// CLASSIFICATION: COMMUNITY
// Filename: registry.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-16

use qrlogin::registry::{list_users, provision_user, RegistryError};
use qrlogin::{CodeRegistry, SessionStore, SqliteSessionStore, UserDirectory, UserRecord};
use tempfile::tempdir;

fn john() -> UserRecord {
    UserRecord {
        identity: "jbuck".into(),
        display_name: "John Buck".into(),
        access_code: "h65ld310".into(),
        email: Some("jbuck@gmail.com".into()),
    }
}

fn jane() -> UserRecord {
    UserRecord {
        identity: "jdoe".into(),
        display_name: "Jane Doe".into(),
        access_code: "d08ae169".into(),
        email: Some("jdoe@gmail.com".into()),
    }
}

#[test]
fn provisioned_users_are_loaded() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("data").join("user_database.db");
    assert!(provision_user(&db, &john()).unwrap());
    assert!(provision_user(&db, &jane()).unwrap());

    let users = UserDirectory::load(&db).unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users.lookup("h65ld310"), Some(john()));
    assert_eq!(users.lookup("d08ae169").unwrap().display_name, "Jane Doe");
    assert!(users.lookup("unknownQR").is_none());
}

#[test]
fn provisioning_twice_is_ignored() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("users.db");
    assert!(provision_user(&db, &john()).unwrap());
    assert!(!provision_user(&db, &john()).unwrap());
    assert_eq!(list_users(&db).unwrap(), vec![john()]);
}

#[test]
fn code_cannot_be_reissued() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("users.db");
    provision_user(&db, &john()).unwrap();
    let thief = UserRecord {
        access_code: john().access_code,
        ..jane()
    };
    let err = provision_user(&db, &thief).unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateCode { existing } if existing == "jbuck"));
    assert_eq!(list_users(&db).unwrap().len(), 1);
}

#[test]
fn identity_keeps_its_first_code() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("users.db");
    provision_user(&db, &john()).unwrap();
    let reissue = UserRecord {
        access_code: "n3wc0de1".into(),
        ..john()
    };
    let err = provision_user(&db, &reissue).unwrap_err();
    assert!(matches!(
        err,
        RegistryError::IdentityExists { ref identity, ref code }
            if identity == "jbuck" && code == "h65ld310"
    ));
    let users = UserDirectory::load(&db).unwrap();
    assert!(users.lookup("n3wc0de1").is_none());
    assert_eq!(users.lookup("h65ld310"), Some(john()));
}

#[test]
fn users_and_sessions_share_one_file() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("user_database.db");
    provision_user(&db, &john()).unwrap();
    let store = SqliteSessionStore::open(&db).unwrap();
    assert!(store.sessions().unwrap().is_empty());
    assert!(store.get_status("jbuck").unwrap().last_transition_ts.is_none());
    assert_eq!(UserDirectory::load(&db).unwrap().len(), 1);
}
