use keygate_types::{LicenseId, SessionId};

#[test]
fn license_ids_are_unique() {
    let a = LicenseId::new();
    let b = LicenseId::new();
    assert_ne!(a, b);
}

#[test]
fn license_id_display_parse_roundtrip() {
    let id = LicenseId::new();
    let parsed = LicenseId::parse(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn session_id_display_parse_roundtrip() {
    let id = SessionId::new();
    let parsed: SessionId = id.to_string().parse().unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn ids_are_time_ordered() {
    // UUID v7 embeds a millisecond timestamp; later ids sort later.
    let a = SessionId::new();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let b = SessionId::new();
    assert!(a.as_uuid() < b.as_uuid());
}

#[test]
fn id_parse_rejects_garbage() {
    assert!(LicenseId::parse("not-a-uuid").is_err());
    assert!(SessionId::parse("").is_err());
}
