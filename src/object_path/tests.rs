use super::{ObjectPath, OwnedObjectPath};

#[test]
fn accepts_well_formed_paths() {
    assert!(ObjectPath::new("/").is_ok());
    assert!(ObjectPath::new("/org/freedesktop/DBus").is_ok());
    assert!(ObjectPath::new("/a1/b_2").is_ok());
}

#[test]
fn rejects_malformed_paths() {
    assert!(ObjectPath::new("").is_err());
    assert!(ObjectPath::new("relative").is_err());
    assert!(ObjectPath::new("/trailing/").is_err());
    assert!(ObjectPath::new("/double//slash").is_err());
    assert!(ObjectPath::new("/bad-char").is_err());
}

#[test]
fn iterates_elements() {
    let path = ObjectPath::new("/org/freedesktop/DBus").unwrap();
    let elements: Vec<_> = path.iter().collect();
    assert_eq!(elements, ["org", "freedesktop", "DBus"]);
}

#[test]
fn detects_ancestry() {
    let root = ObjectPath::ROOT;
    let child = ObjectPath::new("/org/freedesktop").unwrap();
    assert!(root.is_ancestor_of(child));
    assert!(child.is_ancestor_of(ObjectPath::new("/org/freedesktop/DBus").unwrap()));
    assert!(!child.is_ancestor_of(ObjectPath::new("/org/freedesktop2").unwrap()));
}

#[test]
fn owned_join() {
    let base = OwnedObjectPath::new("/org/freedesktop").unwrap();
    let joined = base.join("DBus").unwrap();
    assert_eq!(joined.as_str(), "/org/freedesktop/DBus");
}
