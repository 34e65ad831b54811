use super::{OwnedSignature, Signature, SignatureError};

#[test]
fn accepts_basic_types() {
    assert!(Signature::new("y").is_ok());
    assert!(Signature::new("b").is_ok());
    assert!(Signature::new("s").is_ok());
    assert!(Signature::new("sssi").is_ok());
}

#[test]
fn accepts_nested_containers() {
    assert!(Signature::new("a(si)").is_ok());
    assert!(Signature::new("a{sv}").is_ok());
    assert!(Signature::new("aai").is_ok());
    assert!(Signature::new("(a{sv}ai)").is_ok());
}

#[test]
fn rejects_unbalanced_struct() {
    assert_eq!(
        Signature::new("(a"),
        Err(SignatureError::StructStartedButNotEnded)
    );
    assert_eq!(
        Signature::new(")"),
        Err(SignatureError::StructEndedButNotStarted)
    );
}

#[test]
fn rejects_dict_entry_outside_array() {
    assert_eq!(
        Signature::new("{sv}"),
        Err(SignatureError::DictEntryNotInsideArray)
    );
}

#[test]
fn rejects_dict_entry_with_non_basic_key() {
    assert_eq!(
        Signature::new("a{vs}"),
        Err(SignatureError::DictKeyMustBeBasicType)
    );
}

#[test]
fn rejects_dict_entry_with_wrong_field_count() {
    assert_eq!(
        Signature::new("a{s}"),
        Err(SignatureError::DictEntryHasOnlyOneField)
    );
    assert_eq!(
        Signature::new("a{sii}"),
        Err(SignatureError::DictEntryHasTooManyFields)
    );
}

#[test]
fn rejects_unknown_type_code() {
    assert_eq!(Signature::new("z"), Err(SignatureError::UnknownTypeCode));
}

#[test]
fn owned_signature_round_trips() {
    let mut owned = OwnedSignature::new();
    assert!(owned.extend(Signature::new("ai").unwrap()));
    assert!(owned.extend(Signature::new("s").unwrap()));
    assert_eq!(owned.as_signature(), Signature::new("ais").unwrap());
}
