use super::SignatureError;

/// The maximum number of nested containers (arrays, structs and dict
/// entries combined) permitted by the D-Bus specification.
pub(crate) const MAX_DEPTH: usize = 32;
/// The maximum length of a signature, in bytes, per the D-Bus specification.
pub(crate) const MAX_SIGNATURE: usize = 255;

const fn is_basic_type(b: u8) -> bool {
    matches!(
        b,
        b'y' | b'b' | b'n' | b'q' | b'i' | b'u' | b'x' | b't' | b'd' | b's' | b'o' | b'g' | b'h'
    )
}

/// Validate that `bytes` forms a well-formed sequence of complete D-Bus
/// types.
pub(crate) const fn validate(bytes: &[u8]) -> Result<(), SignatureError> {
    // `const fn` forbids `?` and iterators, so this walks the byte slice by
    // hand; the logic mirrors the non-const `validate_non_const` below.
    if bytes.len() > MAX_SIGNATURE {
        return Err(SignatureError::SignatureTooLong);
    }

    let mut pos = 0;

    while pos < bytes.len() {
        match validate_one_const(bytes, pos, 0) {
            Ok(next) => pos = next,
            Err(error) => return Err(error),
        }
    }

    Ok(())
}

const fn validate_one_const(
    bytes: &[u8],
    pos: usize,
    depth: usize,
) -> Result<usize, SignatureError> {
    if depth > MAX_DEPTH {
        return Err(SignatureError::ExceededMaximumDepth);
    }

    let b = bytes[pos];

    match b {
        b'y' | b'b' | b'n' | b'q' | b'i' | b'u' | b'x' | b't' | b'd' | b's' | b'o' | b'g'
        | b'h' | b'v' => Ok(pos + 1),
        b'a' => {
            let next = pos + 1;

            if next >= bytes.len() {
                return Err(SignatureError::MissingArrayElementType);
            }

            if bytes[next] == b'{' {
                validate_dict_entry_const(bytes, next, depth + 1)
            } else {
                validate_one_const(bytes, next, depth + 1)
            }
        }
        b'(' => {
            let mut p = pos + 1;
            let mut count = 0;

            while p < bytes.len() && bytes[p] != b')' {
                match validate_one_const(bytes, p, depth + 1) {
                    Ok(next) => p = next,
                    Err(error) => return Err(error),
                }
                count += 1;
            }

            if p >= bytes.len() {
                return Err(SignatureError::StructStartedButNotEnded);
            }

            if count == 0 {
                return Err(SignatureError::StructHasNoFields);
            }

            Ok(p + 1)
        }
        b')' => Err(SignatureError::StructEndedButNotStarted),
        b'{' => Err(SignatureError::DictEntryNotInsideArray),
        b'}' => Err(SignatureError::DictEndedButNotStarted),
        _ => Err(SignatureError::UnknownTypeCode),
    }
}

const fn validate_dict_entry_const(
    bytes: &[u8],
    open_brace: usize,
    depth: usize,
) -> Result<usize, SignatureError> {
    let mut p = open_brace + 1;

    if p >= bytes.len() {
        return Err(SignatureError::DictEntryHasNoFields);
    }

    if !is_basic_type(bytes[p]) {
        return Err(SignatureError::DictKeyMustBeBasicType);
    }

    let mut fields = 0;

    while p < bytes.len() && bytes[p] != b'}' {
        if fields == 2 {
            return Err(SignatureError::DictEntryHasTooManyFields);
        }

        match validate_one_const(bytes, p, depth + 1) {
            Ok(next) => p = next,
            Err(error) => return Err(error),
        }

        fields += 1;
    }

    if p >= bytes.len() {
        return Err(SignatureError::DictStartedButNotEnded);
    }

    if fields == 0 {
        return Err(SignatureError::DictEntryHasNoFields);
    }

    if fields == 1 {
        return Err(SignatureError::DictEntryHasOnlyOneField);
    }

    Ok(p + 1)
}
