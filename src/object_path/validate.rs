pub(crate) const fn validate(bytes: &[u8]) -> bool {
    if bytes.is_empty() || bytes[0] != b'/' {
        return false;
    }

    if bytes.len() == 1 {
        return true;
    }

    let mut i = 1;
    let mut element_len = 0;

    while i < bytes.len() {
        let b = bytes[i];

        if b == b'/' {
            if element_len == 0 {
                return false;
            }

            element_len = 0;
        } else if b.is_ascii_alphanumeric() || b == b'_' {
            element_len += 1;
        } else {
            return false;
        }

        i += 1;
    }

    element_len != 0
}
