use std::error;
use std::fmt;

/// Detailed errors raised when validation of a [`Signature`](super::Signature)
/// fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SignatureError {
    UnknownTypeCode,
    SignatureTooLong,
    MissingArrayElementType,
    StructEndedButNotStarted,
    DictEndedButNotStarted,
    StructStartedButNotEnded,
    DictStartedButNotEnded,
    StructHasNoFields,
    DictKeyMustBeBasicType,
    DictEntryHasNoFields,
    DictEntryHasOnlyOneField,
    DictEntryNotInsideArray,
    ExceededMaximumDepth,
    DictEntryHasTooManyFields,
    NotUtf8,
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            SignatureError::UnknownTypeCode => "unknown type code",
            SignatureError::SignatureTooLong => "signature exceeds the 255 byte limit",
            SignatureError::MissingArrayElementType => "array is missing its element type",
            SignatureError::StructEndedButNotStarted => "')' without a matching '('",
            SignatureError::DictEndedButNotStarted => "'}' without a matching '{'",
            SignatureError::StructStartedButNotEnded => "'(' without a matching ')'",
            SignatureError::DictStartedButNotEnded => "'{' without a matching '}'",
            SignatureError::StructHasNoFields => "struct has no fields",
            SignatureError::DictKeyMustBeBasicType => "dict entry key must be a basic type",
            SignatureError::DictEntryHasNoFields => "dict entry has no fields",
            SignatureError::DictEntryHasOnlyOneField => "dict entry has only one field",
            SignatureError::DictEntryNotInsideArray => "dict entry is not inside of an array",
            SignatureError::ExceededMaximumDepth => "exceeded the maximum container nesting depth",
            SignatureError::DictEntryHasTooManyFields => "dict entry has more than two fields",
            SignatureError::NotUtf8 => "signature is not valid utf-8",
        };

        f.write_str(message)
    }
}

impl error::Error for SignatureError {}
