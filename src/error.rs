use cipher::InvalidLength;
use thiserror::Error;

/// Every distinct failure condition the Yati installation pipeline can
/// surface. Variants are grouped the way they are catalogued, not by the
/// module that raises them, so a caller can match on "what went wrong"
/// without needing to know which stage produced it.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Unable to parse binary data: {0}")]
    BinaryParser(#[from] binrw::Error),
    #[error("Unable to parse string: {0}")]
    StringParser(#[from] core::str::Utf8Error),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Not supported: {0}")]
    NotSupported(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Other error: {0}")]
    Other(String),
    #[error("Encryption error: {0}")]
    CryptoError(String),
    #[error("Key lookup error: {0}")]
    KeyLookupError(String),
    #[error("Title key error: {0}")]
    TitleKeyError(#[from] crate::formats::keys::KeyError),

    // -- container --
    #[error("source matches neither PFS0 nor HFS0")]
    ContainerNotFound,

    // -- USB source framing --
    #[error("bad USB framing magic")]
    BadMagic,
    #[error("bad USB framing version")]
    BadVersion,
    #[error("bad USB framing count")]
    BadCount,
    #[error("bad USB transfer size")]
    BadTransferSize,
    #[error("bad USB total size")]
    BadTotalSize,

    // -- referenced artefact missing --
    #[error("NCA not found: {0}")]
    NcaNotFound(String),
    #[error("ticket not found for rights id {0}")]
    TicketNotFound(String),
    #[error("certificate not found for rights id {0}")]
    CertNotFound(String),

    #[error("source returned fewer bytes than requested")]
    InvalidNcaReadSize,

    // -- NCA validation --
    #[error("NCA magic is not \"NCA3\"")]
    InvalidNcaMagic,
    #[error("NCA signature key generation is invalid")]
    InvalidNcaSigKeyGen,
    #[error("NCA fixed-key signature 0 failed verification")]
    InvalidNcaSignature0,
    #[error("NCA fixed-key signature 1 (NPDM) failed verification")]
    InvalidNcaSignature1,
    #[error("NCA body SHA-256 does not match content id")]
    InvalidNcaSha256,

    // -- NCZ framing --
    #[error("invalid NCZ section count")]
    InvalidNczSectionCount,
    #[error("NCZ section covering offset {0:#x} not found")]
    NczSectionNotFound(u64),
    #[error("NCZ block covering offset {0:#x} not found")]
    NczBlockNotFound(u64),
    #[error("invalid NCZ block header version")]
    InvalidNczBlockVersion,
    #[error("invalid NCZ block header type")]
    InvalidNczBlockType,
    #[error("invalid NCZ block total count")]
    InvalidNczBlockTotal,
    #[error("invalid NCZ block size exponent")]
    InvalidNczBlockSizeExponent,
    #[error("zstd decode error: {0}")]
    InvalidNczZstdError(String),

    // -- ticket validation --
    #[error("ticket rights id does not match filename")]
    InvalidTicketBadRightsId,
    #[error("ticket format version must be 2")]
    InvalidTicketFromatVersion,
    #[error("ticket key type must be Common or Personalized")]
    InvalidTicketKeyType,
    #[error("ticket master key revision exceeds 0x20")]
    InvalidTicketKeyRevision,

    // -- key provisioning --
    #[error("missing NCA key-area key for this (index, generation)")]
    KeyMissingNcaKeyArea,
    #[error("missing titlekek for this generation")]
    KeyMissingTitleKek,
    #[error("missing master key for this generation")]
    KeyMissingMasterKey,
    #[error("failed to decrypt eTicket device key")]
    KeyFailedDecyptETicketDeviceKey,

    // -- meta-db --
    #[error("content-meta-db returned a corrupt header")]
    NcmDbCorruptHeader,
    #[error("content-meta-db returned corrupt content infos")]
    NcmDbCorruptInfos,

    #[error("operation cancelled")]
    Cancelled,
}

impl From<InvalidLength> for Error {
    fn from(_: InvalidLength) -> Self {
        Error::CryptoError("Invalid key length".to_string())
    }
}

impl From<rsa::Error> for Error {
    fn from(e: rsa::Error) -> Self {
        Error::CryptoError(format!("rsa: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
