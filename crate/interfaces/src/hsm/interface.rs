//! HSM interface.
//! This module defines the interface that a PKCS#11 client library must implement to be used by
//! the encryptor: open-by-path, slot enumeration, scoped sessions, login, object lookup by label
//! and single-shot asymmetric encryption and decryption.

use std::{
    fmt::{self, Display, Formatter},
    path::Path,
};

use strum::{Display as StrumDisplay, EnumString};
use zeroize::Zeroizing;

use crate::{InterfaceError, InterfaceResult};

/// PKCS#11 slot identifier, as returned by the slot enumeration
pub type SlotId = u64;

/// PKCS#11 object handle, only valid within the session that found it
pub type ObjectHandle = u64;

/// Key object classes the encryptor looks up
#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
pub enum ObjectClass {
    #[strum(to_string = "CKO_PUBLIC_KEY")]
    PublicKey,
    #[strum(to_string = "CKO_PRIVATE_KEY")]
    PrivateKey,
}

/// PKCS#11 user types (`CKU_<foo>`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, StrumDisplay)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum UserType {
    So,
    User,
    ContextSpecific,
}

impl UserType {
    /// Parse a user type, accepting both `USER` and `CKU_USER` forms in any case.
    pub fn parse(value: &str) -> InterfaceResult<Self> {
        let trimmed = value.trim();
        let name = trimmed
            .get(..4)
            .filter(|prefix| prefix.eq_ignore_ascii_case("CKU_"))
            .map_or(trimmed, |_| &trimmed[4..]);
        name.parse::<Self>()
            .map_err(|_| InterfaceError::Default(format!("unknown HSM user type: {value}")))
    }
}

/// Mechanisms used for encryption and decryption
#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
pub enum HsmMechanism {
    /// RSA with PKCS#1 v1.5 padding
    #[strum(to_string = "CKM_RSA_PKCS")]
    RsaPkcs,
}

/// General information about the PKCS#11 library
#[derive(Debug, Clone, Default)]
pub struct HsmInfo {
    pub cryptoki_version: (u8, u8),
    pub manufacturer_id: String,
    pub library_description: String,
    pub library_version: (u8, u8),
}

impl Display for HsmInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cryptoki Version: {}.{}, Manufacturer ID: {}, Library Description: {}, Library \
             Version: {}.{}",
            self.cryptoki_version.0,
            self.cryptoki_version.1,
            self.manufacturer_id,
            self.library_description,
            self.library_version.0,
            self.library_version.1
        )
    }
}

/// A session opened on one slot of the HSM.
///
/// Implementations close the underlying session when the value is dropped, so holding the
/// session in a scope is enough to guarantee its release. Logging out is explicit.
pub trait HsmSession {
    /// Authenticate the session.
    fn login(&mut self, user_type: UserType, pin: &[u8]) -> InterfaceResult<()>;

    /// Log the session out.
    fn logout(&mut self) -> InterfaceResult<()>;

    /// Find the handles of all the objects of `class` whose `CKA_LABEL` equals `label`.
    /// An empty vector is returned when nothing matches.
    fn find_objects(
        &mut self,
        class: ObjectClass,
        label: &[u8],
    ) -> InterfaceResult<Vec<ObjectHandle>>;

    /// Encrypt `data` with the key behind `key`.
    fn encrypt(
        &mut self,
        mechanism: HsmMechanism,
        key: ObjectHandle,
        data: &[u8],
    ) -> InterfaceResult<Vec<u8>>;

    /// Decrypt `data` with the key behind `key`.
    fn decrypt(
        &mut self,
        mechanism: HsmMechanism,
        key: ObjectHandle,
        data: &[u8],
    ) -> InterfaceResult<Zeroizing<Vec<u8>>>;
}

/// A loaded PKCS#11 library.
pub trait HsmLibrary: Send + Sync {
    /// General information on the library.
    fn info(&self) -> InterfaceResult<HsmInfo>;

    /// The slots that currently hold a token, in the order reported by the library.
    fn active_slots(&self) -> InterfaceResult<Vec<SlotId>>;

    /// Open a session on the given slot.
    fn open_session(&self, slot_id: SlotId) -> InterfaceResult<Box<dyn HsmSession + '_>>;
}

/// Opens PKCS#11 libraries by path.
pub trait HsmLibraryLoader: Send + Sync {
    fn load(&self, path: &Path) -> InterfaceResult<Box<dyn HsmLibrary>>;
}
