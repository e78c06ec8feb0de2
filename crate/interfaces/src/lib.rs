mod error;
mod hsm;

pub use error::{InterfaceError, InterfaceResult};
pub use hsm::{
    HsmInfo, HsmLibrary, HsmLibraryLoader, HsmMechanism, HsmSession, ObjectClass, ObjectHandle,
    SlotId, UserType,
};
