mod interface;

pub use interface::{
    HsmInfo, HsmLibrary, HsmLibraryLoader, HsmMechanism, HsmSession, ObjectClass, ObjectHandle,
    SlotId, UserType,
};
