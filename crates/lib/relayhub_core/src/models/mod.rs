//! Domain models shared by the token authority, device-state store, and
//! storage backends.

pub mod account;
pub mod device;

pub use account::{AuthorizationGrant, NewAccount, ReportStateInfo, UserAccount};
pub use device::{
    Catalog, DeviceTraits, FlatStates, InvalidUpdate, ProvisionedDevice, ReportEntry,
    StateUpdate, TraitKind, TraitState, UpdateRejection,
};
