//! # Modèle de métadonnées UPnP
//!
//! Devices, services, actions, arguments et variables d'état, tels que
//! décrits par la UPnP Device Architecture. Le graphe est possédé par
//! tables : les services ne pointent jamais vers leur device, la
//! résolution passe par le registre et les identifiants stables
//! (UDN, id de service, nom de variable).

mod action;
mod device;
mod errors;
mod service;
mod state_variable;
mod udn;
mod urn;

pub use action::{Action, Argument, Direction};
pub use device::{Device, DeviceBuilder, Icon};
pub use errors::ModelError;
pub use service::{Service, ServicePaths};
pub use state_variable::{EventPolicy, StateVariable};
pub use udn::Udn;
pub use urn::{DeviceType, ServiceId, ServiceType};
