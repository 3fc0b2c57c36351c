//! Blobflow Provider
//!
//! Providers are the participants that react to blob lifecycle events. Each
//! one lists the workflows it runs and the triggers (event type, conditions,
//! priority, sync or async dispatch) that select it. The
//! [`ProviderRegistry`] holds registered providers and their workflow
//! definitions and answers which providers an [`Event`] selects.

mod error;
mod event;
mod provider;
mod registry;

pub use error::RegistryError;
pub use event::{DELTA_APPLIED, Event, ON_CREATE, ON_DELETE, ON_UPDATE, WORKFLOW_COMPLETED};
pub use provider::{Provider, ProviderConfig, TriggerConfig};
pub use registry::{ProviderRegistry, TriggerMatch};
