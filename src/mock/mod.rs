//! Test doubles for provider capabilities
//!
//! In-process fakes of the image, network and agent providers with call
//! recording and failure injection, for exercising job retry paths without
//! real backends.

mod failure;
mod providers;

pub use failure::{FailureConfig, FailureInjector, ProviderOp};
pub use providers::{MockProviders, ProviderCall};
