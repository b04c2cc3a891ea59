//! Invocation adapters for warmprompt.
//!
//! Both variants implement `warmprompt_core::InvocationAdapter`:
//! - [`LocalAdapter`] calls a model in-process
//! - [`RemoteAdapter`] calls an equivalent tool service over HTTP, with
//!   bounded exponential backoff
//!
//! [`build_from_config`] picks one at construction time.

pub mod local;
pub mod remote;
pub mod retry;
pub mod router;

pub use local::{Generation, LocalAdapter, LocalModel, PrefixCachingModel};
pub use remote::RemoteAdapter;
pub use retry::RetryPolicy;
pub use router::build_from_config;
