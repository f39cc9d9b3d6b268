//! # Enforcer
//!
//! **Enforcer** is the credential validation and subscription authorization
//! engine of an API gateway's policy enforcement point. The proxy hands it a
//! request (headers plus the matched API and resource); it answers with an
//! [`AuthenticationContext`] or a typed [`AuthError`].
//!
//! ## Architecture
//!
//! - **[`engine`]** - [`Enforcer`]: builds the authenticator chain from configuration and runs requests
//! - **[`security`]** - authenticators, validation pipeline, caches, subscription, scope and environment checks
//! - **[`context`]** - request, API, resource and authentication context types
//! - **[`config`]** - YAML + environment configuration
//! - **[`error`]** - the [`AuthError`] taxonomy with numeric codes and status classes
//! - **[`logging`]** - `tracing` subscriber setup and credential masking
//! - **[`clock`]** - injectable time source
//! - **[`cli`]** - the `enforcer` operator binary
//!
//! ### Request Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Proxy
//!     participant Engine as Enforcer
//!     participant Chain as AuthenticatorChain
//!     participant Pipeline as TokenPipeline
//!     participant Store as PolicyStore
//!
//!     Proxy->>Engine: authenticate(&mut RequestContext)
//!     Engine->>Chain: first authenticator that can_handle
//!     Chain->>Pipeline: validate (revocation, caches, signature, claims, audience)
//!     Pipeline->>Store: subscription / lifecycle (claims first, store on miss)
//!     Pipeline->>Pipeline: environment, scope, backend credential
//!     Pipeline-->>Engine: AuthenticationContext
//!     Engine-->>Proxy: context + metadata, or AuthError + www-authenticate
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use enforcer::{ApiDescriptor, Enforcer, EnforcerConfig, RequestContext, ResourceDescriptor};
//! use http::Method;
//!
//! let enforcer = Enforcer::from_config(EnforcerConfig::load("enforcer.yaml")?)?;
//! let mut req = RequestContext::new(
//!     ApiDescriptor::new("PetStore", "1.0.0", "/petstore/1.0.0"),
//!     ResourceDescriptor::new(Method::GET, "/pets"),
//! )
//! .with_header("authorization", "Bearer eyJ...");
//!
//! match enforcer.authenticate(&mut req) {
//!     Ok(ctx) => println!("{} on tier {}", ctx.username, ctx.tier),
//!     Err(e) => println!("{} {}", e.status(), e),
//! }
//! ```

pub mod cli;
pub mod clock;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod logging;
pub mod security;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EnforcerConfig;
pub use context::{
    ApiDescriptor, ApplicationIdentity, AuthenticationContext, KeyType, RequestContext,
    ResourceDescriptor, SecurityScheme,
};
pub use engine::{Collaborators, Enforcer};
pub use error::AuthError;
pub use security::{AuthOutcome, Authenticator, AuthenticatorChain, CacheStats};
