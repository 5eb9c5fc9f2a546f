//! # Keyward - Bearer Token Validation and Hierarchical RBAC
//!
//! Authenticates bearer tokens for service APIs and answers authorization
//! questions against role and authority inheritance graphs.
//!
//! ## Key Features
//!
//! - **Dual-strategy validation** - local JWT verification against JWKS keys,
//!   with RFC 7662 introspection as the fallback for opaque or rejected tokens
//! - **Layered caching** - keys, key sets and introspection results share one
//!   TTL cache; values never outlive their own expiry
//! - **Precise failures** - every claim check reports its own error, and an
//!   unreachable verifier is distinguishable from an untrusted token
//! - **Hierarchical RBAC** - `ADMIN -> [MANAGER, USER]` style graphs, cycle-safe
//!   traversal, 401/403-aware guards
//!
//! ## Architecture
//!
//! - [`cache`] - `Cache` trait, `MemoryCache`, `StatsCache` decorator
//! - [`token`] - OAuth access token records
//! - [`jwt`] - Claims model and predicates, `JwtVerifier`, JWKS `KeyResolver`
//! - [`introspection`] - RFC 7662 client
//! - [`resolver`] - `TokenResolver`: JWT first, introspection as fallback
//! - [`context`] - request-scoped `AuthorizationContext`
//! - [`rbac`] - `RbacEngine` policies and guards
//! - [`config`] - `EngineConfig` (JSON or `KEYWARD_*` environment)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use keyward::{EngineConfig, RbacEngine, TokenResolver, extract_bearer_token};
//!
//! # async fn handle(authorization: &str) -> keyward::Result<()> {
//! let config = EngineConfig::from_env()?;
//! let resolver = TokenResolver::from_config(&config)?;
//! let rbac = RbacEngine::try_new(config.rbac.clone())?;
//!
//! let token = extract_bearer_token(authorization).unwrap_or_default();
//! let context = resolver.authenticate(token).await?;
//!
//! match rbac.require_role(&context, "MANAGER") {
//!     Ok(()) => println!("welcome {}", context.subject),
//!     Err(denied) => println!("{} {}", denied.status_code(), denied),
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod introspection;
pub mod jwt;
pub mod rbac;
pub mod resolver;
pub mod token;

pub use cache::{Cache, CacheStats, Cacheable, MemoryCache, StatsCache};
pub use config::{CacheConfig, EngineConfig, IntrospectionConfig, SigningConfig};
pub use context::{AuthorizationContext, AuthorizationContextBuilder, extract_bearer_token};
pub use error::{ClaimsError, Error, Result};
pub use introspection::{IntrospectionClient, TokenIntrospection};
pub use jwt::{ClaimRules, Claims, JwtVerifier, KeyResolver, VerifiedJwt};
pub use rbac::{AccessDenied, RbacConfig, RbacEngine};
pub use resolver::{
    ResolverEntry, TokenResolver, TokenResolverBuilder, TokenValidator, ValidationResult,
    ValidationSource,
};
pub use token::{Token, TokenResponse};
