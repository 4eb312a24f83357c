//! OAuth 2.0 authorization-code login against an upstream provider.
//!
//! The provider calls back to this service; the browser only reaches the
//! client app after tokens were issued.

pub mod pkce;
pub mod provider;
pub mod redirect;

pub use provider::{OAuthProviderClient, ProviderError};
pub use redirect::{OAuthRedirectResolver, RedirectError};
