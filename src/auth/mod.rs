//! Authentication module
//!
//! Two concerns live here: the Login with Amazon access-token cache
//! (refresh-token grant, proactive refresh near expiry) and the SigV4
//! request signer applied to every outbound call.

mod signer;
mod token_cache;

pub use signer::RequestSigner;
pub use token_cache::{AccessTokenCache, CachedToken, EXPIRY_MARGIN_SECONDS};
