//! Venue-facing clients: market metadata, deterministic slot detection,
//! and the authenticated CLOB order gateway.
//!
//! ## Modules
//!
//! - `types`: `Market` and the wire shapes of the metadata / CLOB / data
//!   APIs
//! - `gamma`: metadata HTTP client (slug, condition-id and token-id lookups)
//! - `detector`: slot-aligned discovery loop emitting `Market` events
//! - `auth`: CLOB L1 key derivation and L2 HMAC request signing
//! - `order`: EIP-712 order construction and signing
//! - `clob`: order placement, cancellation, status and midpoint
//! - `positions`: data-API positions listing

pub mod auth;
pub mod clob;
pub mod detector;
pub mod gamma;
pub mod order;
pub mod positions;
pub mod types;

pub use clob::{ClobClient, ClobError, Tif};
pub use detector::{DetectorConfig, MarketDetector};
pub use gamma::{GammaClient, GammaError};
pub use positions::{group_by_condition, DataApiClient, DataApiError, PositionRecord};
pub use types::Market;
