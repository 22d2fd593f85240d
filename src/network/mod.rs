//! Client network lookups
//!
//! Resolves the originating client IP of a request (honouring proxy headers)
//! and maps an IP to a province/city pair through an injected
//! [`GeoLocator`].

pub mod client_ip;
pub mod ip2region;
pub mod models;
pub mod region;

pub use client_ip::{real_ip, resolve_client_ip, user_ip, ClientIp, RequestContext, LOOPBACK_FALLBACK};
pub use ip2region::{Ip2RegionBuilder, Ip2RegionLocator};
pub use models::Region;
pub use region::{parse_region, resolve_region, GeoError, GeoLocator};
