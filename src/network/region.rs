//! Province/city resolution for client IPs

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use super::models::Region;

/// Skips the six character prefix, then captures the province-level unit and
/// the city-level unit. `|` and whitespace separate fields and never appear
/// inside a capture.
static REGION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^.{6}[\s|]*([^|\s]*?(?:省|自治区)|北京|天津|上海|重庆)市?[\s|]*([^|\s]*?(?:市|自治州|地区|区划|县))",
    )
    .expect("region pattern is valid")
});

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("invalid IP address: {0}")]
    InvalidIp(String),
    #[error("geolocation database error: {0}")]
    Database(String),
    #[error("malformed geolocation database: {0}")]
    Malformed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Maps an IP address to a free-text administrative address
///
/// The address starts with a six character prefix (a region code or country
/// header) followed by the province and city names.
pub trait GeoLocator: Send + Sync {
    fn lookup(&self, ip: &str) -> Result<String, GeoError>;
}

/// Resolve the province and city of `ip`
///
/// An empty `ip` short-circuits to an empty region without consulting the
/// locator. Locator failures are returned to the caller as-is.
pub fn resolve_region(locator: &dyn GeoLocator, ip: &str) -> Result<Region, GeoError> {
    if ip.is_empty() {
        return Ok(Region::default());
    }

    let address = locator.lookup(ip)?;
    let region = parse_region(&address);
    debug!(%ip, %address, province = %region.province, city = %region.city, "resolved region");

    Ok(region)
}

/// Extract province and city from a locator address string
///
/// Addresses that do not follow the expected shape yield an empty region.
pub fn parse_region(address: &str) -> Region {
    match REGION_PATTERN.captures(address) {
        Some(caps) => Region::new(
            caps.get(1).map_or("", |m| m.as_str()),
            caps.get(2).map_or("", |m| m.as_str()),
        ),
        None => Region::default(),
    }
}
