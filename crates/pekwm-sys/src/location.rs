//! Geolocation lookup is an external collaborator: `pekwm_sys` only ever
//! sees its two-field result, never the HTTP client itself. The real
//! implementation (an HTTP GET against a geolocation service) lives outside
//! this crate's scope; [`NullLocationService`] is the no-op used when
//! `LocationLookup` is disabled or no real client is wired in.

/// Result of a geolocation lookup: latitude and longitude in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPosition {
    pub latitude: f64,
    pub longitude: f64,
}

pub trait LocationService {
    fn lookup(&self) -> Option<GeoPosition>;
}

/// Used whenever `Sys::location_lookup` is false, or no other
/// `LocationService` has been wired in.
pub struct NullLocationService;

impl LocationService for NullLocationService {
    fn lookup(&self) -> Option<GeoPosition> {
        None
    }
}
