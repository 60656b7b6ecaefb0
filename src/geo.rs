use serde::{Deserialize, Serialize};

use crate::error::{VerifyError, VerifyResult};
use crate::proxy::ReputationSource;
use crate::result::{guarded, Detail, VerificationResult};

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> VerifyResult<Self> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(VerifyError::InvalidCoordinates(format!("latitude {lat}")));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(VerifyError::InvalidCoordinates(format!("longitude {lng}")));
        }
        Ok(Self { lat, lng })
    }
}

/// Great-circle distance in metres.
pub fn haversine_m(a: Coordinates, b: Coordinates) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Validated distance between two raw coordinate pairs.
pub fn distance_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> VerifyResult<f64> {
    Ok(haversine_m(Coordinates::new(lat1, lng1)?, Coordinates::new(lat2, lng2)?))
}

/// Circle a student must report from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub center: Coordinates,
    pub radius_m: f64,
}

impl Geofence {
    pub fn new(lat: f64, lng: f64, radius_m: f64) -> VerifyResult<Self> {
        if !radius_m.is_finite() || radius_m < 0.0 {
            return Err(VerifyError::InvalidCoordinates(format!("radius {radius_m}")));
        }
        Ok(Self {
            center: Coordinates::new(lat, lng)?,
            radius_m,
        })
    }

    /// A fence only exists when a session sets all three values.
    pub fn from_session(
        lat: Option<f64>,
        lng: Option<f64>,
        radius_m: Option<f64>,
    ) -> VerifyResult<Option<Self>> {
        match (lat, lng, radius_m) {
            (Some(lat), Some(lng), Some(r)) => Self::new(lat, lng, r).map(Some),
            _ => Ok(None),
        }
    }

    pub fn distance_to(&self, point: Coordinates) -> f64 {
        haversine_m(self.center, point)
    }

    pub fn contains(&self, point: Coordinates) -> bool {
        self.distance_to(point) <= self.radius_m
    }
}

/// Teacher fence plus student position, all required.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoCheckInput {
    pub teacher_lat: f64,
    pub teacher_lng: f64,
    pub radius_m: f64,
    pub student_lat: f64,
    pub student_lng: f64,
}

impl GeoCheckInput {
    pub fn from_parts(
        teacher_lat: Option<f64>,
        teacher_lng: Option<f64>,
        radius_m: Option<f64>,
        student_lat: Option<f64>,
        student_lng: Option<f64>,
    ) -> VerifyResult<Self> {
        Ok(Self {
            teacher_lat: teacher_lat.ok_or(VerifyError::MissingField("teacher_lat"))?,
            teacher_lng: teacher_lng.ok_or(VerifyError::MissingField("teacher_lng"))?,
            radius_m: radius_m.ok_or(VerifyError::MissingField("radius_m"))?,
            student_lat: student_lat.ok_or(VerifyError::MissingField("student_lat"))?,
            student_lng: student_lng.ok_or(VerifyError::MissingField("student_lng"))?,
        })
    }

    pub fn fence(&self) -> VerifyResult<Geofence> {
        Geofence::new(self.teacher_lat, self.teacher_lng, self.radius_m)
    }

    pub fn student(&self) -> VerifyResult<Coordinates> {
        Coordinates::new(self.student_lat, self.student_lng)
    }
}

/// Geofence and optional proxy gate.
pub struct GeoVerifier {
    reputation: Option<Box<dyn ReputationSource>>,
    reject_proxies: bool,
}

impl Default for GeoVerifier {
    fn default() -> Self {
        Self::new(None, false)
    }
}

impl GeoVerifier {
    pub fn new(reputation: Option<Box<dyn ReputationSource>>, reject_proxies: bool) -> Self {
        Self {
            reputation,
            reject_proxies,
        }
    }

    /// Distance from the fence centre, `None` when the session has no fence.
    pub fn check(
        &self,
        fence: Option<&Geofence>,
        student: Option<Coordinates>,
        client_ip: Option<&str>,
    ) -> VerifyResult<Option<f64>> {
        let Some(fence) = fence else {
            return Ok(None);
        };
        let student = student.ok_or(VerifyError::GeolocationRequired)?;

        if self.reject_proxies {
            if let (Some(source), Some(ip)) = (&self.reputation, client_ip) {
                let verdict = source.classify(ip);
                if let Some(reason) = &verdict.error {
                    log::warn!("reputation lookup for {ip} failed: {reason}");
                }
                if verdict.is_proxy {
                    log::info!("{ip} flagged as proxy");
                    return Err(VerifyError::ProxyDetected);
                }
            }
        }

        let distance_m = fence.distance_to(student);
        log::info!("student at {distance_m:.1} m, radius {:.1} m", fence.radius_m);
        if distance_m > fence.radius_m {
            return Err(VerifyError::OutsideGeofence { distance_m });
        }
        Ok(Some(distance_m))
    }

    pub fn verify(&self, input: &GeoCheckInput, client_ip: Option<&str>) -> VerificationResult {
        let radius_m = Some(input.radius_m);
        guarded(|| {
            let fence = input.fence()?;
            let student = input.student()?;
            match self.check(Some(&fence), Some(student), client_ip) {
                Ok(distance_m) => Ok(VerificationResult::accepted(
                    "Within premises",
                    None,
                    Detail::Geo {
                        distance_m,
                        radius_m,
                    },
                )),
                Err(err @ VerifyError::OutsideGeofence { distance_m }) => {
                    Ok(VerificationResult::rejected(
                        err.to_string(),
                        None,
                        Detail::Geo {
                            distance_m: Some(distance_m),
                            radius_m,
                        },
                    ))
                }
                Err(err) => Err(err),
            }
        })
    }
}
