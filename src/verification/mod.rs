//! Check-in verification: where the student is, whose face it is, whether
//! the face is live, and whether the scanned QR token is current.

pub mod face;
pub mod geo;
pub mod liveness;
pub mod qr;

pub use face::{FaceDescriptor, FaceMatch};
pub use geo::{GeoPoint, Geofence, GeofenceCheck};
pub use liveness::{LivenessEvidence, LivenessFailure, LivenessPolicy};
pub use qr::{QrClaim, QrGrant, QrRejection};
