//! Positions on the Earth's surface and great-circle distances between them.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// The Earth's radius, in meters.
pub const EARTH_RADIUS: f64 = 6.378e6;

/// A position on the Earth, stored as a unit vector pointing from the Earth's center.
#[derive(Copy, Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct EarthPosition {
    direction: [f64; 3],
}

impl EarthPosition {
    /// A position drawn uniformly from the Earth's surface.
    ///
    /// Points are sampled in the bounding cube of the unit sphere and rejected when they fall
    /// outside the ball; the accepted point is then projected onto the surface.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        loop {
            let point = [
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            ];
            let norm = norm(&point);
            // Near-zero points carry no usable direction.
            if norm <= 1.0 && norm > 1e-9 {
                return EarthPosition {
                    direction: point.map(|c| c / norm),
                };
            }
        }
    }

    /// A position from latitude and longitude in degrees.
    pub fn from_degrees(latitude: f64, longitude: f64) -> Self {
        let (lat, lon) = (latitude.to_radians(), longitude.to_radians());
        EarthPosition {
            direction: [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()],
        }
    }

    /// The great-circle distance to another position, in meters.
    pub fn distance(&self, other: &EarthPosition) -> f64 {
        let dot: f64 = self
            .direction
            .iter()
            .zip(other.direction.iter())
            .map(|(a, b)| a * b)
            .sum();
        // Rounding can push the product of two unit vectors slightly past +-1.
        EARTH_RADIUS * dot.clamp(-1.0, 1.0).acos()
    }
}

fn norm(v: &[f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}
