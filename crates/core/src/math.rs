//! Vector and rotation value types used by scripts

use serde::{Deserialize, Serialize};
use std::fmt;

/// Three-component vector
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector {
    pub const ZERO: Vector = Vector { x: 0.0, y: 0.0, z: 0.0 };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn add(self, other: Vector) -> Vector {
        Vector::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn sub(self, other: Vector) -> Vector {
        Vector::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn scale(self, factor: f64) -> Vector {
        Vector::new(self.x * factor, self.y * factor, self.z * factor)
    }

    pub fn neg(self) -> Vector {
        Vector::new(-self.x, -self.y, -self.z)
    }

    pub fn dot(self, other: Vector) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: Vector) -> Vector {
        Vector::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn magnitude(self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Rotate this vector by `rot`
    pub fn rotate(self, rot: Rotation) -> Vector {
        let v = Rotation::new(self.x, self.y, self.z, 0.0);
        let r = rot.hamilton(v).hamilton(rot.conjugate());
        Vector::new(r.x, r.y, r.z)
    }

    /// Component by index (x=0, y=1, z=2)
    pub fn component(&self, index: usize) -> Option<f64> {
        match index {
            0 => Some(self.x),
            1 => Some(self.y),
            2 => Some(self.z),
            _ => None,
        }
    }

    pub fn with_component(mut self, index: usize, value: f64) -> Option<Vector> {
        match index {
            0 => self.x = value,
            1 => self.y = value,
            2 => self.z = value,
            _ => return None,
        }
        Some(self)
    }

    /// Parse the `<x, y, z>` form, tolerating surrounding whitespace
    pub fn parse(text: &str) -> Option<Vector> {
        let parts = parse_components(text)?;
        match parts.as_slice() {
            [x, y, z] => Some(Vector::new(*x, *y, *z)),
            _ => None,
        }
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{:.5}, {:.5}, {:.5}>", self.x, self.y, self.z)
    }
}

/// Quaternion rotation with `s` as the real part
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub s: f64,
}

impl Rotation {
    pub const IDENTITY: Rotation = Rotation { x: 0.0, y: 0.0, z: 0.0, s: 1.0 };

    pub const fn new(x: f64, y: f64, z: f64, s: f64) -> Self {
        Self { x, y, z, s }
    }

    fn hamilton(self, b: Rotation) -> Rotation {
        let a = self;
        Rotation::new(
            a.s * b.x + a.x * b.s + a.y * b.z - a.z * b.y,
            a.s * b.y - a.x * b.z + a.y * b.s + a.z * b.x,
            a.s * b.z + a.x * b.y - a.y * b.x + a.z * b.s,
            a.s * b.s - a.x * b.x - a.y * b.y - a.z * b.z,
        )
    }

    pub fn conjugate(self) -> Rotation {
        Rotation::new(-self.x, -self.y, -self.z, self.s)
    }

    /// Script `a * b`: apply `a`, then `b`
    pub fn compose(self, other: Rotation) -> Rotation {
        other.hamilton(self)
    }

    /// Script `a / b`: apply `a`, then the inverse of `b`
    pub fn compose_inverse(self, other: Rotation) -> Rotation {
        self.compose(other.conjugate())
    }

    pub fn add(self, other: Rotation) -> Rotation {
        Rotation::new(self.x + other.x, self.y + other.y, self.z + other.z, self.s + other.s)
    }

    pub fn sub(self, other: Rotation) -> Rotation {
        Rotation::new(self.x - other.x, self.y - other.y, self.z - other.z, self.s - other.s)
    }

    pub fn neg(self) -> Rotation {
        Rotation::new(-self.x, -self.y, -self.z, -self.s)
    }

    /// Component by index (x=0, y=1, z=2, s=3)
    pub fn component(&self, index: usize) -> Option<f64> {
        match index {
            0 => Some(self.x),
            1 => Some(self.y),
            2 => Some(self.z),
            3 => Some(self.s),
            _ => None,
        }
    }

    pub fn with_component(mut self, index: usize, value: f64) -> Option<Rotation> {
        match index {
            0 => self.x = value,
            1 => self.y = value,
            2 => self.z = value,
            3 => self.s = value,
            _ => return None,
        }
        Some(self)
    }

    /// Parse the `<x, y, z, s>` form
    pub fn parse(text: &str) -> Option<Rotation> {
        let parts = parse_components(text)?;
        match parts.as_slice() {
            [x, y, z, s] => Some(Rotation::new(*x, *y, *z, *s)),
            _ => None,
        }
    }
}

impl Default for Rotation {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{:.5}, {:.5}, {:.5}, {:.5}>", self.x, self.y, self.z, self.s)
    }
}

fn parse_components(text: &str) -> Option<Vec<f64>> {
    let inner = text.trim().strip_prefix('<')?.strip_suffix('>')?;
    inner
        .split(',')
        .map(|part| part.trim().parse::<f64>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_cross_and_dot() {
        let x = Vector::new(1.0, 0.0, 0.0);
        let y = Vector::new(0.0, 1.0, 0.0);
        assert_eq!(x.cross(y), Vector::new(0.0, 0.0, 1.0));
        assert_eq!(x.dot(y), 0.0);
        assert!(close(Vector::new(3.0, 4.0, 0.0).magnitude(), 5.0));
    }

    #[test]
    fn test_rotate_quarter_turn_about_z() {
        let half = std::f64::consts::FRAC_PI_4;
        let rot = Rotation::new(0.0, 0.0, half.sin(), half.cos());
        let v = Vector::new(1.0, 0.0, 0.0).rotate(rot);
        assert!(close(v.x, 0.0));
        assert!(close(v.y, 1.0));
        assert!(close(v.z, 0.0));
    }

    #[test]
    fn test_compose_then_inverse_is_identity() {
        let half = 0.3f64;
        let rot = Rotation::new(half.sin(), 0.0, 0.0, half.cos());
        let back = rot.compose_inverse(rot);
        assert!(close(back.s, 1.0));
        assert!(close(back.x, 0.0));
    }

    #[test]
    fn test_parse_and_display() {
        let v = Vector::parse("<1, 2.5, -3>").unwrap();
        assert_eq!(v, Vector::new(1.0, 2.5, -3.0));
        assert_eq!(v.to_string(), "<1.00000, 2.50000, -3.00000>");
        assert!(Vector::parse("<1, 2>").is_none());
        assert_eq!(Rotation::parse("<0,0,0,1>"), Some(Rotation::IDENTITY));
    }
}
