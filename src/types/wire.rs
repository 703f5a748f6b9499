//! serde adapters for the streaming wire format
//!
//! Vectors go out as `{"x","y","z"}`, quaternions as `{"scalar","x","y","z"}`, and
//! coordinates as a decimal string with a trailing hemisphere letter (`"37.343605N"`).

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::math::{Quaternion, Vector3};

pub mod vec3 {
    use super::*;

    #[derive(Serialize, Deserialize)]
    struct Xyz {
        x: f64,
        y: f64,
        z: f64,
    }

    pub fn serialize<S: Serializer>(v: &Vector3, serializer: S) -> Result<S::Ok, S::Error> {
        Xyz {
            x: v.x,
            y: v.y,
            z: v.z,
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vector3, D::Error> {
        let xyz = Xyz::deserialize(deserializer)?;
        Ok(Vector3::new(xyz.x, xyz.y, xyz.z))
    }
}

pub mod quat {
    use super::*;

    #[derive(Serialize, Deserialize)]
    struct ScalarXyz {
        scalar: f64,
        x: f64,
        y: f64,
        z: f64,
    }

    pub fn serialize<S: Serializer>(q: &Quaternion, serializer: S) -> Result<S::Ok, S::Error> {
        ScalarXyz {
            scalar: q.w,
            x: q.i,
            y: q.j,
            z: q.k,
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Quaternion, D::Error> {
        let q = ScalarXyz::deserialize(deserializer)?;
        Ok(Quaternion::new(q.scalar, q.x, q.y, q.z))
    }
}

/// `37.343605` + `'N'` -> `"37.343605N"`
pub fn format_coordinate(degrees: f64, hemisphere: char) -> String {
    format!("{:.6}{}", degrees, hemisphere)
}

/// Splits `"122.011241W"` into `(122.011241, 'W')`.
pub fn parse_coordinate(raw: &str) -> Option<(f64, char)> {
    let hemisphere = raw.chars().last()?;
    if !matches!(hemisphere, 'N' | 'S' | 'E' | 'W') {
        return None;
    }
    let number = &raw[..raw.len() - hemisphere.len_utf8()];
    let degrees = number.trim().parse::<f64>().ok()?;
    Some((degrees, hemisphere))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Holder {
        #[serde(with = "vec3")]
        v: Vector3,
        #[serde(with = "quat")]
        q: Quaternion,
    }

    #[test]
    fn test_nested_objects() {
        let h = Holder {
            v: Vector3::new(1.0, 2.0, 3.0),
            q: Quaternion::new(1.0, 0.0, 0.0, 0.0),
        };
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(
            json,
            r#"{"v":{"x":1.0,"y":2.0,"z":3.0},"q":{"scalar":1.0,"x":0.0,"y":0.0,"z":0.0}}"#
        );
        let back: Holder = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn test_coordinate_format() {
        assert_eq!(format_coordinate(37.25, 'N'), "37.250000N");
        assert_eq!(parse_coordinate("122.011241W"), Some((122.011241, 'W')));
    }

    #[test]
    fn test_coordinate_rejects_garbage() {
        assert_eq!(parse_coordinate(""), None);
        assert_eq!(parse_coordinate("12.5"), None);
        assert_eq!(parse_coordinate("abcN"), None);
    }
}
