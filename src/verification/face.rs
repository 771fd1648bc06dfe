use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A face embedding computed by the client.
///
/// Arrives either as a JSON array or as an index-keyed object
/// (`{"0": 0.12, "1": -0.03, ...}`), which is what a serialized typed
/// array looks like. Object entries are ordered by their numeric key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FaceDescriptor(pub Vec<f64>);

impl FaceDescriptor {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.0
    }
}

impl From<Vec<f64>> for FaceDescriptor {
    fn from(values: Vec<f64>) -> Self {
        FaceDescriptor(values)
    }
}

impl<'de> Deserialize<'de> for FaceDescriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DescriptorVisitor;

        impl<'de> Visitor<'de> for DescriptorVisitor {
            type Value = FaceDescriptor;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an array of numbers or an object keyed by index")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut values = Vec::with_capacity(seq.size_hint().unwrap_or(128));
                while let Some(v) = seq.next_element::<f64>()? {
                    values.push(finite(v)?);
                }
                Ok(FaceDescriptor(values))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries: Vec<(usize, f64)> = Vec::with_capacity(map.size_hint().unwrap_or(128));
                while let Some((key, v)) = map.next_entry::<String, f64>()? {
                    let index = key
                        .parse::<usize>()
                        .map_err(|_| de::Error::custom(format!("non-numeric descriptor key '{}'", key)))?;
                    entries.push((index, finite(v)?));
                }
                entries.sort_by_key(|(i, _)| *i);
                Ok(FaceDescriptor(entries.into_iter().map(|(_, v)| v).collect()))
            }
        }

        deserializer.deserialize_any(DescriptorVisitor)
    }
}

fn finite<E: de::Error>(v: f64) -> Result<f64, E> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(E::custom("descriptor values must be finite"))
    }
}

/// Euclidean distance; infinite when the inputs cannot be compared.
pub fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return f64::INFINITY;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceMatch {
    pub distance: f64,
    pub matched: bool,
}

pub fn verify(candidate: &[f64], reference: &[f64], threshold: f64) -> FaceMatch {
    let distance = euclidean_distance(candidate, reference);
    FaceMatch {
        distance,
        matched: distance <= threshold,
    }
}

/// Closest other face strictly under `threshold`.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateMatch<K> {
    pub key: K,
    pub distance: f64,
}

pub fn find_duplicate<'a, K, I>(candidate: &[f64], others: I, threshold: f64) -> Option<DuplicateMatch<K>>
where
    K: Clone + 'a,
    I: IntoIterator<Item = (K, &'a [f64])>,
{
    others
        .into_iter()
        .map(|(key, face)| (key, euclidean_distance(candidate, face)))
        .filter(|(_, d)| *d < threshold)
        .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(key, distance)| DuplicateMatch { key, distance })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_of_known_vectors() {
        assert!((euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-12);
        assert_eq!(euclidean_distance(&[1.0], &[1.0, 2.0]), f64::INFINITY);
        assert_eq!(euclidean_distance(&[], &[]), f64::INFINITY);
    }

    #[test]
    fn verify_is_inclusive_at_threshold() {
        let m = verify(&[0.0, 0.0], &[0.6, 0.0], 0.6);
        assert!(m.matched);
        assert!(!verify(&[0.0, 0.0], &[0.61, 0.0], 0.6).matched);
        assert!(!verify(&[0.0], &[0.0, 0.0], 0.6).matched);
    }

    #[test]
    fn deserializes_array_and_indexed_object() {
        let from_array: FaceDescriptor = serde_json::from_str("[0.1, 0.2, 0.3]").unwrap();
        let from_object: FaceDescriptor =
            serde_json::from_str(r#"{"2": 0.3, "0": 0.1, "10": 0.9, "1": 0.2}"#).unwrap();
        assert_eq!(from_array.as_slice(), &[0.1, 0.2, 0.3]);
        assert_eq!(from_object.as_slice(), &[0.1, 0.2, 0.3, 0.9]);
    }

    #[test]
    fn rejects_bad_descriptors() {
        assert!(serde_json::from_str::<FaceDescriptor>(r#"{"a": 0.1}"#).is_err());
        assert!(serde_json::from_str::<FaceDescriptor>(r#""0.1,0.2""#).is_err());
    }

    #[test]
    fn duplicate_picks_closest_under_threshold() {
        let mine = [0.0, 0.0];
        let far = [1.0, 1.0];
        let near = [0.1, 0.0];
        let nearer = [0.05, 0.0];
        let others = vec![("far", &far[..]), ("near", &near[..]), ("nearer", &nearer[..])];
        let dup = find_duplicate(&mine, others, 0.4).unwrap();
        assert_eq!(dup.key, "nearer");

        let none = find_duplicate(&mine, vec![("far", &far[..])], 0.4);
        assert!(none.is_none());
    }
}
