//! Claim Resolver
//!
//! Pure helpers reading class, selector, override and capacity information
//! out of a claim.

use crate::error::{Error, Result};
use crate::plugin::protocol::VolumeOptions;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Legacy annotation naming the claim's class; wins over the spec field
pub const BETA_STORAGE_CLASS_ANNOTATION: &str = "volume.beta.kubernetes.io/storage-class";

/// Resource name of the requested capacity
pub const STORAGE_RESOURCE: &str = "storage";

/// Class name a claim refers to, or an empty string
pub fn class_name(claim: &PersistentVolumeClaim) -> String {
    if let Some(name) = claim
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(BETA_STORAGE_CLASS_ANNOTATION))
    {
        return name.clone();
    }
    claim
        .spec
        .as_ref()
        .and_then(|s| s.storage_class_name.clone())
        .unwrap_or_default()
}

/// Label selector of the claim; "no selector" and "empty selector" coincide
pub fn match_labels(claim: &PersistentVolumeClaim) -> BTreeMap<String, String> {
    claim
        .spec
        .as_ref()
        .and_then(|s| s.selector.as_ref())
        .and_then(|s| s.match_labels.clone())
        .unwrap_or_default()
}

/// Replace option values with matching claim annotations.
///
/// An annotation matches an override key when its lowercased key starts with
/// `prefix` followed by the lowercased override key. Values are copied as-is.
pub fn override_options(
    prefix: &str,
    claim: &PersistentVolumeClaim,
    overrides: &[String],
    mut options: VolumeOptions,
) -> VolumeOptions {
    let annotations = match claim.metadata.annotations.as_ref() {
        Some(annotations) => annotations,
        None => return options,
    };

    for key in overrides {
        let wanted = format!("{}{}", prefix, key.to_lowercase());
        for (annotation, value) in annotations {
            if !annotation.to_lowercase().starts_with(&wanted) {
                continue;
            }
            if let Some(previous) = options.get(key) {
                info!(
                    "Option {} exists with value {}, overriding with claim annotation {}",
                    key, previous, value
                );
            }
            debug!("Adding option {}={} from annotation {}", key, value, annotation);
            options.insert(key.clone(), serde_json::Value::String(value.clone()));
        }
    }
    options
}

/// Requested storage in bytes, if the claim asks for any
pub fn requested_bytes(claim: &PersistentVolumeClaim) -> Result<Option<u64>> {
    let quantity = claim
        .spec
        .as_ref()
        .and_then(|s| s.resources.as_ref())
        .and_then(|r| r.requests.as_ref())
        .and_then(|r| r.get(STORAGE_RESOURCE));

    quantity.map(|q| parse_quantity(&q.0)).transpose()
}

/// Parse a resource quantity such as `10Gi`, `500M`, `1.5Ti`, `1e9` or
/// `500m` into bytes. Fractions of a byte round up.
pub fn parse_quantity(quantity: &str) -> Result<u64> {
    let quantity = quantity.trim();
    let invalid = || Error::CapacityParse(format!("invalid quantity {:?}", quantity));
    let split = quantity
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(quantity.len());
    let (number, suffix) = quantity.split_at(split);
    if number.is_empty() {
        return Err(invalid());
    }

    if let Some(exponent) = decimal_exponent(suffix) {
        let mantissa: f64 = number.parse().map_err(|_| invalid())?;
        return Ok((mantissa * 10f64.powi(exponent)).ceil() as u64);
    }
    if suffix == "m" {
        let millis: f64 = number.parse().map_err(|_| invalid())?;
        return Ok((millis / 1000.0).ceil() as u64);
    }

    let multiplier: u64 = match suffix {
        "" => 1,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        "Pi" => 1 << 50,
        "Ei" => 1 << 60,
        "k" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "P" => 1_000_000_000_000_000,
        "E" => 1_000_000_000_000_000_000,
        other => {
            return Err(Error::CapacityParse(format!(
                "unsupported suffix {:?} in {:?}",
                other, quantity
            )))
        }
    };

    if let Ok(whole) = number.parse::<u64>() {
        return whole
            .checked_mul(multiplier)
            .ok_or_else(|| Error::CapacityParse(format!("{:?} overflows", quantity)));
    }

    let fractional: f64 = number.parse().map_err(|_| invalid())?;
    Ok((fractional * multiplier as f64).ceil() as u64)
}

/// Exponent of a decimal exponent suffix (`e3`, `E+6`, `e-2`); a bare `E`
/// is the exa suffix
fn decimal_exponent(suffix: &str) -> Option<i32> {
    let digits = suffix
        .strip_prefix('e')
        .or_else(|| suffix.strip_prefix('E'))?;
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use assert_matches::assert_matches;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
    use serde_json::json;

    fn annotate(claim: &mut PersistentVolumeClaim, pairs: &[(&str, &str)]) {
        let annotations = claim.metadata.annotations.get_or_insert_with(BTreeMap::new);
        for (k, v) in pairs {
            annotations.insert(k.to_string(), v.to_string());
        }
    }

    #[test]
    fn test_class_name_annotation_wins() {
        let mut claim = testing::claim_of_class("ns", "c1", "u1", "Pending", "structured");
        annotate(&mut claim, &[(BETA_STORAGE_CLASS_ANNOTATION, "legacy")]);
        assert_eq!(class_name(&claim), "legacy");

        // present but empty still wins
        annotate(&mut claim, &[(BETA_STORAGE_CLASS_ANNOTATION, "")]);
        assert_eq!(class_name(&claim), "");
    }

    #[test]
    fn test_class_name_falls_back_to_spec() {
        let claim = testing::claim_of_class("ns", "c1", "u1", "Pending", "structured");
        assert_eq!(class_name(&claim), "structured");

        let claim = testing::claim("ns", "c1", "u1", "Pending");
        assert_eq!(class_name(&claim), "");
    }

    #[test]
    fn test_match_labels() {
        let mut claim = testing::claim("ns", "c1", "u1", "Pending");
        assert!(match_labels(&claim).is_empty());

        let spec = claim.spec.as_mut().unwrap();
        spec.selector = Some(LabelSelector::default());
        assert!(match_labels(&claim).is_empty());

        let spec = claim.spec.as_mut().unwrap();
        spec.selector = Some(LabelSelector {
            match_labels: Some(BTreeMap::from([("tier".to_string(), "gold".to_string())])),
            ..Default::default()
        });
        assert_eq!(match_labels(&claim)["tier"], "gold");
    }

    #[test]
    fn test_override_replaces_value() {
        let mut claim = testing::claim("ns", "c1", "u1", "Pending");
        annotate(&mut claim, &[("p.a", "2")]);
        let base = VolumeOptions::from([("a".to_string(), json!("1"))]);

        let merged = override_options("p.", &claim, &["a".to_string()], base);
        assert_eq!(merged, VolumeOptions::from([("a".to_string(), json!("2"))]));
    }

    #[test]
    fn test_override_is_case_insensitive_on_keys() {
        let mut claim = testing::claim("ns", "c1", "u1", "Pending");
        annotate(&mut claim, &[("p.Description", "Mixed Case Value")]);

        let merged = override_options(
            "p.",
            &claim,
            &["DESCRIPTION".to_string()],
            VolumeOptions::new(),
        );
        assert_eq!(merged["DESCRIPTION"], json!("Mixed Case Value"));
    }

    #[test]
    fn test_unrelated_annotation_leaves_options() {
        let mut claim = testing::claim("ns", "c1", "u1", "Pending");
        annotate(&mut claim, &[("other.a", "2"), ("p.b", "3")]);
        let base = VolumeOptions::from([("a".to_string(), json!("1"))]);

        let merged = override_options("p.", &claim, &["a".to_string()], base.clone());
        assert_eq!(merged, base);
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("10Gi").unwrap(), 10u64 << 30);
        assert_eq!(parse_quantity("500M").unwrap(), 500_000_000);
        assert_eq!(parse_quantity("1024").unwrap(), 1024);
        assert_eq!(parse_quantity("1.5Gi").unwrap(), 3u64 << 29);
        assert_matches!(parse_quantity("10Zi"), Err(Error::CapacityParse(_)));
        assert_matches!(parse_quantity("abc"), Err(Error::CapacityParse(_)));
    }

    #[test]
    fn test_parse_quantity_exponent_and_milli_forms() {
        assert_eq!(parse_quantity("1e9").unwrap(), 1_000_000_000);
        assert_eq!(parse_quantity("1E3").unwrap(), 1_000);
        assert_eq!(parse_quantity("2.5e+2").unwrap(), 250);
        assert_eq!(parse_quantity("2E").unwrap(), 2_000_000_000_000_000_000);
        assert_eq!(parse_quantity("1500m").unwrap(), 2);
        assert_eq!(parse_quantity("500m").unwrap(), 1);
        assert_matches!(parse_quantity("1e"), Err(Error::CapacityParse(_)));
    }

    #[test]
    fn test_requested_bytes() {
        let claim = testing::claim("ns", "c1", "u1", "Pending");
        assert_eq!(requested_bytes(&claim).unwrap(), Some(10u64 << 30));

        let mut claim = claim;
        claim.spec.as_mut().unwrap().resources = None;
        assert_eq!(requested_bytes(&claim).unwrap(), None);
    }
}
