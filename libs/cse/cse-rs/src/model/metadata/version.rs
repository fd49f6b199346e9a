use serde_json::Value;

/// The three wire generations of folder metadata. Ordered: upgrades only
/// ever move forward, a folder is never rewritten at an older version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetadataVersion {
    V1,
    V1_2,
    V2_0,
}

impl MetadataVersion {
    pub fn as_wire(&self) -> &'static str {
        match self {
            MetadataVersion::V1 => "1.0",
            MetadataVersion::V1_2 => "1.2",
            MetadataVersion::V2_0 => "2.0",
        }
    }

    /// Maps the server's advertised E2EE capability to the newest metadata
    /// version this client will produce against it.
    pub fn latest_supported(capability: f64) -> Option<MetadataVersion> {
        if capability >= 2.0 {
            Some(MetadataVersion::V2_0)
        } else if capability >= 1.2 {
            Some(MetadataVersion::V1_2)
        } else if capability >= 1.0 {
            Some(MetadataVersion::V1)
        } else {
            None
        }
    }

    /// Historical clients wrote the version as a string or a number, inside
    /// the metadata block or at the document level. Accept all of it.
    pub fn from_value(value: &Value) -> Option<MetadataVersion> {
        match value {
            Value::String(s) => match s.as_str() {
                "1" | "1.0" => Some(MetadataVersion::V1),
                "1.2" => Some(MetadataVersion::V1_2),
                "2" | "2.0" => Some(MetadataVersion::V2_0),
                _ => None,
            },
            Value::Number(n) => {
                let n = n.as_f64()?;
                if (n - 1.0).abs() < f64::EPSILON {
                    Some(MetadataVersion::V1)
                } else if (n - 1.2).abs() < f64::EPSILON {
                    Some(MetadataVersion::V1_2)
                } else if (n - 2.0).abs() < f64::EPSILON {
                    Some(MetadataVersion::V2_0)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub fn sniff(document: &Value) -> Option<MetadataVersion> {
        if let Some(version) = document
            .get("metadata")
            .and_then(|metadata| metadata.get("version"))
            .and_then(MetadataVersion::from_value)
        {
            return Some(version);
        }
        document.get("version").and_then(MetadataVersion::from_value)
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_latest_supported() {
        assert_eq!(MetadataVersion::latest_supported(2.0), Some(MetadataVersion::V2_0));
        assert_eq!(MetadataVersion::latest_supported(1.2), Some(MetadataVersion::V1_2));
        assert_eq!(MetadataVersion::latest_supported(1.0), Some(MetadataVersion::V1));
        assert_eq!(MetadataVersion::latest_supported(0.0), None);
    }

    #[test]
    fn test_sniff_both_shapes_and_types() {
        let nested = json!({ "metadata": { "version": "1.2" } });
        assert_eq!(MetadataVersion::sniff(&nested), Some(MetadataVersion::V1_2));

        let top_level = json!({ "version": 2.0 });
        assert_eq!(MetadataVersion::sniff(&top_level), Some(MetadataVersion::V2_0));

        let integer = json!({ "version": "2" });
        assert_eq!(MetadataVersion::sniff(&integer), Some(MetadataVersion::V2_0));

        let unknown = json!({ "version": "3.0" });
        assert_eq!(MetadataVersion::sniff(&unknown), None);
    }

    #[test]
    fn test_forward_only_ordering() {
        assert!(MetadataVersion::V1 < MetadataVersion::V1_2);
        assert!(MetadataVersion::V1_2 < MetadataVersion::V2_0);
    }
}
