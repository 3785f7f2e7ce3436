//! Flattening of SD-JWT disclosures into claim name/value pairs.
//!
//! The issuer-signed JWT is discarded without verification; its signature and the digests of
//! the disclosures are checked by the remote verifier, whose verdict is reported in the
//! verification status.

use base64::prelude::*;
use serde::Serialize;
use serde_json::{Map, Value as Json};
use tracing::{debug, warn};

/// One revealed `[salt, claimName, claimValue]` tuple.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Disclosure {
    pub salt: String,
    pub claim_name: String,
    pub claim_value: Json,
}

/// A disclosure segment that could not be decoded. Decoding continues past it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisclosureWarning {
    /// Position of the segment in the `~` separated serialization.
    pub index: usize,
    pub segment: String,
    pub reason: String,
}

impl std::fmt::Display for DisclosureWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unable to parse disclosure {} '{}': {}",
            self.index, self.segment, self.reason
        )
    }
}

/// The result of decoding an SD-JWT.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DecodedCredential {
    /// Named disclosures in serialization order.
    pub disclosures: Vec<Disclosure>,
    pub warnings: Vec<DisclosureWarning>,
}

impl DecodedCredential {
    /// Claim name to claim value.
    ///
    /// A repeated claim name keeps the value of its last disclosure; values are never merged.
    /// Object values are inserted as they were disclosed, without further flattening.
    pub fn claims(&self) -> Map<String, Json> {
        self.disclosures
            .iter()
            .map(|d| (d.claim_name.clone(), d.claim_value.clone()))
            .collect()
    }
}

/// Decode the disclosures of an SD-JWT compact serialization into a claim map.
pub fn decode(sd_jwt: &str) -> Map<String, Json> {
    decode_disclosures(sd_jwt).claims()
}

/// Decode every disclosure of an SD-JWT compact serialization.
///
/// The first segment (issuer-signed JWT) is skipped, as is the last one: either the key-binding
/// JWT or the empty segment after the final `~`. Segments that are not base64url encoded JSON
/// arrays are reported as warnings. Array element disclosures (`[salt, value]`) have no claim
/// name and are left out.
pub fn decode_disclosures(sd_jwt: &str) -> DecodedCredential {
    let mut segments: Vec<(usize, &str)> = sd_jwt.split('~').enumerate().skip(1).collect();
    if let Some((_, key_binding)) = segments.pop() {
        if !key_binding.is_empty() {
            debug!("skipping key-binding JWT");
        }
    }

    let mut decoded = DecodedCredential::default();
    for (index, segment) in segments {
        match parse_disclosure(segment) {
            Ok(Some(disclosure)) => decoded.disclosures.push(disclosure),
            Ok(None) => debug!(index, "skipping array element disclosure"),
            Err(reason) => {
                let warning = DisclosureWarning {
                    index,
                    segment: segment.to_owned(),
                    reason,
                };
                warn!("{warning}");
                decoded.warnings.push(warning);
            }
        }
    }
    decoded
}

fn parse_disclosure(segment: &str) -> Result<Option<Disclosure>, String> {
    let bytes = BASE64_URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| format!("not base64url: {e}"))?;
    let value: Json = serde_json::from_slice(&bytes).map_err(|e| format!("not JSON: {e}"))?;
    let Json::Array(mut parts) = value else {
        return Err("not a JSON array".to_owned());
    };

    match parts.len() {
        2 => Ok(None),
        3 => {
            let claim_value = parts.pop().unwrap_or_default();
            let (Some(Json::String(claim_name)), Some(Json::String(salt))) =
                (parts.pop(), parts.pop())
            else {
                return Err("salt and claim name must be strings".to_owned());
            };
            Ok(Some(Disclosure {
                salt,
                claim_name,
                claim_value,
            }))
        }
        n => Err(format!("expected 2 or 3 elements, found {n}")),
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    fn encode(value: Json) -> String {
        BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(&value).unwrap())
    }

    fn matti() -> String {
        format!(
            "header.payload.sig~{}~{}~",
            encode(json!(["abc123", "given_name", "Matti"])),
            encode(json!(["def456", "family_name", "Meikäläinen"])),
        )
    }

    #[test]
    fn decodes_with_key_binding_jwt() {
        let sd_jwt = format!("{}kb.jwt.sig", matti());
        assert_eq!(
            Json::Object(decode(&sd_jwt)),
            json!({"given_name": "Matti", "family_name": "Meikäläinen"})
        );
    }

    #[test]
    fn opaque_key_binding_segment_is_not_a_disclosure() {
        let sd_jwt = format!("{}kbjwt", matti());
        let decoded = decode_disclosures(&sd_jwt);
        assert!(decoded.warnings.is_empty(), "{:?}", decoded.warnings);
        assert_eq!(
            Json::Object(decoded.claims()),
            json!({"given_name": "Matti", "family_name": "Meikäläinen"})
        );
    }

    #[test]
    fn decodes_without_key_binding_jwt() {
        let decoded = decode_disclosures(&matti());
        assert!(decoded.warnings.is_empty());
        assert_eq!(decoded.disclosures.len(), 2);
        assert_eq!(decoded.disclosures[0].salt, "abc123");
    }

    #[test]
    fn malformed_segment_is_skipped() {
        let sd_jwt = format!(
            "jwt.x.y~{}~%%%~{}~{}~",
            encode(json!(["s1", "given_name", "Matti"])),
            encode(json!({"not": "an array"})),
            encode(json!(["s2", "birth_date", "1960-07-31"])),
        );
        let decoded = decode_disclosures(&sd_jwt);
        assert_eq!(
            Json::Object(decoded.claims()),
            json!({"given_name": "Matti", "birth_date": "1960-07-31"})
        );
        let indices: Vec<_> = decoded.warnings.iter().map(|w| w.index).collect();
        assert_eq!(indices, [2, 3]);
    }

    #[test]
    fn array_element_disclosures_are_left_out() {
        let sd_jwt = format!(
            "jwt.x.y~{}~{}~",
            encode(json!(["s1", "FI"])),
            encode(json!(["s2", "nationalities", [{"...": "digest"}]])),
        );
        let decoded = decode_disclosures(&sd_jwt);
        assert!(decoded.warnings.is_empty());
        assert_eq!(decoded.claims().len(), 1);
    }

    #[test]
    fn repeated_claim_name_keeps_last_value() {
        let sd_jwt = format!(
            "jwt.x.y~{}~{}~",
            encode(json!(["s1", "status", "temporary"])),
            encode(json!(["s2", "status", "permanent"])),
        );
        assert_eq!(decode(&sd_jwt)["status"], json!("permanent"));
    }

    #[test]
    fn nested_objects_are_kept_opaque() {
        let pension = json!({"typeCode": "KE", "startDate": "2024-02-01", "_sd": ["digest"]});
        let sd_jwt = format!("jwt.x.y~{}~", encode(json!(["s1", "Pension", pension])));
        assert_eq!(decode(&sd_jwt)["Pension"], pension);
    }

    #[test]
    fn padded_segments_are_accepted() {
        let padded = BASE64_URL_SAFE.encode(br#"["s","a","b"]"#);
        assert!(padded.ends_with('='));
        assert_eq!(decode(&format!("jwt.x.y~{padded}~"))["a"], json!("b"));
    }

    #[test]
    fn never_yields_more_claims_than_disclosure_segments() {
        for sd_jwt in ["", "jwt.x.y", "jwt.x.y~", "jwt.x.y~~", "~~~", "jwt.x.y~kb.x.y"] {
            let segments = sd_jwt.split('~').count().saturating_sub(1);
            assert!(decode(sd_jwt).len() <= segments, "{sd_jwt}");
        }
        assert!(decode("jwt.x.y~kb.x.y").is_empty());
    }
}
