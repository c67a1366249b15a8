use std::collections::HashMap;

use serde::Deserialize;

/// One entry of `WEBHOOK_SECRETS_JSON`: either a bare secret string, or a
/// rotation record naming a `current` secret, any number of `previous`
/// secrets still accepted, and named `keys` a sender can select by id.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SecretEntry {
    Simple(String),
    Rotating {
        current: String,
        #[serde(default)]
        previous: Vec<String>,
        #[serde(default)]
        keys: HashMap<String, String>,
    },
}

/// Resolves a provider (and optional key id) to the ordered list of
/// secrets a signature is checked against.
///
/// Loaded once from `WEBHOOK_SECRETS_JSON` at startup; if unset or
/// unparsable, falls back to a built-in default map covering `stripe`,
/// `mercadopago`, and `test` so the service is usable out of the box in
/// development.
pub struct SecretRegistry {
    entries: HashMap<String, SecretEntry>,
}

impl SecretRegistry {
    pub fn from_env() -> Self {
        let entries = std::env::var("WEBHOOK_SECRETS_JSON")
            .ok()
            .and_then(|raw| serde_json::from_str::<HashMap<String, SecretEntry>>(&raw).ok())
            .unwrap_or_else(Self::defaults);
        Self { entries }
    }

    fn defaults() -> HashMap<String, SecretEntry> {
        let mut map = HashMap::new();
        map.insert(
            "stripe".to_string(),
            SecretEntry::Simple("whsec_dev_stripe_default".to_string()),
        );
        map.insert(
            "mercadopago".to_string(),
            SecretEntry::Simple("whsec_dev_mercadopago_default".to_string()),
        );
        map.insert("test".to_string(), SecretEntry::Simple("whsec_dev_test_default".to_string()));
        map
    }

    /// The ordered, deduplicated candidate secrets for `provider`. If
    /// `key_id` is given and names one of the provider's rotation `keys`,
    /// that secret is tried first; `current` follows, then each of
    /// `previous` in order. An unknown provider yields an empty list.
    pub fn candidates(&self, provider: &str, key_id: Option<&str>) -> Vec<String> {
        let mut ordered = Vec::new();
        match self.entries.get(provider) {
            Some(SecretEntry::Simple(secret)) => ordered.push(secret.clone()),
            Some(SecretEntry::Rotating { current, previous, keys }) => {
                if let Some(key_id) = key_id {
                    if let Some(keyed) = keys.get(key_id) {
                        ordered.push(keyed.clone());
                    }
                }
                ordered.push(current.clone());
                ordered.extend(previous.iter().cloned());
            }
            None => {}
        }

        let mut seen = std::collections::HashSet::new();
        ordered.retain(|secret| seen.insert(secret.clone()));
        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_from(json: &str) -> SecretRegistry {
        let entries: HashMap<String, SecretEntry> = serde_json::from_str(json).unwrap();
        SecretRegistry { entries }
    }

    #[test]
    fn simple_secret_yields_single_candidate() {
        let registry = registry_from(r#"{"stripe": "whsec_abc"}"#);
        assert_eq!(registry.candidates("stripe", None), vec!["whsec_abc"]);
    }

    #[test]
    fn unknown_provider_yields_no_candidates() {
        let registry = registry_from(r#"{"stripe": "whsec_abc"}"#);
        assert!(registry.candidates("unknown", None).is_empty());
    }

    #[test]
    fn rotation_without_key_id_tries_current_then_previous() {
        let registry = registry_from(
            r#"{"stripe": {"current": "whsec_new", "previous": ["whsec_old1", "whsec_old2"]}}"#,
        );
        assert_eq!(
            registry.candidates("stripe", None),
            vec!["whsec_new", "whsec_old1", "whsec_old2"]
        );
    }

    #[test]
    fn rotation_with_matching_key_id_is_tried_first() {
        let registry = registry_from(
            r#"{"stripe": {"current": "whsec_new", "previous": ["whsec_old"], "keys": {"k1": "whsec_keyed"}}}"#,
        );
        assert_eq!(
            registry.candidates("stripe", Some("k1")),
            vec!["whsec_keyed", "whsec_new", "whsec_old"]
        );
    }

    #[test]
    fn duplicate_candidates_are_deduplicated_preserving_order() {
        let registry = registry_from(
            r#"{"stripe": {"current": "whsec_same", "previous": ["whsec_same", "whsec_old"], "keys": {"k1": "whsec_same"}}}"#,
        );
        assert_eq!(
            registry.candidates("stripe", Some("k1")),
            vec!["whsec_same", "whsec_old"]
        );
    }

    #[test]
    fn unmatched_key_id_falls_back_to_current_and_previous() {
        let registry = registry_from(
            r#"{"stripe": {"current": "whsec_new", "previous": [], "keys": {"k1": "whsec_keyed"}}}"#,
        );
        assert_eq!(registry.candidates("stripe", Some("nope")), vec!["whsec_new"]);
    }
}
