use std::env;

use qbank_core::ProviderConfig;

use crate::error::AdapterError;

/// Reads the profile's API key from the environment, trying `api_key_env`
/// first and then `fallback_api_key_env`.
pub fn resolve_api_key(profile_name: &str, profile: &ProviderConfig) -> Result<String, AdapterError> {
    resolve_api_key_with(profile_name, profile, |name| env::var(name).ok())
}

pub fn resolve_api_key_with<F>(
    profile_name: &str,
    profile: &ProviderConfig,
    lookup: F,
) -> Result<String, AdapterError>
where
    F: Fn(&str) -> Option<String>,
{
    let candidates: Vec<&str> = std::iter::once(profile.api_key_env.as_str())
        .chain(profile.fallback_api_key_env.as_deref())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect();

    if candidates.is_empty() {
        return Err(AdapterError::InvalidConfig(format!(
            "provider `{profile_name}` does not name an API key variable"
        )));
    }

    candidates
        .iter()
        .filter_map(|name| lookup(name))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .ok_or_else(|| AdapterError::MissingCredential {
            provider: profile_name.to_string(),
            vars: candidates.join(" or "),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn primary_variable_wins() {
        let key = resolve_api_key_with(
            "gemini",
            &ProviderConfig::gemini(),
            lookup(&[("GEMINI_API_KEY", "primary"), ("VITE_GEMINI_API_KEY", "fallback")]),
        )
        .unwrap();
        assert_eq!(key, "primary");
    }

    #[test]
    fn falls_back_when_primary_missing_or_blank() {
        let key = resolve_api_key_with(
            "claude",
            &ProviderConfig::claude(),
            lookup(&[("CLAUDE_API_KEY", "  "), ("VITE_CLAUDE_API_KEY", "fallback")]),
        )
        .unwrap();
        assert_eq!(key, "fallback");
    }

    #[test]
    fn missing_key_names_both_variables() {
        let err = resolve_api_key_with("gemini", &ProviderConfig::gemini(), lookup(&[]))
            .expect_err("no key");
        match err {
            AdapterError::MissingCredential { provider, vars } => {
                assert_eq!(provider, "gemini");
                assert_eq!(vars, "GEMINI_API_KEY or VITE_GEMINI_API_KEY");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn profile_without_variables_is_invalid() {
        let err = resolve_api_key_with("custom", &ProviderConfig::default(), lookup(&[]))
            .expect_err("no variable");
        assert!(matches!(err, AdapterError::InvalidConfig(_)));
    }
}
