//! Credential vault tests

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::json;

use fleetd::errors::FleetError;
use fleetd::vault::CredentialVault;

use crate::support::agent_with;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct OAuthToken {
    access_token: String,
    refresh_token: String,
    expires_at: i64,
}

fn vault() -> CredentialVault {
    CredentialVault::new(&SecretString::from("correct horse battery staple".to_string()))
}

#[test]
fn test_store_and_get_typed_credential() {
    let vault = vault();
    let token = OAuthToken {
        access_token: "rnd_abc123".to_string(),
        refresh_token: "rnd_refresh".to_string(),
        expires_at: 1_700_000_000,
    };

    vault.store("render", &token).unwrap();
    let loaded: OAuthToken = vault.get("render").unwrap();
    assert_eq!(loaded, token);
}

#[test]
fn test_sealed_entry_hides_plaintext() {
    let vault = vault();
    vault.store("railway", &json!({"token": "super-secret-value"})).unwrap();

    let sealed = vault.sealed_entry("railway").unwrap();
    assert!(!sealed.contains("super-secret-value"));
    assert_eq!(vault.get_value("railway").unwrap()["token"], "super-secret-value");
}

#[test]
fn test_missing_provider_is_not_found() {
    let vault = vault();
    let err = vault.get_value("vercel").unwrap_err();
    assert!(matches!(err, FleetError::NotFound(_)));
    assert!(!vault.contains("vercel"));
}

#[test]
fn test_store_replaces_previous_entry() {
    let vault = vault();
    vault.store("flyio", &json!({"token": "old"})).unwrap();
    vault.store("flyio", &json!({"token": "new"})).unwrap();
    vault.store("netlify", &json!({"token": "n"})).unwrap();

    assert_eq!(vault.get_value("flyio").unwrap()["token"], "new");
    assert_eq!(vault.providers(), vec!["flyio".to_string(), "netlify".to_string()]);
}

#[test]
fn test_wrong_shape_is_decryption_error() {
    let vault = vault();
    vault.store("render", &json!(["not", "a", "token"])).unwrap();

    let result: Result<OAuthToken, _> = vault.get("render");
    assert!(matches!(result, Err(FleetError::DecryptionFailed(_))));
}

#[test]
fn test_agent_delegates_to_vault() {
    let agent = agent_with(None);
    agent
        .store_credential("render", &json!({"apiKey": "rnd_key"}))
        .unwrap();

    let value: serde_json::Value = agent.get_credential("render").unwrap();
    assert_eq!(value["apiKey"], "rnd_key");

    let missing: Result<serde_json::Value, _> = agent.get_credential("railway");
    assert!(missing.unwrap_err().is_not_found());
}

#[test]
fn test_same_secret_reads_after_restart() {
    let secret = SecretString::from("agent-master-secret".to_string());
    let before = CredentialVault::new(&secret);
    before.store("github", &json!({"token": "abc"})).unwrap();
    let sealed = before.sealed_entry("github").unwrap();

    let after = CredentialVault::new(&secret);
    after.restore_entry("github", sealed);
    assert_eq!(after.get_value("github").unwrap(), json!({"token": "abc"}));
}

#[test]
fn test_different_secrets_do_not_share_keys() {
    let a = CredentialVault::new(&SecretString::from("secret-a".to_string()));
    let b = CredentialVault::new(&SecretString::from("secret-b".to_string()));
    a.store("github", &json!({"token": "abc"})).unwrap();
    b.store("github", &json!({"token": "abc"})).unwrap();

    let sealed_a = a.sealed_entry("github").unwrap();
    assert_ne!(sealed_a, b.sealed_entry("github").unwrap());

    b.restore_entry("github", sealed_a);
    assert!(matches!(
        b.get_value("github"),
        Err(FleetError::DecryptionFailed(_))
    ));
}
