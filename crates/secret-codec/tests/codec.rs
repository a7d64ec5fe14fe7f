//! End-to-end behaviour of the codec against key files on disk.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use secret_codec::crypto::KeyRecord;
use secret_codec::{
    envelope, generate_symmetric, Algorithm, CodecError, Key, KeyProvider, KeyStore, SecretCodec,
    SymmetricKey,
};

// Key 00..1f, IV a0..af. Golden values from:
//   echo -n hunter2 | openssl enc -aes-256-cbc -K 0001..1f -iv a0a1..af -base64
const KEY_B64: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=";
const REVERSED_KEY_B64: &str = "Hx4dHBsaGRgXFhUUExIREA8ODQwLCgkIBwYFBAMCAQA=";
const IV_B64: &str = "oKGio6SlpqeoqaqrrK2urw==";
const HUNTER2: &str = "v2:{Hu7wVV5Na5ZHiFiOcBBnlg==}";

const SAMPLES: &[&str] = &[
    "",
    "a",
    "hunter2",
    "exactly sixteen!",
    "p@ss w0rd with spaces and }{ braces",
    "v2 looks like a prefix",
    "ünïcödé ✓ 密码",
    "line one\nline two",
];

fn write_key_file(dir: &Path, key_b64: &str, iv_b64: Option<&str>) {
    let mut yaml = format!("---\nalgorithm: aes-256-cbc\nkey: {key_b64}\n");
    if let Some(iv) = iv_b64 {
        yaml.push_str(&format!("iv: {iv}\n"));
    }
    fs::write(dir.join("v2_key"), yaml).unwrap();
}

fn fixed_codec() -> (tempfile::TempDir, SecretCodec<KeyStore>) {
    let dir = tempfile::tempdir().unwrap();
    write_key_file(dir.path(), KEY_B64, Some(IV_B64));
    let codec = SecretCodec::new(KeyStore::at_root(dir.path()));
    (dir, codec)
}

fn fixed_key(key_b64: &str) -> Key {
    Key::from_record(&KeyRecord {
        algorithm: "aes-256-cbc".into(),
        key: key_b64.into(),
        iv: Some(IV_B64.into()),
    })
    .unwrap()
}

#[test]
fn golden_envelope_for_fixed_key() {
    let (_dir, codec) = fixed_codec();
    assert_eq!(codec.encrypt("hunter2").unwrap(), HUNTER2);
    assert_eq!(codec.decrypt(HUNTER2).unwrap(), "hunter2");
}

#[test]
fn legacy_symbol_key_file_decrypts_golden_envelope() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("v2_key"),
        format!("---\n:algorithm: aes-256-cbc\n:key: {KEY_B64}\n:iv: {IV_B64}\n"),
    )
    .unwrap();
    let codec = SecretCodec::new(KeyStore::at_root(dir.path()));
    assert_eq!(codec.decrypt(HUNTER2).unwrap(), "hunter2");
}

#[test]
fn round_trip_and_detection_for_samples() {
    let (_dir, codec) = fixed_codec();
    for &s in SAMPLES {
        let enc = codec.encrypt(s).unwrap();
        assert!(codec.is_encrypted(&enc), "{s:?} should be detected as encrypted");
        assert!(!enc.contains('\n'));
        assert_eq!(codec.decrypt(&enc).unwrap(), s);
        if !s.is_empty() {
            assert!(!codec.is_encrypted(s));
        }
    }
}

#[test]
fn empty_and_absent_values() {
    let (_dir, codec) = fixed_codec();
    assert_eq!(codec.encrypt("").unwrap(), "v2:{}");
    assert_eq!(codec.decrypt("v2:{}").unwrap(), "");
    assert_eq!(codec.decrypt("").unwrap(), "");
    assert_eq!(codec.encrypt_opt(None).unwrap(), None);
    assert_eq!(codec.decrypt_opt(None).unwrap(), None);
    assert_eq!(
        codec.decrypt_opt(Some(HUNTER2)).unwrap().as_deref(),
        Some("hunter2")
    );
}

#[test]
fn try_helpers_are_idempotent() {
    let (_dir, codec) = fixed_codec();
    for &s in SAMPLES {
        let once = codec.try_encrypt(s).unwrap();
        assert_eq!(codec.try_encrypt(&once).unwrap(), once);
        assert_eq!(codec.try_decrypt(&once).unwrap(), s);
        if !envelope::is_encrypted(s) {
            assert_eq!(codec.try_decrypt(s).unwrap(), s);
        }
    }
}

#[test]
fn plaintext_decrypt_is_not_encrypted() {
    let (_dir, codec) = fixed_codec();
    for bad in ["hunter2", "v2:{unterminated", "prefix v2:{abc}"] {
        assert!(matches!(codec.decrypt(bad), Err(CodecError::NotEncrypted)));
    }
}

#[test]
fn corrupted_payload_is_decryption_failed() {
    let (_dir, codec) = fixed_codec();
    // Last ciphertext byte altered; fails PKCS#7 unpadding (checked with openssl).
    let corrupted = "v2:{Hu7wVV5Na5ZHiFiOcBBnlA==}";
    let truncated = "v2:{Hu7wVV5Na5ZHiFiO}";
    for bad in [corrupted, truncated, "v2:{%%%}"] {
        let err = codec.decrypt(bad).unwrap_err();
        assert!(matches!(err, CodecError::DecryptionFailed), "{bad}: {err}");
        assert!(!err.is_caller_error());
    }
}

#[test]
fn wrong_key_is_decryption_failed() {
    let dir = tempfile::tempdir().unwrap();
    write_key_file(dir.path(), REVERSED_KEY_B64, Some(IV_B64));
    let codec = SecretCodec::new(KeyStore::at_root(dir.path()));
    assert!(matches!(
        codec.decrypt(HUNTER2),
        Err(CodecError::DecryptionFailed)
    ));
}

#[test]
fn legacy_templated_value_decrypts() {
    let (_dir, codec) = fixed_codec();
    let single = format!("<%= MiqPassword.decrypt('{HUNTER2}') %>");
    let double = format!("<%= ManageIQ::Password.decrypt(\"{HUNTER2}\") %>");
    for legacy in [&single, &double] {
        assert!(codec.is_encrypted(legacy));
        assert_eq!(codec.decrypt(legacy).unwrap(), "hunter2");
        assert_eq!(codec.try_decrypt(legacy).unwrap(), "hunter2");
    }
}

#[test]
fn recrypt_moves_value_from_key_a_to_key_b() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    write_key_file(dir_a.path(), KEY_B64, Some(IV_B64));
    write_key_file(dir_b.path(), REVERSED_KEY_B64, Some(IV_B64));

    let store = KeyStore::at_root(dir_a.path());
    let codec = SecretCodec::new(store.clone());
    let under_a = codec.encrypt("rotate me").unwrap();
    let key_a = store.current_key().unwrap();

    store.set_key_root(dir_b.path());
    let under_b = codec.recrypt(&under_a, Some(key_a.as_ref())).unwrap();
    assert_eq!(under_b, "v2:{9GGco91yYf4YcfTCelzAJg==}");
    assert_eq!(codec.decrypt(&under_b).unwrap(), "rotate me");
    assert!(codec.decrypt_with(&under_b, key_a.as_ref()).is_err());

    let key_b = fixed_key(REVERSED_KEY_B64);
    assert_eq!(codec.decrypt_with(&under_b, &key_b).unwrap(), "rotate me");
}

#[test]
fn recrypt_falls_back_when_prior_key_does_not_fit() {
    let (_dir, codec) = fixed_codec();
    let unrelated = fixed_key(REVERSED_KEY_B64);
    assert_eq!(codec.recrypt(HUNTER2, Some(&unrelated)).unwrap(), HUNTER2);
    assert_eq!(codec.recrypt_opt(None, Some(&unrelated)).unwrap(), None);
}

#[test]
fn sanitize_masks_without_a_key() {
    let dir = tempfile::tempdir().unwrap();
    let codec = SecretCodec::new(KeyStore::at_root(dir.path()));
    assert_eq!(
        codec.sanitize("prefix v2:{abc==} suffix"),
        "prefix ******** suffix"
    );
    assert_eq!(
        codec.sanitize(&format!("a={HUNTER2} b={HUNTER2} c=v2%3A%7BHu7wVV5Na5ZHiFiOcBBnlg%3D%3D%7D")),
        "a=******** b=******** c=********"
    );
}

#[test]
fn missing_key_file_fails_only_when_key_needed() {
    let dir = tempfile::tempdir().unwrap();
    let codec = SecretCodec::new(KeyStore::at_root(dir.path()));

    assert_eq!(codec.encrypt("").unwrap(), "v2:{}");
    assert!(matches!(codec.decrypt("plain"), Err(CodecError::NotEncrypted)));
    assert!(matches!(
        codec.encrypt("hunter2"),
        Err(CodecError::KeyUnavailable(_))
    ));
    assert!(matches!(
        codec.decrypt(HUNTER2),
        Err(CodecError::KeyUnavailable(_))
    ));
}

#[test]
fn key_generated_after_startup_is_used() {
    let dir = tempfile::tempdir().unwrap();
    let codec = SecretCodec::new(KeyStore::at_root(dir.path()));
    assert!(matches!(
        codec.encrypt("x"),
        Err(CodecError::KeyUnavailable(_))
    ));

    generate_symmetric(Algorithm::Aes256Cbc, Some(dir.path().join("v2_key").as_path())).unwrap();
    let enc = codec.encrypt("x").unwrap();
    assert_eq!(codec.decrypt(&enc).unwrap(), "x");
}

#[test]
fn generated_key_installs_and_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    generate_symmetric(Algorithm::Aes256Cbc, Some(dir.path().join("v2_key").as_path())).unwrap();
    let codec = SecretCodec::new(KeyStore::at_root(dir.path()));
    let enc = codec.encrypt("fresh install").unwrap();
    assert_eq!(codec.decrypt(&enc).unwrap(), "fresh install");
}

#[test]
fn explicit_key_object_is_used_as_is() {
    let key: Arc<dyn SymmetricKey> = Arc::new(fixed_key(KEY_B64));
    let codec = SecretCodec::new(KeyStore::with_key(key));
    assert_eq!(codec.encrypt("hunter2").unwrap(), HUNTER2);
}

#[test]
fn platform_helpers_accept_encrypted_input() {
    let (_dir, codec) = fixed_codec();
    assert_eq!(
        codec.md5crypt(HUNTER2, None).unwrap(),
        "$1$v2codec$WZ5Xl1YJ/Lq7DoQr8vfSn/"
    );
    assert_eq!(
        codec.sysprep_crypt(HUNTER2).unwrap(),
        "aAB1AG4AdABlAHIAMgBBAGQAbQBpAG4AaQBzAHQAcgBhAHQAbwByAFAAYQBzAHMAdwBvAHIAZAA="
    );
}
