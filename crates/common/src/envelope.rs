//! The `v2:{...}` envelope text grammar.
//!
//! An encrypted value is stored as
//!
//! ```text
//! v2:{<base64(ciphertext)>}
//! ```
//!
//! with no embedded newlines. Anything not matching that shape is plaintext.
//! Historical configuration may also hold the envelope inside a templated
//! decrypt call, e.g. `<%= MiqPassword.decrypt('v2:{...}') %>`; that form is
//! read-only and is unwrapped before any other check.
//!
//! This module is pure text handling: it never decrypts anything.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// Version tag at the start of every envelope.
pub const ENVELOPE_VERSION: &str = "v2";

/// Token substituted for every envelope found by [`sanitize`].
pub const MASK: &str = "********";

/// Identifiers accepted as the callable in the legacy templated form.
pub const LEGACY_CALLABLES: &[&str] = &["MiqPassword", "ManageIQ::Password"];

/// A whole value that is exactly one envelope.
static ENVELOPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^v2:\{([^}]*)\}$").expect("valid envelope pattern"));

/// Envelopes embedded anywhere in free text.
static ENVELOPE_IN_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"v2:\{[^}]*\}").expect("valid envelope pattern"));

/// Percent-encoded envelopes (`v2%3A%7B...%7D`) embedded in free text. The
/// payload may itself carry `%2B`, `%2F` and `%3D`, so match lazily up to the
/// first closing brace.
static URL_ENCODED_IN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"v2%3[Aa]%7[Bb].*?%7[Dd]").expect("valid url-encoded envelope pattern")
});

static LEGACY: LazyLock<Regex> = LazyLock::new(|| {
    let callables = LEGACY_CALLABLES
        .iter()
        .map(|c| regex::escape(c))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(
        r#"^<%= (?:{callables})\.decrypt\((?:'([^']*)'|"([^"]*)")\) %>$"#
    ))
    .expect("valid legacy pattern")
});

/// Wrap a base64 payload in the envelope, dropping any line breaks the
/// encoder may have inserted.
pub fn wrap(payload_b64: &str) -> String {
    let payload: String = payload_b64
        .chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .collect();
    format!("{ENVELOPE_VERSION}:{{{payload}}}")
}

/// Return the inner literal of a legacy templated decrypt call, or `value`
/// unchanged when it is not one.
pub fn unwrap_legacy(value: &str) -> &str {
    LEGACY
        .captures(value)
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map_or(value, |m| m.as_str())
}

/// Return the base64 payload when `value` (after legacy unwrapping) is an
/// envelope. An empty envelope yields `Some("")`.
pub fn payload(value: &str) -> Option<&str> {
    ENVELOPE
        .captures(unwrap_legacy(value))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Returns `true` if `value` is an envelope, directly or in legacy form.
pub fn is_encrypted(value: &str) -> bool {
    payload(value).is_some()
}

/// Replace every envelope in `text`, plain or percent-encoded, with [`MASK`].
///
/// Borrows when nothing matched.
pub fn sanitize(text: &str) -> Cow<'_, str> {
    match ENVELOPE_IN_TEXT.replace_all(text, MASK) {
        Cow::Borrowed(s) => URL_ENCODED_IN_TEXT.replace_all(s, MASK),
        Cow::Owned(s) => Cow::Owned(URL_ENCODED_IN_TEXT.replace_all(&s, MASK).into_owned()),
    }
}

/// In-place variant of [`sanitize`].
pub fn sanitize_in_place(text: &mut String) {
    let masked = match sanitize(text) {
        Cow::Borrowed(_) => return,
        Cow::Owned(s) => s,
    };
    *text = masked;
}
