//! One-way password transforms expected by external systems.
//!
//! These take plaintext; [`crate::codec::SecretCodec`] resolves envelopes
//! before calling in.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use md5::{Digest, Md5};

/// Salt used by [`crate::codec::SecretCodec::md5crypt`] when none is given.
pub const DEFAULT_MD5_SALT: &str = "v2codec";

/// Marker appended before encoding by [`sysprep_password`].
pub const SYSPREP_SUFFIX: &str = "AdministratorPassword";

const MD5_MAGIC: &str = "$1$";
const MAX_SALT_LEN: usize = 8;
const CRYPT_ALPHABET: &[u8; 64] =
    b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// MD5-crypt (`$1$salt$hash`) digest of `password`, as produced by
/// `openssl passwd -1 -salt <salt>`.
///
/// A leading `$1$` on `salt` is ignored, the salt stops at the first `$`, and
/// at most eight bytes of it are used, cut back to a whole character.
pub fn md5_crypt(password: &str, salt: &str) -> String {
    let salt = salt.strip_prefix(MD5_MAGIC).unwrap_or(salt);
    let salt = salt.split('$').next().unwrap_or_default();
    let salt = truncate_on_char_boundary(salt, MAX_SALT_LEN);
    let pw = password.as_bytes();

    let alternate = Md5::new()
        .chain_update(pw)
        .chain_update(salt.as_bytes())
        .chain_update(pw)
        .finalize();

    let mut ctx = Md5::new()
        .chain_update(pw)
        .chain_update(MD5_MAGIC.as_bytes())
        .chain_update(salt.as_bytes());
    let mut remaining = pw.len();
    while remaining > 0 {
        let n = remaining.min(alternate.len());
        ctx.update(&alternate[..n]);
        remaining -= n;
    }
    let mut bits = pw.len();
    while bits > 0 {
        if bits & 1 == 1 {
            ctx.update([0u8]);
        } else {
            ctx.update(&pw[..1]);
        }
        bits >>= 1;
    }
    let mut digest = ctx.finalize();

    // 1000 rounds of stretching.
    for round in 0..1000 {
        let mut ctx = Md5::new();
        if round & 1 == 1 {
            ctx.update(pw);
        } else {
            ctx.update(digest);
        }
        if round % 3 != 0 {
            ctx.update(salt.as_bytes());
        }
        if round % 7 != 0 {
            ctx.update(pw);
        }
        if round & 1 == 1 {
            ctx.update(digest);
        } else {
            ctx.update(pw);
        }
        digest = ctx.finalize();
    }

    let mut encoded = String::with_capacity(22);
    for (a, b, c) in [(0, 6, 12), (1, 7, 13), (2, 8, 14), (3, 9, 15), (4, 10, 5)] {
        let v = (u32::from(digest[a]) << 16) | (u32::from(digest[b]) << 8) | u32::from(digest[c]);
        push_crypt64(&mut encoded, v, 4);
    }
    push_crypt64(&mut encoded, u32::from(digest[11]), 2);

    format!("{MD5_MAGIC}{salt}${encoded}")
}

/// Longest prefix of `s` of at most `max` bytes that ends on a char boundary.
fn truncate_on_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn push_crypt64(out: &mut String, mut v: u32, n: usize) {
    for _ in 0..n {
        out.push(char::from(CRYPT_ALPHABET[(v & 0x3f) as usize]));
        v >>= 6;
    }
}

/// Windows unattended-setup form: base64 of the UTF-16LE encoding of
/// `password` followed by [`SYSPREP_SUFFIX`], without line breaks.
pub fn sysprep_password(password: &str) -> String {
    let utf16: Vec<u8> = password
        .encode_utf16()
        .chain(SYSPREP_SUFFIX.encode_utf16())
        .flat_map(u16::to_le_bytes)
        .collect();
    STANDARD.encode(utf16)
}
