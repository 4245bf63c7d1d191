//! Authentication plugins.
//!
//! # mysql_native_password
//!
//! ```text
//! SHA1(password) XOR SHA1(nonce + SHA1(SHA1(password)))
//! ```
//!
//! # caching_sha2_password / sha256_password
//!
//! Fast path (caching_sha2 only):
//!
//! ```text
//! SHA256(password) XOR SHA256(SHA256(SHA256(password)) + nonce)
//! ```
//!
//! Full authentication sends the password in clear over TLS, or RSA-encrypted
//! (OAEP) with the server's public key otherwise.

use rand::rngs::OsRng;
use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Status bytes carried in an auth-more-data packet by caching_sha2_password.
pub mod caching_sha2 {
    /// Client asks for the server's RSA public key
    pub const REQUEST_PUBLIC_KEY: u8 = 0x02;
    /// Cached credentials matched; an OK packet follows
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    /// Server needs the full password
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

/// sha256_password: initial response asking for the public key.
pub const SHA256_REQUEST_PUBLIC_KEY: u8 = 0x01;

/// Supported authentication plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPlugin {
    /// `mysql_native_password`
    NativePassword,
    /// `caching_sha2_password`
    CachingSha2Password,
    /// `sha256_password`
    Sha256Password,
    /// `mysql_clear_password`
    ClearPassword,
    /// `authentication_windows_client`
    WindowsClient,
}

impl AuthPlugin {
    /// Look up a plugin by the name the server advertises.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "mysql_native_password" => Ok(Self::NativePassword),
            "caching_sha2_password" => Ok(Self::CachingSha2Password),
            "sha256_password" => Ok(Self::Sha256Password),
            "mysql_clear_password" => Ok(Self::ClearPassword),
            "authentication_windows_client" => Ok(Self::WindowsClient),
            other => Err(Error::Unsupported(format!("auth plugin {other}"))),
        }
    }

    /// Plugin name as sent on the wire.
    pub fn name(self) -> &'static str {
        match self {
            Self::NativePassword => "mysql_native_password",
            Self::CachingSha2Password => "caching_sha2_password",
            Self::Sha256Password => "sha256_password",
            Self::ClearPassword => "mysql_clear_password",
            Self::WindowsClient => "authentication_windows_client",
        }
    }

    /// Compute the first auth response for this plugin.
    ///
    /// `secure` is true when the transport is TLS-encrypted; `allow_cleartext`
    /// permits sending the plain password over an unencrypted transport.
    pub fn initial_response(
        self,
        password: &str,
        nonce: &[u8],
        secure: bool,
        allow_cleartext: bool,
    ) -> Result<Vec<u8>> {
        match self {
            Self::NativePassword => Ok(scramble_native(password, nonce)),
            Self::CachingSha2Password => Ok(scramble_sha256(password, nonce)),
            Self::Sha256Password => {
                if password.is_empty() {
                    Ok(vec![0])
                } else if secure {
                    Ok(cleartext(password))
                } else {
                    Ok(vec![SHA256_REQUEST_PUBLIC_KEY])
                }
            }
            Self::ClearPassword => {
                if !secure && !allow_cleartext {
                    return Err(Error::Auth(
                        "mysql_clear_password requires TLS or allow_cleartext_password".into(),
                    ));
                }
                Ok(cleartext(password))
            }
            Self::WindowsClient => Err(Error::Unsupported(
                "authentication_windows_client (SSPI) is not available".into(),
            )),
        }
    }
}

/// Strip the trailing NUL some servers append to the 20-byte nonce.
fn nonce20(nonce: &[u8]) -> &[u8] {
    match nonce.strip_suffix(&[0]) {
        Some(stripped) if nonce.len() == 21 => stripped,
        _ => nonce,
    }
}

fn xor<const N: usize>(a: [u8; N], b: [u8; N]) -> Vec<u8> {
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

/// mysql_native_password scramble (20 bytes, empty for an empty password).
pub fn scramble_native(password: &str, nonce: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let nonce = nonce20(nonce);

    let stage1: [u8; 20] = Sha1::digest(password.as_bytes()).into();
    let stage2: [u8; 20] = Sha1::digest(stage1).into();
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(stage2);
    let stage3: [u8; 20] = hasher.finalize().into();

    xor(stage1, stage3)
}

/// caching_sha2_password fast-auth scramble (32 bytes, empty for an empty password).
pub fn scramble_sha256(password: &str, nonce: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let nonce = nonce20(nonce);

    let hash1: [u8; 32] = Sha256::digest(password.as_bytes()).into();
    let hash2: [u8; 32] = Sha256::digest(hash1).into();
    let mut hasher = Sha256::new();
    hasher.update(hash2);
    hasher.update(nonce);
    let hash3: [u8; 32] = hasher.finalize().into();

    xor(hash1, hash3)
}

/// NUL-terminated cleartext password.
pub fn cleartext(password: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(password.len() + 1);
    out.extend_from_slice(password.as_bytes());
    out.push(0);
    out
}

/// XOR the NUL-terminated password with the nonce, repeating the nonce.
pub fn xor_password(password: &str, nonce: &[u8]) -> Vec<u8> {
    let nonce = nonce20(nonce);
    let mut out = cleartext(password);
    if nonce.is_empty() {
        return out;
    }
    for (i, b) in out.iter_mut().enumerate() {
        *b ^= nonce[i % nonce.len()];
    }
    out
}

/// Encrypt the password with the server's RSA public key (PEM, PKCS#8 or PKCS#1), OAEP padding.
pub fn encrypt_password_rsa(password: &str, nonce: &[u8], public_key_pem: &[u8]) -> Result<Vec<u8>> {
    let pem = simdutf8::compat::from_utf8(public_key_pem)
        .map_err(|e| Error::Auth(format!("server public key is not valid PEM: {e}")))?;
    let key = RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| Error::Auth(format!("failed to parse server public key: {e}")))?;
    let plaintext = xor_password(password, nonce);
    key.encrypt(&mut OsRng, rsa::Oaep::new::<Sha1>(), &plaintext)
        .map_err(|e| Error::Auth(format!("RSA encryption failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONCE: &[u8; 20] = b"abcdefghijklmnopqrst";

    #[test]
    fn test_native_empty_password() {
        assert!(scramble_native("", NONCE).is_empty());
        assert!(scramble_sha256("", NONCE).is_empty());
    }

    #[test]
    fn test_native_scramble_is_reversible() {
        // stage1 = scramble XOR SHA1(nonce + SHA1(stage1)) lets the server verify
        let scramble = scramble_native("secret", NONCE);
        let stage1: [u8; 20] = Sha1::digest(b"secret").into();
        let stage2: [u8; 20] = Sha1::digest(stage1).into();
        let mut hasher = Sha1::new();
        hasher.update(NONCE);
        hasher.update(stage2);
        let stage3: [u8; 20] = hasher.finalize().into();
        let recovered: Vec<u8> = scramble.iter().zip(stage3).map(|(a, b)| a ^ b).collect();
        assert_eq!(recovered, stage1);
    }

    #[test]
    fn test_trailing_nul_is_ignored() {
        let mut with_nul = NONCE.to_vec();
        with_nul.push(0);
        assert_eq!(scramble_native("pw", NONCE), scramble_native("pw", &with_nul));
        assert_eq!(scramble_sha256("pw", NONCE), scramble_sha256("pw", &with_nul));
    }

    #[test]
    fn test_sha256_scramble_length() {
        assert_eq!(scramble_sha256("secret", NONCE).len(), 32);
    }

    #[test]
    fn test_plugin_names() {
        for plugin in [
            AuthPlugin::NativePassword,
            AuthPlugin::CachingSha2Password,
            AuthPlugin::Sha256Password,
            AuthPlugin::ClearPassword,
            AuthPlugin::WindowsClient,
        ] {
            assert_eq!(AuthPlugin::from_name(plugin.name()).unwrap(), plugin);
        }
        assert!(AuthPlugin::from_name("auth_gssapi_client").is_err());
    }

    #[test]
    fn test_clear_password_needs_secure_transport() {
        assert!(
            AuthPlugin::ClearPassword
                .initial_response("pw", NONCE, false, false)
                .is_err()
        );
        assert_eq!(
            AuthPlugin::ClearPassword
                .initial_response("pw", NONCE, true, false)
                .unwrap(),
            b"pw\0"
        );
    }

    #[test]
    fn test_sha256_password_requests_key_without_tls() {
        assert_eq!(
            AuthPlugin::Sha256Password
                .initial_response("pw", NONCE, false, false)
                .unwrap(),
            vec![SHA256_REQUEST_PUBLIC_KEY]
        );
    }

    #[test]
    fn test_xor_password_roundtrip() {
        let x = xor_password("secret", NONCE);
        let back: Vec<u8> = x
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ NONCE[i % NONCE.len()])
            .collect();
        assert_eq!(back, b"secret\0");
    }

    #[test]
    fn test_rsa_rejects_garbage_key() {
        let err = encrypt_password_rsa("pw", NONCE, b"not a key").unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }
}
