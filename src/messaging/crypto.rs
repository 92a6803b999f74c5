// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! AEAD sealing of framed messages.
//!
//! Wire layout is `nonce(16) ‖ tag(16) ‖ ciphertext` under AES-256-GCM with
//! the recipient's provisioned key. Opening a package not addressed to us
//! fails authentication; the routers treat that as "not for me" and stay
//! silent about it.

use crate::types::errors::{Error, Result};
use aes_gcm::aead::generic_array::typenum::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{aes::Aes256, AesGcm};
use rand::RngCore;

/// Bytes of nonce at the front of the wire form.
pub const NONCE_LEN: usize = 16;

/// Bytes of authentication tag following the nonce.
pub const TAG_LEN: usize = 16;

/// Required key length.
pub const KEY_LEN: usize = 32;

// AES-256-GCM with a 16-byte nonce, matching the provisioned key files.
type PackageCipher = AesGcm<Aes256, U16>;

fn cipher_for(key: &[u8]) -> Result<PackageCipher> {
    if key.len() != KEY_LEN {
        return Err(Error::InvalidInput(format!(
            "key must be {} bytes, got {}",
            KEY_LEN,
            key.len()
        )));
    }
    PackageCipher::new_from_slice(key)
        .map_err(|_| Error::InvalidInput("key rejected by cipher".to_string()))
}

/// Seals `plaintext` to the holder of `key`, returning the wire bytes.
pub fn seal(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = GenericArray::from_slice(&nonce_bytes);

    // The aead API appends the tag to the ciphertext; the wire form wants it
    // between the nonce and the ciphertext.
    let mut ct_and_tag = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| Error::InvalidInput("encryption failed".to_string()))?;
    let tag = ct_and_tag.split_off(ct_and_tag.len() - TAG_LEN);

    let mut sealed = Vec::with_capacity(NONCE_LEN + TAG_LEN + ct_and_tag.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&tag);
    sealed.extend_from_slice(&ct_and_tag);
    Ok(sealed)
}

/// Opens wire bytes sealed with [`seal`].
///
/// Returns [`Error::InvalidInput`] when the input cannot even contain a
/// nonce and tag, and [`Error::NotForMe`] when authentication fails, i.e.
/// the package was sealed under a different key or tampered with.
pub fn open(sealed: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() <= NONCE_LEN + TAG_LEN {
        return Err(Error::InvalidInput(format!(
            "sealed input too short: {} bytes",
            sealed.len()
        )));
    }
    let cipher = cipher_for(key)?;

    let nonce = GenericArray::from_slice(&sealed[..NONCE_LEN]);
    let tag = &sealed[NONCE_LEN..NONCE_LEN + TAG_LEN];
    let ciphertext = &sealed[NONCE_LEN + TAG_LEN..];

    let mut ct_and_tag = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    ct_and_tag.extend_from_slice(ciphertext);
    ct_and_tag.extend_from_slice(tag);

    cipher
        .decrypt(nonce, ct_and_tag.as_slice())
        .map_err(|_| Error::NotForMe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use assert_matches::assert_matches;
    use rand::Rng;

    fn key() -> Vec<u8> {
        let mut key = vec![0u8; KEY_LEN];
        rand::thread_rng().fill(key.as_mut_slice());
        key
    }

    #[test]
    fn seal_then_open_round_trips() -> Result<()> {
        let key = key();
        let plaintext = b"clrMsg~~~hi~~~a~~~b~~~1~~~42~~~0";
        let sealed = seal(plaintext, &key)?;

        assert_eq!(sealed.len(), NONCE_LEN + TAG_LEN + plaintext.len());
        assert_eq!(open(&sealed, &key)?, plaintext.to_vec());
        Ok(())
    }

    #[test]
    fn wrong_key_is_not_for_me() -> Result<()> {
        let sealed = seal(b"secret", &key())?;
        assert_matches!(open(&sealed, &key()), Err(Error::NotForMe));
        Ok(())
    }

    #[test]
    fn tampered_package_is_not_for_me() -> Result<()> {
        let key = key();
        let mut sealed = seal(b"secret", &key)?;
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert_matches!(open(&sealed, &key), Err(Error::NotForMe));
        Ok(())
    }

    #[test]
    fn short_input_is_invalid_not_silent() {
        let sealed = vec![0u8; NONCE_LEN + TAG_LEN];
        assert_matches!(open(&sealed, &key()), Err(Error::InvalidInput(_)));
    }

    #[test]
    fn bad_key_length_is_rejected() {
        assert_matches!(seal(b"x", &[0u8; 16]), Err(Error::InvalidInput(_)));
    }

    #[test]
    fn nonces_are_fresh_per_seal() -> Result<()> {
        let key = key();
        let a = seal(b"same plaintext", &key)?;
        let b = seal(b"same plaintext", &key)?;
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
        Ok(())
    }
}
