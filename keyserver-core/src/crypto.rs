use crate::error::KeyserverError;
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const DIGEST_LEN: usize = 32;

pub type Digest32 = [u8; DIGEST_LEN];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureScheme {
  Ecdsa,
  // Reserved; signing and verification are not implemented.
  Schnorr,
}

#[derive(Clone)]
pub struct KeyPair {
  secret: SecretKey,
}

impl KeyPair {
  pub fn generate() -> Self {
    Self {
      secret: SecretKey::random(&mut OsRng),
    }
  }

  pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, KeyserverError> {
    let secret = SecretKey::from_slice(bytes)
      .map_err(|_| KeyserverError::InvalidKey("secret scalar out of range".to_string()))?;
    Ok(Self { secret })
  }

  pub fn secret(&self) -> &SecretKey {
    &self.secret
  }

  pub fn public_key(&self) -> PublicKey {
    self.secret.public_key()
  }

  pub fn public_key_bytes(&self) -> Vec<u8> {
    compressed(&self.public_key())
  }
}

impl std::fmt::Debug for KeyPair {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("KeyPair")
      .field("public_key", &hex::encode(self.public_key_bytes()))
      .finish_non_exhaustive()
  }
}

pub fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, KeyserverError> {
  PublicKey::from_sec1_bytes(bytes)
    .map_err(|_| {
      KeyserverError::InvalidKey(format!("not a secp256k1 point ({} bytes)", bytes.len()))
    })
}

pub fn compressed(key: &PublicKey) -> Vec<u8> {
  key.to_encoded_point(true).as_bytes().to_vec()
}

pub fn sha256(data: &[u8]) -> Digest32 {
  Sha256::digest(data).into()
}

pub fn sign_ecdsa(
  key: &KeyPair,
  digest: &Digest32,
) -> Result<(SignatureScheme, Vec<u8>), KeyserverError> {
  let signing = SigningKey::from(key.secret());
  let sig: Signature = signing
    .sign_prehash(digest)
    .map_err(|e| KeyserverError::InvalidKey(format!("ecdsa signing failed: {e}")))?;
  Ok((SignatureScheme::Ecdsa, sig.to_bytes().to_vec()))
}

pub fn sign_schnorr(
  _key: &KeyPair,
  _digest: &Digest32,
) -> Result<(SignatureScheme, Vec<u8>), KeyserverError> {
  Err(KeyserverError::UnsupportedScheme(SignatureScheme::Schnorr))
}

/// Verifies a 64-byte `r || s` ECDSA signature over a precomputed digest.
pub fn verify_ecdsa(
  key: &PublicKey,
  signature: &[u8],
  digest: &Digest32,
) -> Result<(), KeyserverError> {
  let sig = Signature::from_slice(signature).map_err(|_| KeyserverError::InvalidSignature)?;
  VerifyingKey::from(key)
    .verify_prehash(digest, &sig)
    .map_err(|_| KeyserverError::InvalidSignature)
}

pub fn verify_schnorr(
  _key: &PublicKey,
  _signature: &[u8],
  _digest: &Digest32,
) -> Result<(), KeyserverError> {
  Err(KeyserverError::UnsupportedScheme(SignatureScheme::Schnorr))
}

pub fn verify(
  scheme: SignatureScheme,
  key: &PublicKey,
  signature: &[u8],
  digest: &Digest32,
) -> Result<(), KeyserverError> {
  match scheme {
    SignatureScheme::Ecdsa => verify_ecdsa(key, signature, digest),
    SignatureScheme::Schnorr => verify_schnorr(key, signature, digest),
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDigest {
  pub pub_key: Vec<u8>,
  pub scheme: SignatureScheme,
  pub signature: Vec<u8>,
}

/// Produces signatures on behalf of an address. Key custody lives with the
/// implementor; the wallet normally resolves the address to its own key.
pub trait AddressSigner {
  fn sign(&self, address: &str, digest: &Digest32) -> Result<SignedDigest, KeyserverError>;
}

impl AddressSigner for KeyPair {
  fn sign(&self, _address: &str, digest: &Digest32) -> Result<SignedDigest, KeyserverError> {
    let (scheme, signature) = sign_ecdsa(self, digest)?;
    Ok(SignedDigest {
      pub_key: self.public_key_bytes(),
      scheme,
      signature,
    })
  }
}
