use aes::cipher::block_padding::Pkcs7;
use aes::cipher::consts::U16;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use k256::{ProjectivePoint, PublicKey, SecretKey};
use keyserver_core::crypto::{self, KeyPair};
use keyserver_core::KeyserverError;
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};
use zeroize::{Zeroize, Zeroizing};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const BLOCK_LEN: usize = 16;

/// Encrypts `plain` for `destination` (SEC1 bytes). Returns the ciphertext and
/// the compressed ephemeral public key the recipient needs to decrypt.
pub fn encrypt(
  plain: &[u8],
  destination: &[u8],
  sender: &KeyPair,
) -> Result<(Vec<u8>, Vec<u8>), KeyserverError> {
  let destination = crypto::parse_public_key(destination)?;

  // S = dest * e + sender
  let ephemeral = SecretKey::random(&mut OsRng);
  let shared = destination.to_projective() * *ephemeral.to_nonzero_scalar()
    + sender.public_key().to_projective();
  let material = derive_key_material(shared)?;
  let (iv, key) = split(&material);

  let mut buf = vec![0u8; plain.len() + BLOCK_LEN];
  buf[..plain.len()].copy_from_slice(plain);
  let ciphertext = Aes128CbcEnc::new(key, iv)
    .encrypt_padded_mut::<Pkcs7>(&mut buf, plain.len())
    .map_err(|_| KeyserverError::Encode("cipher buffer too small".to_string()))?
    .to_vec();
  buf.zeroize();

  Ok((ciphertext, crypto::compressed(&ephemeral.public_key())))
}

pub fn decrypt(
  ciphertext: &[u8],
  destination: &SecretKey,
  sender: &[u8],
  seed: &[u8],
) -> Result<Vec<u8>, KeyserverError> {
  let sender = crypto::parse_public_key(sender)?;
  let seed = crypto::parse_public_key(seed)?;

  let shared = seed.to_projective() * *destination.to_nonzero_scalar() + sender.to_projective();
  let material = derive_key_material(shared)?;
  let (iv, key) = split(&material);

  let mut buf = Zeroizing::new(ciphertext.to_vec());
  let plain = Aes128CbcDec::new(key, iv)
    .decrypt_padded_mut::<Pkcs7>(buf.as_mut_slice())
    .map_err(|_| KeyserverError::DecryptionError)?;
  Ok(plain.to_vec())
}

fn shared_secret(shared: ProjectivePoint) -> Result<Zeroizing<Vec<u8>>, KeyserverError> {
  let point = PublicKey::from_affine(shared.to_affine())
    .map_err(|_| KeyserverError::InvalidKey("shared point is the identity".to_string()))?;
  Ok(Zeroizing::new(crypto::compressed(&point)))
}

fn derive_key_material(shared: ProjectivePoint) -> Result<Zeroizing<[u8; 64]>, KeyserverError> {
  let secret = shared_secret(shared)?;
  let mut out = Zeroizing::new([0u8; 64]);
  Sha512::new()
    .chain_update(secret.as_slice())
    .finalize_into(GenericArray::from_mut_slice(&mut out[..]));
  Ok(out)
}

// 128-bit IV, then 128-bit key; the upper half of the digest is unused.
fn split(material: &[u8; 64]) -> (&GenericArray<u8, U16>, &GenericArray<u8, U16>) {
  (
    GenericArray::from_slice(&material[0..16]),
    GenericArray::from_slice(&material[16..32]),
  )
}
