//! In-memory secret vault sealing sensitive strings with a per-process symmetric key.
//!
//! Client secrets and cached access tokens rest AES-256-GCM-encrypted between uses so that
//! process memory dumps or casual debugger inspection do not trivially reveal them. The key is
//! generated fresh at construction and never leaves the process. This mitigates passive memory
//! inspection only (an attacker who can read memory at the moment of [`SecretVault::open`] sees
//! the plaintext) and is not a substitute for a proper secrets manager.

// crates.io
use aes_gcm::{
	Aes256Gcm, Nonce,
	aead::{Aead, KeyInit},
};
use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};
// self
use crate::{_prelude::*, error::VaultError};

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

/// Redacted plaintext secret wrapper keeping sensitive material out of logs.
///
/// The inner string is zeroed when the value is dropped.
#[derive(Clone)]
pub struct SecretString(Zeroizing<String>);
impl SecretString {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(Zeroizing::new(value.into()))
	}

	/// Returns the inner value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Number of bytes in the secret; safe to log.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns `true` if the secret is empty.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}
impl PartialEq for SecretString {
	fn eq(&self, other: &Self) -> bool {
		self.0.as_str() == other.0.as_str()
	}
}
impl Eq for SecretString {}
impl From<String> for SecretString {
	fn from(value: String) -> Self {
		Self::new(value)
	}
}
impl From<&str> for SecretString {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}
impl Debug for SecretString {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("SecretString").field(&"<redacted>").finish()
	}
}
impl Display for SecretString {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// Ciphertext handle produced by [`SecretVault::seal`].
///
/// Layout is `nonce || ciphertext`; the nonce is random per seal, so sealing the same plaintext
/// twice yields different handles. The handle never contains the plaintext in any encoding.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedSecret(Vec<u8>);
impl SealedSecret {
	/// Raw sealed bytes (nonce prefix + ciphertext).
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	/// Base64 rendering of the sealed bytes, for diagnostics.
	pub fn to_base64(&self) -> String {
		STANDARD_NO_PAD.encode(&self.0)
	}
}
impl Debug for SealedSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SealedSecret").field("len", &self.0.len()).finish()
	}
}

/// Per-process symmetric vault for sealing secrets in memory.
pub struct SecretVault {
	// Read-mostly: only `shred` takes the write lock.
	key: RwLock<Option<Zeroizing<[u8; KEY_SIZE]>>>,
}
impl SecretVault {
	/// Creates a vault with a freshly generated random key.
	pub fn new() -> Self {
		let mut key = Zeroizing::new([0_u8; KEY_SIZE]);

		rand::rng().fill_bytes(key.as_mut());

		Self { key: RwLock::new(Some(key)) }
	}

	/// Encrypts the plaintext under the vault key.
	pub fn seal(&self, plaintext: &str) -> Result<SealedSecret, VaultError> {
		let guard = self.key.read();
		let key = guard.as_ref().ok_or(VaultError::KeyShredded)?;
		let cipher =
			Aes256Gcm::new_from_slice(key.as_ref()).map_err(|_| VaultError::SealFailure)?;
		let mut nonce = [0_u8; NONCE_SIZE];

		rand::rng().fill_bytes(&mut nonce);

		let ciphertext = cipher
			.encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
			.map_err(|_| VaultError::SealFailure)?;
		let mut bytes = Vec::with_capacity(NONCE_SIZE + ciphertext.len());

		bytes.extend_from_slice(&nonce);
		bytes.extend_from_slice(&ciphertext);

		Ok(SealedSecret(bytes))
	}

	/// Decrypts a handle previously produced by [`seal`](Self::seal) on this vault.
	pub fn open(&self, sealed: &SealedSecret) -> Result<SecretString, VaultError> {
		let guard = self.key.read();
		let key = guard.as_ref().ok_or(VaultError::KeyShredded)?;

		if sealed.0.len() <= NONCE_SIZE {
			return Err(VaultError::OpenFailure);
		}

		let (nonce, ciphertext) = sealed.0.split_at(NONCE_SIZE);
		let cipher =
			Aes256Gcm::new_from_slice(key.as_ref()).map_err(|_| VaultError::OpenFailure)?;
		let plaintext = cipher
			.decrypt(Nonce::from_slice(nonce), ciphertext)
			.map_err(|_| VaultError::OpenFailure)?;
		let text = match String::from_utf8(plaintext) {
			Ok(text) => text,
			Err(e) => {
				let mut bytes = e.into_bytes();

				bytes.zeroize();

				return Err(VaultError::NotUtf8);
			},
		};

		Ok(SecretString(Zeroizing::new(text)))
	}

	/// Zeroes and discards the vault key; used at shutdown.
	///
	/// Every subsequent [`seal`](Self::seal)/[`open`](Self::open) fails with
	/// [`VaultError::KeyShredded`]. Shredding twice is a no-op.
	pub fn shred(&self) {
		// Zeroizing zeroes the key bytes as soon as the option is dropped here.
		*self.key.write() = None;
	}

	/// Returns `true` once [`shred`](Self::shred) has been called.
	pub fn is_shredded(&self) -> bool {
		self.key.read().is_none()
	}
}
impl Default for SecretVault {
	fn default() -> Self {
		Self::new()
	}
}
impl Debug for SecretVault {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SecretVault").field("shredded", &self.is_shredded()).finish()
	}
}
