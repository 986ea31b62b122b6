//! Passkey code format
//!
//! Codes are typed in by hand, so the alphabet drops `0`, `O`, `1` and `I`.
//! Codes issued before must stay valid: do not change either constant.

use rand::Rng;

use crate::prelude::*;

pub const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const LEN: usize = 10;

pub fn generate() -> String {
  let mut rng = rand::thread_rng();
  (0..LEN)
    .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
    .collect()
}

/// Canonical form of user input: trimmed and uppercased.
pub fn normalize(input: &str) -> Result<String> {
  let code = input.trim().to_ascii_uppercase();

  if code.len() != LEN {
    return Err(Error::validation(format!(
      "passkey must be {LEN} characters long"
    )));
  }
  if let Some(bad) = code.bytes().find(|b| !ALPHABET.contains(b)) {
    return Err(Error::validation(format!(
      "passkey contains invalid character `{}`",
      bad as char
    )));
  }

  Ok(code)
}
