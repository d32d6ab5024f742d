use crate::Result;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};

/// bytes of entropy in every csrf token
pub const CSRF_TOKEN_BYTES: usize = 32;

/**
Generates an opaque token from `len` bytes of operating system
randomness, encoded as unpadded url-safe base64.

Fails with [`SessionError::Generation`](crate::SessionError::Generation)
if the entropy source cannot be read. No session can be safely issued
in that case, so callers should not fall back to a weaker source.

```
let token = trillium_session_store::random_string(32).unwrap();
assert_eq!(token.len(), 43);
assert!(!token.contains('='));
```
*/
pub fn random_string(len: usize) -> Result<String> {
    let mut bytes = vec![0u8; len];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
