use crate::errors::{Result, UnstackedError};
use gpgme::{Context, Protocol, SignMode};
use tracing::debug;

/// Seam between the engine and the OpenPGP backend. The payload is the
/// canonical serialized commit object minus its signature field.
pub trait Signer {
    /// Produce an armored detached signature over `payload`.
    /// Must fail rather than let an unsigned commit through.
    fn sign(&self, payload: &str, key_id: Option<&str>) -> Result<String>;

    /// Check a detached signature. `Ok(false)` means "checked and invalid";
    /// an inability to check at all is `SigningUnavailable`.
    fn verify(&self, payload: &str, signature: &str, key_id: Option<&str>) -> Result<bool>;
}

/// Signer backed by the system GnuPG engine
#[derive(Debug, Default)]
pub struct GpgSigner;

impl GpgSigner {
    pub fn new() -> Self {
        Self
    }

    fn context(&self) -> Result<Context> {
        let mut ctx = Context::from_protocol(Protocol::OpenPgp).map_err(|e| {
            UnstackedError::signing_unavailable(format!("Failed to create GPG context: {e}"))
        })?;
        ctx.set_armor(true);
        Ok(ctx)
    }
}

impl Signer for GpgSigner {
    fn sign(&self, payload: &str, key_id: Option<&str>) -> Result<String> {
        let mut ctx = self.context()?;

        if let Some(key_id) = key_id {
            let key = ctx.get_secret_key(key_id).map_err(|e| {
                UnstackedError::signing_unavailable(format!(
                    "Secret key '{key_id}' not available: {e}"
                ))
            })?;
            ctx.add_signer(&key).map_err(|e| {
                UnstackedError::signing_unavailable(format!(
                    "Could not use key '{key_id}' for signing: {e}"
                ))
            })?;
        }

        let mut out = Vec::new();
        ctx.sign(SignMode::Detached, payload, &mut out)
            .map_err(|e| {
                UnstackedError::signing_unavailable(format!("Signing failed: {e}"))
            })?;

        let signature = String::from_utf8(out).map_err(|_| {
            UnstackedError::signing_unavailable("Signature is not valid UTF-8")
        })?;

        debug!("Signed {} byte payload", payload.len());
        Ok(signature)
    }

    fn verify(&self, payload: &str, signature: &str, key_id: Option<&str>) -> Result<bool> {
        let mut ctx = self.context()?;

        let result = match ctx.verify_detached(signature.as_bytes(), payload.as_bytes()) {
            Ok(result) => result,
            // Unparsable signature data: checked and invalid
            Err(e) if e.code() == gpgme::Error::NO_DATA.code() => return Ok(false),
            Err(e) => {
                return Err(UnstackedError::signing_unavailable(format!(
                    "Verification engine failed: {e}"
                )))
            }
        };

        for sig in result.signatures() {
            if sig.status() != gpgme::Error::NO_ERROR {
                continue;
            }
            match key_id {
                None => return Ok(true),
                Some(key_id) => {
                    let key_id = key_id.to_uppercase();
                    if let Ok(fpr) = sig.fingerprint() {
                        if fpr.to_uppercase().ends_with(&key_id) {
                            return Ok(true);
                        }
                    }
                }
            }
        }

        Ok(false)
    }
}
