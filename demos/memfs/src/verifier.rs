//! Stand-in credential scheme for exercising the `afid` handshake.
//!
//! A real deployment verifies an opaque blob against something like munge or
//! PAM (see `diod_auth.c`'s `_auth_write`); this demo has no such collaborator
//! to call out to, so it accepts a self-delimited ASCII decimal uid,
//! terminated by `\n`, as the "credential". Anything else is rejected.

use rs9p::auth::CredentialVerifier;
use rs9p::error::{errno::EACCES, Error};

pub struct DecimalUidVerifier;

impl CredentialVerifier for DecimalUidVerifier {
    fn verify(&self, blob: &[u8]) -> Result<u32, Error> {
        let text = std::str::from_utf8(blob).map_err(|_| Error::No(EACCES))?;
        let digits = text.strip_suffix('\n').ok_or(Error::No(EACCES))?;
        digits.parse::<u32>().map_err(|_| Error::No(EACCES))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_newline_terminated_decimal_uid() {
        let v = DecimalUidVerifier;
        assert_eq!(v.verify(b"1000\n").unwrap(), 1000);
    }

    #[test]
    fn rejects_incomplete_credential() {
        let v = DecimalUidVerifier;
        assert!(v.verify(b"100").is_err());
    }

    #[test]
    fn rejects_non_numeric_credential() {
        let v = DecimalUidVerifier;
        assert!(v.verify(b"abc\n").is_err());
    }
}
