// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Canonical certificate hashes.

Code signatures refer to certificates by a fingerprint: the SHA-1 of the
certificate's DER encoding, exactly as stored. The data is not re-encoded
or normalized, so byte-identical certificates from different sources have
the same identity.
*/

use {
    crate::{certificate_library::CertificateFields, error::CodesignUtilError},
    std::fmt::{Display, Formatter},
};

/// Length in bytes of a [CertificateDigest].
pub const CERTIFICATE_DIGEST_LENGTH: usize = 20;

/// The canonical hash of a certificate.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct CertificateDigest([u8; CERTIFICATE_DIGEST_LENGTH]);

impl CertificateDigest {
    /// Construct an instance from raw digest bytes.
    ///
    /// Returns `None` if the slice isn't [CERTIFICATE_DIGEST_LENGTH] bytes.
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        Some(Self(data.try_into().ok()?))
    }

    pub fn as_bytes(&self) -> &[u8; CERTIFICATE_DIGEST_LENGTH] {
        &self.0
    }

    /// Render the digest as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for CertificateDigest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for CertificateDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Compute the canonical hash of a certificate given its DER data.
pub fn hash_of_certificate_data(data: &[u8]) -> CertificateDigest {
    let digest = ring::digest::digest(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY, data);

    let mut result = [0u8; CERTIFICATE_DIGEST_LENGTH];
    result.copy_from_slice(digest.as_ref());

    CertificateDigest(result)
}

/// Compute the canonical hash of a certificate given a handle to it.
pub fn hash_of_certificate<C: CertificateFields + ?Sized>(
    cert: &C,
) -> Result<CertificateDigest, CodesignUtilError> {
    if cert.is_null() {
        return Err(CodesignUtilError::NullHandle);
    }

    Ok(hash_of_certificate_data(cert.certificate_data()?))
}
