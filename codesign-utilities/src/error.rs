// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::certificate_library::LibraryStatus, thiserror::Error,
    x509_certificate::X509CertificateError,
};

/// Unified error type for the code signing utilities.
#[derive(Debug, Error)]
pub enum CodesignUtilError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("certificate library error: {0}")]
    HostLibrary(#[from] LibraryStatus),

    #[error("null certificate handle")]
    NullHandle,

    #[error("X.509 certificate handler error: {0}")]
    X509(#[from] X509CertificateError),

    #[error("unknown copy flag: {0}")]
    UnknownCopyFlag(String),
}
