// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Low-level utilities for code signing.
//!
//! This crate provides a handful of primitives that code signing tooling
//! builds on:
//!
//! * Computing the SHA-1 digest identifying an X.509 certificate. (See
//!   [hash_of_certificate].)
//! * Hashing all or a prefix of a file's content into a caller owned hash
//!   state. (See [hash_file_data] and [hash_file_data_from].)
//! * Determining whether a certificate carries an extension, including
//!   extensions the certificate library doesn't recognize, such as Apple's
//!   code signing marker extensions. (See [certificate_has_field].)
//! * Copying files while preserving extended attributes, ACLs, and
//!   permissions, with guaranteed cleanup of the copy state. (See
//!   [ScopedCopy].)
//!
//! Certificates are accessed through the [CertificateFields] trait, which
//! models a field-oriented certificate library whose borrowed values must be
//! released. [CertificateRef] implements it on top of the `x509-certificate`
//! crate.
//!
//! # Crate Features
//!
//! There are no optional features. The copy facility is `copyfile(3)` on
//! macOS and a portable implementation on other Unix platforms.

mod certificate_hash;
pub use certificate_hash::*;
mod certificate_library;
pub use certificate_library::*;
#[cfg(unix)]
mod copyfile;
#[cfg(unix)]
pub use copyfile::*;
mod error;
pub use error::*;
mod extension_probe;
pub use extension_probe::*;
mod file_hash;
pub use file_hash::*;

#[cfg(test)]
mod testutil;
