// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Certificate library interface.

The utilities in this crate don't parse certificates themselves. Instead,
they talk to a *certificate library* through the [CertificateFields] trait.
The trait mirrors the shape of a classic field-oriented certificate API:
you can obtain the raw DER of a certificate, and you can *copy* the values
of a field identified by OID. Every copied value is owned by the library and
must be handed back to it via the matching *release* call.

Like many real world certificate libraries, the library is allowed to only
understand a fixed set of extension OIDs. Asking for an OID outside that set
yields [LibraryStatus::UNKNOWN_TAG]. Extensions the library doesn't
understand are still available: they are published as a bag of raw
extension records under the [OID_UNRECOGNIZED_EXTENSIONS] field.

[CertificateRef] is a pure Rust implementation of this interface backed by
the `x509-certificate` crate.
*/

use {
    crate::error::CodesignUtilError,
    bcder::{encode::Values, ConstOid, Mode, Oid},
    bytes::Bytes,
    std::{
        fmt::{Display, Formatter},
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    },
    x509_certificate::CapturedX509Certificate,
};

/// Field holding every certificate extension the library does not recognize.
///
/// Each value of this field is the DER encoding of an RFC 5280 `Extension`.
///
/// 2.16.840.1.113741.2.1.1.1.21.1
pub const OID_UNRECOGNIZED_EXTENSIONS: ConstOid =
    Oid(&[96, 134, 72, 1, 134, 248, 77, 2, 1, 1, 1, 21, 1]);

/// Subject Key Identifier extension.
///
/// 2.5.29.14
pub const OID_SUBJECT_KEY_IDENTIFIER: ConstOid = Oid(&[85, 29, 14]);

/// Key Usage extension.
///
/// 2.5.29.15
pub const OID_KEY_USAGE: ConstOid = Oid(&[85, 29, 15]);

/// Subject Alternative Name extension.
///
/// 2.5.29.17
pub const OID_SUBJECT_ALT_NAME: ConstOid = Oid(&[85, 29, 17]);

/// Issuer Alternative Name extension.
///
/// 2.5.29.18
pub const OID_ISSUER_ALT_NAME: ConstOid = Oid(&[85, 29, 18]);

/// Basic Constraints extension.
///
/// 2.5.29.19
pub const OID_BASIC_CONSTRAINTS: ConstOid = Oid(&[85, 29, 19]);

/// Name Constraints extension.
///
/// 2.5.29.30
pub const OID_NAME_CONSTRAINTS: ConstOid = Oid(&[85, 29, 30]);

/// CRL Distribution Points extension.
///
/// 2.5.29.31
pub const OID_CRL_DISTRIBUTION_POINTS: ConstOid = Oid(&[85, 29, 31]);

/// Certificate Policies extension.
///
/// 2.5.29.32
pub const OID_CERTIFICATE_POLICIES: ConstOid = Oid(&[85, 29, 32]);

/// Policy Mappings extension.
///
/// 2.5.29.33
pub const OID_POLICY_MAPPINGS: ConstOid = Oid(&[85, 29, 33]);

/// Authority Key Identifier extension.
///
/// 2.5.29.35
pub const OID_AUTHORITY_KEY_IDENTIFIER: ConstOid = Oid(&[85, 29, 35]);

/// Policy Constraints extension.
///
/// 2.5.29.36
pub const OID_POLICY_CONSTRAINTS: ConstOid = Oid(&[85, 29, 36]);

/// Extended Key Usage extension.
///
/// 2.5.29.37
pub const OID_EXTENDED_KEY_USAGE: ConstOid = Oid(&[85, 29, 37]);

/// Freshest CRL extension.
///
/// 2.5.29.46
pub const OID_FRESHEST_CRL: ConstOid = Oid(&[85, 29, 46]);

/// Inhibit anyPolicy extension.
///
/// 2.5.29.54
pub const OID_INHIBIT_ANY_POLICY: ConstOid = Oid(&[85, 29, 54]);

/// Authority Information Access extension.
///
/// 1.3.6.1.5.5.7.1.1
pub const OID_AUTHORITY_INFO_ACCESS: ConstOid = Oid(&[43, 6, 1, 5, 5, 7, 1, 1]);

/// Subject Information Access extension.
///
/// 1.3.6.1.5.5.7.1.11
pub const OID_SUBJECT_INFO_ACCESS: ConstOid = Oid(&[43, 6, 1, 5, 5, 7, 1, 11]);

/// Extension for `Apple Signing`.
///
/// 1.2.840.113635.100.6.1.1
pub const OID_EXTENSION_APPLE_SIGNING: ConstOid = Oid(&[42, 134, 72, 134, 247, 99, 100, 6, 1, 1]);

/// Extension for `iPhone Developer`.
///
/// 1.2.840.113635.100.6.1.2
pub const OID_EXTENSION_IPHONE_DEVELOPER: ConstOid =
    Oid(&[42, 134, 72, 134, 247, 99, 100, 6, 1, 2]);

/// Extension for `Mac Developer`.
///
/// 1.2.840.113635.100.6.1.12
pub const OID_EXTENSION_MAC_DEVELOPER: ConstOid = Oid(&[42, 134, 72, 134, 247, 99, 100, 6, 1, 12]);

/// Extension for `Developer ID Application`.
///
/// 1.2.840.113635.100.6.1.13
pub const OID_EXTENSION_DEVELOPER_ID_APPLICATION: ConstOid =
    Oid(&[42, 134, 72, 134, 247, 99, 100, 6, 1, 13]);

/// Extension for `Developer ID Installer`.
///
/// 1.2.840.113635.100.6.1.14
pub const OID_EXTENSION_DEVELOPER_ID_INSTALLER: ConstOid =
    Oid(&[42, 134, 72, 134, 247, 99, 100, 6, 1, 14]);

/// Extension OIDs whose values [CertificateRef] exposes as dedicated fields.
const RECOGNIZED_EXTENSIONS: &[&ConstOid; 16] = &[
    &OID_SUBJECT_KEY_IDENTIFIER,
    &OID_KEY_USAGE,
    &OID_SUBJECT_ALT_NAME,
    &OID_ISSUER_ALT_NAME,
    &OID_BASIC_CONSTRAINTS,
    &OID_NAME_CONSTRAINTS,
    &OID_CRL_DISTRIBUTION_POINTS,
    &OID_CERTIFICATE_POLICIES,
    &OID_POLICY_MAPPINGS,
    &OID_AUTHORITY_KEY_IDENTIFIER,
    &OID_POLICY_CONSTRAINTS,
    &OID_EXTENDED_KEY_USAGE,
    &OID_FRESHEST_CRL,
    &OID_INHIBIT_ANY_POLICY,
    &OID_AUTHORITY_INFO_ACCESS,
    &OID_SUBJECT_INFO_ACCESS,
];

/// Convert a constant OID into an owned [Oid].
pub fn owned_oid(oid: &ConstOid) -> Oid {
    Oid(Bytes::copy_from_slice(oid.as_ref()))
}

/// Whether [CertificateRef] exposes extensions with this OID as a dedicated field.
pub fn is_recognized_extension(oid: &Oid) -> bool {
    RECOGNIZED_EXTENSIONS
        .iter()
        .any(|known| known.as_ref() == oid.as_ref())
}

/// A status code reported by a certificate library.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct LibraryStatus(pub i32);

impl LibraryStatus {
    /// The certificate handle is null or otherwise unusable.
    pub const INVALID_HANDLE: Self = Self(-1);

    /// The certificate data could not be interpreted.
    pub const INVALID_CERTIFICATE: Self = Self(-2);

    /// The library does not know the requested field.
    pub const UNKNOWN_TAG: Self = Self(-3);

    /// The field is known but the certificate has no value for it.
    pub const NO_FIELD_VALUES: Self = Self(-4);

    /// A released value was not handed out by the library.
    pub const INVALID_FIELD_VALUE: Self = Self(-5);

    /// Whether this status says the requested field is unknown to the library.
    ///
    /// This is the one status that means "look elsewhere" rather than "failure".
    pub fn is_unknown_tag(&self) -> bool {
        *self == Self::UNKNOWN_TAG
    }

    /// Whether this status says a known field has no value in this certificate.
    pub fn is_no_field_values(&self) -> bool {
        *self == Self::NO_FIELD_VALUES
    }

    /// The raw numeric status.
    pub fn code(&self) -> i32 {
        self.0
    }
}

impl Display for LibraryStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let description = match *self {
            Self::INVALID_HANDLE => "invalid certificate handle",
            Self::INVALID_CERTIFICATE => "invalid certificate data",
            Self::UNKNOWN_TAG => "unknown field tag",
            Self::NO_FIELD_VALUES => "no values for field",
            Self::INVALID_FIELD_VALUE => "invalid field value",
            _ => "unrecognized status",
        };

        write!(f, "{} (status {})", description, self.0)
    }
}

impl std::error::Error for LibraryStatus {}

/// A field value copied out of a certificate library.
///
/// The bytes are only meaningful for the field they were copied from. Values
/// must be handed back to the library that produced them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldValue(Bytes);

impl FieldValue {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }
}

impl AsRef<[u8]> for FieldValue {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

/// Interface to a field-oriented certificate library.
///
/// Implementations represent a certificate *handle*. Values obtained from the
/// `copy_*` functions must be returned through the matching `release_*`
/// function on the same handle with the same OID.
pub trait CertificateFields {
    /// Whether this handle refers to nothing.
    fn is_null(&self) -> bool {
        false
    }

    /// Obtain the DER encoded certificate.
    fn certificate_data(&self) -> Result<&[u8], LibraryStatus>;

    /// Copy the first value of the field identified by `oid`.
    fn copy_first_field_value(&self, oid: &Oid) -> Result<FieldValue, LibraryStatus>;

    /// Return a value obtained from [Self::copy_first_field_value].
    fn release_first_field_value(&self, oid: &Oid, value: FieldValue)
        -> Result<(), LibraryStatus>;

    /// Copy all values of the field identified by `oid`.
    fn copy_field_values(&self, oid: &Oid) -> Result<Vec<FieldValue>, LibraryStatus>;

    /// Return values obtained from [Self::copy_field_values].
    fn release_field_values(&self, oid: &Oid, values: Vec<FieldValue>)
        -> Result<(), LibraryStatus>;
}

#[derive(Debug)]
struct LoadedCertificate {
    cert: CapturedX509Certificate,
    outstanding: AtomicUsize,
}

impl LoadedCertificate {
    fn lend<T>(&self, value: T) -> T {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        value
    }

    fn reclaim(&self) -> Result<(), LibraryStatus> {
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .map(|_| ())
            .map_err(|_| LibraryStatus::INVALID_FIELD_VALUE)
    }

    fn recognized_values(&self, oid: &Oid) -> impl Iterator<Item = FieldValue> + '_ {
        let cert: &x509_certificate::rfc5280::Certificate = self.cert.as_ref();
        let oid = oid.clone();

        cert.iter_extensions()
            .filter(move |extension| extension.id.as_ref() == oid.as_ref())
            .map(|extension| FieldValue::new(extension.value.clone().into_bytes()))
    }

    fn unrecognized_values(&self) -> impl Iterator<Item = FieldValue> + '_ {
        let cert: &x509_certificate::rfc5280::Certificate = self.cert.as_ref();

        cert.iter_extensions()
            .filter(|extension| !is_recognized_extension(&extension.id))
            .map(|extension| {
                let captured = extension.encode_ref().to_captured(Mode::Der);

                FieldValue::new(Bytes::copy_from_slice(captured.as_slice()))
            })
    }

    fn values(&self, oid: &Oid) -> Result<Vec<FieldValue>, LibraryStatus> {
        let values = if oid.as_ref() == OID_UNRECOGNIZED_EXTENSIONS.as_ref() {
            self.unrecognized_values().collect::<Vec<_>>()
        } else if is_recognized_extension(oid) {
            self.recognized_values(oid).collect::<Vec<_>>()
        } else {
            return Err(LibraryStatus::UNKNOWN_TAG);
        };

        if values.is_empty() {
            Err(LibraryStatus::NO_FIELD_VALUES)
        } else {
            Ok(values)
        }
    }
}

/// A handle on an X.509 certificate exposing the [CertificateFields] interface.
///
/// Handles are cheap to clone; clones refer to the same certificate and share
/// accounting of values that haven't been released yet. A default constructed
/// handle is null.
#[derive(Clone, Debug, Default)]
pub struct CertificateRef {
    inner: Option<Arc<LoadedCertificate>>,
}

impl CertificateRef {
    /// Construct a handle that refers to nothing.
    pub fn null() -> Self {
        Self::default()
    }

    /// Construct an instance from DER encoded certificate data.
    pub fn from_der(data: impl Into<Vec<u8>>) -> Result<Self, CodesignUtilError> {
        Ok(CapturedX509Certificate::from_der(data)?.into())
    }

    /// Construct an instance from PEM encoded certificate data.
    pub fn from_pem(data: impl AsRef<[u8]>) -> Result<Self, CodesignUtilError> {
        Ok(CapturedX509Certificate::from_pem(data)?.into())
    }

    /// The parsed certificate this handle refers to, if any.
    pub fn certificate(&self) -> Option<&CapturedX509Certificate> {
        self.inner.as_ref().map(|loaded| &loaded.cert)
    }

    /// Number of copied field values or value arrays not yet released.
    pub fn outstanding_field_values(&self) -> usize {
        self.inner
            .as_ref()
            .map(|loaded| loaded.outstanding.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    fn loaded(&self) -> Result<&LoadedCertificate, LibraryStatus> {
        self.inner
            .as_deref()
            .ok_or(LibraryStatus::INVALID_HANDLE)
    }
}

impl From<CapturedX509Certificate> for CertificateRef {
    fn from(cert: CapturedX509Certificate) -> Self {
        Self {
            inner: Some(Arc::new(LoadedCertificate {
                cert,
                outstanding: AtomicUsize::new(0),
            })),
        }
    }
}

impl CertificateFields for CertificateRef {
    fn is_null(&self) -> bool {
        self.inner.is_none()
    }

    fn certificate_data(&self) -> Result<&[u8], LibraryStatus> {
        let data = self.loaded()?.cert.constructed_data();

        if data.is_empty() {
            Err(LibraryStatus::INVALID_CERTIFICATE)
        } else {
            Ok(data)
        }
    }

    fn copy_first_field_value(&self, oid: &Oid) -> Result<FieldValue, LibraryStatus> {
        let loaded = self.loaded()?;

        let first = loaded
            .values(oid)?
            .into_iter()
            .next()
            .ok_or(LibraryStatus::NO_FIELD_VALUES)?;

        Ok(loaded.lend(first))
    }

    fn release_first_field_value(
        &self,
        _oid: &Oid,
        _value: FieldValue,
    ) -> Result<(), LibraryStatus> {
        self.loaded()?.reclaim()
    }

    fn copy_field_values(&self, oid: &Oid) -> Result<Vec<FieldValue>, LibraryStatus> {
        let loaded = self.loaded()?;

        Ok(loaded.lend(loaded.values(oid)?))
    }

    fn release_field_values(
        &self,
        _oid: &Oid,
        _values: Vec<FieldValue>,
    ) -> Result<(), LibraryStatus> {
        self.loaded()?.reclaim()
    }
}
