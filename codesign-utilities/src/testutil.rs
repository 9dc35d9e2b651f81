// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::certificate_library::*,
    bcder::{encode::Values, ConstOid, Mode, OctetString, Oid},
    bytes::Bytes,
    std::cell::Cell,
    x509_certificate::{rfc5280, KeyAlgorithm, X509CertificateBuilder},
};

/// DER `NULL`, the value Apple uses for its marker extensions.
pub const NULL_EXTENSION_VALUE: &[u8] = &[0x05, 0x00];

/// An empty DER `SEQUENCE`.
pub const EMPTY_SEQUENCE: &[u8] = &[0x30, 0x00];

/// Key usage `BIT STRING` asserting digitalSignature.
pub const KEY_USAGE_DIGITAL_SIGNATURE: &[u8] = &[0x03, 0x02, 0x07, 0x80];

/// Extended key usage `SEQUENCE` holding the code signing purpose.
pub const EKU_CODE_SIGNING: &[u8] = &[
    0x30, 0x0a, 0x06, 0x08, 0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x03, 0x03,
];

/// A self-signed RSA certificate carrying subject key identifier, authority
/// key identifier, and basic constraints extensions.
pub const X509_CERTIFICATE: &str = "-----BEGIN CERTIFICATE-----\n\
        MIIDkzCCAnugAwIBAgIUDNhjvv6ol8EZG5YhNniO4pAiUQEwDQYJKoZIhvcNAQEL\n\
        BQAwWTELMAkGA1UEBhMCVVMxEzARBgNVBAgMCkNhbGlmb3JuaWExEDAOBgNVBAoM\n\
        B3Rlc3RpbmcxDTALBgNVBAsMBHVuaXQxFDASBgNVBAMMC1VuaXQgVGVzdGVyMB4X\n\
        DTIxMDMxNjE2MDkyOFoXDTI2MDkwNjE2MDkyOFowWTELMAkGA1UEBhMCVVMxEzAR\n\
        BgNVBAgMCkNhbGlmb3JuaWExEDAOBgNVBAoMB3Rlc3RpbmcxDTALBgNVBAsMBHVu\n\
        aXQxFDASBgNVBAMMC1VuaXQgVGVzdGVyMIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8A\n\
        MIIBCgKCAQEAtqxfPHnHz95bJ4ttY5xpuyKjBuEchuZ7l5cqpo2XbzlubY6J0co8\n\
        RSbnKfBsqaSsLLBFbhuKIZg2IqTXR3DI1cdazKZROhWU70Qu0bhYJhWNDy3XQxbR\n\
        alItmdUQpFv/kPHm0UZYa+D4/6hrCg8xyIHJgAzl8yKs5TvpQPcaHcQn0+mstHIx\n\
        tVi9fgIH+54Muzr1a/wg3+KW76KB2fXvkmZk7Nf4F1UA7xGXApO4R9dhwW+yPzRw\n\
        7nDhBO5CZJV1RrsG+fjIcP4CqCxHGeuOCuiWnPAB/TVTOjHTTMcmbeqUdKtPKKnq\n\
        Mz/mKCIQ67ZUS5ETM8N1Utv79dMYfu0g8wIDAQABo1MwUTAdBgNVHQ4EFgQUkiWC\n\
        PwIRoykbi6mtOjWNR0X1eFEwHwYDVR0jBBgwFoAUkiWCPwIRoykbi6mtOjWNR0X1\n\
        eFEwDwYDVR0TAQH/BAUwAwEB/zANBgkqhkiG9w0BAQsFAAOCAQEAAN4plkAcXZIx\n\
        4KqM5AueYqYtR1y8HAaVz+5BKAWyiQJxhktAJJr7o8Yafde7SrUMfEVGDvPa2xuG\n\
        xhx5d2L3G/FDUhHbsmM3Yp3XTGkS5VwH2nHi6x4HBEpLJZfTbbTDQgS1AdtrQg0V\n\
        VY4ph7n/F0sjJL9pmpTdRx1Z2OrwYpJfWOEIA3NDflYvby9Ubb29uVRsFWrgBijl\n\
        3NIzXHvoJ2Fd+Crkc43+wWZ55hcbwSgkC1/T1mFNzd4klwncH4Rqw2KDkEFdWKmM\n\
        CiRnpyZ52+8FW64s952/SGtMs4P3fFNnWpL3njNDnfxa+r+aWDtz12PJc5FyzlkC\n\
        P4ysBX3CuA==\n\
        -----END CERTIFICATE-----";

/// Mint a self-signed certificate carrying the given extensions.
pub fn certificate_with_extensions(extensions: &[(&ConstOid, bool, &[u8])]) -> CertificateRef {
    let mut builder = X509CertificateBuilder::new(KeyAlgorithm::Ed25519);

    for (oid, critical, data) in extensions {
        builder.add_extension_der_data(owned_oid(oid), *critical, *data);
    }

    let (cert, _, _) = builder.create_with_random_keypair().unwrap();

    CertificateRef::from(cert)
}

/// DER encoding of an X.509 extension record.
pub fn extension_record(oid: &ConstOid, critical: bool, value: &[u8]) -> FieldValue {
    let extension = rfc5280::Extension {
        id: owned_oid(oid),
        critical: Some(critical),
        value: OctetString::new(Bytes::copy_from_slice(value)),
    };

    let captured = extension.encode_ref().to_captured(Mode::Der);
    let record = FieldValue::new(Bytes::copy_from_slice(captured.as_slice()));

    record
}

/// A scripted certificate library that counts every call made against it.
pub struct MockCertificate {
    pub null: bool,
    pub data: Result<Vec<u8>, LibraryStatus>,
    pub first_field: Result<FieldValue, LibraryStatus>,
    pub field_values: Result<Vec<FieldValue>, LibraryStatus>,
    pub release: Result<(), LibraryStatus>,
    pub first_copies: Cell<usize>,
    pub first_releases: Cell<usize>,
    pub values_copies: Cell<usize>,
    pub values_releases: Cell<usize>,
    pub last_values_oid: Cell<Option<Oid>>,
}

impl Default for MockCertificate {
    fn default() -> Self {
        Self {
            null: false,
            data: Ok(vec![0x30, 0x00, 0x00]),
            first_field: Err(LibraryStatus::UNKNOWN_TAG),
            field_values: Err(LibraryStatus::NO_FIELD_VALUES),
            release: Ok(()),
            first_copies: Cell::new(0),
            first_releases: Cell::new(0),
            values_copies: Cell::new(0),
            values_releases: Cell::new(0),
            last_values_oid: Cell::new(None),
        }
    }
}

impl MockCertificate {
    /// Whether every successful copy was matched by a release.
    pub fn balanced(&self) -> bool {
        let first_ok = if self.first_field.is_ok() {
            self.first_copies.get()
        } else {
            0
        };
        let values_ok = if self.field_values.is_ok() {
            self.values_copies.get()
        } else {
            0
        };

        first_ok == self.first_releases.get() && values_ok == self.values_releases.get()
    }
}

impl CertificateFields for MockCertificate {
    fn is_null(&self) -> bool {
        self.null
    }

    fn certificate_data(&self) -> Result<&[u8], LibraryStatus> {
        self.data.as_ref().map(|x| x.as_slice()).map_err(|e| *e)
    }

    fn copy_first_field_value(&self, _oid: &Oid) -> Result<FieldValue, LibraryStatus> {
        self.first_copies.set(self.first_copies.get() + 1);
        self.first_field.clone()
    }

    fn release_first_field_value(
        &self,
        _oid: &Oid,
        _value: FieldValue,
    ) -> Result<(), LibraryStatus> {
        self.first_releases.set(self.first_releases.get() + 1);
        self.release
    }

    fn copy_field_values(&self, oid: &Oid) -> Result<Vec<FieldValue>, LibraryStatus> {
        self.values_copies.set(self.values_copies.get() + 1);
        self.last_values_oid.set(Some(oid.clone()));
        self.field_values.clone()
    }

    fn release_field_values(
        &self,
        _oid: &Oid,
        _values: Vec<FieldValue>,
    ) -> Result<(), LibraryStatus> {
        self.values_releases.set(self.values_releases.get() + 1);
        self.release
    }
}
