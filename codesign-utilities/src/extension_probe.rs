// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Probing certificates for the presence of extensions.

A certificate library may only understand a fixed set of extension OIDs.
Apple's code signing extensions (`1.2.840.113635.100.6.*`) are typically not
in that set. So presence testing is done in two phases:

1. Ask the library for the field directly. If the library knows the OID,
   its answer is final.
2. If the library reports the OID as unknown, walk its bag of unrecognized
   extension records and compare each record's OID.

Every value obtained from the library is held by a guard that hands it back
to the library when the guard goes away, whatever the exit path.
*/

use {
    crate::{
        certificate_library::{
            owned_oid, CertificateFields, FieldValue, LibraryStatus, OID_UNRECOGNIZED_EXTENSIONS,
        },
        error::CodesignUtilError,
    },
    bcder::{
        decode::{Constructed, IntoSource},
        Mode, Oid,
    },
    log::{debug, warn},
};

/// A first field value on loan from a certificate library.
struct FirstFieldValue<'a, C: CertificateFields + ?Sized> {
    cert: &'a C,
    oid: &'a Oid,
    value: Option<FieldValue>,
}

impl<'a, C: CertificateFields + ?Sized> FirstFieldValue<'a, C> {
    fn release(mut self) -> Result<(), LibraryStatus> {
        match self.value.take() {
            Some(value) => self.cert.release_first_field_value(self.oid, value),
            None => Ok(()),
        }
    }
}

impl<'a, C: CertificateFields + ?Sized> Drop for FirstFieldValue<'a, C> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            if let Err(status) = self.cert.release_first_field_value(self.oid, value) {
                warn!("failed to release value of field {}: {}", self.oid, status);
            }
        }
    }
}

/// An array of field values on loan from a certificate library.
struct FieldValues<'a, C: CertificateFields + ?Sized> {
    cert: &'a C,
    oid: &'a Oid,
    values: Option<Vec<FieldValue>>,
}

impl<'a, C: CertificateFields + ?Sized> FieldValues<'a, C> {
    fn iter(&self) -> impl Iterator<Item = &FieldValue> {
        self.values.iter().flatten()
    }

    fn release(mut self) -> Result<(), LibraryStatus> {
        match self.values.take() {
            Some(values) => self.cert.release_field_values(self.oid, values),
            None => Ok(()),
        }
    }
}

impl<'a, C: CertificateFields + ?Sized> Drop for FieldValues<'a, C> {
    fn drop(&mut self) {
        if let Some(values) = self.values.take() {
            if let Err(status) = self.cert.release_field_values(self.oid, values) {
                warn!("failed to release values of field {}: {}", self.oid, status);
            }
        }
    }
}

/// Obtain the OID of a DER encoded X.509 extension record.
///
/// Only the leading `extnID` field is decoded. Returns `None` if the data
/// doesn't start with a SEQUENCE holding an OID.
pub fn extension_record_oid(data: &[u8]) -> Option<Oid> {
    let data = bytes::Bytes::copy_from_slice(data);

    Constructed::decode(data.into_source(), Mode::Der, |cons| {
        cons.take_sequence(|cons| {
            let id = Oid::take_from(cons)?;
            cons.skip_all()?;

            Ok(id)
        })
    })
    .ok()
}

/// Determine whether a certificate carries an extension with the given OID.
///
/// This works for extensions the certificate library doesn't recognize. Only
/// presence is reported; the extension value isn't inspected.
pub fn certificate_has_field<C: CertificateFields + ?Sized>(
    cert: &C,
    oid: &Oid,
) -> Result<bool, CodesignUtilError> {
    if cert.is_null() {
        return Err(CodesignUtilError::NullHandle);
    }

    match cert.copy_first_field_value(oid) {
        Ok(value) => {
            let value = FirstFieldValue {
                cert,
                oid,
                value: Some(value),
            };
            value.release()?;

            return Ok(true);
        }
        Err(status) if status.is_unknown_tag() => {
            debug!("field {} not known to certificate library; searching unrecognized extensions", oid);
        }
        Err(status) if status.is_no_field_values() => {
            return Ok(false);
        }
        Err(status) => {
            return Err(status.into());
        }
    }

    let bag_oid = owned_oid(&OID_UNRECOGNIZED_EXTENSIONS);

    let values = match cert.copy_field_values(&bag_oid) {
        Ok(values) => FieldValues {
            cert,
            oid: &bag_oid,
            values: Some(values),
        },
        // No unrecognized extensions means no match.
        Err(_) => return Ok(false),
    };

    let found = values
        .iter()
        .filter_map(|value| extension_record_oid(value.as_ref()))
        .any(|id| id.as_ref() == oid.as_ref());

    // The answer is known once the bag is scanned.
    if let Err(status) = values.release() {
        warn!("failed to release unrecognized extensions: {}", status);
    }

    Ok(found)
}
