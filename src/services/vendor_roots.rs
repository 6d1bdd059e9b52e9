//! Vendor Root Trust Anchors (component C collaborator) — §4.2 implementation
//! note: "the vendor attestation root public keys are compiled in via
//! `include_bytes!` over DER files checked into a `certs/` directory".
//!
//! These certificates are deployment data, not fabricated by this crate:
//! operators replace `certs/*.der` with the published Google Hardware
//! Attestation root CAs (and any StrongBox-specific roots) for their fleet.
//! Immutable after process start, like the Fingerprint Catalogue.

use std::sync::LazyLock;
use x509_parser::prelude::*;

const GOOGLE_HARDWARE_ROOT_DER: &[u8] = include_bytes!("../../certs/google_hardware_root.der");
const GOOGLE_STRONGBOX_ROOT_DER: &[u8] = include_bytes!("../../certs/google_strongbox_root.der");

const ROOT_DERS: &[&[u8]] = &[GOOGLE_HARDWARE_ROOT_DER, GOOGLE_STRONGBOX_ROOT_DER];

/// SPKI raw bytes of every trusted root, parsed once at first use. `verify_chain`
/// compares a chain's terminal certificate's public key against this set.
static TRUSTED_ROOT_SPKIS: LazyLock<Vec<Vec<u8>>> = LazyLock::new(|| {
    ROOT_DERS
        .iter()
        .map(|der| {
            let (_, cert) = X509Certificate::from_der(der).expect("embedded vendor root must parse");
            cert.public_key().raw.to_vec()
        })
        .collect()
});

/// Borrowed view over the trusted root SPKIs, in the shape
/// `attestation_verifier::verify` expects.
pub fn trusted_root_spkis() -> Vec<&'static [u8]> {
    TRUSTED_ROOT_SPKIS.iter().map(Vec::as_slice).collect()
}
