//! SVID certificate inspection
//!
//! The agent's identity on disk lives in DER certificates: `agent_svid.der`
//! carries the agent's SPIFFE ID and serial number, `bundle.der` the trust
//! domain. Both are read best-effort; a missing or unreadable certificate is
//! a probe issue, not an error.

use spire_model::Probed;
use std::path::Path;
use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};

/// Identity data extracted from one certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertIdentity {
    /// The URI subject alternative name, i.e. the SPIFFE ID
    pub uri: String,
    /// Certificate serial number, decimal rendering
    pub serial: String,
}

/// Extract the URI SAN and serial number from a DER certificate file
pub fn cert_identity(path: &Path) -> Probed<CertIdentity> {
    let der = match std::fs::read(path) {
        Ok(der) => der,
        Err(e) => return Probed::issue(format!("{}: {e}", path.display())),
    };
    let (_, cert) = match X509Certificate::from_der(&der) {
        Ok(parsed) => parsed,
        Err(e) => {
            return Probed::issue(format!(
                "failed to parse certificate {}: {e}",
                path.display()
            ));
        }
    };

    let san = match cert.subject_alternative_name() {
        Ok(Some(san)) => san,
        Ok(None) => {
            return Probed::issue(format!(
                "certificate {} carries no subject alternative name",
                path.display()
            ));
        }
        Err(e) => {
            return Probed::issue(format!(
                "bad subject alternative name in {}: {e}",
                path.display()
            ));
        }
    };
    let uri = san.value.general_names.iter().find_map(|name| match name {
        GeneralName::URI(uri) => Some(uri.to_string()),
        _ => None,
    });
    match uri {
        Some(uri) => Probed::ok(CertIdentity {
            uri,
            serial: cert.tbs_certificate.serial.to_string(),
        }),
        None => Probed::issue(format!(
            "certificate {} carries no URI subject alternative name",
            path.display()
        )),
    }
}
