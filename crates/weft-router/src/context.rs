//! Certificate store backing the router's verification hooks.

use std::collections::HashMap;

use tracing::debug;

use weft_core::message::EndpointId;

/// Holds the router's own certificate, the CA certificate and the
/// certificates received from remote endpoints, all in PEM form.
///
/// Verification itself is a pluggable concern; this store only keeps the
/// material the certificate-query messages serve.
#[derive(Debug, Default)]
pub struct RouterContext {
    own_cert_pem: Vec<u8>,
    ca_cert_pem: Vec<u8>,
    remote_certs: HashMap<EndpointId, Vec<u8>>,
}

impl RouterContext {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs this router's own certificate.
    pub fn add_own_certificate_pem(&mut self, pem: &[u8]) {
        self.own_cert_pem = pem.to_vec();
    }

    /// Installs the certificate authority's certificate.
    pub fn add_ca_certificate_pem(&mut self, pem: &[u8]) {
        self.ca_cert_pem = pem.to_vec();
    }

    /// Stores a certificate received from a remote endpoint.
    /// Returns false for empty certificates.
    pub fn add_remote_certificate_pem(&mut self, node_id: EndpointId, pem: &[u8]) -> bool {
        if pem.is_empty() {
            return false;
        }
        debug!(node = node_id, "storing remote endpoint certificate");
        self.remote_certs.insert(node_id, pem.to_vec());
        true
    }

    /// This router's own certificate, empty when not configured.
    pub fn own_certificate_pem(&self) -> &[u8] {
        &self.own_cert_pem
    }

    /// The CA certificate, empty when not configured.
    pub fn ca_certificate_pem(&self) -> &[u8] {
        &self.ca_cert_pem
    }

    /// A remote endpoint's certificate, when one was stored.
    pub fn remote_certificate_pem(&self, node_id: EndpointId) -> Option<&[u8]> {
        self.remote_certs.get(&node_id).map(Vec::as_slice)
    }
}
