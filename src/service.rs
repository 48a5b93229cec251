use thiserror::Error;

use crate::engine::{Account, UpdateTransport};
use crate::http::{self, HttpClient};

/// The provider accepts at most this many record ids in one update request.
/// Callers partition larger id sets into batches; the executor itself sends
/// whatever it is handed.
pub const MAX_IDS_PER_UPDATE: usize = 20;

/// The only body the provider uses to signal success. Matched exactly,
/// untrimmed.
const SUCCESS_TOKEN: &str = "success";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TlsFailure {
    /// Validation of the endpoint's certificate failed. Credentials must
    /// never travel over this channel.
    #[error("the TLS certificate presented by {endpoint} is not valid: {reason}")]
    CertificateInvalid { endpoint: Box<str>, reason: Box<str> },

    /// The endpoint could not be reached at all. Unreachable is not
    /// insecure; the two are reported apart.
    #[error("update endpoint unreachable: {0}")]
    Unreachable(Box<str>),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum UpdateError {
    /// The provider answered with something other than the success token.
    /// The body is carried verbatim for the operator.
    #[error("provider rejected the update: {0:?}")]
    Rejected(Box<str>),

    #[error("update request failed in transit: {0}")]
    Transport(Box<str>),
}

/// Speaks the provider's update protocol: a GET carrying the credentials,
/// the record ids and the new IP as query parameters. No retries here; the
/// scheduler invoking the next run is the retry policy.
pub struct HttpUpdater<'a> {
    client: &'a HttpClient,
}

impl<'a> HttpUpdater<'a> {
    pub fn new(client: &'a HttpClient) -> Self {
        Self { client }
    }
}

impl UpdateTransport for HttpUpdater<'_> {
    /// Certificate-validating probe of `endpoint`, sent before any request
    /// that carries credentials. An HTTP error status still proves the
    /// certificate and counts as a verified channel.
    fn verify_tls(&self, endpoint: &str) -> Result<(), TlsFailure> {
        match self.client.get(endpoint).call() {
            Ok(_) | Err(http::Error::Status(_, _)) => Ok(()),
            Err(http::Error::Tls(reason)) => Err(TlsFailure::CertificateInvalid {
                endpoint: endpoint.into(),
                reason,
            }),
            Err(http::Error::Transport(reason)) => Err(TlsFailure::Unreachable(reason)),
        }
    }

    fn submit_update(
        &self,
        account: &Account,
        ids: &[Box<str>],
        ip: &str,
    ) -> Result<(), UpdateError> {
        let response = self
            .client
            .get(&account.update_ip_url)
            .query("username", &account.username)
            .query("password", &account.password)
            .query("id", &ids.join(","))
            .query("ip", ip)
            .call();

        let body = match response {
            Ok(resp) | Err(http::Error::Status(_, resp)) => resp
                .into_string()
                .map_err(|e| UpdateError::Transport(e.to_string().into()))?,

            Err(http::Error::Tls(reason)) | Err(http::Error::Transport(reason)) => {
                return Err(UpdateError::Transport(reason))
            }
        };

        if body == SUCCESS_TOKEN {
            Ok(())
        } else {
            Err(UpdateError::Rejected(body.into()))
        }
    }
}
