use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::ip::IpUnavailable;
use crate::resolve::ResolveFailure;
use crate::service::{TlsFailure, UpdateError, MAX_IDS_PER_UPDATE};

/// One provider login and the records it owns. Built once per run by the
/// configuration supplier; the engine only ever borrows it.
pub struct Account {
    pub name: Box<str>,
    pub username: Box<str>,
    pub password: Box<str>,
    pub get_ip_url: Box<str>,
    pub update_ip_url: Box<str>,
    pub records: Vec<Record>,
}

/// A DNS name to keep in sync and the provider-side ids behind it. All ids
/// of one record share the owning account's password.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub name: Box<str>,
    pub ids: Vec<Box<str>>,
}

// Keeps the password out of anything that formats an account, log lines
// included.
impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("name", &self.name)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("get_ip_url", &self.get_ip_url)
            .field("update_ip_url", &self.update_ip_url)
            .field("records", &self.records)
            .finish()
    }
}

/// Where the caller's current public IP comes from.
pub trait IpSource {
    fn discover(&self, url: &str) -> Result<Box<str>, IpUnavailable>;
}

/// Where a record's presently-published IP comes from.
pub trait PublishedIpSource {
    fn published_ip(&self, record_name: &str) -> Result<Box<str>, ResolveFailure>;
}

/// The guarded channel to the provider's update endpoint.
pub trait UpdateTransport {
    fn verify_tls(&self, endpoint: &str) -> Result<(), TlsFailure>;

    fn submit_update(
        &self,
        account: &Account,
        ids: &[Box<str>],
        ip: &str,
    ) -> Result<(), UpdateError>;
}

/// Consumes exactly one classified outcome per record per run.
pub trait Reporter {
    fn outcome(&self, account: &Account, record: &Record, outcome: &UpdateOutcome);
}

/// Default reporter: one log line per record. The account password never
/// reaches it in the first place.
pub struct LogReporter;

impl Reporter for LogReporter {
    fn outcome(&self, account: &Account, record: &Record, outcome: &UpdateOutcome) {
        if outcome.is_success() {
            log::info!("[{}] record {}: {}", account.name, record.name, outcome);
        } else {
            log::error!("[{}] record {}: {}", account.name, record.name, outcome);
        }
    }
}

/// Terminal state of one record's reconciliation pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    NoChangeNeeded,
    UpdateSucceeded,
    UpdateFailed(Box<str>),
    Aborted(AbortReason),
}

impl UpdateOutcome {
    /// The two terminal states that leave the record in a good place.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            UpdateOutcome::NoChangeNeeded | UpdateOutcome::UpdateSucceeded
        )
    }
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateOutcome::NoChangeNeeded => write!(f, "no change needed"),
            UpdateOutcome::UpdateSucceeded => write!(f, "update succeeded"),
            UpdateOutcome::UpdateFailed(body) => {
                write!(f, "update failed, provider said {:?}", body)
            }
            UpdateOutcome::Aborted(reason) => write!(f, "aborted: {}", reason),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AbortReason {
    #[error("{0}")]
    IpUnavailable(IpUnavailable),

    #[error("{0}")]
    ResolveFailed(ResolveFailure),

    #[error("{0}")]
    CertificateInvalid(TlsFailure),

    #[error("{0}")]
    EndpointUnreachable(TlsFailure),
}

/// One record name paired with how its pass ended.
pub struct RunSummary {
    pub outcomes: Vec<(Box<str>, UpdateOutcome)>,
}

impl RunSummary {
    /// True iff every record ended in a success state; drives the process
    /// exit status.
    pub fn clean(&self) -> bool {
        self.outcomes.iter().all(|(_, outcome)| outcome.is_success())
    }
}

/// Compare-and-correct over every configured record, once per invocation.
pub struct Engine<'a> {
    ip_source: &'a dyn IpSource,
    published: &'a dyn PublishedIpSource,
    transport: &'a dyn UpdateTransport,
    reporter: &'a dyn Reporter,
}

impl<'a> Engine<'a> {
    pub fn new(
        ip_source: &'a dyn IpSource,
        published: &'a dyn PublishedIpSource,
        transport: &'a dyn UpdateTransport,
        reporter: &'a dyn Reporter,
    ) -> Self {
        Self {
            ip_source,
            published,
            transport,
            reporter,
        }
    }

    /// Reconciles every record of every account. One record's failure never
    /// blocks the next; the summary carries one outcome per record.
    pub fn run(&self, accounts: &[Account]) -> RunSummary {
        let mut outcomes = Vec::new();

        // One discovery GET per distinct endpoint per run; the current IP
        // does not change mid-run.
        let mut discovered: HashMap<Box<str>, Result<Box<str>, IpUnavailable>> = HashMap::new();

        for account in accounts {
            let current = discovered
                .entry(account.get_ip_url.clone())
                .or_insert_with(|| {
                    let result = self.ip_source.discover(&account.get_ip_url);
                    match &result {
                        Ok(ip) => log::info!("current public IP per {}: {}", account.get_ip_url, ip),
                        Err(e) => log::error!("{}", e),
                    }
                    result
                })
                .clone();

            for record in &account.records {
                let outcome = match &current {
                    Ok(ip) => self.reconcile(account, record, ip),
                    Err(e) => UpdateOutcome::Aborted(AbortReason::IpUnavailable(e.clone())),
                };

                self.reporter.outcome(account, record, &outcome);
                outcomes.push((record.name.clone(), outcome));
            }
        }

        RunSummary { outcomes }
    }

    fn reconcile(&self, account: &Account, record: &Record, current_ip: &str) -> UpdateOutcome {
        let published = match self.published.published_ip(&record.name) {
            Ok(ip) => ip,
            Err(e) => return UpdateOutcome::Aborted(AbortReason::ResolveFailed(e)),
        };

        if *published == *current_ip {
            return UpdateOutcome::NoChangeNeeded;
        }

        log::debug!(
            "record {}: published {} differs from current {}",
            record.name,
            published,
            current_ip
        );

        if let Err(failure) = self.transport.verify_tls(&account.update_ip_url) {
            let reason = match failure {
                f @ TlsFailure::CertificateInvalid { .. } => AbortReason::CertificateInvalid(f),
                f @ TlsFailure::Unreachable(_) => AbortReason::EndpointUnreachable(f),
            };
            return UpdateOutcome::Aborted(reason);
        }

        // Every id lands in exactly one batch, so each sees at most one
        // update attempt per run. Batches are submitted and judged
        // independently; a failed one does not stop those after it.
        let mut first_failure = None;

        for batch in record.ids.chunks(MAX_IDS_PER_UPDATE) {
            match self.transport.submit_update(account, batch, current_ip) {
                Ok(()) => log::debug!(
                    "record {}: batch of {} id(s) accepted",
                    record.name,
                    batch.len()
                ),
                Err(e) => {
                    log::warn!(
                        "record {}: batch of {} id(s) failed: {}",
                        record.name,
                        batch.len(),
                        e
                    );
                    first_failure.get_or_insert(e);
                }
            }
        }

        match first_failure {
            None => UpdateOutcome::UpdateSucceeded,
            Some(UpdateError::Rejected(body)) => UpdateOutcome::UpdateFailed(body),
            Some(UpdateError::Transport(reason)) => UpdateOutcome::UpdateFailed(reason),
        }
    }
}
