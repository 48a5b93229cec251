use std::io::{self, Read};
use std::time::Duration;

/// Shared HTTP client. Every request issued through it carries the configured
/// User-Agent and observes the run-wide network timeout.
pub struct HttpClient {
    agent: ureq::Agent,
    user_agent: Box<str>,
}

pub struct Request {
    inner: ureq::Request,
}

pub struct Response {
    reader: Box<dyn Read>,
}

pub enum Error {
    /// The server answered with a non-2xx status. The body is still
    /// available; several provider protocols put their diagnostics there.
    Status(u16, Response),

    /// The connection was established but the peer's certificate did not
    /// validate. Kept apart from [`Error::Transport`] so callers can refuse
    /// to put credentials on an unverified channel.
    Tls(Box<str>),

    /// Everything else that kept a response from arriving.
    Transport(Box<str>),
}

impl HttpClient {
    pub fn new(user_agent: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();

        Self {
            agent,
            user_agent: user_agent.into(),
        }
    }

    pub fn get(&self, url: &str) -> Request {
        Request {
            inner: self.agent.get(url).set("User-Agent", &self.user_agent),
        }
    }
}

impl Request {
    pub fn query(mut self, param: &str, value: &str) -> Self {
        self.inner = self.inner.query(param, value);
        self
    }

    pub fn call(self) -> Result<Response, Error> {
        match self.inner.call() {
            Ok(resp) => Ok(Response {
                reader: Box::new(resp.into_reader()),
            }),

            Err(ureq::Error::Status(code, resp)) => Err(Error::Status(
                code,
                Response {
                    reader: Box::new(resp.into_reader()),
                },
            )),

            Err(ureq::Error::Transport(tp)) => {
                let reason = tp.to_string();

                // rustls reports validation failures as "invalid peer
                // certificate: ...", native-tls as "certificate verify
                // failed". Other handshake or socket errors mention no
                // certificate at all.
                if reason.to_ascii_lowercase().contains("certificate") {
                    Err(Error::Tls(reason.into()))
                } else {
                    Err(Error::Transport(reason.into()))
                }
            }
        }
    }
}

impl Response {
    /// Reads the body into a string, capped at 2 MiB. The bodies we deal in
    /// are one-line tokens; anything larger is not worth buffering.
    pub fn into_string(self) -> Result<String, io::Error> {
        let mut buf = Vec::with_capacity(256);
        self.reader.take(2 * 1024 * 1024).read_to_end(&mut buf)?;
        String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
