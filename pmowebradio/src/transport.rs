//! Blocking HTTP transport built on `ureq`.
//!
//! [`Stream::run`] connects to the stream URL, hands the response headers
//! and then the body to the stream until it is stopped, aborted or the
//! server closes the connection.
//!
//! Servers answering with a bare `ICY 200 OK` status line are not valid
//! HTTP and are rejected by `ureq` itself; the in-body header block is only
//! seen when a proxy or relay wraps it in a regular HTTP response.

use std::{io::Read, time::Duration};

use tracing::{debug, info, warn};
use ureq::Agent;

use crate::{
    error::Result,
    handler::StreamHandler,
    settings::HttpSettings,
    stream::{Flow, Stream, StreamState},
};

fn build_agent(settings: &HttpSettings) -> Agent {
    Agent::config_builder()
        .max_redirects(settings.max_redirects)
        .http_status_as_error(false)
        .timeout_connect(Some(Duration::from_secs(settings.connect_timeout_secs)))
        .build()
        .into()
}

impl<H: StreamHandler> Stream<H> {
    /// Streams the URL until the end of the transfer, then resets the stream.
    ///
    /// Blocks the calling thread; use [`Stream::stop_handle`] to stop it
    /// from elsewhere. A graceful stop returns `Ok(())`, an aborted stream
    /// returns the error already reported to the handler.
    pub fn run(&mut self) -> Result<()> {
        self.transfer();

        let result = match (self.state(), self.last_error()) {
            (StreamState::AbortError, Some(err)) => Err(err.clone()),
            _ => Ok(()),
        };
        self.reset();
        result
    }

    fn transfer(&mut self) {
        let http = self.settings().http.clone();
        let agent = build_agent(&http);

        info!(url = %self.url(), "Connecting to stream");
        let mut request = agent.get(self.url()).header("User-Agent", &http.user_agent);
        if http.request_icy_metadata {
            request = request.header("Icy-MetaData", "1");
        }

        let response = match request.call() {
            Ok(response) => response,
            Err(err) => {
                self.transport_failed(format!("Downloading failed: {err}"));
                return;
            }
        };

        let status = response.status().as_u16();
        debug!(url = %self.url(), status, "Stream response");
        for (name, value) in response.headers() {
            let mut line = Vec::with_capacity(name.as_str().len() + 2 + value.len());
            line.extend_from_slice(name.as_str().as_bytes());
            line.extend_from_slice(b": ");
            line.extend_from_slice(value.as_bytes());
            if self.handle_header_line(status, &line) == Flow::Stop {
                return;
            }
        }

        if !response.status().is_success() {
            self.transport_failed(format!("HTTP status {status}"));
            return;
        }

        let mut reader = response.into_body().into_reader();
        let mut buf = vec![0u8; http.read_chunk_size];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    debug!(url = %self.url(), "Server closed the stream");
                    return;
                }
                Ok(n) => {
                    if self.ingest(&buf[..n]) == Flow::Stop {
                        return;
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(url = %self.url(), "Stream read failed: {}", err);
                    self.transport_failed(format!("Downloading failed: {err}"));
                    return;
                }
            }
        }
    }
}
