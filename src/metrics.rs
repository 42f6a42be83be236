//! Thin StatsD client (component A4): counters and timers fire-and-forget
//! over UDP, with a no-op fallback when `STATSD_HOST`/`STATSD_PORT` aren't
//! configured. Thread-safe, init-once, read-many for the lifetime of the
//! process.

use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::Config;

enum Sink {
    Udp { socket: UdpSocket, target: String },
    NoOp,
}

/// Cheap to clone; every handle shares the same underlying UDP socket.
#[derive(Clone)]
pub struct Metrics {
    sink: Arc<Sink>,
}

impl Metrics {
    pub fn from_config(cfg: &Config) -> Self {
        match (&cfg.statsd_host, cfg.statsd_port) {
            (Some(host), Some(port)) => match UdpSocket::bind("0.0.0.0:0") {
                Ok(socket) => Metrics {
                    sink: Arc::new(Sink::Udp {
                        socket,
                        target: format!("{host}:{port}"),
                    }),
                },
                Err(err) => {
                    warn!(error = %err, "failed to bind statsd socket, metrics disabled");
                    Metrics { sink: Arc::new(Sink::NoOp) }
                }
            },
            _ => Metrics { sink: Arc::new(Sink::NoOp) },
        }
    }

    pub fn counter(&self, name: &str, value: i64) {
        self.send(format!("{name}:{value}|c"));
    }

    pub fn timing(&self, name: &str, duration: Duration) {
        self.send(format!("{name}:{}|ms", duration.as_millis()));
    }

    fn send(&self, line: String) {
        if let Sink::Udp { socket, target } = self.sink.as_ref() {
            // Best-effort: metrics delivery failures never affect a request.
            let _ = socket.send_to(line.as_bytes(), target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_sink_does_not_panic() {
        let cfg = Config::default();
        let metrics = Metrics::from_config(&cfg);
        metrics.counter("requests.total", 1);
        metrics.timing("request.duration", Duration::from_millis(5));
    }
}
