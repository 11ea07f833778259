use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

/// Collectors describing traffic to the token endpoint
///
/// Metrics are fire-and-forget: neither registration conflicts nor
/// observation failures may ever get in the way of issuing a token.
#[derive(Clone)]
pub(crate) struct TokenMetrics {
    requests: IntCounterVec,
    duration: HistogramVec,
}

impl std::fmt::Debug for TokenMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("TokenMetrics")
    }
}

impl TokenMetrics {
    pub(crate) fn new(subsystem: &str, registry: &Registry) -> Self {
        let requests = IntCounterVec::new(
            Opts::new(
                "token_request_count",
                "Number of requests sent to the token endpoint",
            )
            .subsystem(subsystem),
            &["grant_type", "result"],
        )
        .expect("valid metric definition");
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "token_request_duration_seconds",
                "Time taken by requests to the token endpoint",
            )
            .subsystem(subsystem)
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["grant_type"],
        )
        .expect("valid metric definition");

        register(registry, Box::new(requests.clone()));
        register(registry, Box::new(duration.clone()));

        Self { requests, duration }
    }

    pub(crate) fn observe(&self, grant_type: &str, result: &str, elapsed: f64) {
        self.requests
            .with_label_values(&[grant_type, result])
            .inc();
        self.duration
            .with_label_values(&[grant_type])
            .observe(elapsed);
    }
}

fn register(registry: &Registry, collector: Box<dyn prometheus::core::Collector>) {
    match registry.register(collector) {
        Ok(()) => {}
        Err(prometheus::Error::AlreadyReg) => {
            // A collector with the same definition is already in place,
            // typically because two managers share one registry.
            tracing::debug!("token metrics collector already registered");
        }
        Err(error) => {
            tracing::warn!(
                error = (&error as &dyn std::error::Error),
                "unable to register token metrics collector"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_registration_is_tolerated() {
        let registry = Registry::new();
        let first = TokenMetrics::new("fetcher", &registry);
        let second = TokenMetrics::new("fetcher", &registry);

        first.observe("client_credentials", "ok", 0.1);
        second.observe("refresh_token", "error", 0.2);

        assert!(!registry.gather().is_empty());
    }
}
