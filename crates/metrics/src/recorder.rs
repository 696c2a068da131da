//! Recorder installation.

/// Handle to the installed recorder.
#[derive(Clone)]
pub struct MetricsHandle {
    #[cfg(feature = "prometheus")]
    inner: metrics_exporter_prometheus::PrometheusHandle,
}

impl MetricsHandle {
    /// Render all recorded metrics in Prometheus text format.
    ///
    /// Returns an empty string when the `prometheus` feature is disabled.
    pub fn render(&self) -> String {
        #[cfg(feature = "prometheus")]
        {
            self.inner.render()
        }
        #[cfg(not(feature = "prometheus"))]
        {
            String::new()
        }
    }
}

/// Install the global metrics recorder.
///
/// Must be called at most once per process.
#[cfg(feature = "prometheus")]
pub fn init_metrics() -> anyhow::Result<MetricsHandle> {
    let inner = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
    tracing::info!("prometheus metrics recorder installed");
    Ok(MetricsHandle { inner })
}

/// Without the `prometheus` feature there is nothing to install.
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics() -> anyhow::Result<MetricsHandle> {
    tracing::debug!("metrics recorder disabled at compile time");
    Ok(MetricsHandle {})
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(all(test, not(feature = "prometheus")))]
mod tests {
    use super::*;

    #[test]
    fn disabled_recorder_renders_nothing() {
        let handle = init_metrics().unwrap();
        assert!(handle.render().is_empty());
    }
}
