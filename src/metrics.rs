use anyhow::Context;
use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Call once per process.
    pub fn install() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        describe_all();
        Ok(Self { handle })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}

pub fn describe_all() {
    describe_counter!("watch_cycles_total", "Watch cycles started, per platform");
    describe_counter!("watch_posts_fetched_total", "Posts returned by platform fetches");
    describe_counter!("watch_posts_new_total", "Posts that passed the newness and dedup filters");
    describe_counter!("watch_fetch_errors_total", "Failed account fetches, by error kind");
    describe_counter!("classify_outcomes_total", "Classification outcomes, by result");
    describe_counter!("notify_deliveries_total", "Notification attempts, by sink and outcome");
}
