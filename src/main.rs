//! Binary entry point; all behavior lives in the library crate.

use sentry_attest::config::Config;

#[tokio::main]
async fn main() {
    let config = Config::load();
    sentry_attest::run(config).await;
}
