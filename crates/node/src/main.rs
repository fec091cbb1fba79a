use std::io;

use anyhow::Context;
use tracing::{info, warn};

use relaybus_node::{Node, NodeSettings};
use relaybus_routing::UntilSuccessfulConfig;

fn main() -> anyhow::Result<()> {
    relaybus_observability::init();

    let settings = NodeSettings::from_env()?;
    let config = UntilSuccessfulConfig::from_env().context("invalid router configuration")?;
    let node = Node::build(config, &settings)?;

    let resumed = node.router().start()?;
    if resumed.failed > 0 {
        warn!(failed = resumed.failed, "some stored events could not be resumed");
    }

    let summary = node.feed(io::stdin().lock())?;
    info!(
        accepted = summary.accepted,
        rejected = summary.rejected,
        "input closed"
    );

    let left = node.drain(settings.drain_timeout)?;
    if left > 0 {
        info!(pending = left, "events left in store for the next run");
    }

    node.shutdown();
    Ok(())
}
