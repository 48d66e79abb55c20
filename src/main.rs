use ember_chain::{config::Config, node::node::Node};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    let node = Node::new(config)?;
    node.start().await?;

    // the node runs entirely on background tasks
    tokio::signal::ctrl_c().await?;
    Ok(())
}
