use anyhow::Result;
use portero::cli::{actions, actions::Action, start};

#[tokio::main]
async fn main() -> Result<()> {
    let action = start()?;

    match action {
        Action::Server(args) => actions::server::execute(args).await?,
        Action::RegisterClient(args) => actions::client::execute(args).await?,
    }

    Ok(())
}
