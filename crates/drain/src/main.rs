use anyhow::Result;
use drain::runtime::{boot, serve};

#[tokio::main]
async fn main() -> Result<()> {
    let config = boot::boot()?;
    serve::serve(config).await
}
