mod app;
mod settings;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    app::run().await
}
