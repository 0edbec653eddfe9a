#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = bulkmail::config::find_config_file()?;
    let bulkmail = bulkmail::config::load(&config_path)?;

    bulkmail.run().await
}
