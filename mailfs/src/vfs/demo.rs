//! End-to-end demo over the directory-backed store: write, commit, remount, read.

use std::error::Error;
use std::path::Path;

use crate::config::MailFsConfig;
use crate::vfs::sdk::LocalClient;

/// Writes a file under `root`, reopens the store from scratch and checks that
/// the content and directory structure came back.
pub async fn e2e_localfs_demo<P: AsRef<Path>>(
    root: P,
    config: MailFsConfig,
) -> Result<(), Box<dyn Error>> {
    let root = root.as_ref();
    let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

    {
        let cli = LocalClient::open_local(root, config.clone()).await?;
        cli.mkdir_p("/docs/nested").await?;
        cli.create("/docs/readme.txt").await?;
        cli.write_at("/docs/readme.txt", 0, b"hello").await?;
        cli.sync("/docs/readme.txt").await?;
        cli.write_file("/docs/nested/blob.bin", &data).await?;
    }

    let cli = LocalClient::open_local(root, config).await?;
    if cli.read_at("/docs/readme.txt", 0, 5).await? != b"hello" {
        return Err("readme mismatch after remount".into());
    }
    if cli.read_file("/docs/nested/blob.bin").await? != data {
        return Err("blob mismatch after remount".into());
    }
    let names: Vec<String> = cli
        .readdir("/docs")
        .await?
        .into_iter()
        .map(|e| e.name)
        .collect();
    if names != ["nested", "readme.txt"] {
        return Err(format!("unexpected listing {names:?}").into());
    }
    Ok(())
}
