use std::{env, path::PathBuf};

use tokio::fs;

/// Writes the bound port to `<tmp>/<app_name>/<app_name>.port` so local tooling can find the server.
pub async fn write_port_file(app_name: &str, port: u16) -> std::io::Result<PathBuf> {
    let dir = env::temp_dir().join(app_name);
    let path = dir.join(format!("{app_name}.port"));
    tracing::debug!("Writing port {} to {:?}", port, path);
    fs::create_dir_all(&dir).await?;
    fs::write(&path, port.to_string()).await?;
    Ok(path)
}
