use immunity_core::config::WarnLevel;
use immunity_core::Pipeline;
use std::path::Path;
use std::sync::Arc;

pub fn run(root: &Path, port: Option<u16>) -> anyhow::Result<()> {
    let pipeline = Arc::new(Pipeline::open(root)?);
    let config = pipeline.config();
    for warning in config.validate() {
        match warning.level {
            WarnLevel::Error => tracing::error!("config: {}", warning.message),
            WarnLevel::Warning => tracing::warn!("config: {}", warning.message),
        }
    }
    let port = port.unwrap_or(config.server.port);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(immunity_server::serve(pipeline, port))
}
