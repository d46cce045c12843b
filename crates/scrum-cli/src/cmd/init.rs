use anyhow::Context;
use scrum_core::{config::Config, paths, SqliteStore};
use std::path::Path;

pub fn run(root: &Path, name: Option<&str>) -> anyhow::Result<()> {
    let project_name = name.map(str::to_string).unwrap_or_else(|| {
        root.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string())
    });

    println!("Initializing scrum in: {}", root.display());

    let config_path = paths::config_path(root);
    if !config_path.exists() {
        let cfg = Config::new(&project_name);
        cfg.save(root).context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    } else {
        println!("  exists:  {}", paths::CONFIG_FILE);
    }

    let config = Config::load(root).context("failed to load config.yaml")?;
    let db = config.db_path(root);
    let existed = db.exists();
    SqliteStore::open(&db).with_context(|| format!("failed to create {}", db.display()))?;
    let shown = db.strip_prefix(root).unwrap_or(&db).display().to_string();
    if existed {
        println!("  exists:  {shown}");
    } else {
        println!("  created: {shown}");
    }

    Ok(())
}
