use crate::archive::ArchiveLayout;
use crate::classifier::PatternTable;
use crate::cli::open_db;
use crate::error::Result;
use crate::settings::{load_settings, save_settings, shellexpand_path};

pub fn run(data_dir: Option<String>) -> Result<()> {
    let mut settings = load_settings();
    if let Some(dir) = data_dir {
        settings.data_dir = shellexpand_path(&dir);
    }

    std::fs::create_dir_all(settings.inbox_path())?;
    ArchiveLayout::new(settings.archive_path()).ensure_dirs()?;
    open_db(&settings)?;

    let patterns = settings.patterns_path();
    if !patterns.exists() {
        PatternTable::builtin().save(&patterns)?;
        println!("Wrote default broker patterns to {}", patterns.display());
    }
    save_settings(&settings)?;

    println!("Data directory: {}", settings.data_path().display());
    println!("Inbox:          {}", settings.inbox_path().display());
    println!("Archive:        {}", settings.archive_path().display());
    println!("Database:       {}", settings.db_path().display());
    Ok(())
}
